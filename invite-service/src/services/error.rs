use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::dtos::ErrorResponse;

/// Errors of the invitation flow, surfaced to the caller as structured
/// codes. Ordering follows the step sequence of the flow.
#[derive(Debug, Error)]
pub enum InviteError {
    #[error("tenant_id, email and role are required")]
    MissingParams(Option<String>),

    #[error("expires_in_days must be between 1 and 30")]
    InvalidRange,

    #[error("Caller credential missing or rejected")]
    NotAuthenticated,

    #[error("Caller is not the platform owner")]
    NotPlatformOwner,

    #[error("Only an approved owner of this tenant may invite members")]
    ForbiddenNotOwner,

    #[error("Owner check failed: {0}")]
    OwnerCheckFailed(String),

    #[error("Account listing failed: {0}")]
    ListUsersFailed(String),

    #[error("Invitee account could not be created or found")]
    UserNotFoundOrInviteFailed,

    #[error("Membership upsert failed: {0}")]
    MembershipUpsertFailed(String),

    #[error("Invitation token generation failed: {0}")]
    TokenGenerationFailed(String),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl InviteError {
    pub fn code(&self) -> &'static str {
        match self {
            InviteError::MissingParams(_) => "MISSING_PARAMS",
            InviteError::InvalidRange => "INVALID_RANGE",
            InviteError::NotAuthenticated => "NOT_AUTHENTICATED",
            InviteError::NotPlatformOwner => "NOT_PLATFORM_OWNER",
            InviteError::ForbiddenNotOwner => "FORBIDDEN_NOT_OWNER",
            InviteError::OwnerCheckFailed(_) => "OWNER_CHECK_FAILED",
            InviteError::ListUsersFailed(_) => "LIST_USERS_FAILED",
            InviteError::UserNotFoundOrInviteFailed => "USER_NOT_FOUND_OR_INVITE_FAILED",
            InviteError::MembershipUpsertFailed(_) => "MEMBERSHIP_UPSERT_FAILED",
            InviteError::TokenGenerationFailed(_) => "TOKEN_GENERATION_FAILED",
            InviteError::Unexpected(_) => "UNEXPECTED",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            InviteError::MissingParams(_)
            | InviteError::InvalidRange
            | InviteError::UserNotFoundOrInviteFailed => StatusCode::BAD_REQUEST,
            InviteError::NotAuthenticated => StatusCode::UNAUTHORIZED,
            InviteError::NotPlatformOwner | InviteError::ForbiddenNotOwner => {
                StatusCode::FORBIDDEN
            }
            InviteError::OwnerCheckFailed(_)
            | InviteError::ListUsersFailed(_)
            | InviteError::MembershipUpsertFailed(_)
            | InviteError::TokenGenerationFailed(_)
            | InviteError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn details(&self) -> Option<String> {
        match self {
            InviteError::MissingParams(details) => details.clone(),
            InviteError::OwnerCheckFailed(details)
            | InviteError::ListUsersFailed(details)
            | InviteError::MembershipUpsertFailed(details)
            | InviteError::TokenGenerationFailed(details)
            | InviteError::Unexpected(details) => Some(details.clone()),
            _ => None,
        }
    }
}

impl IntoResponse for InviteError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorResponse {
            ok: false,
            error: self.code().to_string(),
            details: self.details(),
        };
        (status, Json(body)).into_response()
    }
}
