//! Invitation handlers: the provisioning flow endpoint and the read-only
//! configuration sanity check.

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::{HeaderMap, header},
};
use validator::Validate;

use crate::AppState;
use crate::dtos::{
    ConfigPresenceResponse, ErrorResponse, InviteMemberRequest, InviteMemberResponse,
};
use crate::services::error::InviteError;

/// Invite a member into a tenant.
///
/// POST /invitations
#[utoipa::path(
    post,
    path = "/invitations",
    request_body = InviteMemberRequest,
    responses(
        (status = 200, description = "Membership bound; may be a partial success with emailSent=false", body = InviteMemberResponse),
        (status = 400, description = "Missing or invalid parameters", body = ErrorResponse),
        (status = 401, description = "Missing or rejected credential", body = ErrorResponse),
        (status = 403, description = "Caller lacks the owner role for the active policy", body = ErrorResponse),
        (status = 500, description = "Downstream failure", body = ErrorResponse),
    ),
    security(("bearer_auth" = [])),
    tag = "Invitations"
)]
#[tracing::instrument(skip(state, headers, payload))]
pub async fn invite_member(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<InviteMemberRequest>, JsonRejection>,
) -> Result<Json<InviteMemberResponse>, InviteError> {
    let Json(request) =
        payload.map_err(|e| InviteError::MissingParams(Some(e.body_text())))?;
    request
        .validate()
        .map_err(|e| InviteError::MissingParams(Some(e.to_string())))?;

    let bearer = bearer_token(&headers);
    let outcome = state.coordinator.invite_member(bearer, &request).await?;

    Ok(Json(InviteMemberResponse::from(outcome)))
}

/// Report which configuration values are present, for operational
/// sanity-checking. Secret values never leave the process.
///
/// GET /invitations/config
#[utoipa::path(
    get,
    path = "/invitations/config",
    responses(
        (status = 200, description = "Configuration presence booleans", body = ConfigPresenceResponse),
    ),
    tag = "Invitations"
)]
pub async fn config_presence(State(state): State<AppState>) -> Json<ConfigPresenceResponse> {
    Json(state.config.presence())
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_token_strips_the_scheme() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer abc123"),
        );
        assert_eq!(bearer_token(&headers), Some("abc123"));
    }

    #[test]
    fn bearer_token_rejects_other_schemes_and_empty_values() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Basic abc123"),
        );
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(bearer_token(&headers), None);

        headers.remove(header::AUTHORIZATION);
        assert_eq!(bearer_token(&headers), None);
    }
}
