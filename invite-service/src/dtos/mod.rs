//! Request/response DTOs for the invitation flow.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::services::coordinator::InviteOutcome;

/// Bounds on the invitation validity window.
pub const MIN_EXPIRES_IN_DAYS: i64 = 1;
pub const MAX_EXPIRES_IN_DAYS: i64 = 30;

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct InviteMemberRequest {
    #[validate(length(min = 1, message = "tenant_id is required"))]
    #[schema(example = "8b9f2c1e-4a6d-4f0e-9c3b-2d1a5e7f8c90")]
    pub tenant_id: String,

    #[validate(email(message = "Invalid email format"))]
    #[schema(example = "new@x.com")]
    pub email: String,

    /// Tenant role granted on binding. Falls back to the configured default
    /// in direct-binding deployments; required for token invites.
    #[schema(example = "usuario")]
    pub role: Option<String>,

    /// Direct-binding variant: approval state written on the membership row.
    #[schema(example = false)]
    pub approved: Option<bool>,

    /// Token-invite variant: invitation validity window in days.
    #[schema(example = 7, minimum = 1, maximum = 30)]
    pub expires_in_days: Option<i64>,
}

/// The binding variant a request resolved to after boundary validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    Direct { approved: bool },
    TokenInvite { expires_in_days: i64 },
}

#[derive(Debug, Serialize, ToSchema)]
pub struct InviteMemberResponse {
    pub ok: bool,

    #[schema(example = "550e8400-e29b-41d4-a716-446655440000")]
    pub user_id: String,

    /// Invitation token, token-invite deployments only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// One-time action link; absent when link generation failed (the
    /// operation still succeeds).
    #[serde(rename = "actionLink", skip_serializing_if = "Option::is_none")]
    pub action_link: Option<String>,

    #[serde(rename = "emailSent", skip_serializing_if = "Option::is_none")]
    pub email_sent: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl From<InviteOutcome> for InviteMemberResponse {
    fn from(outcome: InviteOutcome) -> Self {
        let message = if outcome.email_sent {
            Some("Invitation email sent.".to_string())
        } else if outcome.action_link.is_some() {
            Some("Invitation created; share the action link manually.".to_string())
        } else {
            None
        };

        Self {
            ok: true,
            user_id: outcome.user_id,
            token: outcome.token,
            action_link: outcome.action_link,
            email_sent: Some(outcome.email_sent),
            message,
        }
    }
}

/// Structured error body: `ok` is always false, `error` carries the code.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub ok: bool,

    #[schema(example = "FORBIDDEN_NOT_OWNER")]
    pub error: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Configuration presence booleans for operational sanity-checking.
#[derive(Debug, Serialize, ToSchema)]
pub struct ConfigPresenceResponse {
    pub ok: bool,
    pub has_backend_url: bool,
    pub has_anon_key: bool,
    pub has_service_role_key: bool,
    pub has_app_base_url: bool,
    pub has_smtp: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_requires_tenant_and_well_formed_email() {
        let req = InviteMemberRequest {
            tenant_id: "".to_string(),
            email: "not-an-email".to_string(),
            role: None,
            approved: None,
            expires_in_days: None,
        };
        let errors = req.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("tenant_id"));
        assert!(errors.field_errors().contains_key("email"));
    }

    #[test]
    fn degraded_response_keeps_link_and_flags_email() {
        let response = InviteMemberResponse::from(InviteOutcome {
            user_id: "u1".to_string(),
            role: "admin".to_string(),
            approved: false,
            created: true,
            token: Some("tok".to_string()),
            action_link: Some("https://app.example/accept".to_string()),
            email_sent: false,
        });
        assert!(response.ok);
        assert_eq!(response.email_sent, Some(false));
        assert!(response.action_link.is_some());
        let json = serde_json::to_value(&response).unwrap();
        assert!(json.get("actionLink").is_some());
        assert_eq!(json.get("emailSent").unwrap(), false);
    }
}
