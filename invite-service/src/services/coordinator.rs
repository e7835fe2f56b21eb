//! Invitation coordinator: turns an authorized (tenant, email, role)
//! request into a bound membership, plus an invitation token, action link
//! and email notification where the deployment's flow configuration asks
//! for them.
//!
//! The flow is a single linear sequence. Validation, authentication,
//! authorization, account resolution and membership binding gate the
//! operation; everything after the binding degrades to partial success so
//! the caller always keeps a manual fallback (the token and/or link).

use std::sync::Arc;

use crate::config::{AppUrls, AuthorizationPolicy, BindingMode, FlowConfig, MailMode};
use crate::dtos::{Binding, InviteMemberRequest, MAX_EXPIRES_IN_DAYS, MIN_EXPIRES_IN_DAYS};
use crate::services::data::{InviteParams, MembershipStore, MembershipUpsert};
use crate::services::error::InviteError;
use crate::services::identity::{Caller, IdentityProvider, LinkKind};
use crate::services::mail::MailProvider;

/// Platform-level role that marks the cross-tenant owner.
const PLATFORM_OWNER_ROLE: &str = "owner";

/// Everything a successful invitation produced.
#[derive(Debug, Clone)]
pub struct InviteOutcome {
    pub user_id: String,
    pub role: String,
    pub approved: bool,
    /// Whether the invitee's account was freshly created by this call.
    pub created: bool,
    pub token: Option<String>,
    pub action_link: Option<String>,
    pub email_sent: bool,
}

pub struct InvitationCoordinator {
    identity: Arc<dyn IdentityProvider>,
    memberships: Arc<dyn MembershipStore>,
    mailer: Option<Arc<dyn MailProvider>>,
    flow: FlowConfig,
    urls: AppUrls,
}

impl InvitationCoordinator {
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        memberships: Arc<dyn MembershipStore>,
        mailer: Option<Arc<dyn MailProvider>>,
        flow: FlowConfig,
        urls: AppUrls,
    ) -> Self {
        Self {
            identity,
            memberships,
            mailer,
            flow,
            urls,
        }
    }

    /// Run the invitation flow end to end. Safe to retry after any failure:
    /// account creation, membership binding and invitation rows are each
    /// idempotent on their own keys.
    pub async fn invite_member(
        &self,
        bearer: Option<&str>,
        request: &InviteMemberRequest,
    ) -> Result<InviteOutcome, InviteError> {
        // Validation first, before any network call.
        let binding = self.resolve_binding(request)?;
        let role = self.resolve_role(request)?;
        if request.tenant_id.trim().is_empty() || request.email.trim().is_empty() {
            return Err(InviteError::MissingParams(None));
        }

        let bearer = bearer.ok_or(InviteError::NotAuthenticated)?;

        // Resolve the caller.
        let caller = self.identity.get_user(bearer).await.map_err(|e| {
            tracing::warn!(error = %e, "caller credential rejected");
            InviteError::NotAuthenticated
        })?;

        // Authorize per the active policy.
        self.authorize(bearer, &caller, &request.tenant_id).await?;

        // Resolve or create the invitee's account.
        let (user_id, created) = self.resolve_account(&request.email).await?;

        // Bind the membership. Token invites start pending; approval is
        // granted when the invitee completes acceptance.
        let approved = match binding {
            Binding::Direct { approved } => approved,
            Binding::TokenInvite { .. } => false,
        };
        let membership = MembershipUpsert {
            tenant_id: request.tenant_id.clone(),
            user_id: user_id.clone(),
            role: role.clone(),
            approved,
        };
        self.memberships
            .upsert_membership(&membership)
            .await
            .map_err(|e| InviteError::MembershipUpsertFailed(e.to_string()))?;

        // Mint the invitation token, under the caller's own authorization
        // context so the invitation's creator is attributed server-side.
        let (token, expires_in_days) = match binding {
            Binding::TokenInvite { expires_in_days } => {
                let params = InviteParams {
                    tenant_id: request.tenant_id.clone(),
                    email: request.email.clone(),
                    role: role.clone(),
                    expires_in_days,
                };
                let token = self
                    .memberships
                    .create_invite(bearer, &params)
                    .await
                    .map_err(|e| InviteError::TokenGenerationFailed(e.to_string()))?;
                (Some(token), Some(expires_in_days))
            }
            Binding::Direct { .. } => (None, None),
        };

        // Generate the action link. Failure is non-fatal: the operation
        // still succeeds, just without a link to hand out.
        let redirect_to = self.redirect_target(token.as_deref());
        let kind = if created {
            LinkKind::Invite
        } else {
            LinkKind::Recovery
        };
        let action_link = match self
            .identity
            .generate_link(kind, &request.email, &redirect_to)
            .await
        {
            Ok(link) => Some(link),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    email = %request.email,
                    "action link generation failed; responding without a link"
                );
                None
            }
        };

        // Dispatch mail. Failure never hides the link.
        let email_sent = self
            .dispatch_mail(&request.email, action_link.as_deref(), created, expires_in_days)
            .await;

        tracing::info!(
            user_id = %user_id,
            tenant_id = %request.tenant_id,
            role = %role,
            approved,
            created,
            email_sent,
            "member invited"
        );

        Ok(InviteOutcome {
            user_id,
            role,
            approved,
            created,
            token,
            action_link,
            email_sent,
        })
    }

    fn resolve_binding(&self, request: &InviteMemberRequest) -> Result<Binding, InviteError> {
        match self.flow.binding {
            BindingMode::Direct => Ok(Binding::Direct {
                approved: request.approved.unwrap_or(false),
            }),
            BindingMode::TokenInvite => {
                let days = request
                    .expires_in_days
                    .unwrap_or(self.flow.default_expires_in_days);
                if !(MIN_EXPIRES_IN_DAYS..=MAX_EXPIRES_IN_DAYS).contains(&days) {
                    return Err(InviteError::InvalidRange);
                }
                Ok(Binding::TokenInvite {
                    expires_in_days: days,
                })
            }
        }
    }

    fn resolve_role(&self, request: &InviteMemberRequest) -> Result<String, InviteError> {
        match (&self.flow.binding, &request.role) {
            (_, Some(role)) if !role.trim().is_empty() => Ok(role.clone()),
            (BindingMode::Direct, _) => Ok(self.flow.default_role.clone()),
            (BindingMode::TokenInvite, _) => {
                Err(InviteError::MissingParams(Some("role is required".into())))
            }
        }
    }

    async fn authorize(
        &self,
        bearer: &str,
        caller: &Caller,
        tenant_id: &str,
    ) -> Result<(), InviteError> {
        match self.flow.policy {
            AuthorizationPolicy::PlatformOwner => {
                if caller.app_role.as_deref() == Some(PLATFORM_OWNER_ROLE) {
                    Ok(())
                } else {
                    Err(InviteError::NotPlatformOwner)
                }
            }
            AuthorizationPolicy::TenantOwner => {
                match self.memberships.is_tenant_owner(bearer, tenant_id).await {
                    Ok(true) => Ok(()),
                    Ok(false) => Err(InviteError::ForbiddenNotOwner),
                    Err(e) => Err(InviteError::OwnerCheckFailed(e.to_string())),
                }
            }
        }
    }

    /// Try the admin invite first (creates the account and lets the
    /// provider send its native invite email); fall back to the bounded
    /// listing when the account already exists. Two concurrent invites for
    /// the same new email may race on creation; the loser lands in the
    /// fallback path and resolves the same account id.
    async fn resolve_account(&self, email: &str) -> Result<(String, bool), InviteError> {
        let redirect_to = self.welcome_redirect();
        match self.identity.invite_by_email(email, &redirect_to).await {
            Ok(user) => return Ok((user.id, true)),
            Err(e) => {
                tracing::debug!(error = %e, "admin invite failed, falling back to account lookup");
            }
        }

        let users = self
            .identity
            .list_users(1, self.flow.user_list_page_size)
            .await
            .map_err(|e| InviteError::ListUsersFailed(e.to_string()))?;

        let wanted = email.to_lowercase();
        let found = users.into_iter().find(|u| {
            u.email
                .as_deref()
                .map(|e| e.to_lowercase() == wanted)
                .unwrap_or(false)
        });

        match found {
            Some(user) => Ok((user.id, false)),
            None => Err(InviteError::UserNotFoundOrInviteFailed),
        }
    }

    fn redirect_target(&self, token: Option<&str>) -> String {
        let base = self.urls.base_url.trim_end_matches('/');
        match token {
            Some(token) => format!(
                "{}{}?token={}",
                base,
                self.urls.accept_invite_path,
                urlencoding::encode(token)
            ),
            None => format!("{}{}", base, self.urls.welcome_path),
        }
    }

    fn welcome_redirect(&self) -> String {
        format!(
            "{}{}",
            self.urls.base_url.trim_end_matches('/'),
            self.urls.welcome_path
        )
    }

    async fn dispatch_mail(
        &self,
        to_email: &str,
        action_link: Option<&str>,
        created: bool,
        expires_in_days: Option<i64>,
    ) -> bool {
        match self.flow.mail {
            // The provider dispatched its own invite email iff the account
            // was freshly created; existing invitees rely on the returned
            // recovery link.
            MailMode::Native => created,
            MailMode::Smtp => {
                let Some(link) = action_link else {
                    return false;
                };
                let Some(mailer) = &self.mailer else {
                    tracing::warn!("smtp mail mode selected but no mailer configured");
                    return false;
                };
                if !mailer.verify().await {
                    tracing::warn!(
                        to = %to_email,
                        "smtp transport verification failed; skipping delivery, link stays in the response"
                    );
                    return false;
                }
                match mailer.send_invitation(to_email, link, expires_in_days).await {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::warn!(error = %e, to = %to_email, "invitation email dispatch failed");
                        false
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::data::MockMembershipStore;
    use crate::services::identity::{IdentityUser, MockIdentity};
    use crate::services::mail::MockMailProvider;

    fn flow(policy: AuthorizationPolicy, binding: BindingMode, mail: MailMode) -> FlowConfig {
        FlowConfig {
            policy,
            binding,
            mail,
            default_role: "usuario".to_string(),
            default_expires_in_days: 7,
            user_list_page_size: 1000,
        }
    }

    fn urls() -> AppUrls {
        AppUrls {
            base_url: "https://app.example.com".to_string(),
            accept_invite_path: "/accept-invite.html".to_string(),
            welcome_path: "/welcome.html".to_string(),
        }
    }

    fn platform_owner() -> Caller {
        Caller {
            user_id: "caller-1".to_string(),
            email: Some("owner@x.com".to_string()),
            app_role: Some("owner".to_string()),
        }
    }

    fn fresh_user(id: &str, email: &str) -> IdentityUser {
        IdentityUser {
            id: id.to_string(),
            email: Some(email.to_string()),
        }
    }

    fn request(tenant_id: &str, email: &str, role: Option<&str>) -> InviteMemberRequest {
        InviteMemberRequest {
            tenant_id: tenant_id.to_string(),
            email: email.to_string(),
            role: role.map(str::to_string),
            approved: None,
            expires_in_days: None,
        }
    }

    fn setup(
        identity: MockIdentity,
        memberships: MockMembershipStore,
        mailer: Option<MockMailProvider>,
        flow_config: FlowConfig,
    ) -> (
        InvitationCoordinator,
        Arc<MockIdentity>,
        Arc<MockMembershipStore>,
        Option<Arc<MockMailProvider>>,
    ) {
        let identity = Arc::new(identity);
        let memberships = Arc::new(memberships);
        let mailer = mailer.map(Arc::new);
        let coordinator = InvitationCoordinator::new(
            identity.clone(),
            memberships.clone(),
            mailer
                .clone()
                .map(|m| m as Arc<dyn MailProvider>),
            flow_config,
            urls(),
        );
        (coordinator, identity, memberships, mailer)
    }

    #[tokio::test]
    async fn direct_invite_creates_account_and_binds_membership() {
        let identity = MockIdentity {
            caller: Some(platform_owner()),
            invite_result: Some(fresh_user("user-new", "new@x.com")),
            link: Some("https://id.example.com/link".to_string()),
            ..Default::default()
        };
        let (coordinator, _, memberships, _) = setup(
            identity,
            MockMembershipStore::default(),
            None,
            flow(
                AuthorizationPolicy::PlatformOwner,
                BindingMode::Direct,
                MailMode::Native,
            ),
        );

        let req = request("T1", "new@x.com", Some("admin"));
        let outcome = coordinator
            .invite_member(Some("owner-token"), &req)
            .await
            .unwrap();

        assert_eq!(outcome.user_id, "user-new");
        assert!(outcome.created);
        assert!(!outcome.approved);
        assert!(outcome.token.is_none());
        // Native mode: the provider sent its invite email on creation.
        assert!(outcome.email_sent);

        let rows = memberships.bound_rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].tenant_id, "T1");
        assert_eq!(rows[0].user_id, "user-new");
        assert_eq!(rows[0].role, "admin");
        assert!(!rows[0].approved);
    }

    #[tokio::test]
    async fn reinvite_is_idempotent_and_returns_same_user() {
        let identity = MockIdentity {
            caller: Some(platform_owner()),
            invite_result: Some(fresh_user("user-1", "new@x.com")),
            link: Some("https://id.example.com/link".to_string()),
            ..Default::default()
        };
        let (coordinator, _, memberships, _) = setup(
            identity,
            MockMembershipStore::default(),
            None,
            flow(
                AuthorizationPolicy::PlatformOwner,
                BindingMode::Direct,
                MailMode::Native,
            ),
        );

        let req = request("T1", "new@x.com", Some("usuario"));
        let first = coordinator
            .invite_member(Some("owner-token"), &req)
            .await
            .unwrap();
        let second = coordinator
            .invite_member(Some("owner-token"), &req)
            .await
            .unwrap();

        assert_eq!(first.user_id, second.user_id);
        assert_eq!(memberships.bound_rows().len(), 1);
    }

    #[tokio::test]
    async fn existing_account_resolves_through_case_insensitive_lookup() {
        let identity = MockIdentity {
            caller: Some(platform_owner()),
            invite_result: None,
            users: vec![
                fresh_user("user-a", "Other@Y.com"),
                fresh_user("user-b", "Existing@X.com"),
            ],
            link: Some("https://id.example.com/link".to_string()),
            ..Default::default()
        };
        let (coordinator, identity, memberships, _) = setup(
            identity,
            MockMembershipStore::default(),
            None,
            flow(
                AuthorizationPolicy::PlatformOwner,
                BindingMode::Direct,
                MailMode::Native,
            ),
        );

        let req = request("T1", "existing@x.com", Some("usuario"));
        let outcome = coordinator
            .invite_member(Some("owner-token"), &req)
            .await
            .unwrap();

        assert_eq!(outcome.user_id, "user-b");
        assert!(!outcome.created);
        // Existing account in native mode: no provider email went out.
        assert!(!outcome.email_sent);

        // Role is overwritten on the existing membership key.
        let rows = memberships.bound_rows();
        assert_eq!(rows[0].role, "usuario");

        // The recovery link flavor is used for pre-existing accounts.
        let calls = identity.recorded_calls();
        assert!(calls.iter().any(|c| c.starts_with("generate_link:recovery:")));
    }

    #[tokio::test]
    async fn unresolvable_account_fails_the_flow() {
        let identity = MockIdentity {
            caller: Some(platform_owner()),
            invite_result: None,
            users: vec![fresh_user("user-a", "other@y.com")],
            ..Default::default()
        };
        let (coordinator, _, memberships, _) = setup(
            identity,
            MockMembershipStore::default(),
            None,
            flow(
                AuthorizationPolicy::PlatformOwner,
                BindingMode::Direct,
                MailMode::Native,
            ),
        );

        let req = request("T1", "missing@x.com", None);
        let err = coordinator
            .invite_member(Some("owner-token"), &req)
            .await
            .unwrap_err();

        assert!(matches!(err, InviteError::UserNotFoundOrInviteFailed));
        assert!(memberships.bound_rows().is_empty());
    }

    #[tokio::test]
    async fn non_owner_caller_is_rejected_without_side_effects() {
        let identity = MockIdentity {
            caller: Some(Caller {
                user_id: "caller-2".to_string(),
                email: Some("user@x.com".to_string()),
                app_role: Some("usuario".to_string()),
            }),
            invite_result: Some(fresh_user("user-new", "new@x.com")),
            ..Default::default()
        };
        let (coordinator, identity, memberships, _) = setup(
            identity,
            MockMembershipStore::default(),
            None,
            flow(
                AuthorizationPolicy::PlatformOwner,
                BindingMode::Direct,
                MailMode::Native,
            ),
        );

        let req = request("T1", "new@x.com", None);
        let err = coordinator
            .invite_member(Some("user-token"), &req)
            .await
            .unwrap_err();

        assert!(matches!(err, InviteError::NotPlatformOwner));
        assert!(memberships.bound_rows().is_empty());
        // The flow stopped at authorization; no provisioning call ran.
        let calls = identity.recorded_calls();
        assert_eq!(calls, vec!["get_user".to_string()]);
    }

    #[tokio::test]
    async fn tenant_owner_policy_requires_approved_owner_membership() {
        let flow_config = flow(
            AuthorizationPolicy::TenantOwner,
            BindingMode::TokenInvite,
            MailMode::Native,
        );

        // Caller owns T1: the invite goes through.
        let identity = MockIdentity {
            caller: Some(platform_owner()),
            invite_result: Some(fresh_user("user-new", "new@x.com")),
            link: Some("https://id.example.com/link".to_string()),
            ..Default::default()
        };
        let memberships = MockMembershipStore {
            owner_of: vec!["T1".to_string()],
            token: Some("invite-token".to_string()),
            ..Default::default()
        };
        let (coordinator, _, _, _) = setup(identity, memberships, None, flow_config.clone());
        let outcome = coordinator
            .invite_member(Some("owner-token"), &request("T1", "new@x.com", Some("admin")))
            .await
            .unwrap();
        assert_eq!(outcome.token.as_deref(), Some("invite-token"));

        // Caller does not own T2: forbidden, nothing written.
        let identity = MockIdentity {
            caller: Some(platform_owner()),
            invite_result: Some(fresh_user("user-new", "new@x.com")),
            ..Default::default()
        };
        let memberships = MockMembershipStore {
            owner_of: vec!["T1".to_string()],
            token: Some("invite-token".to_string()),
            ..Default::default()
        };
        let (coordinator, _, memberships, _) =
            setup(identity, memberships, None, flow_config.clone());
        let err = coordinator
            .invite_member(Some("owner-token"), &request("T2", "new@x.com", Some("admin")))
            .await
            .unwrap_err();
        assert!(matches!(err, InviteError::ForbiddenNotOwner));
        assert!(memberships.bound_rows().is_empty());

        // Owner query failure is a distinct server-side error.
        let identity = MockIdentity {
            caller: Some(platform_owner()),
            ..Default::default()
        };
        let memberships = MockMembershipStore {
            fail_owner_check: true,
            ..Default::default()
        };
        let (coordinator, _, _, _) = setup(identity, memberships, None, flow_config);
        let err = coordinator
            .invite_member(Some("owner-token"), &request("T1", "new@x.com", Some("admin")))
            .await
            .unwrap_err();
        assert!(matches!(err, InviteError::OwnerCheckFailed(_)));
    }

    #[tokio::test]
    async fn out_of_range_expiry_is_rejected_before_any_external_call() {
        for days in [0, 31, -1] {
            let identity = MockIdentity {
                caller: Some(platform_owner()),
                ..Default::default()
            };
            let (coordinator, identity, memberships, _) = setup(
                identity,
                MockMembershipStore::default(),
                None,
                flow(
                    AuthorizationPolicy::PlatformOwner,
                    BindingMode::TokenInvite,
                    MailMode::Native,
                ),
            );

            let mut req = request("T1", "new@x.com", Some("admin"));
            req.expires_in_days = Some(days);
            let err = coordinator
                .invite_member(Some("owner-token"), &req)
                .await
                .unwrap_err();

            assert!(matches!(err, InviteError::InvalidRange));
            assert!(identity.recorded_calls().is_empty());
            assert!(memberships.bound_rows().is_empty());
        }
    }

    #[tokio::test]
    async fn missing_bearer_is_not_authenticated() {
        let identity = MockIdentity {
            caller: Some(platform_owner()),
            ..Default::default()
        };
        let (coordinator, identity, _, _) = setup(
            identity,
            MockMembershipStore::default(),
            None,
            flow(
                AuthorizationPolicy::PlatformOwner,
                BindingMode::Direct,
                MailMode::Native,
            ),
        );

        let err = coordinator
            .invite_member(None, &request("T1", "new@x.com", None))
            .await
            .unwrap_err();

        assert!(matches!(err, InviteError::NotAuthenticated));
        assert!(identity.recorded_calls().is_empty());
    }

    #[tokio::test]
    async fn link_generation_failure_degrades_to_partial_success() {
        let identity = MockIdentity {
            caller: Some(platform_owner()),
            invite_result: Some(fresh_user("user-new", "new@x.com")),
            link: None,
            ..Default::default()
        };
        let memberships = MockMembershipStore {
            owner_of: vec!["T1".to_string()],
            token: Some("invite-token".to_string()),
            ..Default::default()
        };
        let mailer = MockMailProvider::default();
        let (coordinator, _, _, mailer) = setup(
            identity,
            memberships,
            Some(mailer),
            flow(
                AuthorizationPolicy::PlatformOwner,
                BindingMode::TokenInvite,
                MailMode::Smtp,
            ),
        );

        let outcome = coordinator
            .invite_member(Some("owner-token"), &request("T1", "new@x.com", Some("admin")))
            .await
            .unwrap();

        assert!(outcome.action_link.is_none());
        assert!(!outcome.email_sent);
        // The token survives as the manual fallback.
        assert_eq!(outcome.token.as_deref(), Some("invite-token"));
        assert!(mailer.unwrap().sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn mail_dispatch_failure_keeps_the_link() {
        let identity = MockIdentity {
            caller: Some(platform_owner()),
            invite_result: Some(fresh_user("user-new", "new@x.com")),
            link: Some("https://id.example.com/link".to_string()),
            ..Default::default()
        };
        let mailer = MockMailProvider {
            fail_send: true,
            ..Default::default()
        };
        let (coordinator, _, _, _) = setup(
            identity,
            MockMembershipStore::default(),
            Some(mailer),
            flow(
                AuthorizationPolicy::PlatformOwner,
                BindingMode::Direct,
                MailMode::Smtp,
            ),
        );

        let outcome = coordinator
            .invite_member(Some("owner-token"), &request("T1", "new@x.com", None))
            .await
            .unwrap();

        assert!(!outcome.email_sent);
        assert_eq!(
            outcome.action_link.as_deref(),
            Some("https://id.example.com/link")
        );
    }

    #[tokio::test]
    async fn failed_transport_verification_skips_dispatch() {
        let identity = MockIdentity {
            caller: Some(platform_owner()),
            invite_result: Some(fresh_user("user-new", "new@x.com")),
            link: Some("https://id.example.com/link".to_string()),
            ..Default::default()
        };
        let mailer = MockMailProvider {
            fail_verify: true,
            ..Default::default()
        };
        let (coordinator, _, _, mailer) = setup(
            identity,
            MockMembershipStore::default(),
            Some(mailer),
            flow(
                AuthorizationPolicy::PlatformOwner,
                BindingMode::Direct,
                MailMode::Smtp,
            ),
        );

        let outcome = coordinator
            .invite_member(Some("owner-token"), &request("T1", "new@x.com", None))
            .await
            .unwrap();

        assert!(!outcome.email_sent);
        assert!(outcome.action_link.is_some());
        assert!(mailer.unwrap().sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn token_generation_failure_is_terminal() {
        let identity = MockIdentity {
            caller: Some(platform_owner()),
            invite_result: Some(fresh_user("user-new", "new@x.com")),
            link: Some("https://id.example.com/link".to_string()),
            ..Default::default()
        };
        let memberships = MockMembershipStore {
            token: None,
            ..Default::default()
        };
        let (coordinator, _, _, _) = setup(
            identity,
            memberships,
            None,
            flow(
                AuthorizationPolicy::PlatformOwner,
                BindingMode::TokenInvite,
                MailMode::Native,
            ),
        );

        let err = coordinator
            .invite_member(Some("owner-token"), &request("T1", "new@x.com", Some("admin")))
            .await
            .unwrap_err();

        assert!(matches!(err, InviteError::TokenGenerationFailed(_)));
    }

    #[tokio::test]
    async fn upsert_failure_surfaces_and_is_retryable() {
        let identity = MockIdentity {
            caller: Some(platform_owner()),
            invite_result: Some(fresh_user("user-new", "new@x.com")),
            ..Default::default()
        };
        let memberships = MockMembershipStore {
            fail_upsert: true,
            ..Default::default()
        };
        let (coordinator, _, _, _) = setup(
            identity,
            memberships,
            None,
            flow(
                AuthorizationPolicy::PlatformOwner,
                BindingMode::Direct,
                MailMode::Native,
            ),
        );

        let err = coordinator
            .invite_member(Some("owner-token"), &request("T1", "new@x.com", None))
            .await
            .unwrap_err();

        assert!(matches!(err, InviteError::MembershipUpsertFailed(_)));
    }

    #[tokio::test]
    async fn listing_failure_is_a_server_error() {
        let identity = MockIdentity {
            caller: Some(platform_owner()),
            invite_result: None,
            fail_listing: true,
            ..Default::default()
        };
        let (coordinator, _, _, _) = setup(
            identity,
            MockMembershipStore::default(),
            None,
            flow(
                AuthorizationPolicy::PlatformOwner,
                BindingMode::Direct,
                MailMode::Native,
            ),
        );

        let err = coordinator
            .invite_member(Some("owner-token"), &request("T1", "new@x.com", None))
            .await
            .unwrap_err();

        assert!(matches!(err, InviteError::ListUsersFailed(_)));
    }

    #[tokio::test]
    async fn token_invite_redirect_carries_the_encoded_token() {
        let identity = MockIdentity {
            caller: Some(platform_owner()),
            invite_result: Some(fresh_user("user-new", "new@x.com")),
            link: Some("https://id.example.com/link".to_string()),
            ..Default::default()
        };
        let memberships = MockMembershipStore {
            token: Some("tok/en+value".to_string()),
            ..Default::default()
        };
        let (coordinator, identity, _, _) = setup(
            identity,
            memberships,
            None,
            flow(
                AuthorizationPolicy::PlatformOwner,
                BindingMode::TokenInvite,
                MailMode::Native,
            ),
        );

        coordinator
            .invite_member(Some("owner-token"), &request("T1", "new@x.com", Some("admin")))
            .await
            .unwrap();

        let calls = identity.recorded_calls();
        let link_call = calls
            .iter()
            .find(|c| c.starts_with("generate_link:"))
            .unwrap();
        assert!(link_call.contains("/accept-invite.html?token=tok%2Fen%2Bvalue"));
    }

    #[tokio::test]
    async fn token_invite_requires_a_role() {
        let identity = MockIdentity {
            caller: Some(platform_owner()),
            ..Default::default()
        };
        let (coordinator, identity, _, _) = setup(
            identity,
            MockMembershipStore::default(),
            None,
            flow(
                AuthorizationPolicy::PlatformOwner,
                BindingMode::TokenInvite,
                MailMode::Native,
            ),
        );

        let err = coordinator
            .invite_member(Some("owner-token"), &request("T1", "new@x.com", None))
            .await
            .unwrap_err();

        assert!(matches!(err, InviteError::MissingParams(_)));
        assert!(identity.recorded_calls().is_empty());
    }
}
