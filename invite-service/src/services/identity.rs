//! Identity-provider client: caller authentication, account provisioning
//! and one-time action links over the hosted identity API.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

use crate::config::BackendConfig;
use service_core::error::AppError;

/// Authenticated caller resolved from a bearer credential.
#[derive(Debug, Clone)]
pub struct Caller {
    pub user_id: String,
    pub email: Option<String>,
    /// Platform-level role from the identity service's app metadata;
    /// "owner" marks the cross-tenant platform owner.
    pub app_role: Option<String>,
}

/// Account record as the identity service reports it.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// Action-link flavor: `invite` provisions a fresh account, `recovery`
/// re-keys an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Invite,
    Recovery,
}

impl LinkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkKind::Invite => "invite",
            LinkKind::Recovery => "recovery",
        }
    }
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("credential rejected: {0}")]
    Unauthenticated(String),

    #[error("identity request failed: {0}")]
    Request(String),

    #[error("identity response malformed: {0}")]
    Decode(String),
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Authenticate a bearer credential and return the caller it belongs to.
    async fn get_user(&self, bearer: &str) -> Result<Caller, IdentityError>;

    /// Admin invite: creates the account if it does not exist and lets the
    /// provider dispatch its native invite email.
    async fn invite_by_email(
        &self,
        email: &str,
        redirect_to: &str,
    ) -> Result<IdentityUser, IdentityError>;

    /// Bounded account listing, used for the fallback lookup by email.
    async fn list_users(&self, page: u32, per_page: u32)
    -> Result<Vec<IdentityUser>, IdentityError>;

    /// Mint a typed one-time action link bound to a redirect target.
    async fn generate_link(
        &self,
        kind: LinkKind,
        email: &str,
        redirect_to: &str,
    ) -> Result<String, IdentityError>;
}

/// HTTP implementation against the hosted identity API under
/// `{backend}/auth/v1`.
pub struct HttpIdentity {
    http: reqwest::Client,
    auth_url: String,
    anon_key: String,
    service_role_key: String,
}

impl HttpIdentity {
    pub fn new(config: &BackendConfig, timeout: Duration) -> Result<Self, AppError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http,
            auth_url: format!("{}/auth/v1", config.url.trim_end_matches('/')),
            anon_key: config.anon_key.clone(),
            service_role_key: config.service_role_key.clone(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct UserPayload {
    id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    app_metadata: AppMetadata,
}

#[derive(Debug, Default, Deserialize)]
struct AppMetadata {
    #[serde(default)]
    app_role: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserListPayload {
    #[serde(default)]
    users: Vec<IdentityUser>,
}

/// The identity API has reported the link either at the top level or under
/// `properties`, depending on version; accept both.
#[derive(Debug, Deserialize)]
struct GenerateLinkPayload {
    #[serde(default)]
    action_link: Option<String>,
    #[serde(default)]
    properties: Option<LinkProperties>,
}

#[derive(Debug, Deserialize)]
struct LinkProperties {
    #[serde(default)]
    action_link: Option<String>,
}

#[async_trait]
impl IdentityProvider for HttpIdentity {
    async fn get_user(&self, bearer: &str) -> Result<Caller, IdentityError> {
        let response = self
            .http
            .get(format!("{}/user", self.auth_url))
            .header("apikey", &self.anon_key)
            .bearer_auth(bearer)
            .send()
            .await
            .map_err(|e| IdentityError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(IdentityError::Unauthenticated(format!(
                "{}: {}",
                status, body
            )));
        }

        let payload: UserPayload = response
            .json()
            .await
            .map_err(|e| IdentityError::Decode(e.to_string()))?;

        Ok(Caller {
            user_id: payload.id,
            email: payload.email,
            app_role: payload.app_metadata.app_role,
        })
    }

    async fn invite_by_email(
        &self,
        email: &str,
        redirect_to: &str,
    ) -> Result<IdentityUser, IdentityError> {
        let response = self
            .http
            .post(format!("{}/invite", self.auth_url))
            .header("apikey", &self.service_role_key)
            .bearer_auth(&self.service_role_key)
            .query(&[("redirect_to", redirect_to)])
            .json(&json!({ "email": email }))
            .send()
            .await
            .map_err(|e| IdentityError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(IdentityError::Request(format!("{}: {}", status, body)));
        }

        response
            .json()
            .await
            .map_err(|e| IdentityError::Decode(e.to_string()))
    }

    async fn list_users(
        &self,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<IdentityUser>, IdentityError> {
        let response = self
            .http
            .get(format!("{}/admin/users", self.auth_url))
            .header("apikey", &self.service_role_key)
            .bearer_auth(&self.service_role_key)
            .query(&[("page", page.to_string()), ("per_page", per_page.to_string())])
            .send()
            .await
            .map_err(|e| IdentityError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(IdentityError::Request(format!("{}: {}", status, body)));
        }

        let payload: UserListPayload = response
            .json()
            .await
            .map_err(|e| IdentityError::Decode(e.to_string()))?;

        Ok(payload.users)
    }

    async fn generate_link(
        &self,
        kind: LinkKind,
        email: &str,
        redirect_to: &str,
    ) -> Result<String, IdentityError> {
        let response = self
            .http
            .post(format!("{}/admin/generate_link", self.auth_url))
            .header("apikey", &self.service_role_key)
            .bearer_auth(&self.service_role_key)
            .json(&json!({
                "type": kind.as_str(),
                "email": email,
                "redirect_to": redirect_to,
            }))
            .send()
            .await
            .map_err(|e| IdentityError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(IdentityError::Request(format!("{}: {}", status, body)));
        }

        let payload: GenerateLinkPayload = response
            .json()
            .await
            .map_err(|e| IdentityError::Decode(e.to_string()))?;

        payload
            .properties
            .and_then(|p| p.action_link)
            .or(payload.action_link)
            .ok_or_else(|| IdentityError::Decode("action_link not present in response".into()))
    }
}

/// Scriptable in-memory identity fake for tests.
#[derive(Default)]
pub struct MockIdentity {
    pub caller: Option<Caller>,
    /// `None` makes the admin invite fail, driving the fallback lookup.
    pub invite_result: Option<IdentityUser>,
    pub users: Vec<IdentityUser>,
    pub fail_listing: bool,
    /// `None` makes link generation fail.
    pub link: Option<String>,
    /// Recorded operations, in call order.
    pub calls: Mutex<Vec<String>>,
}

impl MockIdentity {
    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    pub fn recorded_calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl IdentityProvider for MockIdentity {
    async fn get_user(&self, _bearer: &str) -> Result<Caller, IdentityError> {
        self.record("get_user");
        self.caller
            .clone()
            .ok_or_else(|| IdentityError::Unauthenticated("invalid token".into()))
    }

    async fn invite_by_email(
        &self,
        email: &str,
        _redirect_to: &str,
    ) -> Result<IdentityUser, IdentityError> {
        self.record(format!("invite_by_email:{}", email));
        self.invite_result
            .clone()
            .ok_or_else(|| IdentityError::Request("already registered".into()))
    }

    async fn list_users(
        &self,
        _page: u32,
        _per_page: u32,
    ) -> Result<Vec<IdentityUser>, IdentityError> {
        self.record("list_users");
        if self.fail_listing {
            return Err(IdentityError::Request("listing unavailable".into()));
        }
        Ok(self.users.clone())
    }

    async fn generate_link(
        &self,
        kind: LinkKind,
        _email: &str,
        redirect_to: &str,
    ) -> Result<String, IdentityError> {
        self.record(format!("generate_link:{}:{}", kind.as_str(), redirect_to));
        self.link
            .clone()
            .ok_or_else(|| IdentityError::Request("link generation unavailable".into()))
    }
}
