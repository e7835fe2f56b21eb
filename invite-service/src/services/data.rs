//! Data-plane client: row-level-security predicates, membership upserts and
//! the invitation-token remote procedure over `{backend}/rest/v1`.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

use crate::config::BackendConfig;
use service_core::error::AppError;

/// Membership row written by the binding step. Keyed by
/// (tenant_id, user_id); a conflict overwrites role and approval.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MembershipUpsert {
    pub tenant_id: String,
    pub user_id: String,
    pub role: String,
    pub approved: bool,
}

/// Parameters of the `create_invite` remote procedure.
#[derive(Debug, Clone)]
pub struct InviteParams {
    pub tenant_id: String,
    pub email: String,
    pub role: String,
    pub expires_in_days: i64,
}

#[derive(Debug, Error)]
pub enum DataError {
    #[error("data service request failed: {0}")]
    Request(String),

    #[error("data service rejected the call ({status}): {body}")]
    Rejected { status: u16, body: String },
}

#[async_trait]
pub trait MembershipStore: Send + Sync {
    /// Row-level-security predicate: does the caller hold an approved owner
    /// membership on this tenant? Evaluated under the caller's own
    /// credential so the policy sees only the caller's rows.
    async fn is_tenant_owner(&self, bearer: &str, tenant_id: &str) -> Result<bool, DataError>;

    /// Idempotent upsert on the (tenant_id, user_id) composite key,
    /// executed under the elevated service identity.
    async fn upsert_membership(&self, membership: &MembershipUpsert) -> Result<(), DataError>;

    /// Mint an invitation token via the `create_invite` procedure, executed
    /// under the caller's own authorization context so the invitation's
    /// creator is attributed server-side.
    async fn create_invite(&self, bearer: &str, params: &InviteParams)
    -> Result<String, DataError>;
}

/// HTTP implementation over the REST data plane.
pub struct HttpMembershipStore {
    http: reqwest::Client,
    rest_url: String,
    anon_key: String,
    service_role_key: String,
}

impl HttpMembershipStore {
    pub fn new(config: &BackendConfig, timeout: Duration) -> Result<Self, AppError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http,
            rest_url: format!("{}/rest/v1", config.url.trim_end_matches('/')),
            anon_key: config.anon_key.clone(),
            service_role_key: config.service_role_key.clone(),
        })
    }
}

#[async_trait]
impl MembershipStore for HttpMembershipStore {
    async fn is_tenant_owner(&self, bearer: &str, tenant_id: &str) -> Result<bool, DataError> {
        let response = self
            .http
            .get(format!("{}/memberships", self.rest_url))
            .header("apikey", &self.anon_key)
            .bearer_auth(bearer)
            .query(&[
                ("select", "role"),
                ("tenant_id", &format!("eq.{}", tenant_id)),
                ("role", "eq.owner"),
                ("approved", "eq.true"),
                ("limit", "1"),
            ])
            .send()
            .await
            .map_err(|e| DataError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(DataError::Rejected { status, body });
        }

        let rows: Vec<serde_json::Value> = response
            .json()
            .await
            .map_err(|e| DataError::Request(e.to_string()))?;

        Ok(!rows.is_empty())
    }

    async fn upsert_membership(&self, membership: &MembershipUpsert) -> Result<(), DataError> {
        let response = self
            .http
            .post(format!("{}/memberships", self.rest_url))
            .header("apikey", &self.service_role_key)
            .bearer_auth(&self.service_role_key)
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .query(&[("on_conflict", "tenant_id,user_id")])
            .json(membership)
            .send()
            .await
            .map_err(|e| DataError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(DataError::Rejected { status, body });
        }

        Ok(())
    }

    async fn create_invite(
        &self,
        bearer: &str,
        params: &InviteParams,
    ) -> Result<String, DataError> {
        let response = self
            .http
            .post(format!("{}/rpc/create_invite", self.rest_url))
            .header("apikey", &self.anon_key)
            .bearer_auth(bearer)
            .json(&json!({
                "p_tenant_id": params.tenant_id,
                "p_email": params.email,
                "p_role": params.role,
                "p_expires_in_days": params.expires_in_days,
            }))
            .send()
            .await
            .map_err(|e| DataError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(DataError::Rejected { status, body });
        }

        // The procedure returns either a bare string or { "token": ... }.
        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| DataError::Request(e.to_string()))?;

        payload
            .as_str()
            .map(str::to_string)
            .or_else(|| {
                payload
                    .get("token")
                    .and_then(|t| t.as_str())
                    .map(str::to_string)
            })
            .ok_or_else(|| DataError::Request("invite token not returned by procedure".into()))
    }
}

/// In-memory membership store fake for tests. Rows are keyed by
/// (tenant_id, user_id) with conflict-overwrite, mirroring the composite
/// uniqueness constraint.
#[derive(Default)]
pub struct MockMembershipStore {
    /// Tenants the bearer holds an approved owner membership on.
    pub owner_of: Vec<String>,
    pub fail_owner_check: bool,
    pub fail_upsert: bool,
    /// `None` makes `create_invite` fail.
    pub token: Option<String>,
    pub rows: Mutex<Vec<MembershipUpsert>>,
}

impl MockMembershipStore {
    pub fn bound_rows(&self) -> Vec<MembershipUpsert> {
        self.rows.lock().unwrap().clone()
    }
}

#[async_trait]
impl MembershipStore for MockMembershipStore {
    async fn is_tenant_owner(&self, _bearer: &str, tenant_id: &str) -> Result<bool, DataError> {
        if self.fail_owner_check {
            return Err(DataError::Request("owner query unavailable".into()));
        }
        Ok(self.owner_of.iter().any(|t| t == tenant_id))
    }

    async fn upsert_membership(&self, membership: &MembershipUpsert) -> Result<(), DataError> {
        if self.fail_upsert {
            return Err(DataError::Rejected {
                status: 409,
                body: "constraint violation".into(),
            });
        }
        let mut rows = self.rows.lock().unwrap();
        if let Some(existing) = rows
            .iter_mut()
            .find(|r| r.tenant_id == membership.tenant_id && r.user_id == membership.user_id)
        {
            *existing = membership.clone();
        } else {
            rows.push(membership.clone());
        }
        Ok(())
    }

    async fn create_invite(
        &self,
        _bearer: &str,
        _params: &InviteParams,
    ) -> Result<String, DataError> {
        self.token
            .clone()
            .ok_or_else(|| DataError::Request("procedure unavailable".into()))
    }
}
