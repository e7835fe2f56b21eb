use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;

use crate::dtos::{MAX_EXPIRES_IN_DAYS, MIN_EXPIRES_IN_DAYS};

#[derive(Debug, Clone, Deserialize)]
pub struct InviteConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub backend: BackendConfig,
    pub app: AppUrls,
    pub flow: FlowConfig,
    pub smtp: Option<SmtpConfig>,
    pub security: SecurityConfig,
    pub swagger: SwaggerConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

/// Connection coordinates for the hosted backend: one base URL serving the
/// identity API under /auth/v1 and the data plane under /rest/v1, an anon
/// key for caller-context calls and an elevated service-role key for admin
/// calls.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    pub url: String,
    pub anon_key: String,
    pub service_role_key: String,
}

/// Public URLs of the web app that invitation redirects land on.
#[derive(Debug, Clone, Deserialize)]
pub struct AppUrls {
    pub base_url: String,
    /// Acceptance page; receives the invitation token as a query parameter.
    pub accept_invite_path: String,
    /// Set-password page for freshly provisioned accounts.
    pub welcome_path: String,
}

/// The three strategy axes of the invitation flow. One coordinator,
/// configured per deployment instead of per-handler copies.
#[derive(Debug, Clone, Deserialize)]
pub struct FlowConfig {
    pub policy: AuthorizationPolicy,
    pub binding: BindingMode,
    pub mail: MailMode,
    pub default_role: String,
    pub default_expires_in_days: i64,
    /// Page size for the fallback account lookup. Resolution by listing is
    /// only correct up to this bound; see DESIGN.md.
    pub user_list_page_size: u32,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum AuthorizationPolicy {
    /// Caller's platform-level role must be "owner".
    PlatformOwner,
    /// Caller must hold an approved owner membership on the target tenant.
    TenantOwner,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum BindingMode {
    /// Bind the membership with the approval flag from the request.
    Direct,
    /// Bind pending and mint an invitation token for the acceptance page.
    TokenInvite,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MailMode {
    /// Rely on the identity provider's own invite email.
    Native,
    /// Deliver a custom invitation message over SMTP.
    Smtp,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub from: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SwaggerConfig {
    pub enabled: SwaggerMode,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum SwaggerMode {
    Public,
    Authenticated,
    Disabled,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub invite_attempts: u32,
    pub invite_window_seconds: u64,
    pub global_ip_limit: u32,
    pub global_ip_window_seconds: u64,
}

impl InviteConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let mail: MailMode = get_env("MAIL_MODE", Some("native"), is_prod)?
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let smtp = if mail == MailMode::Smtp {
            Some(SmtpConfig {
                host: get_env("SMTP_HOST", None, is_prod)?,
                port: get_env("SMTP_PORT", Some("587"), is_prod)?
                    .parse()
                    .map_err(|e: std::num::ParseIntError| {
                        AppError::ConfigError(anyhow::anyhow!(e.to_string()))
                    })?,
                user: get_env("SMTP_USER", None, is_prod)?,
                password: get_env("SMTP_PASSWORD", None, is_prod)?,
                from: get_env("MAIL_FROM", None, is_prod)?,
            })
        } else {
            None
        };

        let config = InviteConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("invite-service"), is_prod)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|e| !e.is_empty()),
            backend: BackendConfig {
                url: get_env("BACKEND_URL", None, is_prod)?,
                anon_key: get_env("BACKEND_ANON_KEY", None, is_prod)?,
                service_role_key: get_env("BACKEND_SERVICE_ROLE_KEY", None, is_prod)?,
            },
            app: AppUrls {
                base_url: get_env("APP_BASE_URL", None, is_prod)?,
                accept_invite_path: get_env(
                    "ACCEPT_INVITE_PATH",
                    Some("/accept-invite.html"),
                    is_prod,
                )?,
                welcome_path: get_env("WELCOME_PATH", Some("/welcome.html"), is_prod)?,
            },
            flow: FlowConfig {
                policy: get_env("AUTH_POLICY", Some("platform-owner"), is_prod)?
                    .parse()
                    .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?,
                binding: get_env("BINDING_MODE", Some("direct"), is_prod)?
                    .parse()
                    .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?,
                mail,
                default_role: get_env("DEFAULT_ROLE", Some("usuario"), is_prod)?,
                default_expires_in_days: get_env("DEFAULT_EXPIRES_IN_DAYS", Some("7"), is_prod)?
                    .parse()
                    .map_err(|e: std::num::ParseIntError| {
                        AppError::ConfigError(anyhow::anyhow!(e.to_string()))
                    })?,
                user_list_page_size: get_env("USER_LIST_PAGE_SIZE", Some("1000"), is_prod)?
                    .parse()
                    .map_err(|e: std::num::ParseIntError| {
                        AppError::ConfigError(anyhow::anyhow!(e.to_string()))
                    })?,
            },
            smtp,
            security: SecurityConfig {
                allowed_origins: get_env(
                    "ALLOWED_ORIGINS",
                    Some("http://localhost:3000"),
                    is_prod,
                )?
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            },
            swagger: SwaggerConfig {
                enabled: get_env("ENABLE_SWAGGER", Some("public"), is_prod)?
                    .parse()
                    .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?,
            },
            rate_limit: RateLimitConfig {
                invite_attempts: get_env("RATE_LIMIT_INVITE_ATTEMPTS", Some("10"), is_prod)?
                    .parse()
                    .unwrap_or(10),
                invite_window_seconds: get_env(
                    "RATE_LIMIT_INVITE_WINDOW_SECONDS",
                    Some("3600"),
                    is_prod,
                )?
                .parse()
                .unwrap_or(3600),
                global_ip_limit: get_env("RATE_LIMIT_GLOBAL_IP_LIMIT", Some("100"), is_prod)?
                    .parse()
                    .unwrap_or(100),
                global_ip_window_seconds: get_env(
                    "RATE_LIMIT_GLOBAL_IP_WINDOW_SECONDS",
                    Some("60"),
                    is_prod,
                )?
                .parse()
                .unwrap_or(60),
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        if !(MIN_EXPIRES_IN_DAYS..=MAX_EXPIRES_IN_DAYS)
            .contains(&self.flow.default_expires_in_days)
        {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "DEFAULT_EXPIRES_IN_DAYS must be between {} and {}",
                MIN_EXPIRES_IN_DAYS,
                MAX_EXPIRES_IN_DAYS
            )));
        }

        if self.flow.user_list_page_size == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "USER_LIST_PAGE_SIZE must be greater than 0"
            )));
        }

        if self.flow.mail == MailMode::Smtp && self.smtp.is_none() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "MAIL_MODE=smtp requires the SMTP_* variables"
            )));
        }

        if self.environment == Environment::Prod
            && self.security.allowed_origins.iter().any(|o| o == "*")
        {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "Wildcard CORS origin not allowed in production"
            )));
        }

        Ok(())
    }

    /// Presence booleans for the operational sanity endpoint. Secret values
    /// themselves never leave the process.
    pub fn presence(&self) -> crate::dtos::ConfigPresenceResponse {
        crate::dtos::ConfigPresenceResponse {
            ok: true,
            has_backend_url: !self.backend.url.is_empty(),
            has_anon_key: !self.backend.anon_key.is_empty(),
            has_service_role_key: !self.backend.service_role_key.is_empty(),
            has_app_base_url: !self.app.base_url.is_empty(),
            has_smtp: self.smtp.is_some(),
        }
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

impl std::str::FromStr for AuthorizationPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "platform-owner" => Ok(AuthorizationPolicy::PlatformOwner),
            "tenant-owner" => Ok(AuthorizationPolicy::TenantOwner),
            _ => Err(format!("Invalid authorization policy: {}", s)),
        }
    }
}

impl std::str::FromStr for BindingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "direct" => Ok(BindingMode::Direct),
            "token-invite" => Ok(BindingMode::TokenInvite),
            _ => Err(format!("Invalid binding mode: {}", s)),
        }
    }
}

impl std::str::FromStr for MailMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "native" => Ok(MailMode::Native),
            "smtp" => Ok(MailMode::Smtp),
            _ => Err(format!("Invalid mail mode: {}", s)),
        }
    }
}

impl std::str::FromStr for SwaggerMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "public" => Ok(SwaggerMode::Public),
            "authenticated" => Ok(SwaggerMode::Authenticated),
            "disabled" => Ok(SwaggerMode::Disabled),
            _ => Err(format!("Invalid swagger mode: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flow_axes_parse_from_kebab_case() {
        assert_eq!(
            "platform-owner".parse::<AuthorizationPolicy>().unwrap(),
            AuthorizationPolicy::PlatformOwner
        );
        assert_eq!(
            "tenant-owner".parse::<AuthorizationPolicy>().unwrap(),
            AuthorizationPolicy::TenantOwner
        );
        assert_eq!(
            "token-invite".parse::<BindingMode>().unwrap(),
            BindingMode::TokenInvite
        );
        assert_eq!("smtp".parse::<MailMode>().unwrap(), MailMode::Smtp);
        assert!("per-tenant".parse::<AuthorizationPolicy>().is_err());
    }
}
