use chrono::{Duration as ChronoDuration, Utc};
use lettre::{
    Message, SmtpTransport, Transport, message::header::ContentType,
    transport::smtp::authentication::Credentials,
};
use service_core::axum::async_trait;
use service_core::error::AppError;
use std::sync::Mutex;
use std::time::Duration;

use crate::config::SmtpConfig;

#[async_trait]
pub trait MailProvider: Send + Sync {
    /// Probe transport connectivity. Callers skip dispatch when this fails;
    /// the action link stays in the response either way.
    async fn verify(&self) -> bool;

    async fn send_invitation(
        &self,
        to_email: &str,
        action_link: &str,
        expires_in_days: Option<i64>,
    ) -> Result<(), AppError>;
}

#[derive(Clone)]
pub struct SmtpMailer {
    mailer: SmtpTransport,
    from_email: String,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> Result<Self, AppError> {
        let creds = Credentials::new(config.user.clone(), config.password.clone());

        let mailer = SmtpTransport::relay(&config.host)
            .map_err(|e| AppError::EmailError(e.to_string()))?
            .credentials(creds)
            .port(config.port)
            .timeout(Some(Duration::from_secs(10)))
            .build();

        tracing::info!(host = %config.host, "SMTP mailer initialized");

        Ok(Self {
            mailer,
            from_email: config.from.clone(),
        })
    }

    async fn send_email(
        &self,
        to_email: &str,
        subject: &str,
        plain_body: &str,
        html_body: &str,
    ) -> Result<(), AppError> {
        let email = Message::builder()
            .from(self.from_email.parse().map_err(
                |e: lettre::address::AddressError| AppError::InternalError(e.into()),
            )?)
            .to(to_email.parse().map_err(
                |e: lettre::address::AddressError| AppError::InternalError(e.into()),
            )?)
            .subject(subject)
            .multipart(
                lettre::message::MultiPart::alternative()
                    .singlepart(
                        lettre::message::SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(plain_body.to_string()),
                    )
                    .singlepart(
                        lettre::message::SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(html_body.to_string()),
                    ),
            )
            .map_err(|e| AppError::InternalError(e.into()))?;

        // The blocking transport must not stall the async runtime.
        let mailer = self.mailer.clone();
        let result = tokio::task::spawn_blocking(move || mailer.send(&email))
            .await
            .map_err(|e| AppError::InternalError(e.into()))?;

        match result {
            Ok(_) => {
                tracing::info!(to = %to_email, subject = %subject, "Email sent successfully");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e.to_string(), to = %to_email, "Failed to send email");
                Err(AppError::EmailError(e.to_string()))
            }
        }
    }
}

#[async_trait]
impl MailProvider for SmtpMailer {
    async fn verify(&self) -> bool {
        let mailer = self.mailer.clone();
        match tokio::task::spawn_blocking(move || mailer.test_connection()).await {
            Ok(Ok(true)) => true,
            Ok(Ok(false)) => {
                tracing::warn!("SMTP transport verification returned false");
                false
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e.to_string(), "SMTP transport verification failed");
                false
            }
            Err(e) => {
                tracing::warn!(error = %e.to_string(), "SMTP verification task failed");
                false
            }
        }
    }

    async fn send_invitation(
        &self,
        to_email: &str,
        action_link: &str,
        expires_in_days: Option<i64>,
    ) -> Result<(), AppError> {
        let expiry_note = match expires_in_days {
            Some(days) => {
                let expiry_utc = Utc::now() + ChronoDuration::days(days);
                format!(
                    "This invitation expires on {}.",
                    expiry_utc.format("%Y-%m-%d")
                )
            }
            None => "If you didn't expect this invitation, please ignore this email.".to_string(),
        };

        let html_body = format!(
            r###"<html>
                <body style="font-family: Arial, sans-serif;">
                    <h2>You have been invited</h2>
                    <p>You were invited to join a shared finance space. Click the link below to set your password and accept:</p>
                    <p>
                        <a href="{}" style="background-color: #4CAF50; color: white; padding: 14px 20px; text-decoration: none; border-radius: 4px;">
                            Accept Invitation
                        </a>
                    </p>
                    <p style="color: #666; font-size: 12px;">
                        {}
                    </p>
                </body>
            </html>"###,
            action_link, expiry_note
        );

        let plain_body = format!(
            "You have been invited\n\n\
            You were invited to join a shared finance space. Please visit the following link to set your password and accept:\n\n\
            {}\n\n\
            {}",
            action_link, expiry_note
        );

        self.send_email(to_email, "You have been invited", &plain_body, &html_body)
            .await
    }
}

/// Scriptable mail fake for tests and no-mail deployments.
#[derive(Default)]
pub struct MockMailProvider {
    pub fail_verify: bool,
    pub fail_send: bool,
    /// Recorded (recipient, action link) pairs.
    pub sent: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl MailProvider for MockMailProvider {
    async fn verify(&self) -> bool {
        !self.fail_verify
    }

    async fn send_invitation(
        &self,
        to_email: &str,
        action_link: &str,
        _expires_in_days: Option<i64>,
    ) -> Result<(), AppError> {
        if self.fail_send {
            return Err(AppError::EmailError("relay refused the message".into()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((to_email.to_string(), action_link.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smtp_mailer_builds_from_config() {
        let config = SmtpConfig {
            host: "smtp.example.com".to_string(),
            port: 587,
            user: "mailer@example.com".to_string(),
            password: "app_password".to_string(),
            from: "mailer@example.com".to_string(),
        };

        assert!(SmtpMailer::new(&config).is_ok());
    }
}
