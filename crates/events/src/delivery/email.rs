//! Digest delivery via SMTP.
//!
//! [`EmailNotifier`] wraps the `lettre` async SMTP transport to send a
//! plain-text digest to the account's notification address. If `SMTP_HOST`
//! is not set, [`EmailConfig::from_env`] returns `None` and no mailer should
//! be constructed.

use async_trait::async_trait;

use crate::digest::AccountDigest;
use crate::notifier::{Notifier, NotifyError};

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum EmailError {
    /// SMTP transport-level failure (authentication, connection, etc.).
    #[error("SMTP transport error: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),

    #[error("Email address parse error: {0}")]
    Address(#[from] lettre::address::AddressError),

    #[error("Email build error: {0}")]
    Build(String),
}

// ---------------------------------------------------------------------------
// EmailConfig
// ---------------------------------------------------------------------------

/// Default SMTP port (STARTTLS).
const DEFAULT_SMTP_PORT: u16 = 587;

const DEFAULT_FROM_ADDRESS: &str = "benefits@perkcycle.local";

#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    /// RFC 5322 "From" address.
    pub from_address: String,
    pub smtp_user: Option<String>,
    pub smtp_password: Option<String>,
}

impl EmailConfig {
    /// Load configuration from environment variables.
    ///
    /// Returns `None` if `SMTP_HOST` is not set.
    ///
    /// | Variable        | Required | Default                    |
    /// |-----------------|----------|----------------------------|
    /// | `SMTP_HOST`     | yes      |                            |
    /// | `SMTP_PORT`     | no       | `587`                      |
    /// | `SMTP_FROM`     | no       | `benefits@perkcycle.local` |
    /// | `SMTP_USER`     | no       |                            |
    /// | `SMTP_PASSWORD` | no       |                            |
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`EmailConfig::from_env`] with an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let smtp_host = lookup("SMTP_HOST")?;
        Some(Self {
            smtp_host,
            smtp_port: lookup("SMTP_PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(DEFAULT_SMTP_PORT),
            from_address: lookup("SMTP_FROM").unwrap_or_else(|| DEFAULT_FROM_ADDRESS.to_string()),
            smtp_user: lookup("SMTP_USER"),
            smtp_password: lookup("SMTP_PASSWORD"),
        })
    }
}

// ---------------------------------------------------------------------------
// EmailNotifier
// ---------------------------------------------------------------------------

/// Sends digests to `notification_email`. Accounts without an address are
/// skipped.
pub struct EmailNotifier {
    config: EmailConfig,
}

impl EmailNotifier {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }

    fn subject(digest: &AccountDigest) -> String {
        format!(
            "[PerkCycle] {}: {} new, {} expiring soon",
            digest.card_name,
            digest.newly_active.len(),
            digest.expiring_soon.len()
        )
    }

    async fn send(&self, to_email: &str, digest: &AccountDigest) -> Result<(), EmailError> {
        use lettre::{
            message::header::ContentType, transport::smtp::authentication::Credentials,
            AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
        };

        let email = Message::builder()
            .from(self.config.from_address.parse()?)
            .to(to_email.parse()?)
            .subject(Self::subject(digest))
            .header(ContentType::TEXT_PLAIN)
            .body(digest.render_text())
            .map_err(|e| EmailError::Build(e.to_string()))?;

        let mut transport_builder =
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.config.smtp_host)?
                .port(self.config.smtp_port);

        if let (Some(user), Some(pass)) = (&self.config.smtp_user, &self.config.smtp_password) {
            transport_builder =
                transport_builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        let mailer = transport_builder.build();
        mailer.send(email).await?;

        tracing::info!(
            to = to_email,
            account_id = digest.account_id,
            "Digest email sent"
        );
        Ok(())
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    async fn notify(&self, digest: &AccountDigest) -> Result<(), NotifyError> {
        let Some(to_email) = digest.notification_email.as_deref() else {
            tracing::debug!(account_id = digest.account_id, "No notification email, skipping");
            return Ok(());
        };
        Ok(self.send(to_email, digest).await?)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn digest(email: Option<&str>) -> AccountDigest {
        AccountDigest {
            account_id: 5,
            user_id: 50,
            card_name: "Platinum".into(),
            notification_email: email.map(str::to_string),
            newly_active: Vec::new(),
            expiring_soon: Vec::new(),
        }
    }

    fn config() -> EmailConfig {
        EmailConfig {
            smtp_host: "localhost".into(),
            smtp_port: 2525,
            from_address: DEFAULT_FROM_ADDRESS.into(),
            smtp_user: None,
            smtp_password: None,
        }
    }

    #[test]
    fn from_lookup_returns_none_without_smtp_host() {
        assert!(EmailConfig::from_lookup(|_| None).is_none());
    }

    #[test]
    fn from_lookup_applies_defaults() {
        let config = EmailConfig::from_lookup(|key| match key {
            "SMTP_HOST" => Some("smtp.example.com".into()),
            "SMTP_PORT" => Some("not-a-port".into()),
            _ => None,
        })
        .unwrap();
        assert_eq!(config.smtp_host, "smtp.example.com");
        assert_eq!(config.smtp_port, DEFAULT_SMTP_PORT);
        assert_eq!(config.from_address, DEFAULT_FROM_ADDRESS);
        assert!(config.smtp_user.is_none());
    }

    #[test]
    fn subject_summarises_counts() {
        assert_eq!(
            EmailNotifier::subject(&digest(None)),
            "[PerkCycle] Platinum: 0 new, 0 expiring soon"
        );
    }

    #[tokio::test]
    async fn account_without_address_is_skipped() {
        let notifier = EmailNotifier::new(config());
        assert!(notifier.notify(&digest(None)).await.is_ok());
    }

    #[tokio::test]
    async fn bad_recipient_is_address_error() {
        let notifier = EmailNotifier::new(config());
        let result = notifier.notify(&digest(Some("not-an-email"))).await;
        assert_matches!(result, Err(NotifyError::Email(EmailError::Address(_))));
    }

    #[test]
    fn email_error_display_build() {
        let err = EmailError::Build("missing body".to_string());
        assert_eq!(err.to_string(), "Email build error: missing body");
    }
}
