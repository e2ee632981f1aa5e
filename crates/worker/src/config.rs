//! Worker configuration loaded from environment variables.

use std::fmt::Display;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use perkcycle_events::delivery::webhook::WebhookError;
use perkcycle_events::{
    CompositeNotifier, EmailConfig, EmailNotifier, LogNotifier, Notifier, WebhookNotifier,
};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} has invalid value '{value}': {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database_url: String,
    pub db_max_connections: u32,
    /// Period between materialization passes.
    pub materialize_interval: Duration,
    /// Accounts processed concurrently, and the page size when listing them.
    pub materialize_batch_size: usize,
    /// Ceiling on one account's migration transaction.
    pub account_tx_timeout: Duration,
    /// How close to its end an unclaimed occurrence must be to count as
    /// expiring soon.
    pub expiry_warning_days: i64,
    pub notify_webhook_url: Option<String>,
    /// `None` when `SMTP_HOST` is unset.
    pub email: Option<EmailConfig>,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                     | Default          |
    /// |-----------------------------|------------------|
    /// | `DATABASE_URL`              | required         |
    /// | `DB_MAX_CONNECTIONS`        | `20`             |
    /// | `MATERIALIZE_INTERVAL_SECS` | `3600`           |
    /// | `MATERIALIZE_BATCH_SIZE`    | `10`             |
    /// | `ACCOUNT_TX_TIMEOUT_SECS`   | `30`             |
    /// | `EXPIRY_WARNING_DAYS`       | `7`              |
    /// | `NOTIFY_WEBHOOK_URL`        | unset            |
    /// | `SMTP_*`                    | see [`EmailConfig::from_env`] |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let database_url = lookup("DATABASE_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let db_max_connections: u32 = positive(&lookup, "DB_MAX_CONNECTIONS", 20)?;
        let interval_secs: u64 = positive(&lookup, "MATERIALIZE_INTERVAL_SECS", 3600)?;
        let materialize_batch_size: usize = positive(&lookup, "MATERIALIZE_BATCH_SIZE", 10)?;
        let tx_timeout_secs: u64 = positive(&lookup, "ACCOUNT_TX_TIMEOUT_SECS", 30)?;
        let expiry_warning_days: i64 = parse_or(&lookup, "EXPIRY_WARNING_DAYS", 7)?;
        if expiry_warning_days < 0 {
            return Err(ConfigError::Invalid {
                name: "EXPIRY_WARNING_DAYS",
                value: expiry_warning_days.to_string(),
                reason: "must not be negative".into(),
            });
        }

        Ok(Self {
            database_url,
            db_max_connections,
            materialize_interval: Duration::from_secs(interval_secs),
            materialize_batch_size,
            account_tx_timeout: Duration::from_secs(tx_timeout_secs),
            expiry_warning_days,
            notify_webhook_url: lookup("NOTIFY_WEBHOOK_URL").filter(|v| !v.trim().is_empty()),
            email: EmailConfig::from_lookup(&lookup),
        })
    }

    /// Log-only notifier, plus email and webhook channels when configured.
    pub fn build_notifier(&self) -> Result<Arc<dyn Notifier>, WebhookError> {
        let mut notifier = CompositeNotifier::new().with(Arc::new(LogNotifier));
        if let Some(email) = &self.email {
            tracing::info!(smtp_host = %email.smtp_host, "Email digests enabled");
            notifier = notifier.with(Arc::new(EmailNotifier::new(email.clone())));
        }
        if let Some(url) = &self.notify_webhook_url {
            tracing::info!(url = %url, "Webhook digests enabled");
            notifier = notifier.with(Arc::new(WebhookNotifier::new(url.clone())?));
        }
        Ok(Arc::new(notifier))
    }
}

fn parse_or<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

/// Like [`parse_or`], additionally rejecting zero.
fn positive<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr + Default + PartialEq + Display,
    T::Err: Display,
{
    let value = parse_or(lookup, name, default)?;
    if value == T::default() {
        return Err(ConfigError::Invalid {
            name,
            value: value.to_string(),
            reason: "must be greater than zero".into(),
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<WorkerConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        WorkerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply() {
        let config = load(&[("DATABASE_URL", "postgres://localhost/perkcycle")]).unwrap();
        assert_eq!(config.db_max_connections, 20);
        assert_eq!(config.materialize_interval, Duration::from_secs(3600));
        assert_eq!(config.materialize_batch_size, 10);
        assert_eq!(config.account_tx_timeout, Duration::from_secs(30));
        assert_eq!(config.expiry_warning_days, 7);
        assert!(config.notify_webhook_url.is_none());
        assert!(config.email.is_none());
    }

    #[test]
    fn database_url_is_required() {
        assert_matches!(load(&[]), Err(ConfigError::Missing("DATABASE_URL")));
        assert_matches!(
            load(&[("DATABASE_URL", "  ")]),
            Err(ConfigError::Missing("DATABASE_URL"))
        );
    }

    #[test]
    fn overrides_are_parsed() {
        let config = load(&[
            ("DATABASE_URL", "postgres://db/perkcycle"),
            ("MATERIALIZE_BATCH_SIZE", "25"),
            ("ACCOUNT_TX_TIMEOUT_SECS", " 5 "),
            ("NOTIFY_WEBHOOK_URL", "https://hooks.example.com/benefits"),
            ("SMTP_HOST", "smtp.example.com"),
        ])
        .unwrap();
        assert_eq!(config.materialize_batch_size, 25);
        assert_eq!(config.account_tx_timeout, Duration::from_secs(5));
        assert_eq!(
            config.notify_webhook_url.as_deref(),
            Some("https://hooks.example.com/benefits")
        );
        assert_eq!(config.email.unwrap().smtp_host, "smtp.example.com");
    }

    #[test]
    fn zero_batch_size_rejected() {
        let result = load(&[("DATABASE_URL", "postgres://db"), ("MATERIALIZE_BATCH_SIZE", "0")]);
        assert_matches!(
            result,
            Err(ConfigError::Invalid { name: "MATERIALIZE_BATCH_SIZE", .. })
        );
    }

    #[test]
    fn garbage_number_rejected() {
        let result = load(&[("DATABASE_URL", "postgres://db"), ("EXPIRY_WARNING_DAYS", "soon")]);
        assert_matches!(result, Err(ConfigError::Invalid { name: "EXPIRY_WARNING_DAYS", value, .. }) if value == "soon");
    }

    #[test]
    fn negative_warning_window_rejected() {
        let result = load(&[("DATABASE_URL", "postgres://db"), ("EXPIRY_WARNING_DAYS", "-1")]);
        assert!(result.is_err());
    }
}
