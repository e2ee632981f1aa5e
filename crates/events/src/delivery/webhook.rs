//! Digest delivery to a webhook with exponential-backoff retry.
//!
//! [`WebhookNotifier`] POSTs each [`AccountDigest`] as JSON. Failed attempts
//! are retried after 1 s, 2 s and 4 s before giving up.

use std::time::Duration;

use async_trait::async_trait;

use crate::digest::AccountDigest;
use crate::notifier::{Notifier, NotifyError};

/// Retry delays (exponential backoff: 1s, 2s, 4s).
const RETRY_DELAYS: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(4),
];

/// HTTP request timeout for a single delivery attempt.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    /// The underlying HTTP request failed (network, DNS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Webhook returned HTTP {0}")]
    HttpStatus(u16),
}

// ---------------------------------------------------------------------------
// WebhookNotifier
// ---------------------------------------------------------------------------

pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    retry_delays: Vec<Duration>,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self, WebhookError> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            url: url.into(),
            retry_delays: RETRY_DELAYS.to_vec(),
        })
    }

    /// Replace the backoff schedule. An empty schedule means a single attempt.
    pub fn with_retry_delays(mut self, delays: Vec<Duration>) -> Self {
        self.retry_delays = delays;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Deliver a digest, retrying on failure. Returns `Ok(())` on the first
    /// successful attempt.
    pub async fn deliver(&self, digest: &AccountDigest) -> Result<(), WebhookError> {
        let payload = serde_json::json!({
            "event_type": "benefit.digest",
            "account_id": digest.account_id,
            "user_id": digest.user_id,
            "card_name": digest.card_name,
            "newly_active": digest.newly_active,
            "expiring_soon": digest.expiring_soon,
        });

        for (attempt, delay) in self.retry_delays.iter().enumerate() {
            match self.try_send(&payload).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        url = %self.url,
                        error = %e,
                        "Webhook delivery attempt failed, retrying"
                    );
                    tokio::time::sleep(*delay).await;
                }
            }
        }

        // Final attempt after the last backoff.
        self.try_send(&payload).await.inspect_err(|e| {
            tracing::error!(url = %self.url, error = %e, "Webhook delivery failed after all retries");
        })
    }

    /// Execute a single POST request and check the response status.
    async fn try_send(&self, payload: &serde_json::Value) -> Result<(), WebhookError> {
        let response = self.client.post(&self.url).json(payload).send().await?;
        if !response.status().is_success() {
            return Err(WebhookError::HttpStatus(response.status().as_u16()));
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, digest: &AccountDigest) -> Result<(), NotifyError> {
        Ok(self.deliver(digest).await?)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn digest() -> AccountDigest {
        AccountDigest {
            account_id: 1,
            user_id: 10,
            card_name: "Gold".into(),
            notification_email: None,
            newly_active: Vec::new(),
            expiring_soon: Vec::new(),
        }
    }

    #[test]
    fn new_uses_default_backoff() {
        let notifier = WebhookNotifier::new("http://localhost/hook").unwrap();
        assert_eq!(notifier.url(), "http://localhost/hook");
        assert_eq!(notifier.retry_delays, RETRY_DELAYS.to_vec());
    }

    #[test]
    fn webhook_error_display_http_status() {
        let err = WebhookError::HttpStatus(502);
        assert_eq!(err.to_string(), "Webhook returned HTTP 502");
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_request_error() {
        // Nothing listens on the discard port.
        let notifier = WebhookNotifier::new("http://127.0.0.1:9/hook")
            .unwrap()
            .with_retry_delays(vec![Duration::ZERO]);
        let result = notifier.notify(&digest()).await;
        assert_matches!(result, Err(NotifyError::Webhook(WebhookError::Request(_))));
    }
}
