//! The notification seam.
//!
//! The materializer hands every non-empty [`AccountDigest`] to a
//! [`Notifier`]. Delivery failures are reported back as [`NotifyError`] so
//! they can be counted, but they never fail the account that produced them.

use std::sync::Arc;

use async_trait::async_trait;

use crate::delivery::email::EmailError;
use crate::delivery::webhook::WebhookError;
use crate::digest::AccountDigest;

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error(transparent)]
    Email(#[from] EmailError),

    #[error(transparent)]
    Webhook(#[from] WebhookError),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, digest: &AccountDigest) -> Result<(), NotifyError>;
}

// ---------------------------------------------------------------------------
// LogNotifier
// ---------------------------------------------------------------------------

/// Writes each digest to the log. Used when no external channel is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, digest: &AccountDigest) -> Result<(), NotifyError> {
        tracing::info!(
            account_id = digest.account_id,
            user_id = digest.user_id,
            card_name = %digest.card_name,
            newly_active = digest.newly_active.len(),
            expiring_soon = digest.expiring_soon.len(),
            "Benefit digest",
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// CompositeNotifier
// ---------------------------------------------------------------------------

/// Sends every digest through all inner notifiers in order.
///
/// Every channel is attempted even after one fails; the first error is
/// returned.
#[derive(Clone, Default)]
pub struct CompositeNotifier {
    notifiers: Vec<Arc<dyn Notifier>>,
}

impl CompositeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    pub fn len(&self) -> usize {
        self.notifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }
}

#[async_trait]
impl Notifier for CompositeNotifier {
    async fn notify(&self, digest: &AccountDigest) -> Result<(), NotifyError> {
        let mut first_err = None;
        for notifier in &self.notifiers {
            if let Err(e) = notifier.notify(digest).await {
                tracing::warn!(account_id = digest.account_id, error = %e, "Notifier failed");
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
