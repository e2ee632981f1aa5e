//! Benefit notifications.
//!
//! - [`AccountDigest`]: what changed for one account during a
//!   materialization pass (newly active and soon-expiring occurrences).
//! - [`Notifier`]: the delivery seam the materializer calls.
//! - [`delivery`]: external channels (email, webhook).
//! - [`LogNotifier`] / [`CompositeNotifier`]: log-only and fan-out notifiers.

pub mod delivery;
pub mod digest;
pub mod notifier;

pub use delivery::email::{EmailConfig, EmailNotifier};
pub use delivery::webhook::WebhookNotifier;
pub use digest::{build_digest, AccountDigest, DigestEntry};
pub use notifier::{CompositeNotifier, LogNotifier, Notifier, NotifyError};
