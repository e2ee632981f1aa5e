//! Per-account digest of a materialization pass.

use chrono::Duration;
use perkcycle_core::types::{DbId, Timestamp};
use perkcycle_db::models::account_card::AccountCard;
use perkcycle_db::models::benefit::Benefit;
use perkcycle_db::models::benefit_status::UpsertedStatus;
use serde::Serialize;

/// One occurrence mentioned in a digest.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DigestEntry {
    pub status_id: DbId,
    pub benefit_id: DbId,
    pub category: String,
    pub description: String,
    pub max_amount: Option<f64>,
    pub occurrence_index: i32,
    pub cycle_start: Timestamp,
    pub cycle_end: Timestamp,
}

/// What one account should hear about after a pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountDigest {
    pub account_id: DbId,
    pub user_id: DbId,
    pub card_name: String,
    pub notification_email: Option<String>,
    /// Occurrences whose status row was created during this pass.
    pub newly_active: Vec<DigestEntry>,
    /// Unclaimed occurrences whose cycle ends within the warning window.
    pub expiring_soon: Vec<DigestEntry>,
}

impl AccountDigest {
    pub fn is_empty(&self) -> bool {
        self.newly_active.is_empty() && self.expiring_soon.is_empty()
    }

    /// Plain-text body used by the email channel.
    pub fn render_text(&self) -> String {
        let mut lines = vec![format!("Benefit update for your {} card", self.card_name)];

        if !self.newly_active.is_empty() {
            lines.push(String::new());
            lines.push("Now available:".to_string());
            lines.extend(self.newly_active.iter().map(render_entry));
        }
        if !self.expiring_soon.is_empty() {
            lines.push(String::new());
            lines.push("Expiring soon:".to_string());
            lines.extend(self.expiring_soon.iter().map(render_entry));
        }
        lines.join("\n")
    }
}

fn render_entry(entry: &DigestEntry) -> String {
    let cap = entry
        .max_amount
        .map(|amount| format!(" (up to {amount:.2})"))
        .unwrap_or_default();
    format!(
        "  - {}: {}{cap}, {} to {}",
        entry.category,
        entry.description,
        entry.cycle_start.format("%Y-%m-%d"),
        entry.cycle_end.format("%Y-%m-%d"),
    )
}

/// Build the digest for one account from the statuses upserted for it.
///
/// An occurrence is expiring soon when it is neither completed nor marked
/// unusable, has not been warned about yet, and its cycle ends in
/// `[now, now + warning_window]`. A newly
/// created occurrence can appear in both lists.
pub fn build_digest<'a>(
    account: &AccountCard,
    upserts: impl IntoIterator<Item = (&'a Benefit, &'a UpsertedStatus)>,
    now: Timestamp,
    warning_window: Duration,
) -> AccountDigest {
    let horizon = now + warning_window;
    let mut digest = AccountDigest {
        account_id: account.id,
        user_id: account.user_id,
        card_name: account.card_name.clone(),
        notification_email: account.notification_email.clone(),
        newly_active: Vec::new(),
        expiring_soon: Vec::new(),
    };

    for (benefit, upserted) in upserts {
        let status = &upserted.status;
        let entry = DigestEntry {
            status_id: status.id,
            benefit_id: benefit.id,
            category: benefit.category.clone(),
            description: benefit.description.clone(),
            max_amount: benefit.max_amount,
            occurrence_index: status.occurrence_index,
            cycle_start: status.cycle_start_date,
            cycle_end: status.cycle_end_date,
        };

        let ends_soon = status.cycle_end_date >= now && status.cycle_end_date <= horizon;
        if ends_soon && !status.is_protected() && status.expiry_warned_at.is_none() {
            digest.expiring_soon.push(entry.clone());
        }
        if upserted.created {
            digest.newly_active.push(entry);
        }
    }
    digest
}
