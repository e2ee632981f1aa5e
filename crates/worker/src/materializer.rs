//! Cycle materializer.
//!
//! For every account and every recurring benefit on it, computes the cycle in
//! effect and upserts one status row per occurrence. Upserts only refresh
//! `cycle_end_date`, so repeated passes are idempotent and never touch what
//! the account holder recorded.
//!
//! Accounts are paged by ID and processed one page at a time, concurrently
//! within the page. After an account's upserts, its digest goes to the
//! notifier; delivery failures are counted but never fail the account.
//! Occurrences warned about in a delivered digest are stamped so later
//! passes do not warn again. Each account runs under its own deadline.

use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use perkcycle_core::benefit::CycleSchedule;
use perkcycle_core::cycle::compute_cycle;
use perkcycle_core::cycle_validation::validate_cycle;
use perkcycle_core::migration::{DEFAULT_BATCH_SIZE, DEFAULT_TRANSACTION_TIMEOUT};
use perkcycle_core::types::{DbId, Timestamp};
use perkcycle_db::models::account_card::AccountCardInstance;
use perkcycle_db::models::benefit::Benefit;
use perkcycle_db::models::benefit_status::{StatusKey, StatusUpsert, UpsertedStatus};
use perkcycle_db::BenefitStore;
use perkcycle_events::{build_digest, DigestEntry, Notifier};
use serde::Serialize;

use crate::batch;

/// Default look-ahead for "expiring soon".
pub const DEFAULT_EXPIRY_WARNING_DAYS: i64 = 7;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MaterializeReport {
    pub accounts_processed: usize,
    pub accounts_ok: usize,
    pub accounts_failed: usize,
    pub statuses_attempted: usize,
    pub statuses_ok: usize,
    pub statuses_failed: usize,
    /// Benefits that could not be materialized (no anchor, bad row,
    /// calculation error).
    pub benefits_skipped: usize,
    pub notifications_sent: usize,
    pub notifications_failed: usize,
    /// `false` when listing accounts failed and the pass stopped early.
    pub completed: bool,
}

/// Tally for one account.
#[derive(Debug, Default)]
struct AccountTally {
    attempted: usize,
    ok: usize,
    failed: usize,
    skipped: usize,
    notified: Option<bool>,
}

pub struct CycleMaterializer {
    store: Arc<dyn BenefitStore>,
    notifier: Arc<dyn Notifier>,
    batch_size: usize,
    expiry_warning: TimeDelta,
    account_timeout: Duration,
}

impl CycleMaterializer {
    pub fn new(store: Arc<dyn BenefitStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            store,
            notifier,
            batch_size: DEFAULT_BATCH_SIZE,
            expiry_warning: TimeDelta::days(DEFAULT_EXPIRY_WARNING_DAYS),
            account_timeout: DEFAULT_TRANSACTION_TIMEOUT,
        }
    }

    /// Accounts per page. Zero is treated as one.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_expiry_warning(mut self, window: TimeDelta) -> Self {
        self.expiry_warning = window;
        self
    }

    /// Deadline for one account's upserts and notification. An account that
    /// overruns it is counted failed; the rest of its page carries on.
    pub fn with_account_timeout(mut self, timeout: Duration) -> Self {
        self.account_timeout = timeout;
        self
    }

    /// Run one pass as of `now`.
    pub async fn materialize(&self, now: Timestamp) -> MaterializeReport {
        let mut report = MaterializeReport::default();
        let mut after: Option<DbId> = None;
        let limit = i64::try_from(self.batch_size).unwrap_or(i64::MAX);

        loop {
            let page = match self.store.list_accounts(after, limit).await {
                Ok(page) => page,
                Err(e) => {
                    tracing::error!(after_id = ?after, error = %e, "Failed to list accounts, stopping pass");
                    return report;
                }
            };
            if page.is_empty() {
                break;
            }

            let page_len = page.len();
            after = page.last().map(AccountCardInstance::id);
            let ids: Vec<DbId> = page.iter().map(AccountCardInstance::id).collect();

            let timeout = self.account_timeout;
            let results = batch::settle(page, |instance| {
                tokio::time::timeout(
                    timeout,
                    materialize_account(
                        Arc::clone(&self.store),
                        Arc::clone(&self.notifier),
                        instance,
                        now,
                        self.expiry_warning,
                    ),
                )
            })
            .await;

            for (account_id, joined) in ids.into_iter().zip(results) {
                report.accounts_processed += 1;
                match joined {
                    Ok(Ok(tally)) => {
                        report.statuses_attempted += tally.attempted;
                        report.statuses_ok += tally.ok;
                        report.statuses_failed += tally.failed;
                        report.benefits_skipped += tally.skipped;
                        match tally.notified {
                            Some(true) => report.notifications_sent += 1,
                            Some(false) => report.notifications_failed += 1,
                            None => {}
                        }
                        if tally.failed == 0 {
                            report.accounts_ok += 1;
                        } else {
                            report.accounts_failed += 1;
                        }
                    }
                    Ok(Err(_)) => {
                        tracing::warn!(account_id, ?timeout, "Account timed out");
                        report.accounts_failed += 1;
                    }
                    Err(e) => {
                        tracing::error!(account_id, error = %e, "Account task aborted");
                        report.accounts_failed += 1;
                    }
                }
            }

            if page_len < self.batch_size {
                break;
            }
        }

        report.completed = true;
        tracing::info!(
            accounts = report.accounts_processed,
            accounts_failed = report.accounts_failed,
            statuses_ok = report.statuses_ok,
            statuses_failed = report.statuses_failed,
            skipped = report.benefits_skipped,
            "Materialization pass finished",
        );
        report
    }
}

async fn materialize_account(
    store: Arc<dyn BenefitStore>,
    notifier: Arc<dyn Notifier>,
    instance: AccountCardInstance,
    now: Timestamp,
    expiry_warning: TimeDelta,
) -> AccountTally {
    let account = &instance.account;
    let mut tally = AccountTally::default();
    let mut upserted: Vec<(&Benefit, UpsertedStatus)> = Vec::new();

    for snapshot in &instance.benefits {
        let benefit = &snapshot.benefit;
        let schedule = match benefit.schedule() {
            Ok(schedule) => schedule,
            Err(e) => {
                tracing::warn!(account_id = account.id, benefit_id = benefit.id, error = %e, "Skipping benefit with invalid schedule");
                tally.skipped += 1;
                continue;
            }
        };

        if schedule == CycleSchedule::OneTime {
            continue;
        }
        if schedule.is_anniversary_anchored() && account.opened_date.is_none() {
            tracing::info!(
                account_id = account.id,
                benefit_id = benefit.id,
                "No opened date, skipping anniversary benefit",
            );
            tally.skipped += 1;
            continue;
        }

        let cycle = match compute_cycle(&schedule, now, account.opened_date) {
            Ok(cycle) => cycle,
            Err(e) => {
                tracing::error!(account_id = account.id, benefit_id = benefit.id, error = %e, "Cycle calculation failed");
                tally.skipped += 1;
                continue;
            }
        };
        if let Err(mismatch) = validate_cycle(&benefit.description, &cycle) {
            tracing::warn!(benefit_id = benefit.id, reason = %mismatch, "Cycle disagrees with description");
        }

        for occurrence_index in 0..benefit.occurrences_in_cycle.max(0) {
            tally.attempted += 1;
            let status = StatusUpsert {
                key: StatusKey {
                    benefit_id: benefit.id,
                    user_id: account.user_id,
                    cycle_start_date: cycle.start,
                    occurrence_index,
                },
                cycle_end_date: cycle.end,
            };
            match store.upsert_status(&status).await {
                Ok(row) => {
                    tally.ok += 1;
                    upserted.push((benefit, row));
                }
                Err(e) => {
                    tracing::warn!(
                        account_id = account.id,
                        benefit_id = benefit.id,
                        occurrence_index,
                        error = %e,
                        "Status upsert failed",
                    );
                    tally.failed += 1;
                }
            }
        }
    }

    let digest = build_digest(
        account,
        upserted.iter().map(|(benefit, row)| (*benefit, row)),
        now,
        expiry_warning,
    );
    if !digest.is_empty() {
        match notifier.notify(&digest).await {
            Ok(()) => {
                tally.notified = Some(true);
                mark_warned(store.as_ref(), account.id, &digest.expiring_soon, now).await;
            }
            Err(e) => {
                tracing::warn!(account_id = account.id, error = %e, "Digest delivery failed");
                tally.notified = Some(false);
            }
        }
    }

    tally
}

async fn mark_warned(
    store: &dyn BenefitStore,
    account_id: DbId,
    warned: &[DigestEntry],
    now: Timestamp,
) {
    if warned.is_empty() {
        return;
    }
    let status_ids: Vec<DbId> = warned.iter().map(|entry| entry.status_id).collect();
    // A missed stamp only means the warning goes out again next pass.
    if let Err(e) = store.mark_expiry_warned(&status_ids, now).await {
        tracing::warn!(account_id, error = %e, "Failed to record expiry warnings");
    }
}
