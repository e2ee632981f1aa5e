//! Migration engine.
//!
//! Applies a [`MigrationPlan`] in three stages:
//!
//! 1. **Pre-flight**: every plan benefit is run through the calculator and
//!    validator against synthetic dates. Failures block the run unless
//!    `force` is set, and nothing has been written yet.
//! 2. **Template**: the card product's canonical template is upserted.
//! 3. **Accounts**: every account holding the card is migrated in bounded
//!    batches. Each account is one atomic unit; a failing account is
//!    recorded and never affects its siblings.
//!
//! The engine always returns a [`MigrationReport`], never an error.

use std::sync::Arc;

use chrono::{Months, NaiveDate, NaiveTime, TimeDelta, Utc};
use perkcycle_core::benefit::{BenefitDefinition, CycleSchedule};
use perkcycle_core::cycle::{compute_cycle, one_time_window, Cycle, CycleError};
use perkcycle_core::cycle_validation::{validate_cycle, CycleMismatch};
use perkcycle_core::migration::{IssueKind, MigrationIssue, MigrationOptions, MigrationReport};
use perkcycle_core::plan::{CardUpdate, MigrationPlan};
use perkcycle_core::types::{DbId, Timestamp};
use perkcycle_db::models::account_card::{AccountCard, AccountCardInstance};
use perkcycle_db::models::benefit::BenefitSnapshot;
use perkcycle_db::models::benefit_status::{StatusKey, StatusUpsert};
use perkcycle_db::models::card_template::UpsertCardTemplate;
use perkcycle_db::{BenefitStore, StoreError};

use crate::batch;

// ---------------------------------------------------------------------------
// Errors and outcomes
// ---------------------------------------------------------------------------

/// Why one account's migration was rolled back.
#[derive(Debug, thiserror::Error)]
pub enum AccountMigrationError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Cycle(#[from] CycleError),

    #[error("Cycle check failed for '{description}': {mismatch}")]
    Mismatch {
        description: String,
        mismatch: CycleMismatch,
    },

    #[error("Account task aborted: {0}")]
    Aborted(String),
}

/// What one account's migration did (or, in a dry run, would do).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountOutcome {
    pub benefits_created: usize,
    pub benefits_deleted: usize,
    pub benefits_preserved: usize,
    pub statuses_seeded: usize,
    pub warnings: Vec<String>,
}

/// Whether the run continues after a card update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

// ---------------------------------------------------------------------------
// Pre-flight
// ---------------------------------------------------------------------------

/// Synthetic "now" for a card update: its effective date at noon UTC.
pub fn preflight_reference(effective_date: NaiveDate) -> Timestamp {
    start_of_day(effective_date) + TimeDelta::hours(12)
}

/// Synthetic opened date: one year and one month before the reference, so an
/// anniversary window is always in its second year.
pub fn preflight_opened_date(reference: Timestamp) -> Option<NaiveDate> {
    reference.date_naive().checked_sub_months(Months::new(13))
}

/// Run every plan benefit through the calculator and validator against
/// synthetic dates. Returns every problem found, in plan order.
pub fn preflight(plan: &MigrationPlan) -> Vec<MigrationIssue> {
    let mut issues = Vec::new();

    for update in &plan.card_updates {
        let reference = preflight_reference(update.effective_date);
        let opened = preflight_opened_date(reference);

        for definition in &update.benefits {
            let label = benefit_label(definition);
            let cycle = match definition.schedule {
                CycleSchedule::OneTime => one_time_window(reference),
                schedule => compute_cycle(&schedule, reference, opened),
            };

            match cycle {
                Err(e) => issues.push(
                    MigrationIssue::new(
                        IssueKind::CycleCalculation,
                        format!("Benefit {label}: {e}"),
                    )
                    .for_card(&update.card_name),
                ),
                Ok(_) if definition.schedule == CycleSchedule::OneTime => {}
                Ok(cycle) => {
                    if let Err(mismatch) = validate_cycle(&definition.description, &cycle) {
                        issues.push(
                            MigrationIssue::new(
                                IssueKind::Validation,
                                format!("Benefit {label} failed pre-flight: {mismatch}"),
                            )
                            .for_card(&update.card_name),
                        );
                    }
                }
            }
        }
    }
    issues
}

// ---------------------------------------------------------------------------
// Per-account planning
// ---------------------------------------------------------------------------

/// Everything an account task needs about one card update.
#[derive(Debug)]
struct CardContext {
    card_name: String,
    definitions: Vec<BenefitDefinition>,
    /// Cycle reference for recurring benefits: `max(now, effective date)`.
    reference: Timestamp,
    /// Activation instant for one-time benefits.
    activation: Timestamp,
    options: MigrationOptions,
}

/// The changes one account needs, derived from its current benefits.
#[derive(Debug)]
struct AccountChanges<'a> {
    delete: Vec<DbId>,
    preserved: usize,
    create: Vec<&'a BenefitDefinition>,
    warnings: Vec<String>,
}

impl CardContext {
    fn plan_changes(&self, account_id: DbId, current: &[BenefitSnapshot]) -> AccountChanges<'_> {
        if !self.options.preserve_protected_state {
            return AccountChanges {
                delete: current.iter().map(|s| s.benefit.id).collect(),
                preserved: 0,
                create: self.definitions.iter().collect(),
                warnings: Vec::new(),
            };
        }

        let (protected, unprotected): (Vec<&BenefitSnapshot>, Vec<&BenefitSnapshot>) =
            current.iter().partition(|s| s.is_protected);

        let mut create = Vec::with_capacity(self.definitions.len());
        let mut warnings = Vec::new();
        for definition in &self.definitions {
            let kept = protected.iter().find(|s| {
                definition.same_perk(&s.benefit.category, &s.benefit.description)
            });
            match kept {
                Some(kept) => warnings.push(format!(
                    "Account {account_id}: kept protected benefit {} (id {}) in place of the \
                     plan's replacement",
                    benefit_label(definition),
                    kept.benefit.id
                )),
                None => create.push(definition),
            }
        }

        AccountChanges {
            delete: unprotected.iter().map(|s| s.benefit.id).collect(),
            preserved: protected.len(),
            create,
            warnings,
        }
    }

    /// The window a newly created benefit is seeded with.
    fn seed_cycle(
        &self,
        definition: &BenefitDefinition,
        opened: Option<NaiveDate>,
    ) -> Result<Cycle, AccountMigrationError> {
        if definition.schedule == CycleSchedule::OneTime {
            return Ok(one_time_window(self.activation)?);
        }

        let cycle = compute_cycle(&definition.schedule, self.reference, opened)?;
        if self.options.validate_cycles {
            validate_cycle(&definition.description, &cycle).map_err(|mismatch| {
                AccountMigrationError::Mismatch {
                    description: definition.description.clone(),
                    mismatch,
                }
            })?;
        }
        Ok(cycle)
    }
}

/// Compute what a live run would do to this account, writing nothing.
fn dry_run_account(
    ctx: &CardContext,
    instance: &AccountCardInstance,
) -> Result<AccountOutcome, AccountMigrationError> {
    let changes = ctx.plan_changes(instance.id(), &instance.benefits);
    let mut statuses = 0;
    for definition in &changes.create {
        ctx.seed_cycle(definition, instance.account.opened_date)?;
        statuses += definition.occurrences_in_cycle as usize;
    }

    Ok(AccountOutcome {
        benefits_created: changes.create.len(),
        benefits_deleted: changes.delete.len(),
        benefits_preserved: changes.preserved,
        statuses_seeded: statuses,
        warnings: changes.warnings,
    })
}

/// Migrate one account inside its own transaction.
///
/// Benefits are re-read under the account lock, so a status completed after
/// the account list was fetched is still protected.
async fn apply_account(
    store: Arc<dyn BenefitStore>,
    ctx: &CardContext,
    account: &AccountCard,
) -> Result<AccountOutcome, AccountMigrationError> {
    let mut tx = store.begin_account(account.id).await?;
    let current = tx.benefits().await?;
    let changes = ctx.plan_changes(account.id, &current);

    let mut outcome = AccountOutcome {
        benefits_preserved: changes.preserved,
        warnings: changes.warnings.clone(),
        ..AccountOutcome::default()
    };

    if !changes.delete.is_empty() {
        tx.delete_statuses(&changes.delete).await?;
        outcome.benefits_deleted = tx.delete_benefits(&changes.delete).await? as usize;
    }

    for definition in &changes.create {
        let cycle = ctx.seed_cycle(definition, account.opened_date)?;
        let benefit = tx.create_benefit(definition).await?;
        outcome.benefits_created += 1;

        for occurrence in 0..definition.occurrences_in_cycle {
            let occurrence_index = i32::try_from(occurrence).map_err(|_| {
                StoreError::InvalidRow(format!("occurrence index {occurrence} out of range"))
            })?;
            tx.upsert_status(&StatusUpsert {
                key: StatusKey {
                    benefit_id: benefit.id,
                    user_id: account.user_id,
                    cycle_start_date: cycle.start,
                    occurrence_index,
                },
                cycle_end_date: cycle.end,
            })
            .await?;
            outcome.statuses_seeded += 1;
        }
    }

    tx.commit().await?;
    Ok(outcome)
}

async fn migrate_account(
    store: Arc<dyn BenefitStore>,
    ctx: Arc<CardContext>,
    instance: AccountCardInstance,
) -> Result<AccountOutcome, AccountMigrationError> {
    if ctx.options.dry_run {
        return dry_run_account(&ctx, &instance);
    }

    let timeout = ctx.options.transaction_timeout;
    // Dropping the unit on timeout rolls it back.
    match tokio::time::timeout(timeout, apply_account(store, &ctx, &instance.account)).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(timeout).into()),
    }
}

// ---------------------------------------------------------------------------
// MigrationEngine
// ---------------------------------------------------------------------------

pub struct MigrationEngine {
    store: Arc<dyn BenefitStore>,
}

impl MigrationEngine {
    pub fn new(store: Arc<dyn BenefitStore>) -> Self {
        Self { store }
    }

    pub async fn apply(&self, plan: &MigrationPlan, options: &MigrationOptions) -> MigrationReport {
        self.apply_at(plan, options, Utc::now()).await
    }

    /// Apply `plan` as if the current instant were `now`.
    pub async fn apply_at(
        &self,
        plan: &MigrationPlan,
        options: &MigrationOptions,
        now: Timestamp,
    ) -> MigrationReport {
        let mut report = MigrationReport::new(&plan.id, plan.version, options.dry_run);
        tracing::info!(
            run_id = %report.run_id,
            plan_id = %plan.id,
            plan_version = plan.version,
            dry_run = options.dry_run,
            "Migration started",
        );

        if let Err(e) = plan.validate() {
            report.errors.push(MigrationIssue::new(IssueKind::Validation, e.to_string()));
            return finish(report);
        }
        if !options.dry_run && !options.force {
            report.errors.push(MigrationIssue::new(
                IssueKind::Validation,
                "A live migration requires force; re-run with force or as a dry run",
            ));
            return finish(report);
        }
        if options.batch_size == 0 {
            report.errors.push(MigrationIssue::new(
                IssueKind::Validation,
                "Batch size must be at least 1",
            ));
            return finish(report);
        }

        let blocking = preflight(plan);
        if !blocking.is_empty() {
            if options.force {
                tracing::warn!(
                    run_id = %report.run_id,
                    count = blocking.len(),
                    "Pre-flight failures overridden by force",
                );
                report
                    .warnings
                    .extend(blocking.iter().map(|issue| format!("Forced past: {issue}")));
            } else {
                tracing::error!(
                    run_id = %report.run_id,
                    count = blocking.len(),
                    "Pre-flight failed, nothing written",
                );
                report.errors.extend(blocking);
                return finish(report);
            }
        }

        for (position, update) in plan.card_updates.iter().enumerate() {
            if self.migrate_card(plan, update, options, now, &mut report).await == Flow::Stop {
                let remaining = plan.card_updates.len() - position - 1;
                if remaining > 0 {
                    report.warnings.push(format!(
                        "Stopped on first error; {remaining} card update(s) not attempted"
                    ));
                }
                break;
            }
        }

        finish(report)
    }

    async fn migrate_card(
        &self,
        plan: &MigrationPlan,
        update: &CardUpdate,
        options: &MigrationOptions,
        now: Timestamp,
        report: &mut MigrationReport,
    ) -> Flow {
        let errors_before = report.errors.len();

        if options.dry_run {
            tracing::info!(card_name = %update.card_name, "Dry run: template not written");
        } else {
            let template = UpsertCardTemplate {
                card_name: update.card_name.clone(),
                issuer: update.issuer.clone(),
                annual_fee: update.new_annual_fee,
                effective_date: update.effective_date,
                benefits: update.benefits.clone(),
                plan_id: Some(plan.id.clone()),
                plan_version: i32::try_from(plan.version).ok(),
            };
            match self.store.upsert_product_template(&template).await {
                Ok(outcome) => {
                    report.templates_upserted += 1;
                    tracing::info!(card_name = %update.card_name, ?outcome, "Template upserted");
                }
                Err(e) => {
                    tracing::error!(card_name = %update.card_name, error = %e, "Template upsert failed");
                    report.errors.push(
                        MigrationIssue::new(
                            IssueKind::Database,
                            format!("Template upsert failed: {e}"),
                        )
                        .for_card(&update.card_name),
                    );
                    return stop_or_continue(options, report, errors_before);
                }
            }
        }

        let accounts = match self.store.find_accounts_by_product(&update.card_name).await {
            Ok(accounts) => accounts,
            Err(e) => {
                tracing::error!(card_name = %update.card_name, error = %e, "Account fetch failed");
                report.errors.push(
                    MigrationIssue::new(IssueKind::Database, format!("Account fetch failed: {e}"))
                        .for_card(&update.card_name),
                );
                return stop_or_continue(options, report, errors_before);
            }
        };

        let effective = start_of_day(update.effective_date);
        let ctx = Arc::new(CardContext {
            card_name: update.card_name.clone(),
            definitions: update.benefits.clone(),
            reference: now.max(effective),
            activation: effective,
            options: options.clone(),
        });

        let total = accounts.len();
        tracing::info!(card_name = %ctx.card_name, accounts = total, "Migrating accounts");

        let mut attempted = 0;
        for chunk in accounts.chunks(options.batch_size) {
            let ids: Vec<DbId> = chunk.iter().map(AccountCardInstance::id).collect();
            let results = batch::settle(chunk.to_vec(), |instance| {
                migrate_account(Arc::clone(&self.store), Arc::clone(&ctx), instance)
            })
            .await;
            attempted += ids.len();

            for (account_id, joined) in ids.into_iter().zip(results) {
                let result = joined
                    .map_err(|e| AccountMigrationError::Aborted(e.to_string()))
                    .and_then(|r| r);
                record_account(report, &ctx.card_name, account_id, result);
            }

            if options.stop_on_first_error && report.errors.len() > errors_before {
                report.skipped_accounts += total - attempted;
                if attempted < total {
                    tracing::warn!(
                        card_name = %ctx.card_name,
                        skipped = total - attempted,
                        "Stopping after failed batch",
                    );
                }
                return Flow::Stop;
            }
        }

        Flow::Continue
    }
}

fn record_account(
    report: &mut MigrationReport,
    card_name: &str,
    account_id: DbId,
    result: Result<AccountOutcome, AccountMigrationError>,
) {
    match result {
        Ok(outcome) => {
            tracing::debug!(
                account_id,
                card_name,
                created = outcome.benefits_created,
                deleted = outcome.benefits_deleted,
                preserved = outcome.benefits_preserved,
                "Account migrated",
            );
            report.affected_accounts += 1;
            report.benefits_created += outcome.benefits_created;
            report.benefits_deleted += outcome.benefits_deleted;
            report.benefits_preserved += outcome.benefits_preserved;
            report.statuses_seeded += outcome.statuses_seeded;
            report.warnings.extend(outcome.warnings);
        }
        Err(e) => {
            tracing::error!(account_id, card_name, error = %e, "Account migration rolled back");
            report.failed_accounts += 1;
            report.errors.push(
                MigrationIssue::new(IssueKind::UserData, e.to_string())
                    .for_card(card_name)
                    .for_account(account_id),
            );
        }
    }
}

fn stop_or_continue(options: &MigrationOptions, report: &MigrationReport, errors_before: usize) -> Flow {
    if options.stop_on_first_error && report.errors.len() > errors_before {
        Flow::Stop
    } else {
        Flow::Continue
    }
}

fn finish(report: MigrationReport) -> MigrationReport {
    let report = report.finish();
    if report.success {
        tracing::info!(run_id = %report.run_id, affected = report.affected_accounts, "Migration finished");
    } else {
        tracing::warn!(
            run_id = %report.run_id,
            affected = report.affected_accounts,
            failed = report.failed_accounts,
            errors = report.errors.len(),
            "Migration finished with errors",
        );
    }
    report
}

fn start_of_day(date: NaiveDate) -> Timestamp {
    date.and_time(NaiveTime::MIN).and_utc()
}

fn benefit_label(definition: &BenefitDefinition) -> String {
    format!("'{}: {}'", definition.category, definition.description)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use perkcycle_core::benefit::{FixedWindow, Frequency};

    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn quarterly(start_month: u32, description: &str) -> BenefitDefinition {
        BenefitDefinition::new(
            "Dining",
            description,
            CycleSchedule::CalendarFixed {
                declared: Frequency::Quarterly,
                window: FixedWindow::new(start_month, 3).unwrap(),
            },
        )
    }

    fn plan_with(benefits: Vec<BenefitDefinition>) -> MigrationPlan {
        let update = benefits.into_iter().fold(
            CardUpdate::new("Sapphire", "Chase", date(2025, 7, 1)),
            CardUpdate::benefit,
        );
        MigrationPlan::builder("p", "Plan").card_update(update).build().unwrap()
    }

    #[test]
    fn synthetic_dates() {
        let reference = preflight_reference(date(2025, 7, 1));
        assert_eq!(reference, "2025-07-01T12:00:00Z".parse::<Timestamp>().unwrap());
        assert_eq!(preflight_opened_date(reference), Some(date(2024, 6, 1)));
    }

    #[test]
    fn preflight_passes_consistent_plan() {
        let plan = plan_with(vec![
            quarterly(7, "Q3: Jul-Sep dining credit"),
            BenefitDefinition::new("Travel", "Annual travel credit", CycleSchedule::Yearly),
            BenefitDefinition::new("Welcome", "December bonus", CycleSchedule::OneTime),
        ]);
        assert!(preflight(&plan).is_empty());
    }

    #[test]
    fn preflight_flags_mislabelled_quarter() {
        let plan = plan_with(vec![quarterly(1, "Q3: Jul-Sep dining credit")]);
        let issues = preflight(&plan);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind, IssueKind::Validation);
        assert_eq!(issues[0].card_name.as_deref(), Some("Sapphire"));
        assert!(issues[0].message.contains("Expected: 7"), "{}", issues[0].message);
        assert!(issues[0].message.contains("Got: 1"), "{}", issues[0].message);
    }

    fn context(options: MigrationOptions, definitions: Vec<BenefitDefinition>) -> CardContext {
        CardContext {
            card_name: "Sapphire".into(),
            definitions,
            reference: "2025-08-15T00:00:00Z".parse().unwrap(),
            activation: "2025-07-01T00:00:00Z".parse().unwrap(),
            options,
        }
    }

    #[test]
    fn seed_cycle_for_one_time_uses_activation() {
        let ctx = context(MigrationOptions::default(), Vec::new());
        let welcome = BenefitDefinition::new("Welcome", "Welcome bonus", CycleSchedule::OneTime);
        let cycle = ctx.seed_cycle(&welcome, None).unwrap();
        assert_eq!(cycle.start, ctx.activation);
        assert_eq!(cycle.end, "2035-07-01T00:00:00Z".parse::<Timestamp>().unwrap());
    }

    #[test]
    fn seed_cycle_mismatch_only_when_validating() {
        let wrong = quarterly(1, "Q3: Jul-Sep dining credit");

        let strict = context(MigrationOptions::default(), Vec::new());
        let err = strict.seed_cycle(&wrong, None).unwrap_err();
        assert!(matches!(err, AccountMigrationError::Mismatch { .. }));

        let lenient = context(
            MigrationOptions {
                validate_cycles: false,
                ..MigrationOptions::default()
            },
            Vec::new(),
        );
        assert!(lenient.seed_cycle(&wrong, None).is_ok());
    }
}
