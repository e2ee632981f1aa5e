//! Migration run options and the structured report a run returns.
//!
//! The engine itself lives in the worker crate; these types are shared with
//! the CLI and anything else that needs to render or inspect a run.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use uuid::Uuid;

use crate::types::DbId;

/// Default number of accounts migrated concurrently per batch.
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Default ceiling on one account's transaction.
pub const DEFAULT_TRANSACTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Knobs for a migration run. The default is a safe dry run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationOptions {
    /// Compute everything, write nothing.
    pub dry_run: bool,
    /// Required for a live run; also downgrades pre-flight failures to warnings.
    pub force: bool,
    pub batch_size: usize,
    /// Checked between batches; the current batch always completes.
    pub stop_on_first_error: bool,
    /// Keep benefits whose statuses the account holder completed or marked unusable.
    pub preserve_protected_state: bool,
    /// Hard-fail an account whose seeded cycle disagrees with its description.
    pub validate_cycles: bool,
    pub transaction_timeout: Duration,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            dry_run: true,
            force: false,
            batch_size: DEFAULT_BATCH_SIZE,
            stop_on_first_error: false,
            preserve_protected_state: true,
            validate_cycles: true,
            transaction_timeout: DEFAULT_TRANSACTION_TIMEOUT,
        }
    }
}

/// Error taxonomy for migration issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// Bad plan shape or failed pre-flight cycle check. Fatal before any write.
    Validation,
    /// The calculator rejected its own inputs.
    CycleCalculation,
    /// A store operation outside an account unit failed.
    Database,
    /// One account's migration failed after pre-flight passed. Isolated.
    UserData,
}

impl IssueKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Validation => "ValidationError",
            Self::CycleCalculation => "CycleCalculationError",
            Self::Database => "DatabaseError",
            Self::UserData => "UserDataError",
        }
    }
}

/// One recorded failure, with enough context to retry manually.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MigrationIssue {
    pub kind: IssueKind,
    pub card_name: Option<String>,
    pub account_id: Option<DbId>,
    pub message: String,
}

impl MigrationIssue {
    pub fn new(kind: IssueKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            card_name: None,
            account_id: None,
            message: message.into(),
        }
    }

    pub fn for_card(mut self, card_name: impl Into<String>) -> Self {
        self.card_name = Some(card_name.into());
        self
    }

    pub fn for_account(mut self, account_id: DbId) -> Self {
        self.account_id = Some(account_id);
        self
    }
}

impl fmt::Display for MigrationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.kind.label())?;
        if let Some(card) = &self.card_name {
            write!(f, " card '{card}'")?;
        }
        if let Some(account_id) = self.account_id {
            write!(f, " account {account_id}")?;
        }
        write!(f, ": {}", self.message)
    }
}

/// Outcome of a migration run. Partial success is reported, never hidden.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MigrationReport {
    pub run_id: Uuid,
    pub plan_id: String,
    pub plan_version: u32,
    pub dry_run: bool,
    pub success: bool,
    pub affected_accounts: usize,
    pub failed_accounts: usize,
    /// Accounts never attempted because the run stopped early.
    pub skipped_accounts: usize,
    pub templates_upserted: usize,
    pub benefits_created: usize,
    pub benefits_deleted: usize,
    pub benefits_preserved: usize,
    pub statuses_seeded: usize,
    pub errors: Vec<MigrationIssue>,
    pub warnings: Vec<String>,
}

impl MigrationReport {
    pub fn new(plan_id: impl Into<String>, plan_version: u32, dry_run: bool) -> Self {
        Self {
            run_id: Uuid::now_v7(),
            plan_id: plan_id.into(),
            plan_version,
            dry_run,
            success: false,
            affected_accounts: 0,
            failed_accounts: 0,
            skipped_accounts: 0,
            templates_upserted: 0,
            benefits_created: 0,
            benefits_deleted: 0,
            benefits_preserved: 0,
            statuses_seeded: 0,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Seal the report: a run succeeds only with an empty error list.
    pub fn finish(mut self) -> Self {
        self.success = self.errors.is_empty();
        self
    }

    /// Number of errors of the given kind.
    pub fn error_count(&self, kind: IssueKind) -> usize {
        self.errors.iter().filter(|e| e.kind == kind).count()
    }

    /// Multi-line human-readable summary.
    pub fn summary(&self) -> String {
        let mode = if self.dry_run { "DRY RUN" } else { "LIVE" };
        let outcome = match (self.success, self.affected_accounts) {
            (true, _) => "succeeded",
            (false, 0) => "failed",
            (false, _) => "partially succeeded",
        };

        let mut lines = vec![
            format!(
                "Migration '{}' v{} [{mode}] {outcome} (run {})",
                self.plan_id, self.plan_version, self.run_id
            ),
            format!(
                "  accounts: {} affected, {} failed, {} skipped",
                self.affected_accounts, self.failed_accounts, self.skipped_accounts
            ),
            format!(
                "  benefits: {} created, {} deleted, {} preserved",
                self.benefits_created, self.benefits_deleted, self.benefits_preserved
            ),
            format!(
                "  statuses seeded: {}, templates upserted: {}",
                self.statuses_seeded, self.templates_upserted
            ),
        ];

        if !self.errors.is_empty() {
            lines.push(format!("  errors ({}):", self.errors.len()));
            lines.extend(self.errors.iter().map(|e| format!("    - {e}")));
        }
        if !self.warnings.is_empty() {
            lines.push(format!("  warnings ({}):", self.warnings.len()));
            lines.extend(self.warnings.iter().map(|w| format!("    - {w}")));
        }
        lines.join("\n")
    }
}
