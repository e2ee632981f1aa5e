//! perkcycle-migrate: apply a benefit migration plan to every account
//! holding the plan's card products.
//!
//! Runs as a dry run unless `--force` is given.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use perkcycle_core::migration::{MigrationOptions, DEFAULT_BATCH_SIZE};
use perkcycle_core::plan::MigrationPlan;
use perkcycle_db::PgStore;
use perkcycle_worker::config::WorkerConfig;
use perkcycle_worker::migration::MigrationEngine;
use perkcycle_worker::telemetry;

/// Apply a benefit migration plan
#[derive(Parser, Debug)]
#[command(name = "perkcycle-migrate")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the JSON plan document
    plan: PathBuf,

    /// Compute everything and write nothing (the default without --force)
    #[arg(long)]
    dry_run: bool,

    /// Run live, and downgrade pre-flight failures to warnings
    #[arg(long)]
    force: bool,

    /// Accounts migrated concurrently per batch
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    /// Stop after the first batch that records an error
    #[arg(long)]
    stop_on_error: bool,

    /// Replace benefits even if the account holder completed or marked them unusable
    #[arg(long)]
    no_preserve_protected_state: bool,

    /// Seed cycles without checking them against benefit descriptions
    #[arg(long)]
    no_validate_cycles: bool,

    /// Print the report as JSON instead of the text summary
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn options(&self, config: &WorkerConfig) -> MigrationOptions {
        MigrationOptions {
            dry_run: self.dry_run || !self.force,
            force: self.force,
            batch_size: self.batch_size,
            stop_on_first_error: self.stop_on_error,
            preserve_protected_state: !self.no_preserve_protected_state,
            validate_cycles: !self.no_validate_cycles,
            transaction_timeout: config.account_tx_timeout,
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();
    telemetry::init_tracing();

    let raw = tokio::fs::read_to_string(&cli.plan)
        .await
        .with_context(|| format!("Failed to read plan {}", cli.plan.display()))?;
    let plan = MigrationPlan::from_json(&raw)
        .with_context(|| format!("Invalid plan {}", cli.plan.display()))?;

    let config = WorkerConfig::from_env()?;
    let pool = perkcycle_db::create_pool(&config.database_url, config.db_max_connections)
        .await
        .context("Failed to connect to database")?;
    perkcycle_db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;

    let store = Arc::new(PgStore::new(pool).with_statement_timeout(config.account_tx_timeout));
    let engine = MigrationEngine::new(store);
    let report = engine.apply(&plan, &cli.options(&config)).await;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.summary());
    }

    Ok(if report.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
