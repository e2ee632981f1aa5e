use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::TimeDelta;
use perkcycle_db::PgStore;
use perkcycle_worker::config::WorkerConfig;
use perkcycle_worker::materializer::CycleMaterializer;
use perkcycle_worker::{telemetry, trigger};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    telemetry::init_tracing();

    // --- Configuration ---
    let config = WorkerConfig::from_env()?;
    tracing::info!(
        interval_secs = config.materialize_interval.as_secs(),
        batch_size = config.materialize_batch_size,
        "Loaded worker configuration"
    );

    // --- Database ---
    let pool = perkcycle_db::create_pool(&config.database_url, config.db_max_connections)
        .await
        .context("Failed to connect to database")?;
    perkcycle_db::health_check(&pool)
        .await
        .context("Database health check failed")?;
    perkcycle_db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database ready");

    // --- Materializer ---
    let store = Arc::new(PgStore::new(pool).with_statement_timeout(config.account_tx_timeout));
    let notifier = config
        .build_notifier()
        .context("Failed to build notifier")?;
    let materializer = Arc::new(
        CycleMaterializer::new(store, notifier)
            .with_batch_size(config.materialize_batch_size)
            .with_expiry_warning(TimeDelta::days(config.expiry_warning_days))
            .with_account_timeout(config.account_tx_timeout),
    );

    let cancel = CancellationToken::new();
    let trigger_handle = tokio::spawn(trigger::run(
        materializer,
        config.materialize_interval,
        cancel.clone(),
    ));

    shutdown_signal().await;

    cancel.cancel();
    if tokio::time::timeout(Duration::from_secs(5), trigger_handle)
        .await
        .is_err()
    {
        tracing::warn!("Materialize trigger did not stop within 5s");
    }
    tracing::info!("Worker stopped");
    Ok(())
}

/// Wait for SIGINT (Ctrl-C) or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), shutting down");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        }
    }
}
