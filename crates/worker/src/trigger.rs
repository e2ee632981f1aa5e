//! Interval trigger for the materializer.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::materializer::CycleMaterializer;

/// Run a materialization pass every `period` until `cancel` fires.
///
/// The first pass starts immediately. A pass in progress finishes before
/// cancellation is observed.
pub async fn run(materializer: Arc<CycleMaterializer>, period: Duration, cancel: CancellationToken) {
    tracing::info!(interval_secs = period.as_secs(), "Materialize trigger started");

    let mut interval = tokio::time::interval(period);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Materialize trigger stopping");
                break;
            }
            _ = interval.tick() => {
                let report = materializer.materialize(Utc::now()).await;
                if report.accounts_failed > 0 || !report.completed {
                    tracing::warn!(?report, "Materialization pass had failures");
                } else {
                    tracing::debug!(?report, "Materialization pass clean");
                }
            }
        }
    }
}
