//! Periodic activation sweep.
//!
//! Drives the recurring scan: each tick promotes due `Future` items to
//! `Pending`, publishes alerts for the newly promoted mobile-collection
//! items, and then retries any alerts stranded by an earlier failure.
//!
//! Errors from a tick are logged and the loop continues — a single failed
//! sweep should never take down the process.
//!
//! Runs until `Ctrl+C` (SIGINT) is received.

use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio::time;

use crate::service::CadenceService;

pub async fn run_activation_sweep(service: Arc<CadenceService>, sweep_interval_seconds: u64) {
    let mut interval = time::interval(Duration::from_secs(sweep_interval_seconds));

    tracing::info!(
        "Activation sweep started (interval: {}s)",
        sweep_interval_seconds
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                sweep_once(&service).await;
            }

            _ = signal::ctrl_c() => {
                tracing::info!("Shutdown signal received. Stopping sweep.");
                break;
            }
        }
    }

    tracing::info!("Activation sweep stopped cleanly");
}

/// Execute a single sweep cycle. Extracted for testability.
async fn sweep_once(service: &Arc<CadenceService>) {
    if let Err(err) = service.activate_and_notify().await {
        tracing::error!("Activation sweep error — skipping tick: {}", err);
        return;
    }

    match service.notify_unpublished().await {
        Ok(0) => {}
        Ok(retried) => {
            tracing::info!("Republished {} stranded alert(s)", retried);
        }
        Err(err) => {
            tracing::error!("Alert retry error: {}", err);
        }
    }
}
