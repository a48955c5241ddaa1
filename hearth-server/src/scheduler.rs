//! Periodic refresh cycles.

use std::sync::Arc;

use chrono::Utc;
use hearth_core::{Aggregator, RefreshOutcome};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Run a cycle immediately, then every configured interval until `shutdown` fires.
///
/// The interval is re-read after each cycle so a changed `refresh_minutes`
/// applies from the next wait on.
pub fn spawn(aggregator: Arc<Aggregator>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match aggregator.refresh_if_idle(Utc::now()).await {
                RefreshOutcome::Published { version, degraded_sources } => {
                    debug!(version, degraded = degraded_sources.len(), "Scheduled refresh published");
                }
                RefreshOutcome::Skipped => debug!("Scheduled refresh skipped, cycle in progress"),
                outcome => warn!(?outcome, "Scheduled refresh did not publish"),
            }

            let wait = aggregator.refresh_interval().await;
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = shutdown.changed() => {
                    info!("Refresh scheduler stopping");
                    break;
                }
            }
        }
    })
}
