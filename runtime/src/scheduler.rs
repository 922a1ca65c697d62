//! Periodic background jobs.

use async_trait::async_trait;
use coupon_core::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

/// A unit of scheduled work.
#[async_trait]
pub trait Job: Send + Sync {
    /// Name used in logs, metrics and as the lock name.
    fn name(&self) -> &str;

    /// Runs the job once and returns how many items it processed.
    ///
    /// # Errors
    ///
    /// Returns the error that aborted the run. The next tick runs again.
    async fn run(&self) -> Result<u64>;
}

/// Runs `job` every `interval` until a shutdown signal arrives.
///
/// The first run happens one interval after spawning. Ticks missed while a run
/// is still in progress are skipped, so runs never overlap within a process.
#[must_use]
pub fn spawn_periodic(
    job: Arc<dyn Job>,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(job = job.name(), interval_secs = interval.as_secs(), "Scheduled job started");

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!(job = job.name(), "Scheduled job received shutdown signal");
                    break;
                }
                _ = ticker.tick() => {
                    match job.run().await {
                        Ok(processed) => {
                            info!(job = job.name(), processed, "Scheduled job run completed");
                        }
                        Err(e) => {
                            error!(job = job.name(), error = %e, "Scheduled job run failed");
                        }
                    }
                }
            }
        }
    })
}
