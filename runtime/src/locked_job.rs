//! Cluster-wide exclusive job execution.
//!
//! A [`LockedJob`] runs its inner job only while holding a distributed lock
//! named after the job. The lock is taken with a TTL of `at_most`, so a crashed
//! holder frees it on its own, and is kept until at least `at_least` after
//! acquisition, so a fast run on one node does not let a node with a slightly
//! skewed schedule run the same job again right away.

use crate::metrics::JobMetrics;
use crate::scheduler::Job;
use async_trait::async_trait;
use coupon_core::Result;
use coupon_core::environment::Clock;
use coupon_core::lock::DistributedLock;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Hold bounds of the job lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockBounds {
    /// Minimum time the lock stays held after acquisition.
    pub at_least: Duration,
    /// Maximum time the lock can be held; its TTL.
    pub at_most: Duration,
}

impl Default for LockBounds {
    fn default() -> Self {
        Self {
            at_least: Duration::from_secs(30),
            at_most: Duration::from_secs(600),
        }
    }
}

/// Result of one attempt to run a locked job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockedRun {
    /// The lock was acquired and the job ran.
    Completed(u64),
    /// Another holder had the lock; nothing ran.
    Skipped,
}

/// Wraps a job so that only one node runs it at a time.
pub struct LockedJob {
    inner: Arc<dyn Job>,
    lock: Arc<dyn DistributedLock>,
    clock: Arc<dyn Clock>,
    bounds: LockBounds,
    lock_name: String,
}

impl LockedJob {
    /// Creates a locked job. The lock is named `job-lock:<job name>`.
    #[must_use]
    pub fn new(
        inner: Arc<dyn Job>,
        lock: Arc<dyn DistributedLock>,
        clock: Arc<dyn Clock>,
        bounds: LockBounds,
    ) -> Self {
        let lock_name = format!("job-lock:{}", inner.name());
        Self {
            inner,
            lock,
            clock,
            bounds,
            lock_name,
        }
    }

    /// Runs the inner job if the lock can be acquired.
    ///
    /// # Errors
    ///
    /// Returns lock errors and errors of the inner job. The lock is released
    /// (with the `at_least` floor) whether or not the job succeeded.
    pub async fn run_locked(&self) -> Result<LockedRun> {
        let Some(lease) = self
            .lock
            .try_acquire(&self.lock_name, self.bounds.at_most)
            .await?
        else {
            debug!(job = self.inner.name(), "Lock held elsewhere, skipping run");
            JobMetrics::record_run(self.inner.name(), "skipped");
            return Ok(LockedRun::Skipped);
        };

        info!(job = self.inner.name(), "Lock acquired, running job");
        let result = self.inner.run().await;

        let elapsed = (self.clock.now() - lease.acquired_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        let hold_for = self.bounds.at_least.saturating_sub(elapsed);

        if let Err(e) = self.lock.release(lease, hold_for).await {
            // The TTL frees the lock eventually.
            error!(job = self.inner.name(), error = %e, "Failed to release job lock");
        }

        match result {
            Ok(processed) => {
                JobMetrics::record_run(self.inner.name(), "completed");
                Ok(LockedRun::Completed(processed))
            }
            Err(e) => {
                JobMetrics::record_run(self.inner.name(), "failed");
                Err(e)
            }
        }
    }
}

#[async_trait]
impl Job for LockedJob {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn run(&self) -> Result<u64> {
        match self.run_locked().await? {
            LockedRun::Completed(processed) => Ok(processed),
            LockedRun::Skipped => Ok(0),
        }
    }
}
