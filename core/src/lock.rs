//! Cluster-wide mutual exclusion for scheduled jobs.

use crate::BoxFuture;
use crate::error::Result;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// A held lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockLease {
    /// Lock name.
    pub name: String,
    /// Owner token; only the owner can release.
    pub token: String,
    /// When the lock was acquired.
    pub acquired_at: DateTime<Utc>,
}

/// Distributed lock with a bounded hold time.
pub trait DistributedLock: Send + Sync {
    /// Tries to take `name` for at most `at_most`.
    ///
    /// Returns `Ok(None)` when another holder has it. The lock frees itself
    /// after `at_most` even if the holder dies.
    ///
    /// # Errors
    ///
    /// Returns a `Lock` infrastructure error if the lock server is unreachable.
    fn try_acquire(
        &self,
        name: &str,
        at_most: Duration,
    ) -> BoxFuture<'_, Result<Option<LockLease>>>;

    /// Releases a lease.
    ///
    /// With a non-zero `hold_for`, the lock is kept for that much longer and
    /// then frees itself; otherwise it is freed immediately. A lease that has
    /// already lapsed or been taken over is left alone.
    ///
    /// # Errors
    ///
    /// Returns a `Lock` infrastructure error if the lock server is unreachable.
    fn release(&self, lease: LockLease, hold_for: Duration) -> BoxFuture<'_, Result<()>>;
}
