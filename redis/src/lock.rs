//! Distributed job locks.
//!
//! A lock is a key holding the owner's token, set with `SET NX PX` so it
//! expires on its own if the owner dies. Release checks the token in a script:
//! a lease that already expired cannot delete a newer holder's lock.

use coupon_core::environment::Clock;
use coupon_core::lock::{DistributedLock, LockLease};
use coupon_core::{BoxFuture, CouponError, Result};
use redis::Script;
use redis::aio::ConnectionManager;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

/// Deletes the key, or shortens its TTL to `ARGV[2]` ms, if it still holds `ARGV[1]`.
static RELEASE: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
        if redis.call('GET', KEYS[1]) == ARGV[1] then
            if tonumber(ARGV[2]) > 0 then
                return redis.call('PEXPIRE', KEYS[1], ARGV[2])
            end
            return redis.call('DEL', KEYS[1])
        end
        return 0
        ",
    )
});

/// Lock table in Redis.
#[derive(Clone)]
pub struct RedisLock {
    conn_manager: ConnectionManager,
    clock: Arc<dyn Clock>,
}

impl RedisLock {
    /// Wraps a managed connection. `clock` stamps lease acquisition times.
    #[must_use]
    pub fn new(conn_manager: ConnectionManager, clock: Arc<dyn Clock>) -> Self {
        Self {
            conn_manager,
            clock,
        }
    }
}

/// Milliseconds for `PX`/`PEXPIRE`, at least 1.
fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX).max(1)
}

impl DistributedLock for RedisLock {
    fn try_acquire(
        &self,
        name: &str,
        at_most: Duration,
    ) -> BoxFuture<'_, Result<Option<LockLease>>> {
        let name = name.to_string();
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let token = uuid::Uuid::new_v4().to_string();

            let reply: Option<String> = redis::cmd("SET")
                .arg(&name)
                .arg(&token)
                .arg("NX")
                .arg("PX")
                .arg(millis(at_most))
                .query_async(&mut conn)
                .await
                .map_err(|e| CouponError::lock(format!("Failed to acquire {name}: {e}")))?;

            if reply.is_none() {
                tracing::debug!(lock = %name, "Lock held elsewhere");
                return Ok(None);
            }

            tracing::debug!(lock = %name, at_most_ms = millis(at_most), "Lock acquired");
            Ok(Some(LockLease {
                name,
                token,
                acquired_at: self.clock.now(),
            }))
        })
    }

    fn release(&self, lease: LockLease, hold_for: Duration) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let hold_ms = if hold_for.is_zero() { 0 } else { millis(hold_for) };

            let released: i64 = RELEASE
                .key(&lease.name)
                .arg(&lease.token)
                .arg(hold_ms)
                .invoke_async(&mut conn)
                .await
                .map_err(|e| CouponError::lock(format!("Failed to release {}: {e}", lease.name)))?;

            if released == 0 {
                tracing::warn!(lock = %lease.name, "Lease expired before release");
            } else {
                tracing::debug!(lock = %lease.name, hold_ms = hold_ms, "Lock released");
            }
            Ok(())
        })
    }
}
