//! Redis-backed stock counters and job locks.
//!
//! - [`RedisStockCounter`]: per-unit counters under `coupon:stock:<unit>`,
//!   changed only by Lua scripts so a missing counter is never created
//! - [`RedisLock`]: `SET NX PX` locks released by token, with an optional
//!   minimum hold
//!
//! Both share one [`ConnectionManager`], which reconnects on its own.

mod lock;
mod stock;

pub use lock::RedisLock;
pub use stock::RedisStockCounter;

pub use redis::aio::ConnectionManager;

use coupon_core::{CouponError, Result};
use redis::Client;

/// Opens a managed connection to `redis_url`.
///
/// # Errors
///
/// Returns a `Cache` error if the URL is invalid or the server unreachable.
pub async fn connect(redis_url: &str) -> Result<ConnectionManager> {
    let client = Client::open(redis_url)
        .map_err(|e| CouponError::cache(format!("Failed to create Redis client: {e}")))?;

    ConnectionManager::new(client).await.map_err(|e| {
        CouponError::cache(format!("Failed to create Redis connection manager: {e}"))
    })
}

/// Sends `PING`, for readiness probes.
///
/// # Errors
///
/// Returns a `Cache` error if the server does not answer.
pub async fn ping(conn: &ConnectionManager) -> Result<()> {
    let mut conn = conn.clone();
    let _: String = redis::cmd("PING")
        .query_async(&mut conn)
        .await
        .map_err(|e| CouponError::cache(format!("Ping failed: {e}")))?;
    Ok(())
}
