//! Stock counters.

use coupon_core::ids::CouponUnitId;
use coupon_core::stock::{StockCounter, stock_key};
use coupon_core::{BoxFuture, CouponError, Result};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use std::sync::LazyLock;

/// DECR, but only on an existing key.
static DECREMENT: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
        if redis.call('EXISTS', KEYS[1]) == 1 then
            return redis.call('DECR', KEYS[1])
        end
        return false
        ",
    )
});

/// INCR, but only on an existing key.
static INCREMENT: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
        if redis.call('EXISTS', KEYS[1]) == 1 then
            return redis.call('INCR', KEYS[1])
        end
        return false
        ",
    )
});

/// Compare-and-set a negative counter back to zero.
static CLAMP_NEGATIVE: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
        local value = redis.call('GET', KEYS[1])
        if value and tonumber(value) < 0 then
            redis.call('SET', KEYS[1], 0)
            return 1
        end
        return 0
        ",
    )
});

/// Stock counters in Redis.
///
/// # Example
///
/// ```no_run
/// use coupon_core::ids::CouponUnitId;
/// use coupon_core::stock::StockCounter;
/// use coupon_redis::RedisStockCounter;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let stock = RedisStockCounter::new(coupon_redis::connect("redis://127.0.0.1:6379").await?);
/// stock.seed(CouponUnitId::new(10), 100).await?;
/// assert_eq!(stock.decrement(CouponUnitId::new(10)).await?, Some(99));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RedisStockCounter {
    conn_manager: ConnectionManager,
}

impl RedisStockCounter {
    /// Wraps a managed connection.
    #[must_use]
    pub const fn new(conn_manager: ConnectionManager) -> Self {
        Self { conn_manager }
    }

    async fn run(&self, script: &Script, unit: CouponUnitId) -> Result<Option<i64>> {
        let mut conn = self.conn_manager.clone();
        script
            .key(stock_key(unit))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| CouponError::cache(format!("Stock script failed for unit {unit}: {e}")))
    }
}

impl StockCounter for RedisStockCounter {
    fn decrement(&self, unit: CouponUnitId) -> BoxFuture<'_, Result<Option<i64>>> {
        Box::pin(self.run(&DECREMENT, unit))
    }

    fn increment(&self, unit: CouponUnitId) -> BoxFuture<'_, Result<Option<i64>>> {
        Box::pin(self.run(&INCREMENT, unit))
    }

    fn get(&self, unit: CouponUnitId) -> BoxFuture<'_, Result<Option<i64>>> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            conn.get(stock_key(unit))
                .await
                .map_err(|e| CouponError::cache(format!("Failed to read stock of unit {unit}: {e}")))
        })
    }

    fn seed(&self, unit: CouponUnitId, quantity: i64) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let _: () = conn
                .set(stock_key(unit), quantity)
                .await
                .map_err(|e| CouponError::cache(format!("Failed to seed stock of unit {unit}: {e}")))?;

            tracing::info!(coupon_unit_id = %unit, quantity = quantity, "Seeded stock counter");
            Ok(())
        })
    }

    fn clamp_negative(&self, unit: CouponUnitId) -> BoxFuture<'_, Result<bool>> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let clamped: i64 = CLAMP_NEGATIVE
                .key(stock_key(unit))
                .invoke_async(&mut conn)
                .await
                .map_err(|e| CouponError::cache(format!("Failed to clamp unit {unit}: {e}")))?;
            Ok(clamped == 1)
        })
    }
}
