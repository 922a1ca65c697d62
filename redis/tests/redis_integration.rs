//! Integration tests for the Redis stock counter and lock.
//!
//! Marked `#[ignore]` because they need Docker:
//!
//! ```bash
//! cargo test -p coupon-redis -- --ignored
//! ```

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::panic)]

use coupon_core::environment::SystemClock;
use coupon_core::ids::CouponUnitId;
use coupon_core::lock::DistributedLock;
use coupon_core::stock::StockCounter;
use coupon_redis::{RedisLock, RedisStockCounter};
use redis::aio::ConnectionManager;
use std::sync::Arc;
use std::time::Duration;
use testcontainers::ContainerAsync;
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::redis::{REDIS_PORT, Redis};

async fn setup() -> (ContainerAsync<Redis>, ConnectionManager) {
    let container = Redis::default()
        .start()
        .await
        .expect("Failed to start redis container");
    let port = container
        .get_host_port_ipv4(REDIS_PORT)
        .await
        .expect("Failed to get redis port");
    let url = format!("redis://127.0.0.1:{port}");

    for _ in 0..30 {
        if let Ok(conn) = coupon_redis::connect(&url).await {
            return (container, conn);
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    panic!("Redis did not become ready");
}

#[tokio::test]
#[ignore]
async fn test_counter_never_created_by_decrement() {
    let (_container, conn) = setup().await;
    let stock = RedisStockCounter::new(conn);
    let unit = CouponUnitId::new(1);

    assert_eq!(stock.decrement(unit).await.unwrap(), None);
    assert_eq!(stock.increment(unit).await.unwrap(), None);
    assert_eq!(stock.get(unit).await.unwrap(), None);
}

#[tokio::test]
#[ignore]
async fn test_counter_goes_negative_and_clamps() {
    let (_container, conn) = setup().await;
    let stock = RedisStockCounter::new(conn);
    let unit = CouponUnitId::new(2);

    stock.seed(unit, 1).await.unwrap();
    assert_eq!(stock.decrement(unit).await.unwrap(), Some(0));
    assert_eq!(stock.decrement(unit).await.unwrap(), Some(-1));

    assert!(stock.clamp_negative(unit).await.unwrap());
    assert_eq!(stock.get(unit).await.unwrap(), Some(0));
    assert!(!stock.clamp_negative(unit).await.unwrap());
}

#[tokio::test]
#[ignore]
async fn test_lock_is_exclusive_and_released_by_token() {
    let (_container, conn) = setup().await;
    let lock = RedisLock::new(conn, Arc::new(SystemClock));

    let lease = lock
        .try_acquire("job-lock:expiration", Duration::from_secs(60))
        .await
        .unwrap()
        .expect("first acquire");
    assert!(
        lock.try_acquire("job-lock:expiration", Duration::from_secs(60))
            .await
            .unwrap()
            .is_none()
    );

    lock.release(lease, Duration::ZERO).await.unwrap();
    assert!(
        lock.try_acquire("job-lock:expiration", Duration::from_secs(60))
            .await
            .unwrap()
            .is_some()
    );
}

#[tokio::test]
#[ignore]
async fn test_release_with_hold_keeps_lock_briefly() {
    let (_container, conn) = setup().await;
    let lock = RedisLock::new(conn, Arc::new(SystemClock));

    let lease = lock
        .try_acquire("job-lock:birthday", Duration::from_secs(60))
        .await
        .unwrap()
        .expect("acquire");
    lock.release(lease, Duration::from_millis(500)).await.unwrap();

    assert!(
        lock.try_acquire("job-lock:birthday", Duration::from_secs(60))
            .await
            .unwrap()
            .is_none()
    );
    tokio::time::sleep(Duration::from_millis(700)).await;
    assert!(
        lock.try_acquire("job-lock:birthday", Duration::from_secs(60))
            .await
            .unwrap()
            .is_some()
    );
}
