//! Readiness probes for the service's own dependencies.

use coupon_core::{BoxFuture, Result};
use coupon_postgres::PostgresCouponStore;
use coupon_web::handlers::ReadinessCheck;
use coupon_redis::ConnectionManager;

/// Probes the relational store.
pub struct DatabaseCheck(pub PostgresCouponStore);

impl ReadinessCheck for DatabaseCheck {
    fn name(&self) -> &str {
        "database"
    }

    fn check(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(self.0.ping())
    }
}

/// Probes the stock counter and lock server.
pub struct CacheCheck(pub ConnectionManager);

impl ReadinessCheck for CacheCheck {
    fn name(&self) -> &str {
        "cache"
    }

    fn check(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(coupon_redis::ping(&self.0))
    }
}
