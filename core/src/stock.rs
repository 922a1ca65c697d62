//! Stock counter abstraction.
//!
//! The counter is a fast-path approximation of a unit's remaining quantity,
//! kept in a shared cache. It is decremented on admission, before anything is
//! durable, so it may run below zero; a negative value means the unit is
//! closed. The relational store remains authoritative.
//!
//! A unit without a counter is unlimited: every operation on it reports
//! `None` and never creates the counter, except [`StockCounter::seed`].

use crate::BoxFuture;
use crate::error::Result;
use crate::ids::CouponUnitId;

/// Cache key of a unit's counter.
#[must_use]
pub fn stock_key(unit: CouponUnitId) -> String {
    format!("coupon:stock:{unit}")
}

/// Atomic per-unit stock counter.
///
/// Each operation is a single atomic step on the cache server.
pub trait StockCounter: Send + Sync {
    /// Decrements the counter and returns the new value.
    ///
    /// Returns `Ok(None)` without side effects when the unit has no counter.
    ///
    /// # Errors
    ///
    /// Returns a `Cache` infrastructure error if the cache is unreachable.
    fn decrement(&self, unit: CouponUnitId) -> BoxFuture<'_, Result<Option<i64>>>;

    /// Increments the counter and returns the new value.
    ///
    /// Returns `Ok(None)` without side effects when the unit has no counter.
    ///
    /// # Errors
    ///
    /// Returns a `Cache` infrastructure error if the cache is unreachable.
    fn increment(&self, unit: CouponUnitId) -> BoxFuture<'_, Result<Option<i64>>>;

    /// Reads the counter.
    ///
    /// # Errors
    ///
    /// Returns a `Cache` infrastructure error if the cache is unreachable.
    fn get(&self, unit: CouponUnitId) -> BoxFuture<'_, Result<Option<i64>>>;

    /// Sets the counter to `quantity`, creating it if missing.
    ///
    /// # Errors
    ///
    /// Returns a `Cache` infrastructure error if the cache is unreachable.
    fn seed(&self, unit: CouponUnitId, quantity: i64) -> BoxFuture<'_, Result<()>>;

    /// Resets a negative counter to zero. Returns whether it was negative.
    ///
    /// # Errors
    ///
    /// Returns a `Cache` infrastructure error if the cache is unreachable.
    fn clamp_negative(&self, unit: CouponUnitId) -> BoxFuture<'_, Result<bool>>;
}
