//! In-memory stock counter.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use coupon_core::ids::CouponUnitId;
use coupon_core::stock::StockCounter;
use coupon_core::{BoxFuture, CouponError, Result};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

#[derive(Debug, Default)]
struct State {
    counters: HashMap<CouponUnitId, i64>,
    unavailable: bool,
    delay: Option<Duration>,
}

/// Stock counter backed by a map. Each operation holds the lock for its whole
/// read-modify-write, like a single cache command.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStockCounter {
    state: Arc<RwLock<State>>,
}

impl InMemoryStockCounter {
    /// Create an empty counter (every unit unlimited).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a unit's counter directly.
    pub fn set(&self, unit: CouponUnitId, value: i64) {
        self.state.write().unwrap().counters.insert(unit, value);
    }

    /// Current counter value, if any.
    #[must_use]
    pub fn value(&self, unit: CouponUnitId) -> Option<i64> {
        self.state.read().unwrap().counters.get(&unit).copied()
    }

    /// Make every operation fail with a `Cache` error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.write().unwrap().unavailable = unavailable;
    }

    /// Delay every operation, to exercise timeouts.
    pub fn set_delay(&self, delay: Option<Duration>) {
        self.state.write().unwrap().delay = delay;
    }

    async fn apply<T>(&self, op: impl FnOnce(&mut HashMap<CouponUnitId, i64>) -> T) -> Result<T> {
        let delay = self.state.read().unwrap().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state.write().unwrap();
        if state.unavailable {
            return Err(CouponError::cache("connection refused"));
        }
        Ok(op(&mut state.counters))
    }
}

impl StockCounter for InMemoryStockCounter {
    fn decrement(&self, unit: CouponUnitId) -> BoxFuture<'_, Result<Option<i64>>> {
        Box::pin(self.apply(move |counters| {
            counters.get_mut(&unit).map(|value| {
                *value -= 1;
                *value
            })
        }))
    }

    fn increment(&self, unit: CouponUnitId) -> BoxFuture<'_, Result<Option<i64>>> {
        Box::pin(self.apply(move |counters| {
            counters.get_mut(&unit).map(|value| {
                *value += 1;
                *value
            })
        }))
    }

    fn get(&self, unit: CouponUnitId) -> BoxFuture<'_, Result<Option<i64>>> {
        Box::pin(self.apply(move |counters| counters.get(&unit).copied()))
    }

    fn seed(&self, unit: CouponUnitId, quantity: i64) -> BoxFuture<'_, Result<()>> {
        Box::pin(self.apply(move |counters| {
            counters.insert(unit, quantity);
        }))
    }

    fn clamp_negative(&self, unit: CouponUnitId) -> BoxFuture<'_, Result<bool>> {
        Box::pin(self.apply(move |counters| match counters.get_mut(&unit) {
            Some(value) if *value < 0 => {
                *value = 0;
                true
            }
            _ => false,
        }))
    }
}
