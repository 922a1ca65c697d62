//! Stock counter reconciliation.
//!
//! The counter is decremented before anything is durable and is not restored
//! on rejection, so it drifts below the store's `remaining`. For each finite
//! unit the job:
//!
//! - seeds a missing counter from the store
//! - clamps a negative counter back to zero
//! - exports `counter - remaining` as the unit's drift
//!
//! Counters are never raised to match the store: in-flight requests are
//! already admitted and their rows are not written yet.

use async_trait::async_trait;
use coupon_core::ids::CouponUnitId;
use coupon_core::policy::CouponUnit;
use coupon_core::stock::StockCounter;
use coupon_core::store::CouponStore;
use coupon_core::Result;
use coupon_runtime::Job;
use coupon_runtime::metrics::StockMetrics;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Correction applied to one unit's counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciled {
    /// Counter created from the store's remaining quantity.
    Seeded(i64),
    /// Negative counter reset to zero.
    Clamped,
    /// Nothing to correct.
    Unchanged,
}

/// Scheduled reconciliation of stock counters against the store.
pub struct StockReconciliationJob {
    store: Arc<dyn CouponStore>,
    stock: Arc<dyn StockCounter>,
}

impl StockReconciliationJob {
    /// Creates the job.
    #[must_use]
    pub fn new(store: Arc<dyn CouponStore>, stock: Arc<dyn StockCounter>) -> Self {
        Self { store, stock }
    }

    /// Sets a unit's counter to its stored remaining quantity, for a newly
    /// created or re-stocked unit. Returns the seeded value, or `None` for an
    /// unlimited unit, which gets no counter.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown unit, `Database` or `Cache` on failure.
    pub async fn seed_unit(&self, unit_id: CouponUnitId) -> Result<Option<i64>> {
        let unit = self.store.find_unit(unit_id).await?;
        let Some(remaining) = unit.remaining else {
            debug!(coupon_unit_id = %unit_id, "Unlimited unit, no counter to seed");
            return Ok(None);
        };

        self.stock.seed(unit_id, remaining).await?;
        Ok(Some(remaining))
    }

    /// Reconciles one finite unit.
    ///
    /// # Errors
    ///
    /// `Cache` when the counter cannot be read or written.
    pub async fn reconcile_unit(&self, unit: &CouponUnit) -> Result<Reconciled> {
        let Some(remaining) = unit.remaining else {
            return Ok(Reconciled::Unchanged);
        };

        let outcome = match self.stock.get(unit.id).await? {
            None => {
                self.stock.seed(unit.id, remaining).await?;
                info!(coupon_unit_id = %unit.id, remaining, "Missing stock counter seeded");
                Reconciled::Seeded(remaining)
            }
            Some(value) if value < 0 => {
                // The script re-checks, a concurrent restore may have won
                if self.stock.clamp_negative(unit.id).await? {
                    warn!(coupon_unit_id = %unit.id, counter = value, "Negative stock counter clamped");
                    Reconciled::Clamped
                } else {
                    Reconciled::Unchanged
                }
            }
            Some(_) => Reconciled::Unchanged,
        };

        let counter = self.stock.get(unit.id).await?.unwrap_or(remaining);
        let drift = counter - remaining;
        StockMetrics::record_drift(unit.id.get(), drift);
        if drift != 0 {
            debug!(coupon_unit_id = %unit.id, counter, remaining, drift, "Stock counter drift");
        }

        Ok(outcome)
    }
}

#[async_trait]
impl Job for StockReconciliationJob {
    fn name(&self) -> &str {
        "stock-reconciliation"
    }

    /// Returns how many counters were corrected.
    async fn run(&self) -> Result<u64> {
        let units = self.store.list_finite_units().await?;

        let mut corrected = 0;
        for unit in &units {
            match self.reconcile_unit(unit).await {
                Ok(Reconciled::Unchanged) => {}
                Ok(_) => corrected += 1,
                Err(e) => error!(coupon_unit_id = %unit.id, error = %e, "Failed to reconcile stock counter"),
            }
        }

        info!(units = units.len(), corrected, "Stock reconciliation finished");
        Ok(corrected)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use coupon_core::policy::CouponScope;
    use coupon_testing::helpers;
    use coupon_testing::{InMemoryCouponStore, InMemoryStockCounter};

    fn setup() -> (InMemoryCouponStore, InMemoryStockCounter, StockReconciliationJob) {
        let store = InMemoryCouponStore::new();
        store.insert_policy(helpers::policy(1, CouponScope::Book));
        store.insert_unit(helpers::unit(1, 1, Some(10)));
        store.insert_unit(helpers::unit(2, 1, Some(0)));
        store.insert_unit(helpers::unit(3, 1, None));
        let stock = InMemoryStockCounter::new();
        let job = StockReconciliationJob::new(Arc::new(store.clone()), Arc::new(stock.clone()));
        (store, stock, job)
    }

    #[tokio::test]
    async fn test_seeds_missing_and_clamps_negative_counters() {
        let (_store, stock, job) = setup();
        stock.set(CouponUnitId::new(2), -4);

        let corrected = job.run().await.unwrap();

        assert_eq!(corrected, 2);
        assert_eq!(stock.value(CouponUnitId::new(1)), Some(10));
        assert_eq!(stock.value(CouponUnitId::new(2)), Some(0));
        assert_eq!(stock.value(CouponUnitId::new(3)), None);
    }

    #[tokio::test]
    async fn test_lagging_counter_is_left_alone() {
        let (_store, stock, job) = setup();
        stock.set(CouponUnitId::new(1), 7);
        stock.set(CouponUnitId::new(2), 0);

        assert_eq!(job.run().await.unwrap(), 0);
        assert_eq!(stock.value(CouponUnitId::new(1)), Some(7));
    }

    #[tokio::test]
    async fn test_seed_unit_skips_unlimited() {
        let (_store, stock, job) = setup();

        assert_eq!(job.seed_unit(CouponUnitId::new(1)).await.unwrap(), Some(10));
        assert_eq!(job.seed_unit(CouponUnitId::new(3)).await.unwrap(), None);
        assert_eq!(stock.value(CouponUnitId::new(3)), None);
        assert!(job.seed_unit(CouponUnitId::new(99)).await.is_err());
    }
}
