//! Issuance admission: the synchronous fast path.
//!
//! ```text
//! decrement counter ──► value < 0 ──► Rejected(OutOfStock)
//!        │
//!        └──► publish IssuanceRequested ──► Accepted
//!                    │
//!                    └── fails / times out ──► increment counter, FailToIssue
//! ```
//!
//! The path never touches the relational store. A rejection does not restore
//! the counter: once negative, the unit stays closed until it is re-seeded.

use coupon_core::error::{BadRequestKind, InfraKind};
use coupon_core::ids::{CouponUnitId, UserId};
use coupon_core::message::{CouponMessage, Envelope};
use coupon_core::queue::MessageQueue;
use coupon_core::stock::StockCounter;
use coupon_core::{CouponError, Result};
use coupon_runtime::metrics::AdmissionMetrics;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, error, instrument};

/// Outcome of an admission attempt that reached a decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// The request was handed off for fulfillment.
    Accepted,
    /// The request was turned away.
    Rejected(BadRequestKind),
}

impl Admission {
    const fn label(&self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Rejected(_) => "out_of_stock",
        }
    }
}

/// Admits issuance requests against the stock counter and queues them.
pub struct IssuanceAdmission {
    stock: Arc<dyn StockCounter>,
    queue: Arc<dyn MessageQueue>,
    publish_timeout: Duration,
    counter_timeout: Duration,
}

impl IssuanceAdmission {
    /// Creates the admission path. Counter calls get a 500ms deadline.
    #[must_use]
    pub fn new(
        stock: Arc<dyn StockCounter>,
        queue: Arc<dyn MessageQueue>,
        publish_timeout: Duration,
    ) -> Self {
        Self {
            stock,
            queue,
            publish_timeout,
            counter_timeout: Duration::from_millis(500),
        }
    }

    /// Sets the deadline of each stock counter call.
    #[must_use]
    pub const fn with_counter_timeout(mut self, counter_timeout: Duration) -> Self {
        self.counter_timeout = counter_timeout;
        self
    }

    /// Admits `user_id`'s request for a coupon from `unit_id`.
    ///
    /// # Errors
    ///
    /// - `Cache` or `Timeout` when the counter is unreachable; nothing was taken
    /// - `FailToIssue` when the hand-off failed; the counter was restored
    #[instrument(skip(self), fields(user_id = %user_id, coupon_unit_id = %unit_id))]
    pub async fn request_issuance(&self, user_id: UserId, unit_id: CouponUnitId) -> Result<Admission> {
        let started = Instant::now();
        let result = self.admit(user_id, unit_id).await;

        let label = result.as_ref().map_or("failed", Admission::label);
        AdmissionMetrics::record(label, started.elapsed());
        result
    }

    async fn admit(&self, user_id: UserId, unit_id: CouponUnitId) -> Result<Admission> {
        let counted = timeout(self.counter_timeout, self.stock.decrement(unit_id))
            .await
            .map_err(|_| {
                CouponError::infra(InfraKind::Timeout, "stock counter did not answer in time")
            })??;

        if let Some(remaining) = counted {
            if remaining < 0 {
                debug!(remaining, "Unit sold out, rejecting");
                return Ok(Admission::Rejected(BadRequestKind::OutOfStock));
            }
        }

        let envelope = Envelope::new(CouponMessage::IssuanceRequested {
            user_id,
            coupon_unit_id: unit_id,
        });

        let published = match timeout(self.publish_timeout, self.queue.publish(&envelope)).await {
            Ok(result) => result,
            Err(_) => Err(CouponError::infra(
                InfraKind::Timeout,
                format!("publish did not complete within {:?}", self.publish_timeout),
            )),
        };

        if let Err(e) = published {
            error!(error = %e, "Failed to hand off issuance request");
            if counted.is_some() {
                self.restore(unit_id).await;
            }
            return Err(CouponError::infra(InfraKind::FailToIssue, e.to_string()));
        }

        debug!(remaining = ?counted, "Issuance request admitted");
        Ok(Admission::Accepted)
    }

    async fn restore(&self, unit_id: CouponUnitId) {
        match timeout(self.counter_timeout, self.stock.increment(unit_id)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => error!(error = %e, "Failed to restore stock counter"),
            Err(_) => error!("Timed out restoring stock counter"),
        }
    }
}
