//! Queue handlers for the asynchronous workflows.
//!
//! | Workflow | Handler | Terminal error handling |
//! |---|---|---|
//! | `issuance` | [`IssuanceHandler`] | restore the unit's stock counter |
//! | `cancellation` | [`CancellationHandler`] | already released: treated as done |
//! | `welcome`, `birthday` | [`CampaignHandler`] | none, no counter involved |
//!
//! Infrastructure errors are returned to the consumer loop, which retries
//! them locally and dead-letters what keeps failing.

use crate::member_coupons::MemberCouponService;
use async_trait::async_trait;
use coupon_core::environment::Clock;
use coupon_core::member_coupon::IssuancePeriod;
use coupon_core::message::{CouponMessage, Envelope};
use coupon_core::policy::CouponScope;
use coupon_core::stock::StockCounter;
use coupon_core::store::CouponStore;
use coupon_core::{CouponError, Result};
use coupon_runtime::MessageHandler;
use std::sync::Arc;
use tracing::{debug, info, warn};

fn unexpected(handler: &str, envelope: &Envelope) -> CouponError {
    CouponError::validation(format!(
        "{handler} received a {} message",
        envelope.workflow()
    ))
}

/// Fulfills admitted issuance requests.
pub struct IssuanceHandler {
    store: Arc<dyn CouponStore>,
    stock: Arc<dyn StockCounter>,
    clock: Arc<dyn Clock>,
}

impl IssuanceHandler {
    /// Creates the handler.
    #[must_use]
    pub fn new(
        store: Arc<dyn CouponStore>,
        stock: Arc<dyn StockCounter>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { store, stock, clock }
    }
}

#[async_trait]
impl MessageHandler for IssuanceHandler {
    async fn handle(&self, envelope: &Envelope) -> Result<()> {
        let CouponMessage::IssuanceRequested {
            user_id,
            coupon_unit_id,
        } = envelope.message
        else {
            return Err(unexpected("issuance handler", envelope));
        };

        let coupon = self
            .store
            .issue(user_id, coupon_unit_id, self.clock.now())
            .await?;

        info!(
            user_id = %user_id,
            coupon_unit_id = %coupon_unit_id,
            member_coupon_id = %coupon.id,
            "Coupon issued"
        );
        Ok(())
    }

    /// Gives the admitted slot back to the counter.
    ///
    /// A unit without a counter is unlimited and left alone.
    async fn compensate(&self, envelope: &Envelope, error: &CouponError) -> Result<()> {
        let Some(unit) = envelope.message.coupon_unit_id() else {
            return Ok(());
        };

        match self.stock.increment(unit).await? {
            Some(value) => warn!(
                coupon_unit_id = %unit,
                counter = value,
                reason = %error,
                "Issuance rejected, stock counter restored"
            ),
            None => debug!(coupon_unit_id = %unit, reason = %error, "Issuance rejected for unlimited unit"),
        }
        Ok(())
    }
}

/// Releases coupons of cancelled orders.
pub struct CancellationHandler {
    member_coupons: Arc<MemberCouponService>,
}

impl CancellationHandler {
    /// Creates the handler.
    #[must_use]
    pub const fn new(member_coupons: Arc<MemberCouponService>) -> Self {
        Self { member_coupons }
    }
}

#[async_trait]
impl MessageHandler for CancellationHandler {
    async fn handle(&self, envelope: &Envelope) -> Result<()> {
        let CouponMessage::CancellationRequested { order_id } = envelope.message else {
            return Err(unexpected("cancellation handler", envelope));
        };

        match self.member_coupons.cancel_member_coupon(order_id).await {
            Ok(_) => Ok(()),
            // Nothing left to release: an earlier delivery or request got there
            Err(CouponError::NotFound { .. } | CouponError::Conflict(_)) => {
                debug!(order_id = %order_id, "Order coupons already released");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

/// Issues campaign coupons (welcome, birthday) from the active policy of
/// the campaign's scope.
pub struct CampaignHandler {
    store: Arc<dyn CouponStore>,
    clock: Arc<dyn Clock>,
}

impl CampaignHandler {
    /// Creates the handler.
    #[must_use]
    pub fn new(store: Arc<dyn CouponStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }
}

#[async_trait]
impl MessageHandler for CampaignHandler {
    async fn handle(&self, envelope: &Envelope) -> Result<()> {
        let (user_id, scope, period) = match envelope.message {
            CouponMessage::WelcomeCouponRequested { user_id } => {
                (user_id, CouponScope::Welcome, IssuancePeriod::Once)
            }
            CouponMessage::BirthdayCouponRequested { user_id, year } => {
                debug!(user_id = %user_id, year, "Birthday coupon requested");
                (user_id, CouponScope::Birthday, IssuancePeriod::Year(year))
            }
            _ => return Err(unexpected("campaign handler", envelope)),
        };

        let unit = self.store.find_active_unit_by_scope(scope).await?;
        let coupon = self
            .store
            .issue_in_period(user_id, unit.id, period, self.clock.now())
            .await?;

        info!(
            user_id = %user_id,
            scope = scope.as_str(),
            coupon_unit_id = %unit.id,
            member_coupon_id = %coupon.id,
            "Campaign coupon issued"
        );
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use coupon_core::error::ConflictKind;
    use coupon_core::ids::{CouponUnitId, OrderId, UserId};
    use coupon_testing::helpers;
    use coupon_testing::{InMemoryCouponStore, InMemoryQueue, InMemoryStockCounter, test_clock};

    fn issuance(user: i64, unit: i64) -> Envelope {
        Envelope::new(CouponMessage::IssuanceRequested {
            user_id: UserId::new(user),
            coupon_unit_id: CouponUnitId::new(unit),
        })
    }

    fn issuance_handler(store: &InMemoryCouponStore, stock: &InMemoryStockCounter) -> IssuanceHandler {
        IssuanceHandler::new(
            Arc::new(store.clone()),
            Arc::new(stock.clone()),
            Arc::new(test_clock()),
        )
    }

    #[tokio::test]
    async fn test_issuance_is_idempotent_per_member() {
        let store = InMemoryCouponStore::new();
        store.insert_policy(helpers::policy(1, CouponScope::Book));
        store.insert_unit(helpers::unit(1, 1, Some(5)));
        let handler = issuance_handler(&store, &InMemoryStockCounter::new());

        handler.handle(&issuance(7, 1)).await.unwrap();
        let again = handler.handle(&issuance(7, 1)).await.unwrap_err();

        assert_eq!(again, CouponError::Conflict(ConflictKind::DuplicateIssuance));
        assert_eq!(store.member_coupons().len(), 1);
        assert_eq!(store.remaining(CouponUnitId::new(1)), Some(4));
    }

    #[tokio::test]
    async fn test_compensation_restores_only_finite_counters() {
        let store = InMemoryCouponStore::new();
        let stock = InMemoryStockCounter::new();
        stock.set(CouponUnitId::new(1), -1);
        let handler = issuance_handler(&store, &stock);
        let error = CouponError::not_found(coupon_core::Resource::CouponUnit, 1);

        handler.compensate(&issuance(7, 1), &error).await.unwrap();
        handler.compensate(&issuance(7, 2), &error).await.unwrap();

        assert_eq!(stock.value(CouponUnitId::new(1)), Some(0));
        assert_eq!(stock.value(CouponUnitId::new(2)), None);
    }

    #[tokio::test]
    async fn test_campaign_issues_from_active_scope_policy() {
        let store = InMemoryCouponStore::new();
        store.insert_policy(helpers::policy(3, CouponScope::Welcome));
        store.insert_unit(helpers::unit(30, 3, None));
        let handler = CampaignHandler::new(Arc::new(store.clone()), Arc::new(test_clock()));

        let welcome = Envelope::new(CouponMessage::WelcomeCouponRequested {
            user_id: UserId::new(4),
        });
        handler.handle(&welcome).await.unwrap();
        let duplicate = handler.handle(&welcome).await.unwrap_err();

        assert!(!duplicate.is_retryable());
        assert_eq!(store.coupons_of(UserId::new(4)).len(), 1);

        let birthday = Envelope::new(CouponMessage::BirthdayCouponRequested {
            user_id: UserId::new(4),
            year: 2025,
        });
        let missing = handler.handle(&birthday).await.unwrap_err();
        assert!(matches!(missing, CouponError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_birthday_coupon_is_issued_once_per_year() {
        let store = InMemoryCouponStore::new();
        store.insert_policy(helpers::policy(5, CouponScope::Birthday));
        store.insert_unit(helpers::unit(50, 5, None));
        let handler = CampaignHandler::new(Arc::new(store.clone()), Arc::new(test_clock()));
        let birthday = |year| {
            Envelope::new(CouponMessage::BirthdayCouponRequested {
                user_id: UserId::new(4),
                year,
            })
        };

        handler.handle(&birthday(2025)).await.unwrap();
        let same_year = handler.handle(&birthday(2025)).await.unwrap_err();
        handler.handle(&birthday(2026)).await.unwrap();

        assert_eq!(same_year, CouponError::Conflict(ConflictKind::DuplicateIssuance));
        assert_eq!(store.coupons_of(UserId::new(4)).len(), 2);
    }

    #[tokio::test]
    async fn test_cancellation_of_released_order_is_done() {
        let store = InMemoryCouponStore::new();
        let service = MemberCouponService::new(
            Arc::new(store.clone()),
            Arc::new(InMemoryQueue::new()),
            Arc::new(test_clock()),
        );
        let handler = CancellationHandler::new(Arc::new(service));

        let envelope = Envelope::new(CouponMessage::CancellationRequested {
            order_id: OrderId::new(9),
        });
        assert!(handler.handle(&envelope).await.is_ok());
    }

    #[tokio::test]
    async fn test_wrong_workflow_is_terminal() {
        let store = InMemoryCouponStore::new();
        let handler = CampaignHandler::new(Arc::new(store), Arc::new(test_clock()));

        let err = handler.handle(&issuance(1, 1)).await.unwrap_err();
        assert!(!err.is_retryable());
    }
}
