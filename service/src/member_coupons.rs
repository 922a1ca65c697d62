//! Member coupon lifecycle: use, cancel, list, and the asynchronous requests
//! handed to the cancellation and welcome workflows.

use coupon_core::environment::Clock;
use coupon_core::error::Resource;
use coupon_core::ids::{MemberCouponId, OrderId, UserId};
use coupon_core::member_coupon::{CouponStatus, MemberCoupon, MemberCouponSummary};
use coupon_core::message::{CouponMessage, Envelope};
use coupon_core::queue::MessageQueue;
use coupon_core::store::{CouponStore, Page, PageRequest};
use coupon_core::{CouponError, Result};
use std::sync::Arc;
use tracing::{info, instrument};

/// Operations on coupons members already hold.
pub struct MemberCouponService {
    store: Arc<dyn CouponStore>,
    queue: Arc<dyn MessageQueue>,
    clock: Arc<dyn Clock>,
}

impl MemberCouponService {
    /// Creates the service.
    #[must_use]
    pub fn new(
        store: Arc<dyn CouponStore>,
        queue: Arc<dyn MessageQueue>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { store, queue, clock }
    }

    /// Applies `user_id`'s coupon to `order_id`.
    ///
    /// # Errors
    ///
    /// - `NotFound` for an unknown coupon
    /// - `Forbidden` when the coupon belongs to someone else
    /// - `Conflict(AlreadyUsed)`, `BadRequest(Expired)` from the transition
    /// - `Conflict(ConcurrentModification)` when another write got there first
    #[instrument(skip(self), fields(member_coupon_id = %id, user_id = %user_id, order_id = %order_id))]
    pub async fn use_member_coupon(
        &self,
        id: MemberCouponId,
        user_id: UserId,
        order_id: OrderId,
    ) -> Result<MemberCoupon> {
        let mut coupon = self.store.find_member_coupon(id).await?;
        if coupon.user_id != user_id {
            return Err(CouponError::Forbidden(format!(
                "member coupon {id} does not belong to the requester"
            )));
        }

        let expected = coupon.status;
        coupon.use_coupon(order_id, self.clock.now())?;
        self.store.save_member_coupon(&coupon, expected).await?;

        info!("Member coupon used");
        Ok(coupon)
    }

    /// Releases every coupon applied to `order_id`.
    ///
    /// Returns the released coupon ids.
    ///
    /// # Errors
    ///
    /// - `NotFound` when no coupon is applied to the order
    /// - `Conflict(ConcurrentModification)` when a coupon changed meanwhile
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn cancel_member_coupon(&self, order_id: OrderId) -> Result<Vec<MemberCouponId>> {
        let used: Vec<MemberCoupon> = self
            .store
            .find_member_coupons_by_order(order_id)
            .await?
            .into_iter()
            .filter(|c| c.status == CouponStatus::Used)
            .collect();

        if used.is_empty() {
            return Err(CouponError::not_found(Resource::Order, order_id));
        }

        let mut released = Vec::with_capacity(used.len());
        for mut coupon in used {
            coupon.cancel_usage()?;
            self.store
                .save_member_coupon(&coupon, CouponStatus::Used)
                .await?;
            released.push(coupon.id);
        }

        info!(released = released.len(), "Order coupons released");
        Ok(released)
    }

    /// A page of `user_id`'s coupons, newest first, optionally by status.
    ///
    /// # Errors
    ///
    /// `Validation` for an out-of-range page size, `Database` on failure.
    pub async fn list_my_coupons(
        &self,
        user_id: UserId,
        status: Option<CouponStatus>,
        page: u32,
        size: u32,
    ) -> Result<Page<MemberCouponSummary>> {
        let page = PageRequest::new(page, size)?;
        self.store.list_member_coupons(user_id, status, page).await
    }

    /// Queues the release of `order_id`'s coupons.
    ///
    /// # Errors
    ///
    /// `Queue` when the hand-off fails.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn request_cancellation(&self, order_id: OrderId) -> Result<()> {
        self.queue
            .publish(&Envelope::new(CouponMessage::CancellationRequested { order_id }))
            .await?;
        info!("Coupon cancellation queued");
        Ok(())
    }

    /// Queues a welcome coupon for a newly signed-up member.
    ///
    /// # Errors
    ///
    /// `Queue` when the hand-off fails.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn request_welcome(&self, user_id: UserId) -> Result<()> {
        self.queue
            .publish(&Envelope::new(CouponMessage::WelcomeCouponRequested { user_id }))
            .await?;
        info!("Welcome coupon queued");
        Ok(())
    }
}
