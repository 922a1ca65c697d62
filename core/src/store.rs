//! Relational store abstraction.
//!
//! The store is the source of truth for policies, units and member coupons.
//! Writes to member coupons are conditional on the status that was read, so
//! two concurrent transitions of the same coupon cannot both win.

use crate::BoxFuture;
use crate::error::{CouponError, Result};
use crate::ids::{CouponUnitId, MemberCouponId, OrderId, UserId};
use crate::member_coupon::{CouponStatus, IssuancePeriod, MemberCoupon, MemberCouponSummary};
use crate::policy::{CouponScope, CouponUnit};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Largest page size a caller may request.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Zero-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    /// Page index, starting at zero.
    pub page: u32,
    /// Items per page.
    pub size: u32,
}

impl PageRequest {
    /// Validates a page request.
    ///
    /// # Errors
    ///
    /// Returns a `Validation` error when `size` is zero or above [`MAX_PAGE_SIZE`].
    pub fn new(page: u32, size: u32) -> Result<Self> {
        if size == 0 || size > MAX_PAGE_SIZE {
            return Err(CouponError::validation(format!(
                "page size must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }
        Ok(Self { page, size })
    }

    /// Rows to skip.
    #[must_use]
    pub fn offset(&self) -> u64 {
        u64::from(self.page) * u64::from(self.size)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self { page: 0, size: 20 }
    }
}

/// One page of results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    /// Items on this page.
    pub items: Vec<T>,
    /// Page index.
    pub page: u32,
    /// Requested page size.
    pub size: u32,
    /// Total matching items across all pages.
    pub total: u64,
}

/// Persistence for policies, units and member coupons.
pub trait CouponStore: Send + Sync {
    /// Loads a unit.
    ///
    /// # Errors
    ///
    /// `NotFound` if absent, `Database` on failure.
    fn find_unit(&self, id: CouponUnitId) -> BoxFuture<'_, Result<CouponUnit>>;

    /// Finds the unit of the active policy with the given scope.
    ///
    /// Used for campaign coupons (welcome, birthday) that are not chosen by id.
    ///
    /// # Errors
    ///
    /// `NotFound` if no active policy has that scope, `Database` on failure.
    fn find_active_unit_by_scope(&self, scope: CouponScope) -> BoxFuture<'_, Result<CouponUnit>>;

    /// Units with a finite remaining quantity.
    ///
    /// # Errors
    ///
    /// `Database` on failure.
    fn list_finite_units(&self) -> BoxFuture<'_, Result<Vec<CouponUnit>>>;

    /// Issues a coupon from a unit to a member, atomically:
    ///
    /// 1. lock the unit row
    /// 2. check the policy is issuable at `now`
    /// 3. reject if the member already holds a coupon from the unit
    /// 4. take one from the unit's remaining quantity
    /// 5. insert a `NotUsed` member coupon valid per the policy
    ///
    /// # Errors
    ///
    /// - `NotFound` for an unknown unit or policy
    /// - `BadRequest(PolicyNotIssuable)`, `BadRequest(OutOfStock)`
    /// - `Conflict(DuplicateIssuance)`, including a unique violation on insert
    /// - `Database` on failure; nothing is committed
    fn issue(
        &self,
        user_id: UserId,
        unit_id: CouponUnitId,
        now: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<MemberCoupon>> {
        self.issue_in_period(user_id, unit_id, IssuancePeriod::Once, now)
    }

    /// [`CouponStore::issue`] for recurring campaigns: the duplicate check of
    /// step 3 only considers coupons issued from the unit in `period`.
    ///
    /// # Errors
    ///
    /// As [`CouponStore::issue`].
    fn issue_in_period(
        &self,
        user_id: UserId,
        unit_id: CouponUnitId,
        period: IssuancePeriod,
        now: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<MemberCoupon>>;

    /// Loads a member coupon.
    ///
    /// # Errors
    ///
    /// `NotFound` if absent, `Database` on failure.
    fn find_member_coupon(&self, id: MemberCouponId) -> BoxFuture<'_, Result<MemberCoupon>>;

    /// Member coupons attached to an order.
    ///
    /// # Errors
    ///
    /// `Database` on failure.
    fn find_member_coupons_by_order(
        &self,
        order_id: OrderId,
    ) -> BoxFuture<'_, Result<Vec<MemberCoupon>>>;

    /// Persists a transitioned coupon if its stored status is still `expected`.
    ///
    /// # Errors
    ///
    /// `Conflict(ConcurrentModification)` when the stored status differs,
    /// `Database` on failure.
    fn save_member_coupon(
        &self,
        coupon: &MemberCoupon,
        expected: CouponStatus,
    ) -> BoxFuture<'_, Result<()>>;

    /// Next chunk of `NotUsed` coupons with `ends_at < now`, ordered by id,
    /// strictly after the `after` cursor.
    ///
    /// # Errors
    ///
    /// `Database` on failure.
    fn find_expirable(
        &self,
        now: DateTime<Utc>,
        after: Option<MemberCouponId>,
        limit: u32,
    ) -> BoxFuture<'_, Result<Vec<MemberCoupon>>>;

    /// Persists a chunk of expired coupons in one transaction.
    ///
    /// Rows that are no longer `NotUsed` are skipped. Returns rows updated.
    ///
    /// # Errors
    ///
    /// `Database` on failure; nothing in the chunk is committed.
    fn save_expired(&self, coupons: &[MemberCoupon]) -> BoxFuture<'_, Result<u64>>;

    /// Expires every `NotUsed` coupon with `ends_at < now` in one statement.
    /// Returns rows updated.
    ///
    /// # Errors
    ///
    /// `Database` on failure.
    fn expire_all_due(&self, now: DateTime<Utc>) -> BoxFuture<'_, Result<u64>>;

    /// A member's coupons joined with their policies, newest first.
    ///
    /// # Errors
    ///
    /// `Database` on failure.
    fn list_member_coupons(
        &self,
        user_id: UserId,
        status: Option<CouponStatus>,
        page: PageRequest,
    ) -> BoxFuture<'_, Result<Page<MemberCouponSummary>>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_request_bounds() {
        assert!(PageRequest::new(0, 0).is_err());
        assert!(PageRequest::new(0, MAX_PAGE_SIZE + 1).is_err());
        assert_eq!(PageRequest::new(3, 20).map(|p| p.offset()), Ok(60));
    }
}
