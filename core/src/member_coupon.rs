//! Coupons issued to members and their lifecycle.
//!
//! ```text
//!            use_coupon            expire
//!   USED <────────────── NOT_USED ────────> EXPIRED
//!        ──────────────>
//!          cancel_usage
//! ```
//!
//! Every transition checks its precondition first, so a failed transition
//! leaves the coupon untouched.

use crate::error::{BadRequestKind, ConflictKind, CouponError, Result};
use crate::ids::{CouponUnitId, MemberCouponId, OrderId, UserId};
use crate::policy::{CouponPolicy, CouponScope, DiscountType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a member coupon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CouponStatus {
    /// Issued and available.
    NotUsed,
    /// Applied to an order.
    Used,
    /// Past its validity. Terminal.
    Expired,
}

impl CouponStatus {
    /// Database representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotUsed => "NOT_USED",
            Self::Used => "USED",
            Self::Expired => "EXPIRED",
        }
    }

    /// Parses the database representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "NOT_USED" => Some(Self::NotUsed),
            "USED" => Some(Self::Used),
            "EXPIRED" => Some(Self::Expired),
            _ => None,
        }
    }
}

/// Window within which a member holds at most one coupon from a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IssuancePeriod {
    /// One coupon per member, ever.
    Once,
    /// One coupon per member and calendar year, for recurring campaigns.
    Year(i32),
}

impl IssuancePeriod {
    /// Storage key: zero for `Once`, the year otherwise.
    #[must_use]
    pub const fn key(self) -> i32 {
        match self {
            Self::Once => 0,
            Self::Year(year) => year,
        }
    }
}

/// A coupon held by a member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberCoupon {
    /// Member coupon identifier.
    pub id: MemberCouponId,
    /// Owner.
    pub user_id: UserId,
    /// Unit the coupon was issued from.
    pub coupon_unit_id: CouponUnitId,
    /// Lifecycle status.
    pub status: CouponStatus,
    /// When the coupon was issued.
    pub issued_at: DateTime<Utc>,
    /// End of validity, copied from the policy at issuance.
    pub ends_at: DateTime<Utc>,
    /// When the coupon was used, while `Used`.
    pub used_at: Option<DateTime<Utc>>,
    /// Order the coupon is applied to, while `Used`.
    pub order_id: Option<OrderId>,
}

impl MemberCoupon {
    /// Creates a fresh `NotUsed` coupon whose validity follows `policy`.
    ///
    /// # Errors
    ///
    /// Returns `BadRequest(InvalidValidity)` when the policy's validity ends
    /// beyond the representable range.
    pub fn issue(
        id: MemberCouponId,
        user_id: UserId,
        coupon_unit_id: CouponUnitId,
        policy: &CouponPolicy,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        Ok(Self {
            id,
            user_id,
            coupon_unit_id,
            status: CouponStatus::NotUsed,
            issued_at: now,
            ends_at: policy.validity.end_at(now)?,
            used_at: None,
            order_id: None,
        })
    }

    /// Whether the validity window has passed at `now`.
    #[must_use]
    pub fn is_past_end(&self, now: DateTime<Utc>) -> bool {
        now > self.ends_at
    }

    /// Applies the coupon to an order.
    ///
    /// # Errors
    ///
    /// - `Conflict(AlreadyUsed)` when already used
    /// - `BadRequest(Expired)` when expired, or still `NotUsed` but past its end
    pub fn use_coupon(&mut self, order_id: OrderId, now: DateTime<Utc>) -> Result<()> {
        match self.status {
            CouponStatus::Used => return Err(CouponError::Conflict(ConflictKind::AlreadyUsed)),
            CouponStatus::Expired => return Err(CouponError::BadRequest(BadRequestKind::Expired)),
            CouponStatus::NotUsed => {}
        }
        if self.is_past_end(now) {
            return Err(CouponError::BadRequest(BadRequestKind::Expired));
        }

        self.status = CouponStatus::Used;
        self.used_at = Some(now);
        self.order_id = Some(order_id);
        Ok(())
    }

    /// Reverts a use, making the coupon available again.
    ///
    /// # Errors
    ///
    /// Returns `Conflict(NotUsed)` unless the coupon is `Used`.
    pub fn cancel_usage(&mut self) -> Result<()> {
        if self.status != CouponStatus::Used {
            return Err(CouponError::Conflict(ConflictKind::NotUsed));
        }

        self.status = CouponStatus::NotUsed;
        self.used_at = None;
        self.order_id = None;
        Ok(())
    }

    /// Marks the coupon expired.
    ///
    /// # Errors
    ///
    /// Returns `Conflict(AlreadyExpired)` or `Conflict(AlreadyUsed)` unless
    /// the coupon is `NotUsed`.
    pub fn expire(&mut self) -> Result<()> {
        match self.status {
            CouponStatus::Expired => Err(CouponError::Conflict(ConflictKind::AlreadyExpired)),
            CouponStatus::Used => Err(CouponError::Conflict(ConflictKind::AlreadyUsed)),
            CouponStatus::NotUsed => {
                self.status = CouponStatus::Expired;
                Ok(())
            }
        }
    }
}

/// Member coupon joined with its policy, as listed to the member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberCouponSummary {
    /// Member coupon identifier.
    pub id: MemberCouponId,
    /// Unit the coupon was issued from.
    pub coupon_unit_id: CouponUnitId,
    /// Lifecycle status.
    pub status: CouponStatus,
    /// When the coupon was issued.
    pub issued_at: DateTime<Utc>,
    /// End of validity.
    pub ends_at: DateTime<Utc>,
    /// When the coupon was used.
    pub used_at: Option<DateTime<Utc>>,
    /// Policy name.
    pub policy_name: String,
    /// Policy scope.
    pub scope: CouponScope,
    /// Discount interpretation.
    pub discount_type: DiscountType,
    /// Amount or percentage.
    pub discount_value: i64,
    /// Minimum order amount.
    pub min_order_amount: i64,
    /// Cap for percentage discounts.
    pub max_discount: Option<i64>,
}

impl MemberCouponSummary {
    /// Joins a member coupon with its policy.
    #[must_use]
    pub fn from_parts(coupon: &MemberCoupon, policy: &CouponPolicy) -> Self {
        Self {
            id: coupon.id,
            coupon_unit_id: coupon.coupon_unit_id,
            status: coupon.status,
            issued_at: coupon.issued_at,
            ends_at: coupon.ends_at,
            used_at: coupon.used_at,
            policy_name: policy.name.clone(),
            scope: policy.scope,
            discount_type: policy.discount_type,
            discount_value: policy.discount_value,
            min_order_amount: policy.min_order_amount,
            max_discount: policy.max_discount,
        }
    }
}
