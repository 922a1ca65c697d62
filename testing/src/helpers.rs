//! Fixtures for domain objects.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use coupon_core::ids::{CouponUnitId, MemberCouponId, OrderId, PolicyId, UserId};
use coupon_core::member_coupon::{CouponStatus, MemberCoupon};
use coupon_core::policy::{
    CouponPolicy, CouponScope, CouponUnit, DiscountType, PolicyStatus, Validity,
};

/// Active fixed-amount policy with a 30 day relative validity.
#[must_use]
pub fn policy(id: i64, scope: CouponScope) -> CouponPolicy {
    CouponPolicy {
        id: PolicyId::new(id),
        name: format!("policy-{id}"),
        scope,
        discount_type: DiscountType::Fixed,
        discount_value: 3_000,
        min_order_amount: 15_000,
        max_discount: None,
        validity: Validity::Relative { days: 30 },
        status: PolicyStatus::Active,
        created_at: crate::test_time(),
    }
}

/// Active policy valid between two dates.
#[must_use]
pub fn fixed_policy(id: i64, starts_on: NaiveDate, ends_on: NaiveDate) -> CouponPolicy {
    CouponPolicy {
        validity: Validity::Fixed { starts_on, ends_on },
        ..policy(id, CouponScope::Custom)
    }
}

/// Unit with `remaining` coupons (`None` for unlimited).
#[must_use]
pub const fn unit(id: i64, policy_id: i64, remaining: Option<i64>) -> CouponUnit {
    CouponUnit {
        id: CouponUnitId::new(id),
        policy_id: PolicyId::new(policy_id),
        remaining,
    }
}

/// `NotUsed` member coupon issued 30 days before `ends_at`.
#[must_use]
pub fn member_coupon(
    id: i64,
    user_id: i64,
    unit_id: i64,
    ends_at: DateTime<Utc>,
) -> MemberCoupon {
    MemberCoupon {
        id: MemberCouponId::new(id),
        user_id: UserId::new(user_id),
        coupon_unit_id: CouponUnitId::new(unit_id),
        status: CouponStatus::NotUsed,
        issued_at: ends_at - Duration::days(30),
        ends_at,
        used_at: None,
        order_id: None,
    }
}

/// Member coupon in the `Used` state, attached to `order_id`.
#[must_use]
pub fn used_member_coupon(
    id: i64,
    user_id: i64,
    unit_id: i64,
    ends_at: DateTime<Utc>,
    order_id: i64,
) -> MemberCoupon {
    MemberCoupon {
        status: CouponStatus::Used,
        used_at: Some(ends_at - Duration::days(1)),
        order_id: Some(OrderId::new(order_id)),
        ..member_coupon(id, user_id, unit_id, ends_at)
    }
}
