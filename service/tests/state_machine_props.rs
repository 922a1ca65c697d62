//! Property tests for the member coupon state machine.
//!
//! Random sequences of use, cancel, expire and clock movement are applied to
//! one coupon; the invariants must hold after every step.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use chrono::Duration as ChronoDuration;
use coupon_core::ids::OrderId;
use coupon_core::member_coupon::CouponStatus;
use coupon_testing::{helpers, test_time};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Step {
    Use(i64),
    Cancel,
    Expire,
    Wait(i64),
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        (1i64..50).prop_map(Step::Use),
        Just(Step::Cancel),
        Just(Step::Expire),
        (1i64..48).prop_map(Step::Wait),
    ]
}

proptest! {
    #[test]
    fn status_fields_stay_consistent(
        lifetime_hours in 1i64..96,
        steps in prop::collection::vec(step(), 1..40),
    ) {
        let mut coupon = helpers::member_coupon(1, 1, 1, test_time() + ChronoDuration::hours(lifetime_hours));
        let mut now = test_time();

        for step in steps {
            let before = coupon.clone();
            let result = match step {
                Step::Use(order) => coupon.use_coupon(OrderId::new(order), now),
                Step::Cancel => coupon.cancel_usage(),
                Step::Expire => coupon.expire(),
                Step::Wait(hours) => {
                    now += ChronoDuration::hours(hours);
                    Ok(())
                }
            };

            // A rejected transition changes nothing
            if result.is_err() {
                prop_assert_eq!(&coupon, &before);
            }

            // Used exactly when attached to an order
            let used = coupon.status == CouponStatus::Used;
            prop_assert_eq!(used, coupon.order_id.is_some());
            prop_assert_eq!(used, coupon.used_at.is_some());

            // Expired is terminal
            if before.status == CouponStatus::Expired {
                prop_assert_eq!(coupon.status, CouponStatus::Expired);
            }

            // A coupon past its end never becomes used
            if matches!(step, Step::Use(_)) && now > coupon.ends_at {
                prop_assert_ne!(
                    (before.status, coupon.status),
                    (CouponStatus::NotUsed, CouponStatus::Used)
                );
            }
        }
    }

    #[test]
    fn use_then_cancel_restores_availability(order in 1i64..1_000, hours_left in 1i64..720) {
        let mut coupon = helpers::member_coupon(1, 1, 1, test_time() + ChronoDuration::hours(hours_left));
        let original = coupon.clone();

        coupon.use_coupon(OrderId::new(order), test_time()).unwrap();
        coupon.cancel_usage().unwrap();

        prop_assert_eq!(coupon, original);
    }
}
