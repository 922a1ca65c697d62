//! Strongly-typed identifiers.
//!
//! All identifiers are database-assigned `BIGINT` keys. Wrapping them keeps a
//! `UserId` from being passed where a `CouponUnitId` is expected.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Wraps a raw identifier.
            #[must_use]
            pub const fn new(id: i64) -> Self {
                Self(id)
            }

            /// Returns the raw identifier.
            #[must_use]
            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(
    /// Identifier of a member (end user).
    UserId
);
id_type!(
    /// Identifier of a coupon policy.
    PolicyId
);
id_type!(
    /// Identifier of an issuable coupon unit.
    CouponUnitId
);
id_type!(
    /// Identifier of a coupon issued to a member.
    MemberCouponId
);
id_type!(
    /// Identifier of an order a coupon was applied to.
    OrderId
);
