//! HTTP API handlers, by resource:
//!
//! - Issuances: admission of limited coupon requests
//! - Member coupons: use and listing
//! - Orders: release of coupons applied to a cancelled order
//! - Welcome coupons: signup hand-off

pub mod issuances;
pub mod member_coupons;
pub mod orders;
pub mod welcome;

pub use issuances::request_issuance;
pub use member_coupons::{list_my_coupons, use_member_coupon};
pub use orders::cancel_order_coupons;
pub use welcome::request_welcome;
