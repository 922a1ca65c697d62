//! # Coupon Service
//!
//! Limited-quantity coupon issuance and the member coupon lifecycle.
//!
//! ## Request path
//!
//! ```text
//! POST /issuances ──► stock counter ──► coupon.issuance ──► IssuanceHandler ──► store
//!                          │                                     │
//!                          └── negative: OUT_OF_STOCK            └── terminal error: counter restored
//! ```
//!
//! ## Background work
//!
//! - Workflow consumers: issuance, cancellation, welcome, birthday
//! - [`recovery::DlqRecoveryJob`]: requeues or escalates dead-lettered messages
//! - [`expiration::ExpirationJob`]: expires coupons past their end, one node at a time
//! - [`birthday::BirthdayIssuanceJob`]: daily birthday campaign
//! - [`reconciliation::StockReconciliationJob`]: seeds and clamps stock counters

pub mod admission;
pub mod alerting;
pub mod api;
pub mod birthday;
pub mod config;
pub mod expiration;
pub mod fulfillment;
pub mod member_coupons;
pub mod reconciliation;
pub mod recovery;
pub mod server;

pub use config::Config;
