//! `PostgreSQL` coupon store.
//!
//! Implements [`coupon_core::store::CouponStore`] with sqlx:
//!
//! - Issuance in one transaction under a `SELECT ... FOR UPDATE` lock on the unit
//! - Member coupon transitions as conditional updates (`WHERE status = $expected`)
//! - Keyset-paginated and bulk expiration
//! - The member coupon listing joined with policies
//! - [`PostgresMemberDirectory`], birthdays read from the membership table
//!
//! # Example
//!
//! ```ignore
//! use coupon_postgres::PostgresCouponStore;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = PostgresCouponStore::connect("postgres://localhost/coupons", 10).await?;
//!     store.migrate().await?;
//!     Ok(())
//! }
//! ```

mod directory;
mod rows;
mod store;

pub use directory::PostgresMemberDirectory;
pub use store::PostgresCouponStore;
