//! # Coupon Core
//!
//! Domain types and collaborator traits for limited-quantity coupon issuance.
//!
//! The crate holds everything that is independent of infrastructure:
//!
//! - **Domain**: [`policy::CouponPolicy`], [`policy::CouponUnit`] and the
//!   [`member_coupon::MemberCoupon`] state machine
//! - **Errors**: the [`error::CouponError`] taxonomy shared by every layer
//! - **Messages**: [`message::CouponMessage`] contracts and their delivery history
//! - **Collaborators**: traits for the stock counter, queues, dead letter
//!   queues, distributed lock, relational store, alerting and member directory
//!
//! Adapters live in sibling crates (`coupon-redis`, `coupon-redpanda`,
//! `coupon-postgres`) and in-memory fakes in `coupon-testing`.
//!
//! ## Trait objects
//!
//! Collaborator traits return boxed futures instead of using `async fn` so that
//! they can be held as `Arc<dyn Trait>`:
//!
//! ```ignore
//! let stock: Arc<dyn StockCounter> = Arc::new(RedisStockCounter::new(conn));
//! match stock.decrement(unit_id).await? {
//!     Some(remaining) if remaining < 0 => { /* sold out */ }
//!     _ => { /* admitted */ }
//! }
//! ```

use std::future::Future;
use std::pin::Pin;

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};

pub mod alert;
pub mod directory;
pub mod error;
pub mod ids;
pub mod lock;
pub mod member_coupon;
pub mod message;
pub mod policy;
pub mod queue;
pub mod stock;
pub mod store;

pub use error::{BadRequestKind, ConflictKind, CouponError, InfraKind, Resource, Result};
pub use ids::{CouponUnitId, MemberCouponId, OrderId, PolicyId, UserId};

/// Boxed future returned by collaborator traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Environment module - injected dependencies that are not collaborators
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```ignore
    /// // Test - fixed time for deterministic tests
    /// struct FixedClock { time: DateTime<Utc> }
    /// impl Clock for FixedClock {
    ///     fn now(&self) -> DateTime<Utc> {
    ///         self.time
    ///     }
    /// }
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
