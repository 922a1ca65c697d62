//! # Coupon Testing
//!
//! In-memory implementations of every collaborator trait in `coupon-core`,
//! plus clocks and fixtures, for fast deterministic tests.
//!
//! - [`InMemoryStockCounter`]: atomic counter map with failure injection
//! - [`InMemoryQueue`]: workflow queues and DLQs with receipts
//! - [`InMemoryLock`]: TTL lock driven by the injected clock
//! - [`InMemoryCouponStore`]: serialized store honoring every store contract
//! - [`RecordingAlertSender`], [`InMemoryMemberDirectory`]
//!
//! ## Example
//!
//! ```ignore
//! use coupon_testing::{InMemoryCouponStore, InMemoryQueue, InMemoryStockCounter, test_clock};
//!
//! #[tokio::test]
//! async fn test_admission() {
//!     let stock = Arc::new(InMemoryStockCounter::new());
//!     stock.set(unit_id, 1);
//!     let queue = Arc::new(InMemoryQueue::new());
//!     let admission = IssuanceAdmission::new(stock, queue.clone(), Duration::from_secs(1));
//!
//!     admission.request_issuance(user_id, unit_id).await?;
//!     assert_eq!(queue.pending(Workflow::Issuance).len(), 1);
//! }
//! ```

use chrono::{DateTime, Duration, Utc};
use coupon_core::environment::Clock;

pub mod directory;
pub mod helpers;
pub mod lock;
pub mod queue;
pub mod stock;
pub mod store;

/// Clocks for deterministic tests.
pub mod mocks {
    use super::{Clock, DateTime, Duration, Utc};
    use std::sync::RwLock;

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use coupon_testing::mocks::FixedClock;
    /// use coupon_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that only moves when told to.
    ///
    /// Shared between the code under test and the test through an `Arc`.
    #[derive(Debug)]
    pub struct ControllableClock {
        time: RwLock<DateTime<Utc>>,
    }

    impl ControllableClock {
        /// Create a clock starting at `time`.
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: RwLock::new(time),
            }
        }

        /// Move the clock forward.
        #[allow(clippy::unwrap_used)] // Test infrastructure
        pub fn advance(&self, by: Duration) {
            let mut time = self.time.write().unwrap();
            *time += by;
        }

        /// Jump to `time`.
        #[allow(clippy::unwrap_used)] // Test infrastructure
        pub fn set(&self, time: DateTime<Utc>) {
            *self.time.write().unwrap() = time;
        }
    }

    impl Clock for ControllableClock {
        #[allow(clippy::unwrap_used)] // Test infrastructure
        fn now(&self) -> DateTime<Utc> {
            *self.time.read().unwrap()
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(test_time())
    }

    /// The instant [`test_clock`] is fixed at.
    ///
    /// # Panics
    ///
    /// Never in practice; the timestamp is hardcoded.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_time() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .expect("hardcoded timestamp should always parse")
            .with_timezone(&Utc)
    }
}

// Re-export commonly used items
pub use directory::{InMemoryMemberDirectory, RecordingAlertSender};
pub use lock::InMemoryLock;
pub use mocks::{ControllableClock, FixedClock, test_clock, test_time};
pub use queue::InMemoryQueue;
pub use stock::InMemoryStockCounter;
pub use store::InMemoryCouponStore;

/// Installs a test subscriber honoring `RUST_LOG`. Safe to call repeatedly.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
