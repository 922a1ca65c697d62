//! # Coupon Runtime
//!
//! Long-running machinery shared by the coupon service processes.
//!
//! ## Components
//!
//! - **[`consumer::QueueConsumer`]**: subscribes to a workflow queue, retries
//!   infrastructure failures locally and dead-letters what still fails
//! - **[`scheduler`]**: periodic background jobs with graceful shutdown
//! - **[`locked_job::LockedJob`]**: runs a job on one node at a time under a
//!   distributed lock with at-least / at-most hold bounds
//! - **[`retry`]**: exponential backoff with optional jitter
//! - **[`metrics`]**: Prometheus recorder and metric recorders
//!
//! ## Example
//!
//! ```ignore
//! let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
//!
//! let consumer = QueueConsumer::new(
//!     Workflow::Issuance,
//!     queue.clone(),
//!     dlq.clone(),
//!     Arc::new(IssuanceHandler::new(store, stock, clock)),
//!     shutdown_tx.subscribe(),
//! );
//! let handle = consumer.spawn();
//! ```

/// Workflow queue consumer
pub mod consumer;

/// Lock-guarded job execution
pub mod locked_job;

/// Prometheus metrics for observability
pub mod metrics;

/// Retry logic with exponential backoff
pub mod retry;

/// Periodic job scheduling
pub mod scheduler;

pub use consumer::{MessageHandler, QueueConsumer, Settlement};
pub use locked_job::{LockBounds, LockedJob, LockedRun};
pub use retry::{RetryPolicy, retry_if, retry_transient};
pub use scheduler::{Job, spawn_periodic};
