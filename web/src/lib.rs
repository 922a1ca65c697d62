//! Axum integration for the coupon service.
//!
//! Handlers in the service crate stay thin: extract, call a use case, map the
//! result. This crate supplies the pieces they share.
//!
//! - [`AppError`]: JSON error responses, converted from every `CouponError`
//! - [`UserIdentity`] and [`CorrelationId`] extractors
//! - [`middleware::correlation_id`]: request correlation and tracing span
//! - Liveness and readiness handlers
//!
//! # Example
//!
//! ```ignore
//! use axum::{Router, middleware::from_fn, routing::get};
//! use coupon_web::{AppError, UserIdentity, handlers, middleware};
//!
//! async fn my_coupons(UserIdentity(user): UserIdentity) -> Result<String, AppError> {
//!     Ok(user.to_string())
//! }
//!
//! let app = Router::new()
//!     .route("/health", get(handlers::health_check))
//!     .route("/api/v1/coupons", get(my_coupons))
//!     .layer(from_fn(middleware::correlation_id));
//! ```

#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;

pub use error::{AppError, ErrorResponse};
pub use extractors::{CorrelationId, USER_ID_HEADER, UserIdentity};
pub use middleware::CORRELATION_ID_HEADER;

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;
