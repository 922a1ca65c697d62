//! HTTP server module for the coupon service.
//!
//! - Application state shared by handlers
//! - Readiness probes for the store and the cache
//! - Router configuration

pub mod readiness;
pub mod routes;
pub mod state;

pub use routes::build_router;
pub use state::AppState;
