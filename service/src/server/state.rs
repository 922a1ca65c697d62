//! Application state for the coupon HTTP server.

use crate::admission::IssuanceAdmission;
use crate::member_coupons::MemberCouponService;
use axum::extract::FromRef;
use coupon_web::handlers::ReadinessChecks;
use std::sync::Arc;

/// Application state shared across all HTTP handlers.
///
/// Cloned per request; every field is an `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// Issuance fast path
    pub admission: Arc<IssuanceAdmission>,

    /// Member coupon lifecycle
    pub member_coupons: Arc<MemberCouponService>,

    /// Dependencies probed by `/ready`
    pub readiness: ReadinessChecks,
}

impl AppState {
    /// Create a new application state.
    #[must_use]
    pub const fn new(
        admission: Arc<IssuanceAdmission>,
        member_coupons: Arc<MemberCouponService>,
        readiness: ReadinessChecks,
    ) -> Self {
        Self {
            admission,
            member_coupons,
            readiness,
        }
    }
}

impl FromRef<AppState> for ReadinessChecks {
    fn from_ref(state: &AppState) -> Self {
        Arc::clone(&state.readiness)
    }
}
