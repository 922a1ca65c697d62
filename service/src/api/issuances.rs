//! Issuance admission endpoint.
//!
//! - POST /api/coupon-units/:unit_id/issuances - Request a coupon (requires member identity)

use crate::admission::Admission;
use crate::server::state::AppState;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use coupon_core::CouponError;
use coupon_core::ids::CouponUnitId;
use coupon_web::{AppError, UserIdentity};
use serde::{Deserialize, Serialize};

/// Response after an accepted issuance request.
#[derive(Debug, Serialize, Deserialize)]
pub struct IssuanceAccepted {
    /// Unit the coupon will be issued from
    pub coupon_unit_id: CouponUnitId,
    /// Always `ACCEPTED`; the coupon appears once fulfillment completes
    pub status: String,
}

/// Request a coupon from a limited unit.
///
/// Returns 202 once the request is queued. Fulfillment is asynchronous: the
/// coupon shows up in the member's listing when it has been issued.
///
/// # Example
///
/// ```bash
/// curl -X POST http://localhost:8080/api/coupon-units/42/issuances \
///   -H "X-User-Id: 1001"
/// ```
///
/// # Errors
///
/// - 400 `OUT_OF_STOCK` when the unit is sold out
/// - 503 `FAIL_TO_ISSUE` when the request could not be queued
pub async fn request_issuance(
    UserIdentity(user_id): UserIdentity,
    State(state): State<AppState>,
    Path(unit_id): Path<i64>,
) -> Result<(StatusCode, Json<IssuanceAccepted>), AppError> {
    let unit_id = CouponUnitId::new(unit_id);

    match state.admission.request_issuance(user_id, unit_id).await? {
        Admission::Accepted => Ok((
            StatusCode::ACCEPTED,
            Json(IssuanceAccepted {
                coupon_unit_id: unit_id,
                status: "ACCEPTED".to_string(),
            }),
        )),
        Admission::Rejected(reason) => Err(CouponError::BadRequest(reason).into()),
    }
}
