//! Welcome coupon endpoint, called by the signup flow.
//!
//! - POST /api/welcome-coupons - Queue a welcome coupon for a new member

use crate::server::state::AppState;
use axum::{Json, extract::State, http::StatusCode};
use coupon_core::ids::UserId;
use coupon_web::AppError;
use serde::Deserialize;

/// Request body.
#[derive(Debug, Deserialize)]
pub struct WelcomeRequest {
    /// The member who just signed up
    pub user_id: UserId,
}

/// Queue a welcome coupon. Issuing twice to the same member is rejected by
/// the welcome workflow, so retries from the signup flow are safe.
///
/// # Errors
///
/// 400 for a non-positive member id, 503 when the request could not be queued.
pub async fn request_welcome(
    State(state): State<AppState>,
    Json(request): Json<WelcomeRequest>,
) -> Result<StatusCode, AppError> {
    if request.user_id.get() <= 0 {
        return Err(AppError::bad_request("user_id must be positive"));
    }

    state.member_coupons.request_welcome(request.user_id).await?;
    Ok(StatusCode::ACCEPTED)
}
