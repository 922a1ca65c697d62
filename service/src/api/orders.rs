//! Order coupon release endpoint.
//!
//! - POST /api/orders/:order_id/coupon-cancellation - Release the order's coupons
//!
//! Called by the order system when an order is cancelled. With `?async=true`
//! the release is queued and processed by the cancellation workflow.

use crate::server::state::AppState;
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use coupon_core::ids::{MemberCouponId, OrderId};
use coupon_web::AppError;
use serde::{Deserialize, Serialize};

/// Cancellation options.
#[derive(Debug, Default, Deserialize)]
pub struct CancellationQuery {
    /// Queue the release instead of performing it in the request
    #[serde(rename = "async", default)]
    pub queued: bool,
}

/// Result of a release.
#[derive(Debug, Serialize, Deserialize)]
pub struct CancellationResponse {
    /// The cancelled order
    pub order_id: OrderId,
    /// Coupons released; empty when queued
    pub released: Vec<MemberCouponId>,
    /// `RELEASED` or `QUEUED`
    pub status: String,
}

/// Release every coupon applied to an order.
///
/// # Errors
///
/// 404 when no coupon is applied to the order (synchronous mode only).
pub async fn cancel_order_coupons(
    State(state): State<AppState>,
    Path(order_id): Path<i64>,
    Query(query): Query<CancellationQuery>,
) -> Result<(StatusCode, Json<CancellationResponse>), AppError> {
    let order_id = OrderId::new(order_id);

    if query.queued {
        state.member_coupons.request_cancellation(order_id).await?;
        return Ok((
            StatusCode::ACCEPTED,
            Json(CancellationResponse {
                order_id,
                released: Vec::new(),
                status: "QUEUED".to_string(),
            }),
        ));
    }

    let released = state.member_coupons.cancel_member_coupon(order_id).await?;
    Ok((
        StatusCode::OK,
        Json(CancellationResponse {
            order_id,
            released,
            status: "RELEASED".to_string(),
        }),
    ))
}
