//! Member coupon endpoints.
//!
//! - POST /api/member-coupons/:id/use - Apply a coupon to an order
//! - GET /api/member-coupons - List the member's coupons

use crate::server::state::AppState;
use axum::{
    Json,
    extract::{Path, Query, State},
};
use coupon_core::ids::{MemberCouponId, OrderId};
use coupon_core::member_coupon::{CouponStatus, MemberCoupon, MemberCouponSummary};
use coupon_core::store::{Page, PageRequest};
use coupon_web::{AppError, UserIdentity};
use serde::Deserialize;

/// Request to use a coupon.
#[derive(Debug, Deserialize)]
pub struct UseCouponRequest {
    /// Order the coupon is applied to
    pub order_id: OrderId,
}

/// Listing filters.
#[derive(Debug, Deserialize)]
pub struct ListCouponsQuery {
    /// `NOT_USED`, `USED` or `EXPIRED`; all statuses when absent
    pub status: Option<String>,
    /// Zero-based page index
    pub page: Option<u32>,
    /// Page size, at most 100
    pub size: Option<u32>,
}

/// Apply one of the member's coupons to an order.
///
/// # Example
///
/// ```bash
/// curl -X POST http://localhost:8080/api/member-coupons/7/use \
///   -H "X-User-Id: 1001" \
///   -H "Content-Type: application/json" \
///   -d '{"order_id": 555}'
/// ```
///
/// # Errors
///
/// 404 unknown coupon, 403 someone else's coupon, 409 `ALREADY_USED` or
/// `CONCURRENT_MODIFICATION`, 400 `COUPON_EXPIRED`.
pub async fn use_member_coupon(
    UserIdentity(user_id): UserIdentity,
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<UseCouponRequest>,
) -> Result<Json<MemberCoupon>, AppError> {
    let coupon = state
        .member_coupons
        .use_member_coupon(MemberCouponId::new(id), user_id, request.order_id)
        .await?;
    Ok(Json(coupon))
}

/// List the member's coupons, newest first.
///
/// # Example
///
/// ```bash
/// curl "http://localhost:8080/api/member-coupons?status=NOT_USED&page=0&size=20" \
///   -H "X-User-Id: 1001"
/// ```
///
/// # Errors
///
/// 400 for an unknown status or an out-of-range page size.
pub async fn list_my_coupons(
    UserIdentity(user_id): UserIdentity,
    State(state): State<AppState>,
    Query(query): Query<ListCouponsQuery>,
) -> Result<Json<Page<MemberCouponSummary>>, AppError> {
    let status = match query.status.as_deref() {
        None | Some("") => None,
        Some(raw) => Some(
            CouponStatus::parse(raw)
                .ok_or_else(|| AppError::bad_request(format!("Unknown coupon status: {raw}")))?,
        ),
    };
    let defaults = PageRequest::default();

    let page = state
        .member_coupons
        .list_my_coupons(
            user_id,
            status,
            query.page.unwrap_or(defaults.page),
            query.size.unwrap_or(defaults.size),
        )
        .await?;
    Ok(Json(page))
}
