//! Router configuration for the coupon service.

use super::state::AppState;
use crate::api;
use axum::{
    Router,
    middleware::from_fn,
    routing::{get, post},
};
use coupon_web::handlers::{health_check, readiness};
use coupon_web::middleware::correlation_id;
use tower_http::trace::TraceLayer;

/// Build the complete Axum router.
///
/// - `/health`, `/ready`: liveness and readiness, no identity required
/// - `/api/coupon-units/:unit_id/issuances`: limited issuance admission
/// - `/api/member-coupons`: listing and use
/// - `/api/orders/:order_id/coupon-cancellation`: called by the order system
/// - `/api/welcome-coupons`: called by the signup flow
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        // Issuance
        .route(
            "/coupon-units/:unit_id/issuances",
            post(api::request_issuance),
        )
        // Member coupons
        .route("/member-coupons", get(api::list_my_coupons))
        .route("/member-coupons/:id/use", post(api::use_member_coupon))
        // Internal callers
        .route(
            "/orders/:order_id/coupon-cancellation",
            post(api::cancel_order_coupons),
        )
        .route("/welcome-coupons", post(api::request_welcome));

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness))
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(from_fn(correlation_id))
        .with_state(state)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use crate::admission::IssuanceAdmission;
    use crate::member_coupons::MemberCouponService;
    use axum::{
        body::{Body, to_bytes},
        http::{Request, StatusCode},
    };
    use chrono::Duration as ChronoDuration;
    use coupon_core::ids::{CouponUnitId, OrderId, UserId};
    use coupon_core::message::{CouponMessage, Workflow};
    use coupon_core::policy::CouponScope;
    use coupon_testing::helpers;
    use coupon_testing::{InMemoryCouponStore, InMemoryQueue, InMemoryStockCounter, test_clock, test_time};
    use serde_json::Value;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    struct Fixture {
        store: InMemoryCouponStore,
        stock: InMemoryStockCounter,
        queue: InMemoryQueue,
        router: Router,
    }

    fn fixture() -> Fixture {
        let store = InMemoryCouponStore::new();
        store.insert_policy(helpers::policy(1, CouponScope::Book));
        store.insert_unit(helpers::unit(1, 1, Some(1)));
        let stock = InMemoryStockCounter::new();
        stock.set(CouponUnitId::new(1), 1);
        let queue = InMemoryQueue::new();

        let admission = IssuanceAdmission::new(
            Arc::new(stock.clone()),
            Arc::new(queue.clone()),
            Duration::from_secs(1),
        );
        let member_coupons = MemberCouponService::new(
            Arc::new(store.clone()),
            Arc::new(queue.clone()),
            Arc::new(test_clock()),
        );
        let state = AppState::new(
            Arc::new(admission),
            Arc::new(member_coupons),
            Arc::new(Vec::new()),
        );

        Fixture {
            store,
            stock,
            queue,
            router: build_router(state),
        }
    }

    fn post_as(uri: &str, user: Option<i64>, body: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method("POST").uri(uri);
        if let Some(user) = user {
            builder = builder.header("X-User-Id", user.to_string());
        }
        match body {
            Some(json) => builder
                .header("Content-Type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_issuance_accepted_then_out_of_stock() {
        let f = fixture();

        let first = f
            .router
            .clone()
            .oneshot(post_as("/api/coupon-units/1/issuances", Some(7), None))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::ACCEPTED);

        let second = f
            .router
            .oneshot(post_as("/api/coupon-units/1/issuances", Some(8), None))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json(second).await["code"], "OUT_OF_STOCK");

        assert_eq!(f.queue.pending(Workflow::Issuance).len(), 1);
        assert_eq!(f.stock.value(CouponUnitId::new(1)), Some(-1));
    }

    #[tokio::test]
    async fn test_issuance_requires_identity() {
        let f = fixture();

        let response = f
            .router
            .oneshot(post_as("/api/coupon-units/1/issuances", None, None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(f.queue.pending(Workflow::Issuance).is_empty());
    }

    #[tokio::test]
    async fn test_use_then_list_then_cancel() {
        let f = fixture();
        f.store
            .insert_member_coupon(helpers::member_coupon(5, 7, 1, test_time() + ChronoDuration::days(3)));

        let used = f
            .router
            .clone()
            .oneshot(post_as("/api/member-coupons/5/use", Some(7), Some(r#"{"order_id": 900}"#)))
            .await
            .unwrap();
        assert_eq!(used.status(), StatusCode::OK);
        assert_eq!(json(used).await["status"], "USED");

        let listed = f
            .router
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/member-coupons?status=USED")
                    .header("X-User-Id", "7")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(listed.status(), StatusCode::OK);
        assert_eq!(json(listed).await["total"], 1);

        let cancelled = f
            .router
            .oneshot(post_as("/api/orders/900/coupon-cancellation", None, None))
            .await
            .unwrap();
        assert_eq!(cancelled.status(), StatusCode::OK);
        assert_eq!(json(cancelled).await["released"][0], 5);
    }

    #[tokio::test]
    async fn test_use_of_someone_elses_coupon_is_forbidden() {
        let f = fixture();
        f.store
            .insert_member_coupon(helpers::member_coupon(5, 7, 1, test_time() + ChronoDuration::days(3)));

        let response = f
            .router
            .oneshot(post_as("/api/member-coupons/5/use", Some(8), Some(r#"{"order_id": 900}"#)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_async_cancellation_is_queued() {
        let f = fixture();

        let response = f
            .router
            .oneshot(post_as("/api/orders/900/coupon-cancellation?async=true", None, None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(
            f.queue.pending(Workflow::Cancellation)[0].message,
            CouponMessage::CancellationRequested {
                order_id: OrderId::new(900)
            }
        );
    }

    #[tokio::test]
    async fn test_unknown_status_filter_is_rejected() {
        let f = fixture();

        let response = f
            .router
            .oneshot(
                Request::builder()
                    .uri("/api/member-coupons?status=LOST")
                    .header("X-User-Id", "7")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_welcome_is_queued() {
        let f = fixture();

        let response = f
            .router
            .oneshot(post_as("/api/welcome-coupons", None, Some(r#"{"user_id": 12}"#)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(
            f.queue.pending(Workflow::Welcome)[0].message,
            CouponMessage::WelcomeCouponRequested {
                user_id: UserId::new(12)
            }
        );
    }
}
