//! Health check endpoints.
//!
//! Liveness (`/health`) only says the process serves requests. Readiness
//! (`/ready`) runs every registered [`ReadinessCheck`] and reports
//! 503 when any dependency is down.

use axum::{Json, extract::State, http::StatusCode};
use coupon_core::{BoxFuture, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Health of one component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    /// Reachable.
    Healthy,
    /// Unreachable or failing.
    Unhealthy,
}

/// Result of one readiness check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentHealth {
    /// Component name.
    pub component: String,
    /// Status.
    pub status: HealthStatus,
    /// Failure detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Aggregate readiness report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    /// Worst component status.
    pub status: HealthStatus,
    /// Every component checked.
    pub components: Vec<ComponentHealth>,
}

/// A dependency probed for readiness.
pub trait ReadinessCheck: Send + Sync {
    /// Component name in the report.
    fn name(&self) -> &str;

    /// Probes the dependency.
    ///
    /// # Errors
    ///
    /// Any error marks the component unhealthy.
    fn check(&self) -> BoxFuture<'_, Result<()>>;
}

/// Readiness checks shared with the handler.
pub type ReadinessChecks = Arc<Vec<Arc<dyn ReadinessCheck>>>;

/// Simple health check endpoint (for basic liveness).
///
/// # Endpoint
///
/// ```text
/// GET /health
/// ```
#[allow(clippy::unused_async)]
pub async fn health_check() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

/// Readiness endpoint.
///
/// # Status Codes
///
/// - 200 OK: every component healthy
/// - 503 Service Unavailable: any component unhealthy
///
/// # Endpoint
///
/// ```text
/// GET /ready
/// ```
pub async fn readiness(State(checks): State<ReadinessChecks>) -> (StatusCode, Json<HealthReport>) {
    let results = futures::future::join_all(checks.iter().map(|check| async move {
        match check.check().await {
            Ok(()) => ComponentHealth {
                component: check.name().to_string(),
                status: HealthStatus::Healthy,
                message: None,
            },
            Err(e) => {
                tracing::warn!(component = check.name(), error = %e, "Readiness check failed");
                ComponentHealth {
                    component: check.name().to_string(),
                    status: HealthStatus::Unhealthy,
                    message: Some(e.to_string()),
                }
            }
        }
    }))
    .await;

    let healthy = results.iter().all(|c| c.status == HealthStatus::Healthy);
    let report = HealthReport {
        status: if healthy {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        },
        components: results,
    };

    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use coupon_core::CouponError;

    struct Probe {
        name: &'static str,
        up: bool,
    }

    impl ReadinessCheck for Probe {
        fn name(&self) -> &str {
            self.name
        }

        fn check(&self) -> BoxFuture<'_, Result<()>> {
            Box::pin(async move {
                if self.up {
                    Ok(())
                } else {
                    Err(CouponError::cache("connection refused"))
                }
            })
        }
    }

    #[tokio::test]
    async fn test_simple_health_check() {
        let (status, body) = health_check().await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");
    }

    #[tokio::test]
    async fn test_readiness_all_healthy() {
        let checks: ReadinessChecks = Arc::new(vec![
            Arc::new(Probe { name: "database", up: true }),
            Arc::new(Probe { name: "cache", up: true }),
        ]);

        let (status, Json(report)) = readiness(State(checks)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report.status, HealthStatus::Healthy);
        assert_eq!(report.components.len(), 2);
    }

    #[tokio::test]
    async fn test_readiness_reports_failing_component() {
        let checks: ReadinessChecks = Arc::new(vec![
            Arc::new(Probe { name: "database", up: true }),
            Arc::new(Probe { name: "cache", up: false }),
        ]);

        let (status, Json(report)) = readiness(State(checks)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        let cache = report
            .components
            .iter()
            .find(|c| c.component == "cache")
            .unwrap();
        assert_eq!(cache.status, HealthStatus::Unhealthy);
        assert!(cache.message.is_some());
    }
}
