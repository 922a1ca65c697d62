//! Custom Axum extractors.
//!
//! - `CorrelationId`: request correlation ID, from the header or generated
//! - `UserIdentity`: the authenticated member, as forwarded by the gateway
//!
//! # Examples
//!
//! ```ignore
//! use coupon_web::extractors::{CorrelationId, UserIdentity};
//!
//! async fn handler(
//!     correlation_id: CorrelationId,
//!     UserIdentity(user_id): UserIdentity,
//! ) -> Result<Json<Response>, AppError> {
//!     tracing::info!(correlation_id = %correlation_id.0, user_id = %user_id, "Processing request");
//!     Ok(Json(response))
//! }
//! ```

use crate::error::AppError;
use crate::middleware::CORRELATION_ID_HEADER;
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use coupon_core::ids::UserId;
use uuid::Uuid;

/// Header carrying the authenticated member id.
///
/// Authentication happens upstream; the gateway strips any client-supplied
/// value and sets this one.
pub const USER_ID_HEADER: &str = "X-User-Id";

/// Correlation ID for request tracing.
///
/// Taken from the request extensions when the correlation middleware ran,
/// then from the `X-Correlation-ID` header, otherwise freshly generated.
#[derive(Debug, Clone, Copy)]
pub struct CorrelationId(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for CorrelationId
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(id) = parts.extensions.get::<Uuid>() {
            return Ok(Self(*id));
        }

        let correlation_id = parts
            .headers
            .get(CORRELATION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| Uuid::parse_str(s).ok())
            .unwrap_or_else(Uuid::new_v4);

        Ok(Self(correlation_id))
    }
}

/// The authenticated member making the request.
///
/// Rejects with 401 when the identity header is missing or not a positive integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserIdentity(pub UserId);

#[async_trait]
impl<S> FromRequestParts<S> for UserIdentity
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_ID_HEADER)
            .ok_or_else(|| AppError::unauthorized("Missing member identity"))?;

        raw.to_str()
            .ok()
            .and_then(|s| s.trim().parse::<i64>().ok())
            .filter(|id| *id > 0)
            .map(|id| Self(UserId::new(id)))
            .ok_or_else(|| AppError::unauthorized("Invalid member identity"))
    }
}
