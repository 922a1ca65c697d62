//! HTTP error mapping.
//!
//! [`AppError`] is what handlers return. Every [`CouponError`] converts into
//! one with a status chosen by its category and the error's stable code.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use coupon_core::CouponError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error returned by coupon HTTP handlers.
///
/// # Examples
///
/// ```ignore
/// async fn handler(State(state): State<AppState>) -> Result<Json<Data>, AppError> {
///     let coupon = state.store.find_member_coupon(id).await?;
///     Ok(Json(coupon.into()))
/// }
/// ```
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    /// Sent to the client.
    message: String,
    /// Stable machine-readable code, e.g. `OUT_OF_STOCK`.
    code: String,
    /// Logged only.
    source: Option<anyhow::Error>,
}

impl AppError {
    /// Builds an error from its parts.
    #[must_use]
    pub const fn new(status: StatusCode, message: String, code: String) -> Self {
        Self {
            status,
            message,
            code,
            source: None,
        }
    }

    /// Attach the underlying error, logged but never sent to the client.
    #[must_use]
    pub fn with_source(mut self, source: anyhow::Error) -> Self {
        self.source = Some(source);
        self
    }

    fn with_code(status: StatusCode, message: impl Into<String>, code: &str) -> Self {
        Self::new(status, message.into(), code.to_owned())
    }

    /// 400 with code `BAD_REQUEST`.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::with_code(StatusCode::BAD_REQUEST, message, "BAD_REQUEST")
    }

    /// 401 with code `UNAUTHORIZED`, used when the caller identity is missing.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::with_code(StatusCode::UNAUTHORIZED, message, "UNAUTHORIZED")
    }

    /// HTTP status of the response.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Stable error code of the response.
    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// JSON body of every error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Same as [`AppError::code`].
    pub code: String,
    /// Human-readable reason.
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(
                status = %self.status,
                code = %self.code,
                message = %self.message,
                error = ?self.source,
                "Request failed"
            );
        } else {
            tracing::debug!(status = %self.status, code = %self.code, "Request rejected");
        }

        let body = ErrorResponse {
            code: self.code,
            message: self.message,
        };

        (self.status, Json(body)).into_response()
    }
}

impl From<CouponError> for AppError {
    fn from(err: CouponError) -> Self {
        let status = match &err {
            CouponError::NotFound { .. } => StatusCode::NOT_FOUND,
            CouponError::Conflict(_) => StatusCode::CONFLICT,
            CouponError::BadRequest(_) => StatusCode::BAD_REQUEST,
            CouponError::Forbidden(_) => StatusCode::FORBIDDEN,
            CouponError::Infrastructure { .. } => StatusCode::SERVICE_UNAVAILABLE,
        };

        // Infrastructure details stay in the logs
        let message = if err.is_retryable() {
            "The service is temporarily unavailable, please retry".to_string()
        } else {
            err.to_string()
        };

        let code = err.code().to_string();
        Self::new(status, message, code).with_source(anyhow::Error::new(err))
    }
}
