//! Error types for web handlers.
//!
//! Request-level failures (bad JSON, blank query) become an [`AppError`] and
//! render as `{code, message}`. Relay outcomes are not errors at this level: they
//! are rendered by the query handler in the legacy `{response, status, error}`
//! shape.

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::fmt;

/// Application error type for web handlers.
///
/// # Examples
///
/// ```ignore
/// async fn handler(Json(body): Json<QueryRequest>) -> Result<Json<QueryResponse>, AppError> {
///     if body.query.trim().is_empty() {
///         return Err(AppError::validation("query must not be empty"));
///     }
///     // ...
/// }
/// ```
#[derive(Debug)]
pub struct AppError {
    /// HTTP status code
    status: StatusCode,
    /// Error message (user-facing)
    message: String,
    /// Error code (for client error handling)
    code: &'static str,
}

impl AppError {
    /// Create a new application error.
    #[must_use]
    pub const fn new(status: StatusCode, message: String, code: &'static str) -> Self {
        Self {
            status,
            message,
            code,
        }
    }

    /// Create a 400 Bad Request error.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message.into(), "BAD_REQUEST")
    }

    /// Create a 422 Unprocessable Entity error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            message.into(),
            "VALIDATION_ERROR",
        )
    }

    /// HTTP status this error renders with.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {}

/// Error response body (JSON).
#[derive(Debug, Serialize)]
struct ErrorResponse {
    /// Error code (for client error handling).
    code: &'static str,
    /// Human-readable error message.
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        tracing::debug!(
            status = %self.status,
            code = self.code,
            message = %self.message,
            "Rejected request"
        );

        let body = ErrorResponse {
            code: self.code,
            message: self.message,
        };

        (self.status, Json(body)).into_response()
    }
}

/// Malformed or mistyped JSON bodies keep axum's status but use our body shape.
impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        let status = rejection.status();
        let code = if status == StatusCode::UNPROCESSABLE_ENTITY {
            "VALIDATION_ERROR"
        } else {
            "BAD_REQUEST"
        };
        Self::new(status, rejection.body_text(), code)
    }
}
