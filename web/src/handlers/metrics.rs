//! Prometheus scrape endpoint.

use crate::state::AppState;
use axum::{extract::State, http::StatusCode, http::header, response::IntoResponse};

/// Content type of the Prometheus text exposition format.
pub const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// Render the installed recorder.
///
/// # Endpoint
///
/// ```text
/// GET /metrics
/// ```
///
/// 404 when no recorder is installed.
#[allow(clippy::unused_async)]
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    match state.metrics {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
            handle.render(),
        ),
        None => (
            StatusCode::NOT_FOUND,
            [(header::CONTENT_TYPE, "text/plain")],
            "metrics recorder not installed".to_string(),
        ),
    }
}
