//! Axum HTTP boundary for the agent relay.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │            HTTP shell (Axum)            │  ← JSON, CORS, request ids
//! │  - Request validation                   │  ← tracing spans
//! │  - Relay outcome → status + body        │
//! ├─────────────────────────────────────────┤
//! │              Correlator                 │
//! │  - id, reserve, enqueue, wait, retire   │  ← deadline-bounded
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Routes
//!
//! | Method | Path                       | Handler                       |
//! |--------|----------------------------|-------------------------------|
//! | POST   | `{prefix}/agent/query`     | [`handlers::agent::query`]    |
//! | GET    | `{prefix}/health`          | [`handlers::health::health`]  |
//! | GET    | `{prefix}/health/live`     | [`handlers::health::live`]    |
//! | GET    | `/metrics`                 | [`handlers::metrics::metrics`] (when a recorder is installed) |
//!
//! # Example
//!
//! ```ignore
//! use relay_web::{AppState, router};
//!
//! let app = router(AppState::new(correlator), &config.server);
//! let listener = tokio::net::TcpListener::bind(config.server.bind_addr()?).await?;
//! axum::serve(listener, app).await?;
//! ```

#![forbid(unsafe_code)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod state;

use axum::{
    Router,
    http::{HeaderValue, Method},
    routing::{get, post},
};
use metrics_exporter_prometheus::PrometheusHandle;
use relay_runtime::ServerConfig;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

// Re-export key types for convenience
pub use error::AppError;
pub use middleware::{REQUEST_ID_HEADER, RequestId, RequestIdExt, request_id_layer};
pub use state::AppState;

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;

/// Build the gateway router.
#[must_use]
pub fn router(state: AppState, config: &ServerConfig) -> Router {
    let api = Router::new()
        .route("/agent/query", post(handlers::query))
        .route("/health", get(handlers::health))
        .route("/health/live", get(handlers::live));

    let prefix = config.api_prefix.trim_matches('/');
    let mut app = if prefix.is_empty() {
        api
    } else {
        Router::new().nest(&format!("/{prefix}"), api)
    };

    if state.metrics.is_some() {
        app = app.route("/metrics", get(handlers::metrics::metrics));
    }

    app.with_state(state)
        .layer(cors_layer(&config.cors_origins))
        .layer(TraceLayer::new_for_http())
        .layer(request_id_layer())
}

/// Standalone router exposing only `/metrics`, for a dedicated metrics port.
#[must_use]
pub fn metrics_router(handle: PrometheusHandle) -> Router {
    Router::new().route(
        "/metrics",
        get(move || {
            let handle = handle.clone();
            async move { handle.render() }
        }),
    )
}

/// CORS policy from the configured origins. `*` allows any origin; origins
/// that are not valid header values are skipped with a warning.
#[must_use]
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    if origins.iter().any(|origin| origin == "*") {
        return layer.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(origin = %origin, error = %e, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    layer.allow_origin(AllowOrigin::list(allowed))
}
