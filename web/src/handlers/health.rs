//! Health check endpoints.
//!
//! These endpoints are used by load balancers and monitoring systems
//! to verify service health.

use crate::state::AppState;
use axum::{Json, extract::State, http::StatusCode};
use relay_runtime::{HealthCheck, HealthStatus};
use serde::{Deserialize, Serialize};

/// Component name reported for the substrate probe.
pub const AGENT_SERVICE: &str = "agent_service";

/// Body of `GET {prefix}/health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthBody {
    /// `healthy` when the substrate answers, `degraded` otherwise
    pub status: String,
    /// Whether the substrate answered a ping
    pub agent_service: bool,
}

/// Liveness endpoint.
///
/// Returns 200 OK to indicate the process is running. Does NOT check the
/// substrate.
///
/// # Endpoint
///
/// ```text
/// GET {prefix}/health/live
/// ```
#[allow(clippy::unused_async)]
pub async fn live() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

/// Readiness endpoint: probes the substrate.
///
/// Always 200; an unreachable substrate reports `degraded` rather than failing
/// the check, so the process is not restarted for an outage it cannot fix.
///
/// # Endpoint
///
/// ```text
/// GET {prefix}/health
/// ```
///
/// # Response
///
/// ```json
/// {
///   "status": "healthy",
///   "agent_service": true
/// }
/// ```
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthBody>) {
    let check = HealthCheck::from_probe(AGENT_SERVICE, state.correlator.probe().await);
    if check.status != HealthStatus::Healthy {
        tracing::warn!(component = AGENT_SERVICE, "Substrate probe failed");
    }

    (
        StatusCode::OK,
        Json(HealthBody {
            status: check.status.to_string(),
            agent_service: check.is_up(),
        }),
    )
}
