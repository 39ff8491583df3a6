//! Agent query endpoint.
//!
//! ```text
//! POST {prefix}/agent/query
//! {"query": "...", "context": {...}}
//! ```
//!
//! | Relay outcome    | HTTP | Body                                              |
//! |------------------|------|---------------------------------------------------|
//! | success          | 200  | `{"response": .., "status": "success"}`           |
//! | worker failure   | 200  | `{"response": .., "status": "error", "error": ..}` |
//! | timeout          | 200  | `{"response": null, "status": "error", "error": "Request timeout"}` |
//! | substrate down   | 503  | same shape as timeout, with the transport error   |
//! | bad payload      | 502  | same shape, with the protocol error               |

use crate::error::AppError;
use crate::state::AppState;
use axum::{Json, extract::State, extract::rejection::JsonRejection, http::StatusCode};
use relay_core::{AgentQuery, Map, Outcome, RelayError, Response, TIMEOUT_MESSAGE, Value};
use serde::{Deserialize, Serialize};

/// Query request body.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryRequest {
    /// Question or command for the agent
    pub query: String,
    /// Free-form context passed through to the worker
    #[serde(default)]
    pub context: Option<Map<String, Value>>,
}

/// Whether the relay produced an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryStatus {
    /// The worker answered successfully
    Success,
    /// The worker failed, or no answer arrived
    Error,
}

/// Query response body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    /// The worker's answer (`null` when there is none)
    pub response: Value,
    /// Outcome
    pub status: QueryStatus,
    /// What went wrong, when `status` is `error`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueryResponse {
    fn error(response: Value, message: impl Into<String>) -> Self {
        Self {
            response,
            status: QueryStatus::Error,
            error: Some(message.into()),
        }
    }
}

impl From<Response> for QueryResponse {
    fn from(response: Response) -> Self {
        match response.outcome {
            Outcome::Success => Self {
                response: response.result,
                status: QueryStatus::Success,
                error: None,
            },
            Outcome::Failure(message) => Self::error(response.result, message),
        }
    }
}

/// Map a relay error to the status and body callers see.
fn failure(err: &RelayError) -> (StatusCode, QueryResponse) {
    let status = match err {
        RelayError::Timeout { .. } => StatusCode::OK,
        RelayError::Transport(_) => StatusCode::SERVICE_UNAVAILABLE,
        RelayError::Protocol(_) => StatusCode::BAD_GATEWAY,
        RelayError::SlotBusy(_) | RelayError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let message = if err.is_timeout() {
        TIMEOUT_MESSAGE.to_string()
    } else {
        err.to_string()
    };
    (status, QueryResponse::error(Value::Null, message))
}

/// Submit a query and wait for the worker's answer.
///
/// # Errors
///
/// Returns [`AppError`] for malformed bodies and blank queries. Relay failures
/// are rendered in the response body, not as errors.
pub async fn query(
    State(state): State<AppState>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<QueryResponse>), AppError> {
    let Json(body) = payload?;
    if body.query.trim().is_empty() {
        return Err(AppError::validation("query must not be empty"));
    }

    let query = AgentQuery {
        query: body.query,
        context: body.context,
    };

    match state.correlator.submit_with_default_deadline(query).await {
        Ok(response) => {
            tracing::debug!(id = %response.id, success = response.outcome.is_success(), "Query answered");
            Ok((StatusCode::OK, Json(response.into())))
        }
        Err(err) => {
            let (status, body) = failure(&err);
            if status.is_server_error() {
                tracing::warn!(error = %err, status = %status, "Query failed");
            } else {
                tracing::info!(error = %err, "Query timed out");
            }
            Ok((status, Json(body)))
        }
    }
}
