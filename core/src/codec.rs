//! JSON wire format shared by gateways and workers.
//!
//! Requests travel as `{"id", "query", "context"}`; responses as
//! `{"id", "response", "status", "error"}`. Response decoding is lenient so a
//! worker that only writes `{"response": ...}` is still understood: the id falls
//! back to the slot the payload was read from and the status defaults to
//! `"success"`.

use crate::error::{RelayError, Result};
use crate::message::{AgentQuery, CorrelationId, Outcome, Request, Response};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Message used when a worker reports `status: "error"` without saying why.
pub const UNSPECIFIED_WORKER_ERROR: &str = "worker reported an error";

#[derive(Serialize, Deserialize)]
struct WireRequest {
    id: CorrelationId,
    query: String,
    #[serde(default)]
    context: Option<Map<String, Value>>,
}

#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
enum WireStatus {
    #[default]
    Success,
    Error,
}

#[derive(Serialize, Deserialize)]
struct WireResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<CorrelationId>,
    #[serde(default)]
    response: Value,
    #[serde(default)]
    status: WireStatus,
    #[serde(default)]
    error: Option<String>,
}

/// Encode a request for the queue.
///
/// # Errors
///
/// Returns [`RelayError::Protocol`] if serialization fails.
pub fn encode_request(request: &Request) -> Result<String> {
    let wire = WireRequest {
        id: request.id,
        query: request.query.query.clone(),
        context: request.query.context.clone(),
    };
    serde_json::to_string(&wire).map_err(RelayError::protocol)
}

/// Decode a request popped from the queue.
///
/// # Errors
///
/// Returns [`RelayError::Protocol`] for malformed payloads.
pub fn decode_request(payload: &str) -> Result<Request> {
    let wire: WireRequest = serde_json::from_str(payload)
        .map_err(|e| RelayError::Protocol(format!("invalid request payload: {e}")))?;
    Ok(Request::new(
        wire.id,
        AgentQuery {
            query: wire.query,
            context: wire.context,
        },
    ))
}

/// Encode a response for its slot.
///
/// # Errors
///
/// Returns [`RelayError::Protocol`] if serialization fails.
pub fn encode_response(response: &Response) -> Result<String> {
    let (status, error) = match &response.outcome {
        Outcome::Success => (WireStatus::Success, None),
        Outcome::Failure(message) => (WireStatus::Error, Some(message.clone())),
    };
    let wire = WireResponse {
        id: Some(response.id),
        response: response.result.clone(),
        status,
        error,
    };
    serde_json::to_string(&wire).map_err(RelayError::protocol)
}

/// Decode a response read from the slot belonging to `slot`.
///
/// # Errors
///
/// Returns [`RelayError::Protocol`] for malformed payloads or when the payload
/// names a different id than the slot it was read from.
pub fn decode_response(slot: CorrelationId, payload: &str) -> Result<Response> {
    let wire: WireResponse = serde_json::from_str(payload)
        .map_err(|e| RelayError::Protocol(format!("invalid response payload: {e}")))?;

    let id = wire.id.unwrap_or(slot);
    if id != slot {
        return Err(RelayError::Protocol(format!(
            "response for {id} found in slot {slot}"
        )));
    }

    let outcome = match wire.status {
        WireStatus::Success => Outcome::Success,
        WireStatus::Error => Outcome::Failure(
            wire.error
                .unwrap_or_else(|| UNSPECIFIED_WORKER_ERROR.to_string()),
        ),
    };

    Ok(Response {
        id,
        result: wire.response,
        outcome,
    })
}
