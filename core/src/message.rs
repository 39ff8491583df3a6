//! Request and response types carried through the relay.
//!
//! A [`Request`] is created once per submission and handed to the queue; a
//! [`Response`] is produced by exactly one worker and consumed by exactly one
//! waiter. Both are bound together by a [`CorrelationId`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Unique token binding a request to its eventual response.
///
/// Ids come from a monotonically increasing counter (a substrate-side `INCR`
/// or a process-local atomic) and are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(u64);

impl CorrelationId {
    /// Wrap a raw counter value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// The raw counter value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for CorrelationId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// The opaque payload a caller submits: a query string plus optional context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentQuery {
    /// Free-form query text.
    pub query: String,
    /// Optional context map forwarded verbatim to the worker.
    #[serde(default)]
    pub context: Option<Map<String, Value>>,
}

impl AgentQuery {
    /// Query without context.
    #[must_use]
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            context: None,
        }
    }

    /// Attach a context map.
    #[must_use]
    pub fn with_context(mut self, context: Map<String, Value>) -> Self {
        self.context = Some(context);
        self
    }

    /// Look up a string entry in the context.
    #[must_use]
    pub fn context_str(&self, key: &str) -> Option<&str> {
        self.context.as_ref()?.get(key)?.as_str()
    }
}

/// A unit of work on the request queue.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Correlation id assigned at submission.
    pub id: CorrelationId,
    /// What the caller asked for.
    pub query: AgentQuery,
}

impl Request {
    /// Build a request for `id`.
    #[must_use]
    pub const fn new(id: CorrelationId, query: AgentQuery) -> Self {
        Self { id, query }
    }
}

/// Terminal outcome reported by the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The worker produced a result.
    Success,
    /// The worker failed; the message is passed through to the caller untouched.
    Failure(String),
}

impl Outcome {
    /// `true` for [`Outcome::Success`].
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// A worker's answer to one [`Request`].
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Id of the request this answers.
    pub id: CorrelationId,
    /// Opaque result payload.
    pub result: Value,
    /// Success or worker-reported failure.
    pub outcome: Outcome,
}

impl Response {
    /// Successful response carrying `result`.
    #[must_use]
    pub const fn success(id: CorrelationId, result: Value) -> Self {
        Self {
            id,
            result,
            outcome: Outcome::Success,
        }
    }

    /// Failed response carrying the worker's message.
    #[must_use]
    pub fn failure(id: CorrelationId, message: impl Into<String>) -> Self {
        Self {
            id,
            result: Value::Null,
            outcome: Outcome::Failure(message.into()),
        }
    }
}

/// What happened to a published response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// A waiter was registered and the response is now in its slot.
    Delivered,
    /// Nobody is waiting (timed out, retired, or already answered); the response was discarded.
    Dropped,
}
