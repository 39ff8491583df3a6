//! Error taxonomy shared by every relay component.

use crate::message::CorrelationId;
use std::time::Duration;
use thiserror::Error;

/// Message surfaced to callers whose request hit its deadline.
pub const TIMEOUT_MESSAGE: &str = "Request timeout";

/// Errors produced by the relay and its substrates.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    /// The substrate is unreachable or the connection broke mid-operation.
    #[error("Transport error: {0}")]
    Transport(String),

    /// No response arrived before the deadline.
    #[error("Request timeout")]
    Timeout {
        /// The request that timed out; `None` if the deadline passed before
        /// the substrate accepted it
        id: Option<CorrelationId>,
        /// How long the caller waited
        waited: Duration,
    },

    /// The substrate returned data that could not be decoded.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A slot for this id is already reserved.
    #[error("Response slot {0} is already reserved")]
    SlotBusy(CorrelationId),

    /// Invalid configuration (bad URL, zero deadline, ...).
    #[error("Configuration error: {0}")]
    Config(String),
}

impl RelayError {
    /// Build a transport error from any displayable cause.
    pub fn transport(cause: impl std::fmt::Display) -> Self {
        Self::Transport(cause.to_string())
    }

    /// Build a protocol error from any displayable cause.
    pub fn protocol(cause: impl std::fmt::Display) -> Self {
        Self::Protocol(cause.to_string())
    }

    /// Whether this error should trigger a reconnect.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Whether this error is a deadline expiry.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Result alias for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;
