//! Errors from the chat completions backend.

use thiserror::Error;

/// Errors that can occur when talking to the chat completions API.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LlmError {
    /// The HTTP client could not be built.
    #[error("Client configuration failed: {0}")]
    Config(String),

    /// HTTP request failed (connect, timeout, reset)
    #[error("Request failed: {0}")]
    RequestFailed(String),

    /// Response parsing failed
    #[error("Response parsing failed: {0}")]
    ResponseParseFailed(String),

    /// Rate limited - too many requests
    #[error("Rate limited - too many requests")]
    RateLimited,

    /// Unauthorized - invalid API key
    #[error("Unauthorized - invalid API key")]
    Unauthorized,

    /// API returned an error
    #[error("API error (status {status}): {message}")]
    ApiError {
        /// HTTP status code
        status: u16,
        /// Error body returned by the API
        message: String,
    },

    /// The completion carried no message content.
    #[error("Completion contained no message")]
    EmptyCompletion,
}

impl LlmError {
    /// Whether retrying the same request may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::RequestFailed(_) | Self::RateLimited => true,
            Self::ApiError { status, .. } => *status >= 500,
            _ => false,
        }
    }
}
