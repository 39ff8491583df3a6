//! Agent errors.

use thiserror::Error;

/// Errors raised while processing a request.
///
/// Every variant ends up as the failure message of the response, so the
/// messages are written for the caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AgentError {
    /// A required context entry is missing or not a string.
    #[error("context field '{0}' is required")]
    MissingField(&'static str),

    /// The submitted source could not be scanned.
    #[error("could not parse code at line {line}: {message}")]
    Parse {
        /// 1-based line where scanning failed
        line: usize,
        /// What went wrong
        message: String,
    },

    /// A value could not be written to or read from memory.
    #[error("memory error: {0}")]
    Memory(String),

    /// The chat completions backend failed.
    #[error("language model error: {0}")]
    Llm(String),
}

/// Result alias for agent operations.
pub type Result<T> = std::result::Result<T, AgentError>;
