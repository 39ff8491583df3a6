//! Chat completions backend for conversation replies.

pub mod client;
pub mod error;
pub mod messages;

pub use client::ChatClient;
pub use error::LlmError;
