//! Chat completions request and response bodies.
//!
//! Transcript turns serialize as `{"role", "content"}`, which is exactly the
//! chat message shape, so the stored history is sent as is.

use crate::agent::Turn;
use serde::{Deserialize, Serialize};

/// Sampling temperature for conversation replies.
pub const TEMPERATURE: f32 = 0.7;

/// `POST /chat/completions` body.
#[derive(Debug, Serialize)]
pub struct ChatRequest<'a> {
    /// Model name
    pub model: &'a str,
    /// Conversation so far, ending with the new user message
    pub messages: &'a [Turn],
    /// Sampling temperature
    pub temperature: f32,
}

/// `POST /chat/completions` response, reduced to what the agent reads.
#[derive(Debug, Deserialize)]
pub struct ChatResponse {
    /// Candidate completions; the first one is used
    #[serde(default)]
    pub choices: Vec<Choice>,
}

/// One candidate completion.
#[derive(Debug, Deserialize)]
pub struct Choice {
    /// The generated message
    pub message: ChoiceMessage,
}

/// Message of a [`Choice`].
#[derive(Debug, Deserialize)]
pub struct ChoiceMessage {
    /// Generated text; absent for tool-call completions
    #[serde(default)]
    pub content: Option<String>,
}

impl ChatResponse {
    /// Text of the first choice, if any.
    #[must_use]
    pub fn into_text(self) -> Option<String> {
        self.choices.into_iter().next().and_then(|choice| choice.message.content)
    }
}
