//! # Relay Agent
//!
//! The worker-side agent of the relay. A worker hands every dequeued request
//! to an [`Agent`], which routes it to a capability:
//!
//! - **Conversation**: replies from a [`Replier`] (rule-based offline, or an
//!   OpenAI-compatible chat completions backend) with a transcript kept in memory
//! - **Code analysis**: structure of Python source, change tracking against the
//!   previous analysis, and improvement suggestions
//!
//! Both capabilities run through the same [`Agent::think`], [`Agent::act`],
//! [`Agent::reflect`] cycle and share one [`MemoryStore`].
//!
//! ## Example
//!
//! ```rust
//! use relay_agent::Agent;
//! use relay_core::AgentQuery;
//! use relay_runtime::AgentSettings;
//!
//! # async fn example() -> relay_agent::Result<()> {
//! let agent = Agent::new(&AgentSettings::default());
//! let reply = agent.process(&AgentQuery::new("ping")).await?;
//! assert_eq!(reply, "pong");
//! # Ok(())
//! # }
//! ```

/// Query routing and the think/act/reflect cycle
pub mod agent;

/// Agent error types
pub mod error;

/// Chat completions client
pub mod llm;

/// Key/value memory with expiry
pub mod memory;

/// Conversation repliers
pub mod reply;

/// Code analysis tools
pub mod tools;

pub use agent::{
    Action, Agent, CODE_ANALYSIS_TYPE, CONVERSATION_HISTORY, Capability, MAX_HISTORY_TURNS,
    PREVIOUS_CODE_ANALYSIS, Plan, Role, Turn, handler,
};
pub use error::{AgentError, Result};
pub use llm::{ChatClient, LlmError};
pub use memory::{InMemoryStore, MemoryStore};
pub use reply::{LlmReplier, Replier, RuleBasedReplier};
pub use tools::ToolKind;
