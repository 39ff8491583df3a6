//! # Relay Core
//!
//! Core types and traits for the agent request/response relay.
//!
//! A caller submits an [`AgentQuery`](message::AgentQuery); the gateway assigns a
//! [`CorrelationId`](message::CorrelationId), pushes a [`Request`](message::Request) onto a
//! shared queue and waits on the response slot named by that id. A worker pops the
//! request, computes a [`Response`](message::Response) and publishes it into the slot.
//!
//! ## Modules
//!
//! - [`message`]: data model
//! - [`codec`]: JSON wire format understood by every worker
//! - [`error`]: [`RelayError`] taxonomy
//! - [`substrate`]: traits a queue/slot backend implements
//! - [`environment`]: injected dependencies such as the [`Clock`](environment::Clock)

pub mod codec;
pub mod environment;
pub mod error;
pub mod message;
pub mod substrate;

pub use error::{RelayError, Result, TIMEOUT_MESSAGE};
pub use message::{AgentQuery, CorrelationId, Outcome, PublishOutcome, Request, Response};
pub use substrate::{Channel, Connector, IdSource, RequestQueue, ResponseSlots, SubstrateFuture};

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde_json::{Map, Value};
