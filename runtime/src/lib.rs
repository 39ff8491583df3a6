//! # Relay Runtime
//!
//! Runtime components of the agent request/response relay.
//!
//! ## Core Components
//!
//! - **[`Correlator`]**: submit a query, wait for the correlated response or a timeout
//! - **[`ConnectionManager`]**: lazily established, single-flight, probe-able substrate channel
//! - **[`Worker`]**: queue consumer that runs a [`RequestHandler`] and publishes its response
//! - **[`InMemorySubstrate`]**: in-process queue and slot store
//!
//! ## Example
//!
//! ```rust
//! use relay_core::AgentQuery;
//! use relay_runtime::{
//!     ConnectionManager, Correlator, CorrelatorConfig, InMemoryConnector, RetryPolicy,
//! };
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> relay_core::Result<()> {
//! let connection = Arc::new(ConnectionManager::new(
//!     Arc::new(InMemoryConnector::default()),
//!     RetryPolicy::default(),
//! ));
//! let correlator = Correlator::new(connection, CorrelatorConfig::default());
//!
//! // Without a worker draining the queue this resolves to `RelayError::Timeout`
//! let _ = correlator.submit(AgentQuery::new("ping"), Duration::from_millis(10)).await;
//! # Ok(())
//! # }
//! ```

/// Configuration loaded from the environment
pub mod config;

/// Connection lifecycle management
pub mod connection;

/// Request/response correlation
pub mod correlator;

/// Health reporting types
pub mod health;

/// In-process substrate
pub mod memory;

/// Prometheus metrics for observability
pub mod metrics;

/// Retry logic with exponential backoff
pub mod retry;

/// Queue consumer
pub mod worker;

pub use config::{
    AgentSettings, Backend, ConfigError, CorrelatorConfig, LlmSettings, RelayConfig,
    ServerConfig, SubstrateConfig, WorkerConfig,
};
pub use connection::{ConnectionManager, LinkState};
pub use correlator::Correlator;
pub use health::{HealthCheck, HealthStatus};
pub use memory::{InMemoryConnector, InMemorySubstrate};
pub use retry::RetryPolicy;
pub use worker::{RequestHandler, Worker};
