//! # Relay Testing
//!
//! Testing utilities and helpers for the agent relay.
//!
//! This crate provides:
//! - Mock implementations of environment traits ([`FixedClock`])
//! - Fault-injecting substrate connectors ([`FlakyConnector`])
//! - Scripted request handlers and an in-process responder
//! - Property-based testing strategies
//!
//! ## Example
//!
//! ```ignore
//! use relay_testing::{responders, FlakyConnector};
//!
//! #[tokio::test]
//! async fn reconnects_after_broken_channel() {
//!     let connector = FlakyConnector::new(InMemorySubstrate::new());
//!     connector.break_next(1);
//!     let responder = responders::spawn(connector.substrate(), responders::echo());
//!     // ... submit through a correlator built on `connector`
//!     responder.stop().await;
//! }
//! ```

use chrono::{DateTime, Utc};
use relay_core::environment::Clock;

pub mod connectors;
pub mod responders;

/// Mock implementations of environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::time::Duration;

    /// Manually driven clock for deterministic tests
    ///
    /// Returns the same time until [`FixedClock::advance`] is called. Clones
    /// share the same time.
    ///
    /// # Example
    ///
    /// ```
    /// use relay_testing::mocks::FixedClock;
    /// use relay_core::environment::Clock;
    /// use chrono::Utc;
    /// use std::time::Duration;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// assert_eq!(time1, clock.now());
    ///
    /// clock.advance(Duration::from_secs(5));
    /// assert_eq!((clock.now() - time1).num_seconds(), 5);
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        millis: Arc<AtomicI64>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                millis: Arc::new(AtomicI64::new(time.timestamp_millis())),
            }
        }

        /// Move the clock forward.
        pub fn advance(&self, by: Duration) {
            let millis = i64::try_from(by.as_millis()).unwrap_or(i64::MAX);
            self.millis.fetch_add(millis, Ordering::SeqCst);
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            DateTime::from_timestamp_millis(self.millis.load(Ordering::SeqCst)).unwrap_or_default()
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Property-based testing strategies for relay types.
pub mod properties {
    use proptest::prelude::*;
    use relay_core::{AgentQuery, CorrelationId, Map, Request, Response, Value};

    /// Arbitrary query text (printable, possibly empty).
    pub fn query_text() -> impl Strategy<Value = String> {
        "[ -~]{0,64}"
    }

    /// Arbitrary flat context map with string values.
    pub fn context() -> impl Strategy<Value = Map<String, Value>> {
        proptest::collection::btree_map("[a-z_]{1,12}", "[ -~]{0,32}", 0..6).prop_map(|entries| {
            entries
                .into_iter()
                .map(|(k, v)| (k, Value::String(v)))
                .collect()
        })
    }

    /// Arbitrary [`AgentQuery`], with or without context.
    pub fn agent_query() -> impl Strategy<Value = AgentQuery> {
        (query_text(), proptest::option::of(context())).prop_map(|(query, context)| AgentQuery {
            query,
            context,
        })
    }

    /// Arbitrary correlation id over the full `u64` range.
    pub fn correlation_id() -> impl Strategy<Value = CorrelationId> {
        any::<u64>().prop_map(CorrelationId::new)
    }

    /// Arbitrary [`Request`].
    pub fn request() -> impl Strategy<Value = Request> {
        (correlation_id(), agent_query()).prop_map(|(id, query)| Request::new(id, query))
    }

    /// Arbitrary JSON result payload (no floats, so equality is exact).
    pub fn result_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::from),
            query_text().prop_map(Value::String),
            context().prop_map(Value::Object),
        ]
    }

    /// Arbitrary [`Response`], successful or failed.
    pub fn response() -> impl Strategy<Value = Response> {
        prop_oneof![
            (correlation_id(), result_value()).prop_map(|(id, result)| Response::success(id, result)),
            (correlation_id(), "[ -~]{0,64}").prop_map(|(id, message)| Response::failure(id, message)),
        ]
    }
}

/// Install a `tracing` subscriber that writes through the test harness.
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
        )
        .with_test_writer()
        .try_init();
}

// Re-export commonly used items
pub use connectors::FlakyConnector;
pub use mocks::{FixedClock, test_clock};

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::time::Duration;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        let time1 = clock.now();
        let time2 = clock.now();
        assert_eq!(time1, time2);
    }

    #[test]
    fn clones_share_time() {
        let clock = test_clock();
        let other = clock.clone();
        clock.advance(Duration::from_millis(1500));
        assert_eq!(other.now(), clock.now());
        assert_eq!((other.now() - test_clock().now()).num_milliseconds(), 1500);
    }

    proptest! {
        #[test]
        fn generated_queries_serialize(query in properties::agent_query()) {
            prop_assert!(serde_json::to_string(&query).is_ok());
        }
    }
}
