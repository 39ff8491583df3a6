//! Prometheus metrics for the relay.
//!
//! Covers the three moving parts:
//! - Correlator submissions, latency, timeouts and in-flight requests
//! - Connection lifecycle (reconnects, failed connects)
//! - Worker throughput and orphaned responses
//!
//! # Example
//!
//! ```rust,no_run
//! use relay_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // Hand the rendering handle to the HTTP layer
//! let _handle = server.handle().cloned();
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

pub use metrics::{counter, gauge, histogram};

/// Submissions by outcome (`success`, `worker_error`, `timeout`, `transport_error`, `protocol_error`).
pub const SUBMISSIONS_TOTAL: &str = "relay_submissions_total";
/// End-to-end latency of `submit`.
pub const SUBMIT_DURATION_SECONDS: &str = "relay_submit_duration_seconds";
/// Requests currently waiting on a response slot.
pub const INFLIGHT_REQUESTS: &str = "relay_inflight_requests";
/// Submissions that hit their deadline.
pub const TIMEOUTS_TOTAL: &str = "relay_timeouts_total";
/// Responses published after their waiter was gone (late or duplicate).
pub const ORPHANED_RESPONSES_TOTAL: &str = "relay_orphaned_responses_total";
/// Channels established after a disconnect or detected failure.
pub const RECONNECTS_TOTAL: &str = "relay_reconnects_total";
/// Connect attempts that failed.
pub const CONNECT_FAILURES_TOTAL: &str = "relay_connect_failures_total";
/// Requests handled by workers, by outcome (`success`, `failure`).
pub const WORKER_REQUESTS_TOTAL: &str = "relay_worker_requests_total";
/// Worker loops replaced after a panic.
pub const WORKER_RESTARTS_TOTAL: &str = "relay_worker_restarts_total";

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Installs the Prometheus recorder and keeps its rendering handle.
///
/// The HTTP side lives in `relay-web`; this type only owns the recorder and the
/// address the binary intends to expose it on.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server for `addr`.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Address the metrics endpoint should be served on.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Describe all relay metrics and install the global recorder.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError`] if the exporter cannot be built or installed.
    /// A recorder that is already installed (common in tests) is not an error;
    /// the handle stays `None` in that case.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!(addr = %self.addr, "Metrics recorder installed");
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if this server did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
pub fn register_metrics() {
    describe_counter!(SUBMISSIONS_TOTAL, "Total number of submissions by outcome");
    describe_histogram!(SUBMIT_DURATION_SECONDS, "Time from submit to response or timeout");
    describe_gauge!(INFLIGHT_REQUESTS, "Requests currently waiting on a response slot");
    describe_counter!(TIMEOUTS_TOTAL, "Total number of submissions that hit their deadline");
    describe_counter!(
        ORPHANED_RESPONSES_TOTAL,
        "Total number of responses dropped because no waiter was registered"
    );
    describe_counter!(RECONNECTS_TOTAL, "Total number of channels re-established");
    describe_counter!(CONNECT_FAILURES_TOTAL, "Total number of failed connect attempts");
    describe_counter!(WORKER_REQUESTS_TOTAL, "Total number of requests handled by workers");
    describe_counter!(WORKER_RESTARTS_TOTAL, "Total number of worker loops replaced after a panic");
}

/// Correlator metrics recorder.
pub struct CorrelatorMetrics;

impl CorrelatorMetrics {
    /// Record a finished submission.
    pub fn record_submission(outcome: &'static str, duration: Duration) {
        counter!(SUBMISSIONS_TOTAL, "outcome" => outcome).increment(1);
        histogram!(SUBMIT_DURATION_SECONDS).record(duration.as_secs_f64());
    }

    /// Record a deadline expiry.
    pub fn record_timeout() {
        counter!(TIMEOUTS_TOTAL).increment(1);
    }

    /// A waiter started listening on its slot.
    pub fn inflight_inc() {
        gauge!(INFLIGHT_REQUESTS).increment(1.0);
    }

    /// A waiter stopped listening on its slot.
    pub fn inflight_dec() {
        gauge!(INFLIGHT_REQUESTS).decrement(1.0);
    }
}

/// Connection lifecycle metrics recorder.
pub struct ConnectionMetrics;

impl ConnectionMetrics {
    /// Record a channel established after an earlier one.
    pub fn record_reconnect() {
        counter!(RECONNECTS_TOTAL).increment(1);
    }

    /// Record a failed connect attempt.
    pub fn record_connect_failure() {
        counter!(CONNECT_FAILURES_TOTAL).increment(1);
    }
}

/// Worker metrics recorder.
pub struct WorkerMetrics;

impl WorkerMetrics {
    /// Record a handled request.
    pub fn record_request(success: bool) {
        let outcome = if success { "success" } else { "failure" };
        counter!(WORKER_REQUESTS_TOTAL, "outcome" => outcome).increment(1);
    }

    /// Record a response that no waiter received.
    pub fn record_orphaned() {
        counter!(ORPHANED_RESPONSES_TOTAL).increment(1);
    }

    /// Record a worker loop replaced after a panic.
    pub fn record_restart() {
        counter!(WORKER_RESTARTS_TOTAL).increment(1);
    }
}
