//! Application state for Axum handlers.

use metrics_exporter_prometheus::PrometheusHandle;
use relay_runtime::Correlator;
use std::sync::Arc;

/// State shared across all HTTP handlers.
///
/// Built once at startup and injected into the router; handlers never reach
/// for a global.
#[derive(Clone)]
pub struct AppState {
    /// Submits queries and waits for worker responses.
    pub correlator: Arc<Correlator>,
    /// Prometheus handle when the recorder is installed; enables `/metrics`.
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// State without metrics.
    #[must_use]
    pub const fn new(correlator: Arc<Correlator>) -> Self {
        Self {
            correlator,
            metrics: None,
        }
    }

    /// Attach the Prometheus handle.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}
