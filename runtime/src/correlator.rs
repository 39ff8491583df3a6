//! Request/response correlation.
//!
//! [`Correlator::submit`] turns the queue/slot substrate into a request/response
//! call with a deadline:
//!
//! 1. allocate a fresh [`CorrelationId`]
//! 2. reserve the response slot (before the request is visible to any worker)
//! 3. enqueue the request
//! 4. wait on the slot for whatever is left of the deadline
//! 5. retire the slot, whatever the outcome
//!
//! A transport failure in steps 1-3 drops the channel, reconnects once and runs
//! the dispatch again with a new id. A transport failure in step 4 reconnects
//! once and keeps waiting on the same id, so the request is never enqueued twice.
//! Anything beyond that single reconnect is the caller's retry policy.
//!
//! Cancellation is cooperative: a timed-out or cancelled `submit` stops waiting
//! and retires its slot, but the worker may still process the request. Its late
//! publish finds no registration and is dropped.

use crate::config::CorrelatorConfig;
use crate::connection::ConnectionManager;
use crate::metrics::CorrelatorMetrics;
use relay_core::{
    AgentQuery, Channel, CorrelationId, Outcome, RelayError, Request, Response, Result,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Slack allowed on top of the deadline before a wait is forcibly abandoned.
pub const HARD_BOUND_SLACK: Duration = Duration::from_millis(250);

/// Submits requests and waits for their correlated responses.
///
/// Constructed once at startup and shared by handle (`Arc<Correlator>`).
pub struct Correlator {
    connection: Arc<ConnectionManager>,
    config: CorrelatorConfig,
}

impl Correlator {
    /// Create a correlator over `connection`.
    #[must_use]
    pub const fn new(connection: Arc<ConnectionManager>, config: CorrelatorConfig) -> Self {
        Self { connection, config }
    }

    /// The connection manager this correlator submits through.
    #[must_use]
    pub const fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    /// Deadline used by [`Correlator::submit_with_default_deadline`].
    #[must_use]
    pub const fn default_deadline(&self) -> Duration {
        self.config.default_deadline
    }

    /// Liveness of the substrate. Never fails.
    pub async fn probe(&self) -> bool {
        self.connection.probe().await
    }

    /// [`Correlator::submit`] with the configured default deadline.
    ///
    /// # Errors
    ///
    /// See [`Correlator::submit`].
    pub async fn submit_with_default_deadline(&self, query: AgentQuery) -> Result<Response> {
        self.submit(query, self.config.default_deadline).await
    }

    /// Submit `query` and wait up to `deadline` for the worker's response.
    ///
    /// A worker-reported failure is a successful call: it comes back as a
    /// [`Response`] with [`Outcome::Failure`].
    ///
    /// # Errors
    ///
    /// - [`RelayError::Timeout`] if no response arrived within `deadline`
    /// - [`RelayError::Transport`] if the substrate stayed unreachable after one reconnect
    /// - [`RelayError::Protocol`] if the stored response could not be decoded
    /// - [`RelayError::Config`] for a zero deadline
    #[tracing::instrument(skip(self, query), name = "correlator_submit", fields(deadline_ms = deadline.as_millis()))]
    pub async fn submit(&self, query: AgentQuery, deadline: Duration) -> Result<Response> {
        if deadline.is_zero() {
            return Err(RelayError::Config("deadline must be greater than zero".to_string()));
        }

        let started = Instant::now();
        let deadline_at = started + deadline;
        let _inflight = InflightGuard::enter();

        let result = self.run(query, deadline, started, deadline_at).await;

        let elapsed = started.elapsed();
        CorrelatorMetrics::record_submission(outcome_label(&result), elapsed);
        match &result {
            Ok(response) => {
                tracing::debug!(id = %response.id, elapsed_ms = elapsed.as_millis(), "Response received");
            }
            Err(RelayError::Timeout { id, .. }) => {
                CorrelatorMetrics::record_timeout();
                tracing::warn!(id = ?id, elapsed_ms = elapsed.as_millis(), "Request timed out");
            }
            Err(e) => {
                tracing::error!(error = %e, "Submit failed");
            }
        }
        result
    }

    async fn run(
        &self,
        query: AgentQuery,
        deadline: Duration,
        started: Instant,
        deadline_at: Instant,
    ) -> Result<Response> {
        // Running out of time while the substrate is still accepting the
        // request is a timeout, not a refusal
        let dispatched = tokio::time::timeout_at(deadline_at, self.dispatch(&query, deadline)).await;
        let mut guard = match dispatched {
            Ok(dispatched) => dispatched?,
            Err(_elapsed) => {
                return Err(RelayError::Timeout {
                    id: None,
                    waited: started.elapsed(),
                });
            }
        };

        let id = guard.id;
        let waited = tokio::time::timeout_at(
            deadline_at + HARD_BOUND_SLACK,
            self.await_response(&mut guard, started, deadline_at),
        )
        .await;

        let result = waited.unwrap_or_else(|_elapsed| {
            Err(RelayError::Timeout {
                id: Some(id),
                waited: started.elapsed(),
            })
        });

        guard.retire().await;
        result
    }

    async fn dispatch(&self, query: &AgentQuery, deadline: Duration) -> Result<SlotGuard> {
        let channel = self.connection.channel().await?;
        match self.try_dispatch(&channel, query, deadline).await {
            Ok(guard) => Ok(guard),
            Err(e) if e.is_transport() => {
                tracing::warn!(error = %e, "Dispatch failed, reconnecting once");
                self.connection.invalidate(&channel).await;
                let channel = self.connection.channel().await?;
                self.try_dispatch(&channel, query, deadline).await
            }
            Err(e) => Err(e),
        }
    }

    /// Reserve then enqueue. The returned guard owns the slot from the moment
    /// it is reserved, so a dispatch abandoned at the deadline still retires it.
    async fn try_dispatch(
        &self,
        channel: &Arc<dyn Channel>,
        query: &AgentQuery,
        deadline: Duration,
    ) -> Result<SlotGuard> {
        let id = channel.next_id().await?;
        channel.reserve(id, deadline + self.config.slot_grace).await?;
        let guard = SlotGuard::new(Arc::clone(channel), id);

        let request = Request::new(id, query.clone());
        if let Err(e) = channel.enqueue(&request).await {
            guard.retire().await;
            return Err(e);
        }

        tracing::debug!(id = %id, "Request enqueued");
        Ok(guard)
    }

    async fn await_response(
        &self,
        guard: &mut SlotGuard,
        started: Instant,
        deadline_at: Instant,
    ) -> Result<Response> {
        let id = guard.id;
        let mut reconnected = false;

        loop {
            let remaining = deadline_at.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }

            let Some(channel) = guard.channel() else {
                break;
            };
            match channel.wait(id, remaining).await {
                Ok(Some(response)) => return Ok(response),
                // Woke before the deadline; the loop re-checks the clock
                Ok(None) => {}
                Err(e) if e.is_transport() && !reconnected => {
                    reconnected = true;
                    tracing::warn!(id = %id, error = %e, "Wait interrupted, reconnecting once");
                    self.connection.invalidate(&channel).await;
                    guard.rebind(self.connection.channel().await?);
                }
                Err(e) => return Err(e),
            }
        }

        Err(RelayError::Timeout {
            id: Some(id),
            waited: started.elapsed(),
        })
    }
}

fn outcome_label(result: &Result<Response>) -> &'static str {
    match result {
        Ok(Response {
            outcome: Outcome::Success,
            ..
        }) => "success",
        Ok(_) => "worker_error",
        Err(RelayError::Timeout { .. }) => "timeout",
        Err(RelayError::Transport(_)) => "transport_error",
        Err(RelayError::Protocol(_)) => "protocol_error",
        Err(_) => "error",
    }
}

/// Retires the slot on every exit path, including cancellation of `submit`.
struct SlotGuard {
    channel: Option<Arc<dyn Channel>>,
    id: CorrelationId,
}

impl SlotGuard {
    const fn new(channel: Arc<dyn Channel>, id: CorrelationId) -> Self {
        Self {
            channel: Some(channel),
            id,
        }
    }

    fn channel(&self) -> Option<Arc<dyn Channel>> {
        self.channel.as_ref().map(Arc::clone)
    }

    fn rebind(&mut self, channel: Arc<dyn Channel>) {
        self.channel = Some(channel);
    }

    async fn retire(mut self) {
        if let Some(channel) = self.channel.take() {
            if let Err(e) = channel.retire(self.id).await {
                tracing::warn!(id = %self.id, error = %e, "Failed to retire response slot; it will expire");
            }
        }
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        let Some(channel) = self.channel.take() else {
            return;
        };
        let id = self.id;
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            tracing::debug!(id = %id, "Submit cancelled, retiring slot in background");
            runtime.spawn(async move {
                if let Err(e) = channel.retire(id).await {
                    tracing::warn!(id = %id, error = %e, "Failed to retire response slot; it will expire");
                }
            });
        }
    }
}

struct InflightGuard;

impl InflightGuard {
    fn enter() -> Self {
        CorrelatorMetrics::inflight_inc();
        Self
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        CorrelatorMetrics::inflight_dec();
    }
}
