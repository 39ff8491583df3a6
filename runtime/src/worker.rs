//! Worker side of the relay: drain the request queue, compute, publish.
//!
//! A [`Worker`] loop pops one request at a time (FIFO), hands it to a
//! [`RequestHandler`] and publishes the response into the request's slot.
//! Substrate failures never end the loop: the channel is dropped, the loop
//! backs off and reconnects. Only the shutdown signal stops it, and never in
//! the middle of a request.

use crate::config::WorkerConfig;
use crate::connection::ConnectionManager;
use crate::metrics::WorkerMetrics;
use crate::retry::RetryPolicy;
use relay_core::{Channel, PublishOutcome, Request, Response, Result};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::Instrument;

/// Computes the response for one request.
///
/// Infallible by contract: failures are reported as
/// [`Outcome::Failure`](relay_core::Outcome::Failure) inside the response.
pub trait RequestHandler: Send + Sync {
    /// Handle `request`. The returned response must carry `request.id`.
    fn handle(&self, request: Request) -> Pin<Box<dyn Future<Output = Response> + Send + '_>>;
}

/// Queue consumer.
#[derive(Clone)]
pub struct Worker {
    connection: Arc<ConnectionManager>,
    handler: Arc<dyn RequestHandler>,
    config: WorkerConfig,
    backoff: RetryPolicy,
}

impl Worker {
    /// Create a worker.
    #[must_use]
    pub fn new(
        connection: Arc<ConnectionManager>,
        handler: Arc<dyn RequestHandler>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            connection,
            handler,
            config,
            backoff: RetryPolicy::default(),
        }
    }

    /// Run until `shutdown` flips to `true` (or its sender is dropped).
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(endpoint = %self.connection.endpoint(), "Worker started");
        let mut failures = 0usize;

        loop {
            if *shutdown.borrow() {
                break;
            }

            let next = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                next = self.next_request() => next,
            };

            match next {
                Ok(Some((channel, request))) => {
                    failures = 0;
                    self.process(channel, request).await;
                }
                Ok(None) => failures = 0,
                Err(e) if e.is_transport() => {
                    let delay = self.backoff.delay_for_attempt(failures);
                    failures = failures.saturating_add(1);
                    tracing::warn!(error = %e, delay_ms = delay.as_millis(), "Queue unavailable, backing off");
                    tokio::select! {
                        changed = shutdown.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                        () = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => {
                    // Undecodable payload: it has been popped and cannot be answered
                    tracing::warn!(error = %e, "Discarding malformed request");
                }
            }
        }

        tracing::info!("Worker stopped");
    }

    /// Run `concurrency` loops against the same queue until shutdown.
    ///
    /// A loop that panics (a handler bug) is replaced, so the pool keeps its
    /// size until shutdown. The request it was handling is lost and its caller
    /// times out.
    pub async fn run_pool(&self, concurrency: usize, shutdown: watch::Receiver<bool>) {
        let mut loops = JoinSet::new();
        let mut spawned = 0usize;
        for _ in 0..concurrency.max(1) {
            self.spawn_loop(&mut loops, spawned, &shutdown);
            spawned += 1;
        }

        while let Some(joined) = loops.join_next().await {
            let Err(e) = joined else {
                continue;
            };
            tracing::error!(error = %e, "Worker loop panicked");
            let stopping = *shutdown.borrow() || shutdown.has_changed().is_err();
            if e.is_panic() && !stopping {
                WorkerMetrics::record_restart();
                self.spawn_loop(&mut loops, spawned, &shutdown);
                spawned += 1;
            }
        }
    }

    fn spawn_loop(&self, loops: &mut JoinSet<()>, index: usize, shutdown: &watch::Receiver<bool>) {
        let worker = self.clone();
        let shutdown = shutdown.clone();
        loops.spawn(
            async move { worker.run(shutdown).await }.instrument(tracing::info_span!("worker", index)),
        );
    }

    /// [`Worker::run_pool`] with the configured concurrency.
    pub async fn run_configured(&self, shutdown: watch::Receiver<bool>) {
        self.run_pool(self.config.concurrency, shutdown).await;
    }

    async fn next_request(&self) -> Result<Option<(Arc<dyn Channel>, Request)>> {
        let channel = self.connection.channel().await?;
        match channel.dequeue(self.config.poll_interval).await {
            Ok(Some(request)) => Ok(Some((channel, request))),
            Ok(None) => Ok(None),
            Err(e) => {
                if e.is_transport() {
                    self.connection.invalidate(&channel).await;
                }
                Err(e)
            }
        }
    }

    async fn process(&self, channel: Arc<dyn Channel>, request: Request) {
        let id = request.id;
        tracing::debug!(id = %id, query = %request.query.query, "Processing request");

        let mut response = self.handler.handle(request).await;
        if response.id != id {
            tracing::warn!(id = %id, returned = %response.id, "Handler returned a foreign id, correcting");
            response.id = id;
        }
        WorkerMetrics::record_request(response.outcome.is_success());

        match self.publish(channel, &response).await {
            Ok(PublishOutcome::Delivered) => {
                tracing::debug!(id = %id, "Response delivered");
            }
            Ok(PublishOutcome::Dropped) => {
                WorkerMetrics::record_orphaned();
                tracing::warn!(id = %id, "Response dropped: no waiter registered (timed out or already answered)");
            }
            Err(e) => {
                tracing::error!(id = %id, error = %e, "Failed to publish response");
            }
        }
    }

    async fn publish(&self, channel: Arc<dyn Channel>, response: &Response) -> Result<PublishOutcome> {
        match channel.publish(response).await {
            Err(e) if e.is_transport() => {
                tracing::warn!(id = %response.id, error = %e, "Publish failed, reconnecting once");
                self.connection.invalidate(&channel).await;
                self.connection.channel().await?.publish(response).await
            }
            other => other,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code
mod tests {
    use super::*;
    use crate::memory::{InMemoryConnector, InMemorySubstrate};
    use relay_core::{AgentQuery, CorrelationId, RequestQueue, ResponseSlots};
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::Mutex;

    /// Records every query it sees and echoes it back.
    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    impl RequestHandler for Recorder {
        fn handle(&self, request: Request) -> Pin<Box<dyn Future<Output = Response> + Send + '_>> {
            Box::pin(async move {
                self.seen.lock().await.push(request.query.query.clone());
                Response::success(request.id, json!(request.query.query))
            })
        }
    }

    fn worker(substrate: &InMemorySubstrate, handler: Arc<dyn RequestHandler>) -> Worker {
        let connection = Arc::new(ConnectionManager::new(
            Arc::new(InMemoryConnector::new(substrate.clone())),
            RetryPolicy::with_max_attempts(1),
        ));
        Worker::new(
            connection,
            handler,
            WorkerConfig {
                concurrency: 1,
                poll_interval: Duration::from_millis(50),
            },
        )
    }

    async fn enqueue_reserved(substrate: &InMemorySubstrate, id: u64, query: &str) {
        let id = CorrelationId::new(id);
        substrate.reserve(id, Duration::from_secs(60)).await.unwrap();
        substrate
            .enqueue(&Request::new(id, AgentQuery::new(query)))
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn processes_in_fifo_order_and_publishes() {
        let substrate = InMemorySubstrate::new();
        let recorder = Arc::new(Recorder::default());
        let worker = worker(&substrate, Arc::clone(&recorder) as Arc<dyn RequestHandler>);

        enqueue_reserved(&substrate, 1, "r1").await;
        enqueue_reserved(&substrate, 2, "r2").await;

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move { worker.run(rx).await });

        let first = substrate.wait(CorrelationId::new(1), Duration::from_secs(1)).await.unwrap();
        let second = substrate.wait(CorrelationId::new(2), Duration::from_secs(1)).await.unwrap();
        assert_eq!(first.unwrap().result, json!("r1"));
        assert_eq!(second.unwrap().result, json!("r2"));
        assert_eq!(*recorder.seen.lock().await, vec!["r1".to_string(), "r2".to_string()]);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn unreserved_request_is_answered_into_the_void() {
        let substrate = InMemorySubstrate::new();
        let worker = worker(&substrate, Arc::new(Recorder::default()));

        substrate
            .enqueue(&Request::new(CorrelationId::new(5), AgentQuery::new("late")))
            .await
            .unwrap();

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move { worker.run(rx).await });
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(substrate.queue_len().await, 0);
        assert_eq!(substrate.pending_slots().await, 0);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn survives_outage_and_stops_on_shutdown() {
        let substrate = InMemorySubstrate::new();
        let worker = worker(&substrate, Arc::new(Recorder::default()));
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move { worker.run(rx).await });

        substrate.set_online(false);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(!handle.is_finished());

        substrate.set_online(true);
        enqueue_reserved(&substrate, 1, "after outage").await;
        let response = substrate.wait(CorrelationId::new(1), Duration::from_secs(5)).await.unwrap();
        assert_eq!(response.unwrap().result, json!("after outage"));

        tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn pool_stops_when_sender_dropped() {
        let substrate = InMemorySubstrate::new();
        let worker = worker(&substrate, Arc::new(Recorder::default()));
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move { worker.run_pool(3, rx).await });

        tokio::time::sleep(Duration::from_millis(100)).await;
        drop(tx);
        handle.await.unwrap();
    }

    /// Panics on `"boom"`, echoes everything else.
    struct Explosive;

    impl RequestHandler for Explosive {
        #[allow(clippy::panic)] // Simulated handler bug
        fn handle(&self, request: Request) -> Pin<Box<dyn Future<Output = Response> + Send + '_>> {
            Box::pin(async move {
                if request.query.query == "boom" {
                    panic!("handler bug");
                }
                Response::success(request.id, json!(request.query.query))
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn panicked_loop_is_replaced() {
        let substrate = InMemorySubstrate::new();
        let worker = worker(&substrate, Arc::new(Explosive));
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move { worker.run_pool(1, rx).await });

        enqueue_reserved(&substrate, 1, "boom").await;
        enqueue_reserved(&substrate, 2, "still here").await;

        let response = substrate.wait(CorrelationId::new(2), Duration::from_secs(5)).await.unwrap();
        assert_eq!(response.unwrap().result, json!("still here"));
        assert!(!handle.is_finished());

        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
