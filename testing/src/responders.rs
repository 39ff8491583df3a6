//! Scripted request handlers and an in-process worker to drive them.

use relay_core::{Request, Response};
use relay_runtime::{
    ConnectionManager, InMemoryConnector, InMemorySubstrate, RequestHandler, RetryPolicy, Worker,
    WorkerConfig,
};
use serde_json::json;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Handler backed by a plain closure.
pub struct HandlerFn<F>(pub F);

impl<F> RequestHandler for HandlerFn<F>
where
    F: Fn(Request) -> Response + Send + Sync,
{
    fn handle(&self, request: Request) -> Pin<Box<dyn Future<Output = Response> + Send + '_>> {
        let response = (self.0)(request);
        Box::pin(async move { response })
    }
}

/// Wrap a closure as a shareable handler.
pub fn handler_fn<F>(f: F) -> Arc<dyn RequestHandler>
where
    F: Fn(Request) -> Response + Send + Sync + 'static,
{
    Arc::new(HandlerFn(f))
}

/// Answers every request with its own query text.
#[must_use]
pub fn echo() -> Arc<dyn RequestHandler> {
    handler_fn(|request| Response::success(request.id, json!(request.query.query)))
}

/// Answers `"ping"` with `"pong"`, anything else with an error.
#[must_use]
pub fn ping_pong() -> Arc<dyn RequestHandler> {
    handler_fn(|request| {
        if request.query.query == "ping" {
            Response::success(request.id, json!("pong"))
        } else {
            Response::failure(request.id, format!("unknown query: {}", request.query.query))
        }
    })
}

/// Sleeps for `delay` before delegating to `inner`.
pub struct Delayed {
    delay: Duration,
    inner: Arc<dyn RequestHandler>,
}

impl RequestHandler for Delayed {
    fn handle(&self, request: Request) -> Pin<Box<dyn Future<Output = Response> + Send + '_>> {
        Box::pin(async move {
            tokio::time::sleep(self.delay).await;
            self.inner.handle(request).await
        })
    }
}

/// Delay every answer of `inner` by `delay`.
#[must_use]
pub fn delayed(delay: Duration, inner: Arc<dyn RequestHandler>) -> Arc<dyn RequestHandler> {
    Arc::new(Delayed { delay, inner })
}

/// A worker pool running in the background of a test.
pub struct Responder {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Responder {
    /// Signal shutdown and wait for the loops to finish.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }
}

/// Spawn a single worker loop draining `substrate` with `handler`.
#[must_use]
pub fn spawn(substrate: &InMemorySubstrate, handler: Arc<dyn RequestHandler>) -> Responder {
    spawn_pool(substrate, handler, 1)
}

/// Spawn `concurrency` worker loops draining `substrate` with `handler`.
#[must_use]
pub fn spawn_pool(
    substrate: &InMemorySubstrate,
    handler: Arc<dyn RequestHandler>,
    concurrency: usize,
) -> Responder {
    let connection = Arc::new(ConnectionManager::new(
        Arc::new(InMemoryConnector::new(substrate.clone())),
        RetryPolicy::with_max_attempts(1),
    ));
    let worker = Worker::new(
        connection,
        handler,
        WorkerConfig {
            concurrency,
            poll_interval: Duration::from_millis(50),
        },
    );

    let (shutdown, rx) = watch::channel(false);
    let handle = tokio::spawn(async move { worker.run_configured(rx).await });
    Responder { shutdown, handle }
}
