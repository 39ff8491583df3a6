//! Fault-injecting connectors.

use relay_core::{
    Channel, Connector, CorrelationId, IdSource, PublishOutcome, RelayError, Request,
    RequestQueue, Response, ResponseSlots, SubstrateFuture,
};
use relay_runtime::InMemorySubstrate;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// Connector over an [`InMemorySubstrate`] that can refuse connects and hand
/// out broken channels on demand.
///
/// - [`FlakyConnector::refuse_next`]: the next `n` connect attempts fail
/// - connects also fail while the substrate is offline
/// - [`FlakyConnector::break_next`]: the next `n` successful connects yield a
///   channel whose every operation fails with a transport error
/// - [`FlakyConnector::with_wait_slice`]: slot waits return empty after at
///   most one slice, like a blocking pop with a coarse server-side timeout
#[derive(Clone)]
pub struct FlakyConnector {
    substrate: InMemorySubstrate,
    refuse: Arc<AtomicUsize>,
    broken: Arc<AtomicUsize>,
    attempts: Arc<AtomicU64>,
    opened: Arc<AtomicU64>,
    latency: Duration,
    wait_slice: Option<Duration>,
}

impl FlakyConnector {
    /// Healthy connector over `substrate`.
    #[must_use]
    pub fn new(substrate: InMemorySubstrate) -> Self {
        Self {
            substrate,
            refuse: Arc::new(AtomicUsize::new(0)),
            broken: Arc::new(AtomicUsize::new(0)),
            attempts: Arc::new(AtomicU64::new(0)),
            opened: Arc::new(AtomicU64::new(0)),
            latency: Duration::ZERO,
            wait_slice: None,
        }
    }

    /// Make every connect take `latency`.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Cut every slot wait short after `slice`.
    #[must_use]
    pub const fn with_wait_slice(mut self, slice: Duration) -> Self {
        self.wait_slice = Some(slice);
        self
    }

    /// The substrate healthy channels point at.
    #[must_use]
    pub const fn substrate(&self) -> &InMemorySubstrate {
        &self.substrate
    }

    /// Refuse the next `n` connect attempts.
    pub fn refuse_next(&self, n: usize) {
        self.refuse.store(n, Ordering::SeqCst);
    }

    /// Hand out `n` broken channels before healthy ones.
    pub fn break_next(&self, n: usize) {
        self.broken.store(n, Ordering::SeqCst);
    }

    /// Connect attempts so far, refused ones included.
    #[must_use]
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Channels handed out so far, broken ones included.
    #[must_use]
    pub fn opened(&self) -> u64 {
        self.opened.load(Ordering::SeqCst)
    }

    fn take_one(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Connector for FlakyConnector {
    fn connect(&self) -> SubstrateFuture<'_, Arc<dyn Channel>> {
        Box::pin(async move {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            if Self::take_one(&self.refuse) || !self.substrate.is_online() {
                return Err(RelayError::Transport("connection refused".to_string()));
            }
            self.opened.fetch_add(1, Ordering::SeqCst);
            if Self::take_one(&self.broken) {
                return Ok(Arc::new(BrokenChannel) as Arc<dyn Channel>);
            }
            let substrate = self.substrate.clone();
            Ok(match self.wait_slice {
                Some(slice) => Arc::new(SlicedChannel { substrate, slice }) as Arc<dyn Channel>,
                None => Arc::new(substrate) as Arc<dyn Channel>,
            })
        })
    }

    fn describe(&self) -> String {
        "flaky://memory".to_string()
    }
}

/// Channel whose every operation fails with a transport error.
pub struct BrokenChannel;

fn broken<'a, T: Send + 'a>() -> SubstrateFuture<'a, T> {
    Box::pin(async { Err(RelayError::Transport("broken pipe".to_string())) })
}

impl IdSource for BrokenChannel {
    fn next_id(&self) -> SubstrateFuture<'_, CorrelationId> {
        broken()
    }
}

impl RequestQueue for BrokenChannel {
    fn enqueue<'a>(&'a self, _request: &'a Request) -> SubstrateFuture<'a, ()> {
        broken()
    }

    fn dequeue(&self, _timeout: Duration) -> SubstrateFuture<'_, Option<Request>> {
        broken()
    }
}

impl ResponseSlots for BrokenChannel {
    fn reserve(&self, _id: CorrelationId, _ttl: Duration) -> SubstrateFuture<'_, ()> {
        broken()
    }

    fn wait(&self, _id: CorrelationId, _timeout: Duration) -> SubstrateFuture<'_, Option<Response>> {
        broken()
    }

    fn publish<'a>(&'a self, _response: &'a Response) -> SubstrateFuture<'a, PublishOutcome> {
        broken()
    }

    fn retire(&self, _id: CorrelationId) -> SubstrateFuture<'_, ()> {
        broken()
    }
}

impl Channel for BrokenChannel {
    fn ping(&self) -> SubstrateFuture<'_, ()> {
        broken()
    }

    fn close(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async {})
    }
}

/// Healthy channel whose slot waits give up after one slice.
struct SlicedChannel {
    substrate: InMemorySubstrate,
    slice: Duration,
}

impl IdSource for SlicedChannel {
    fn next_id(&self) -> SubstrateFuture<'_, CorrelationId> {
        self.substrate.next_id()
    }
}

impl RequestQueue for SlicedChannel {
    fn enqueue<'a>(&'a self, request: &'a Request) -> SubstrateFuture<'a, ()> {
        self.substrate.enqueue(request)
    }

    fn dequeue(&self, timeout: Duration) -> SubstrateFuture<'_, Option<Request>> {
        self.substrate.dequeue(timeout)
    }
}

impl ResponseSlots for SlicedChannel {
    fn reserve(&self, id: CorrelationId, ttl: Duration) -> SubstrateFuture<'_, ()> {
        self.substrate.reserve(id, ttl)
    }

    fn wait(&self, id: CorrelationId, timeout: Duration) -> SubstrateFuture<'_, Option<Response>> {
        self.substrate.wait(id, timeout.min(self.slice))
    }

    fn publish<'a>(&'a self, response: &'a Response) -> SubstrateFuture<'a, PublishOutcome> {
        self.substrate.publish(response)
    }

    fn retire(&self, id: CorrelationId) -> SubstrateFuture<'_, ()> {
        self.substrate.retire(id)
    }
}

impl Channel for SlicedChannel {
    fn ping(&self) -> SubstrateFuture<'_, ()> {
        self.substrate.ping()
    }

    fn close(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        self.substrate.close()
    }
}
