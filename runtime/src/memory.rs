//! In-process substrate.
//!
//! Backs the gateway's `memory` backend (gateway and worker pool in one process)
//! and every test that does not need Redis. Semantics mirror the Redis
//! substrate: ids come from a shared counter, the queue is FIFO, a slot must be
//! reserved before a publish is accepted, the first publish wins and slot
//! registrations expire after their TTL.
//!
//! [`InMemorySubstrate::set_online`] simulates an outage: while offline every
//! operation fails with a transport error and in-progress waits are interrupted.

use relay_core::{
    Channel, Connector, CorrelationId, IdSource, PublishOutcome, RelayError, Request,
    RequestQueue, Response, ResponseSlots, SubstrateFuture,
};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, Notify, oneshot, watch};
use tokio::time::Instant;

struct Slot {
    sender: Option<oneshot::Sender<Response>>,
    receiver: Option<oneshot::Receiver<Response>>,
    expires_at: Instant,
}

struct Inner {
    counter: AtomicU64,
    queue: Mutex<VecDeque<Request>>,
    queue_notify: Notify,
    slots: Mutex<HashMap<CorrelationId, Slot>>,
    online: watch::Sender<bool>,
}

/// Shared in-process queue and slot store.
///
/// Cloning is cheap; clones share the same state.
#[derive(Clone)]
pub struct InMemorySubstrate {
    inner: Arc<Inner>,
}

impl Default for InMemorySubstrate {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemorySubstrate {
    /// Create an empty, online substrate.
    #[must_use]
    pub fn new() -> Self {
        let (online, _) = watch::channel(true);
        Self {
            inner: Arc::new(Inner {
                counter: AtomicU64::new(0),
                queue: Mutex::new(VecDeque::new()),
                queue_notify: Notify::new(),
                slots: Mutex::new(HashMap::new()),
                online,
            }),
        }
    }

    /// Take the substrate offline (`false`) or bring it back (`true`).
    pub fn set_online(&self, online: bool) {
        self.inner.online.send_replace(online);
        tracing::debug!(online, "In-memory substrate availability changed");
    }

    /// Whether the substrate currently accepts operations.
    #[must_use]
    pub fn is_online(&self) -> bool {
        *self.inner.online.borrow()
    }

    /// Number of live (reserved, unexpired) slots.
    pub async fn pending_slots(&self) -> usize {
        let mut slots = self.inner.slots.lock().await;
        prune_expired(&mut slots);
        slots.len()
    }

    /// Number of requests waiting in the queue.
    pub async fn queue_len(&self) -> usize {
        self.inner.queue.lock().await.len()
    }

    fn check_online(&self) -> Result<(), RelayError> {
        if self.is_online() {
            Ok(())
        } else {
            Err(RelayError::Transport("in-memory substrate is offline".to_string()))
        }
    }

    async fn wait_offline(&self) {
        let mut online = self.inner.online.subscribe();
        // Only errors if the sender is dropped, which cannot happen while `self` lives
        let _ = online.wait_for(|up| !*up).await;
    }

    async fn pop_request(&self, timeout: Duration) -> Result<Option<Request>, RelayError> {
        let deadline = Instant::now() + timeout;
        loop {
            self.check_online()?;

            let notified = self.inner.queue_notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(request) = self.inner.queue.lock().await.pop_front() {
                return Ok(Some(request));
            }

            tokio::select! {
                () = &mut notified => {}
                () = tokio::time::sleep_until(deadline) => return Ok(None),
                () = self.wait_offline() => {
                    return Err(RelayError::Transport("in-memory substrate went offline".to_string()));
                }
            }
        }
    }

    async fn await_slot(
        &self,
        id: CorrelationId,
        timeout: Duration,
    ) -> Result<Option<Response>, RelayError> {
        self.check_online()?;

        let mut receiver = {
            let mut slots = self.inner.slots.lock().await;
            prune_expired(&mut slots);
            match slots.get_mut(&id).and_then(|slot| slot.receiver.take()) {
                Some(receiver) => receiver,
                // Never reserved, expired, or another waiter holds it
                None => return Ok(None),
            }
        };

        let outcome = tokio::select! {
            received = tokio::time::timeout(timeout, &mut receiver) => Ok(received),
            () = self.wait_offline() => Err(()),
        };

        let mut slots = self.inner.slots.lock().await;
        match outcome {
            Ok(Ok(Ok(response))) => {
                slots.remove(&id);
                Ok(Some(response))
            }
            // Sender dropped: slot retired or expired underneath us
            Ok(Ok(Err(_))) => Ok(None),
            Ok(Err(_elapsed)) => {
                if let Some(slot) = slots.get_mut(&id) {
                    slot.receiver = Some(receiver);
                }
                Ok(None)
            }
            Err(()) => {
                if let Some(slot) = slots.get_mut(&id) {
                    slot.receiver = Some(receiver);
                }
                Err(RelayError::Transport("in-memory substrate went offline".to_string()))
            }
        }
    }
}

fn prune_expired(slots: &mut HashMap<CorrelationId, Slot>) {
    let now = Instant::now();
    slots.retain(|_, slot| slot.expires_at > now);
}

impl IdSource for InMemorySubstrate {
    fn next_id(&self) -> SubstrateFuture<'_, CorrelationId> {
        Box::pin(async move {
            self.check_online()?;
            // Starts at 1 like Redis INCR on a missing key
            let id = self.inner.counter.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(CorrelationId::new(id))
        })
    }
}

impl RequestQueue for InMemorySubstrate {
    fn enqueue<'a>(&'a self, request: &'a Request) -> SubstrateFuture<'a, ()> {
        Box::pin(async move {
            self.check_online()?;
            self.inner.queue.lock().await.push_back(request.clone());
            self.inner.queue_notify.notify_one();
            Ok(())
        })
    }

    fn dequeue(&self, timeout: Duration) -> SubstrateFuture<'_, Option<Request>> {
        Box::pin(self.pop_request(timeout))
    }
}

impl ResponseSlots for InMemorySubstrate {
    fn reserve(&self, id: CorrelationId, ttl: Duration) -> SubstrateFuture<'_, ()> {
        Box::pin(async move {
            self.check_online()?;
            let mut slots = self.inner.slots.lock().await;
            prune_expired(&mut slots);
            if slots.contains_key(&id) {
                return Err(RelayError::SlotBusy(id));
            }
            let (sender, receiver) = oneshot::channel();
            slots.insert(
                id,
                Slot {
                    sender: Some(sender),
                    receiver: Some(receiver),
                    expires_at: Instant::now() + ttl,
                },
            );
            Ok(())
        })
    }

    fn wait(&self, id: CorrelationId, timeout: Duration) -> SubstrateFuture<'_, Option<Response>> {
        Box::pin(self.await_slot(id, timeout))
    }

    fn publish<'a>(&'a self, response: &'a Response) -> SubstrateFuture<'a, PublishOutcome> {
        Box::pin(async move {
            self.check_online()?;
            let mut slots = self.inner.slots.lock().await;
            prune_expired(&mut slots);

            let Some(sender) = slots
                .get_mut(&response.id)
                .and_then(|slot| slot.sender.take())
            else {
                return Ok(PublishOutcome::Dropped);
            };

            match sender.send(response.clone()) {
                Ok(()) => Ok(PublishOutcome::Delivered),
                // Waiter gone between reserve and publish
                Err(_) => Ok(PublishOutcome::Dropped),
            }
        })
    }

    fn retire(&self, id: CorrelationId) -> SubstrateFuture<'_, ()> {
        Box::pin(async move {
            self.check_online()?;
            self.inner.slots.lock().await.remove(&id);
            Ok(())
        })
    }
}

impl Channel for InMemorySubstrate {
    fn ping(&self) -> SubstrateFuture<'_, ()> {
        Box::pin(async move { self.check_online() })
    }

    fn close(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        // State is shared with other handles and survives this one
        Box::pin(async {})
    }
}

/// Hands out handles to one shared [`InMemorySubstrate`].
#[derive(Clone, Default)]
pub struct InMemoryConnector {
    substrate: InMemorySubstrate,
}

impl InMemoryConnector {
    /// Connector over `substrate`.
    #[must_use]
    pub const fn new(substrate: InMemorySubstrate) -> Self {
        Self { substrate }
    }

    /// The substrate behind every channel this connector opens.
    #[must_use]
    pub const fn substrate(&self) -> &InMemorySubstrate {
        &self.substrate
    }
}

impl Connector for InMemoryConnector {
    fn connect(&self) -> SubstrateFuture<'_, Arc<dyn Channel>> {
        Box::pin(async move {
            self.substrate.check_online()?;
            Ok(Arc::new(self.substrate.clone()) as Arc<dyn Channel>)
        })
    }

    fn describe(&self) -> String {
        "memory://local".to_string()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code
mod tests {
    use super::*;
    use relay_core::AgentQuery;
    use serde_json::json;

    fn request(id: u64, query: &str) -> Request {
        Request::new(CorrelationId::new(id), AgentQuery::new(query))
    }

    #[tokio::test]
    async fn ids_are_sequential() {
        let substrate = InMemorySubstrate::new();
        assert_eq!(substrate.next_id().await.unwrap(), CorrelationId::new(1));
        assert_eq!(substrate.next_id().await.unwrap(), CorrelationId::new(2));
    }

    #[tokio::test]
    async fn queue_is_fifo() {
        let substrate = InMemorySubstrate::new();
        substrate.enqueue(&request(1, "first")).await.unwrap();
        substrate.enqueue(&request(2, "second")).await.unwrap();

        let timeout = Duration::from_millis(10);
        assert_eq!(substrate.dequeue(timeout).await.unwrap().unwrap().query.query, "first");
        assert_eq!(substrate.dequeue(timeout).await.unwrap().unwrap().query.query, "second");
        assert!(substrate.dequeue(timeout).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn dequeue_wakes_on_enqueue() {
        let substrate = InMemorySubstrate::new();
        let consumer = substrate.clone();
        let handle = tokio::spawn(async move { consumer.dequeue(Duration::from_secs(5)).await });

        tokio::time::sleep(Duration::from_millis(100)).await;
        substrate.enqueue(&request(1, "late")).await.unwrap();

        let popped = handle.await.unwrap().unwrap().unwrap();
        assert_eq!(popped.id, CorrelationId::new(1));
    }

    #[tokio::test]
    async fn publish_without_reservation_is_dropped() {
        let substrate = InMemorySubstrate::new();
        let outcome = substrate
            .publish(&Response::success(CorrelationId::new(9), json!("x")))
            .await
            .unwrap();
        assert_eq!(outcome, PublishOutcome::Dropped);
        assert_eq!(substrate.pending_slots().await, 0);
    }

    #[tokio::test]
    async fn first_publish_wins() {
        let substrate = InMemorySubstrate::new();
        let id = CorrelationId::new(1);
        substrate.reserve(id, Duration::from_secs(5)).await.unwrap();

        let first = substrate.publish(&Response::success(id, json!("a"))).await.unwrap();
        let second = substrate.publish(&Response::success(id, json!("b"))).await.unwrap();
        assert_eq!(first, PublishOutcome::Delivered);
        assert_eq!(second, PublishOutcome::Dropped);

        let response = substrate.wait(id, Duration::from_secs(1)).await.unwrap().unwrap();
        assert_eq!(response.result, json!("a"));
        assert_eq!(substrate.pending_slots().await, 0);
    }

    #[tokio::test]
    async fn double_reserve_is_rejected() {
        let substrate = InMemorySubstrate::new();
        let id = CorrelationId::new(1);
        substrate.reserve(id, Duration::from_secs(5)).await.unwrap();
        assert_eq!(
            substrate.reserve(id, Duration::from_secs(5)).await,
            Err(RelayError::SlotBusy(id))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn wait_times_out_and_can_resume() {
        let substrate = InMemorySubstrate::new();
        let id = CorrelationId::new(1);
        substrate.reserve(id, Duration::from_secs(60)).await.unwrap();

        assert!(substrate.wait(id, Duration::from_millis(100)).await.unwrap().is_none());

        substrate.publish(&Response::success(id, json!(1))).await.unwrap();
        assert!(substrate.wait(id, Duration::from_millis(100)).await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn reservation_expires_after_ttl() {
        let substrate = InMemorySubstrate::new();
        let id = CorrelationId::new(1);
        substrate.reserve(id, Duration::from_secs(1)).await.unwrap();
        assert_eq!(substrate.pending_slots().await, 1);

        tokio::time::advance(Duration::from_secs(2)).await;

        assert_eq!(substrate.pending_slots().await, 0);
        let outcome = substrate.publish(&Response::success(id, json!(1))).await.unwrap();
        assert_eq!(outcome, PublishOutcome::Dropped);
    }

    #[tokio::test]
    async fn retire_is_idempotent() {
        let substrate = InMemorySubstrate::new();
        let id = CorrelationId::new(1);
        substrate.reserve(id, Duration::from_secs(5)).await.unwrap();
        substrate.retire(id).await.unwrap();
        substrate.retire(id).await.unwrap();
        assert_eq!(substrate.pending_slots().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn outage_interrupts_waiters() {
        let substrate = InMemorySubstrate::new();
        let id = CorrelationId::new(1);
        substrate.reserve(id, Duration::from_secs(60)).await.unwrap();

        let waiter = substrate.clone();
        let handle = tokio::spawn(async move { waiter.wait(id, Duration::from_secs(10)).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        substrate.set_online(false);

        assert!(handle.await.unwrap().unwrap_err().is_transport());
        assert!(substrate.ping().await.is_err());

        // The slot survives the outage
        substrate.set_online(true);
        substrate.publish(&Response::success(id, json!("after"))).await.unwrap();
        let response = substrate.wait(id, Duration::from_secs(1)).await.unwrap().unwrap();
        assert_eq!(response.result, json!("after"));
    }

    #[tokio::test]
    async fn connector_refuses_while_offline() {
        let connector = InMemoryConnector::default();
        connector.substrate().set_online(false);
        assert!(connector.connect().await.is_err());

        connector.substrate().set_online(true);
        let channel = connector.connect().await.unwrap();
        channel.ping().await.unwrap();
    }
}
