//! Substrate abstraction: the shared queue and keyed slot store that gateways
//! and workers meet on.
//!
//! # Architecture
//!
//! ```text
//!  gateway                      substrate                      worker
//! ┌──────────┐  next_id    ┌──────────────────┐
//! │          │────────────►│  id counter      │
//! │          │  reserve    │                  │
//! │Correlator│────────────►│  slot registry   │◄─── publish ───┐
//! │          │  enqueue    │                  │                │
//! │          │────────────►│  request queue   │──── dequeue ──►│ Worker
//! │          │  wait       │                  │                │
//! │          │◄────────────│  response slots  │                │
//! └──────────┘  retire     └──────────────────┘
//! ```
//!
//! Every operation may cross a process boundary, so all of them are async and
//! fallible. The traits return boxed futures so they can be used as trait
//! objects (`Arc<dyn Channel>`).
//!
//! # Implementations
//!
//! - `InMemorySubstrate` in `relay-runtime`: in-process, for tests and single-binary setups
//! - `RedisChannel` in `relay-redis`: production
//!
//! # Slot protocol
//!
//! 1. `reserve(id, ttl)` registers a waiter before the request becomes visible to workers.
//! 2. `publish(response)` succeeds only while the registration exists and consumes it, so
//!    the first publish wins and anything later is [`PublishOutcome::Dropped`].
//! 3. `wait(id, timeout)` pops the response, removing it from the slot.
//! 4. `retire(id)` deletes registration and slot; it is idempotent and runs on every exit path.

use crate::error::Result;
use crate::message::{CorrelationId, PublishOutcome, Request, Response};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// Boxed future returned by substrate operations.
pub type SubstrateFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Source of correlation ids.
pub trait IdSource: Send + Sync {
    /// Allocate a fresh id. Concurrent calls never return the same value.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the counter lives in an unreachable substrate.
    fn next_id(&self) -> SubstrateFuture<'_, CorrelationId>;
}

/// FIFO queue of pending requests.
pub trait RequestQueue: Send + Sync {
    /// Append a request at the tail.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the queue is unreachable.
    fn enqueue<'a>(&'a self, request: &'a Request) -> SubstrateFuture<'a, ()>;

    /// Pop the oldest request, waiting up to `timeout` for one to arrive.
    ///
    /// Returns `None` when the timeout elapses with the queue empty.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the queue is unreachable, or a protocol
    /// error if the popped payload cannot be decoded.
    fn dequeue(&self, timeout: Duration) -> SubstrateFuture<'_, Option<Request>>;
}

/// Keyed store of single-use response slots.
pub trait ResponseSlots: Send + Sync {
    /// Register a waiter for `id`. The registration expires after `ttl` so an
    /// abandoned slot cannot outlive its deadline.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::SlotBusy`](crate::RelayError::SlotBusy) if a slot for `id`
    /// already exists, or a transport error.
    fn reserve(&self, id: CorrelationId, ttl: Duration) -> SubstrateFuture<'_, ()>;

    /// Block the calling task until the response for `id` arrives or `timeout`
    /// elapses. Reading the response removes it.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the store is unreachable, or a protocol
    /// error if the stored payload cannot be decoded.
    fn wait(&self, id: CorrelationId, timeout: Duration) -> SubstrateFuture<'_, Option<Response>>;

    /// Write a response into the slot named by `response.id`.
    ///
    /// Only the first publish to a reserved slot is delivered; publishes to
    /// retired, expired, or already-answered slots are dropped.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the store is unreachable.
    fn publish<'a>(&'a self, response: &'a Response) -> SubstrateFuture<'a, PublishOutcome>;

    /// Delete the slot and its registration. Safe to call repeatedly.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the store is unreachable.
    fn retire(&self, id: CorrelationId) -> SubstrateFuture<'_, ()>;
}

/// One live connection to a substrate.
pub trait Channel: IdSource + RequestQueue + ResponseSlots {
    /// Lightweight liveness check.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the substrate does not answer.
    fn ping(&self) -> SubstrateFuture<'_, ()>;

    /// Release the channel's resources. Subsequent operations may fail.
    fn close(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// Factory for [`Channel`]s, driven by the connection manager.
pub trait Connector: Send + Sync {
    /// Establish a new channel.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the substrate cannot be reached.
    fn connect(&self) -> SubstrateFuture<'_, Arc<dyn Channel>>;

    /// Human-readable endpoint for logs (credentials stripped).
    fn describe(&self) -> String;
}
