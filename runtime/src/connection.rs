//! Connection lifecycle management.
//!
//! [`ConnectionManager`] owns the one live [`Channel`] a process uses. The
//! channel is opened lazily on first use, re-opened after a detected failure
//! and closed on [`ConnectionManager::disconnect`].
//!
//! ```text
//!              ensure_connected             connect ok
//! Disconnected ────────────────► Connecting ──────────► Connected
//!      ▲                             │                      │
//!      │         connect failed      │                      │
//!      ├─────────────────────────────┘                      │
//!      │          disconnect / invalidate                   │
//!      └────────────────────────────────────────────────────┘
//! ```
//!
//! Connects are single-flight: the lock guarding the current channel is held
//! for the whole connect sequence, so callers arriving during a reconnect wait
//! for it and share the resulting channel instead of opening their own.

use crate::metrics::ConnectionMetrics;
use crate::retry::{RetryPolicy, retry_with_predicate};
use relay_core::{Channel, Connector, RelayError, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, watch};

/// Upper bound on a liveness check, connect included.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No channel
    Disconnected,
    /// A connect sequence is running
    Connecting,
    /// A channel is open
    Connected,
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
        }
    }
}

/// Owns the shared channel to the substrate.
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    policy: RetryPolicy,
    current: Mutex<Option<Arc<dyn Channel>>>,
    state: watch::Sender<LinkState>,
    connects: AtomicU64,
}

impl ConnectionManager {
    /// Create a manager. Nothing is connected until first use.
    #[must_use]
    pub fn new(connector: Arc<dyn Connector>, policy: RetryPolicy) -> Self {
        let (state, _) = watch::channel(LinkState::Disconnected);
        Self {
            connector,
            policy,
            current: Mutex::new(None),
            state,
            connects: AtomicU64::new(0),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    /// Subscribe to state changes.
    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<LinkState> {
        self.state.subscribe()
    }

    /// Number of channels established over the manager's lifetime.
    #[must_use]
    pub fn connects(&self) -> u64 {
        self.connects.load(Ordering::SeqCst)
    }

    /// Endpoint description for logs.
    #[must_use]
    pub fn endpoint(&self) -> String {
        self.connector.describe()
    }

    /// Connect if not connected. A no-op when a channel is already open.
    ///
    /// # Errors
    ///
    /// Returns the last connect error once the retry policy is exhausted.
    pub async fn ensure_connected(&self) -> Result<()> {
        self.channel().await.map(|_| ())
    }

    /// The open channel, connecting first if needed.
    ///
    /// # Errors
    ///
    /// Returns the last connect error once the retry policy is exhausted.
    pub async fn channel(&self) -> Result<Arc<dyn Channel>> {
        self.acquire(&self.policy).await
    }

    /// Drop `channel` after a detected failure so the next caller reconnects.
    ///
    /// Does nothing if another caller already replaced it.
    pub async fn invalidate(&self, channel: &Arc<dyn Channel>) {
        let stale = {
            let mut current = self.current.lock().await;
            match current.as_ref() {
                Some(open) if Arc::ptr_eq(open, channel) => {
                    self.state.send_replace(LinkState::Disconnected);
                    current.take()
                }
                _ => None,
            }
        };

        if let Some(stale) = stale {
            tracing::warn!(endpoint = %self.connector.describe(), "Channel failed, will reconnect on next use");
            stale.close().await;
        }
    }

    /// Release the channel. Safe to call when never connected.
    pub async fn disconnect(&self) {
        let closed = {
            let mut current = self.current.lock().await;
            self.state.send_replace(LinkState::Disconnected);
            current.take()
        };

        if let Some(channel) = closed {
            channel.close().await;
            tracing::info!(endpoint = %self.connector.describe(), "Disconnected from substrate");
        }
    }

    /// Liveness check: connect if needed (single attempt) and ping, all within
    /// [`PROBE_TIMEOUT`].
    ///
    /// Never fails; any error resolves to `false`. A check that runs out of
    /// time releases the connect lock, so it cannot stall submitters behind a
    /// hung connect.
    pub async fn probe(&self) -> bool {
        if let Ok(up) = tokio::time::timeout(PROBE_TIMEOUT, self.ping_once()).await {
            up
        } else {
            tracing::warn!(
                endpoint = %self.connector.describe(),
                timeout_ms = PROBE_TIMEOUT.as_millis(),
                "Probe timed out"
            );
            false
        }
    }

    async fn ping_once(&self) -> bool {
        let channel = match self.acquire(&RetryPolicy::with_max_attempts(1)).await {
            Ok(channel) => channel,
            Err(e) => {
                tracing::debug!(error = %e, "Probe could not connect");
                return false;
            }
        };

        match channel.ping().await {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(error = %e, "Probe ping failed");
                if e.is_transport() {
                    self.invalidate(&channel).await;
                }
                false
            }
        }
    }

    async fn acquire(&self, policy: &RetryPolicy) -> Result<Arc<dyn Channel>> {
        let mut current = self.current.lock().await;
        if let Some(channel) = current.as_ref() {
            return Ok(Arc::clone(channel));
        }

        let connecting = Connecting::enter(&self.state);
        tracing::debug!(endpoint = %self.connector.describe(), "Connecting to substrate");

        let connected = retry_with_predicate(
            policy,
            || async {
                let attempt = self.connector.connect().await;
                if attempt.is_err() {
                    ConnectionMetrics::record_connect_failure();
                }
                attempt
            },
            RelayError::is_transport,
        )
        .await;

        match connected {
            Ok(channel) => {
                let previous = self.connects.fetch_add(1, Ordering::SeqCst);
                if previous > 0 {
                    ConnectionMetrics::record_reconnect();
                }
                *current = Some(Arc::clone(&channel));
                connecting.finish(LinkState::Connected);
                tracing::info!(
                    endpoint = %self.connector.describe(),
                    connects = previous + 1,
                    "Connected to substrate"
                );
                Ok(channel)
            }
            Err(e) => {
                connecting.finish(LinkState::Disconnected);
                tracing::error!(endpoint = %self.connector.describe(), error = %e, "Failed to connect to substrate");
                Err(e)
            }
        }
    }
}

/// Holds the state at `Connecting`; falls back to `Disconnected` if the
/// connect future is dropped before it finishes.
struct Connecting<'a> {
    state: &'a watch::Sender<LinkState>,
    done: bool,
}

impl<'a> Connecting<'a> {
    fn enter(state: &'a watch::Sender<LinkState>) -> Self {
        state.send_replace(LinkState::Connecting);
        Self { state, done: false }
    }

    fn finish(mut self, outcome: LinkState) {
        self.done = true;
        self.state.send_replace(outcome);
    }
}

impl Drop for Connecting<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.state.send_replace(LinkState::Disconnected);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code
mod tests {
    use super::*;
    use crate::memory::InMemoryConnector;
    use relay_core::SubstrateFuture;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Counts connect calls and stalls each one so callers pile up.
    struct SlowConnector {
        inner: InMemoryConnector,
        calls: AtomicUsize,
        delay: Duration,
    }

    impl SlowConnector {
        fn new(delay: Duration) -> Self {
            Self {
                inner: InMemoryConnector::default(),
                calls: AtomicUsize::new(0),
                delay,
            }
        }
    }

    impl Connector for SlowConnector {
        fn connect(&self) -> SubstrateFuture<'_, Arc<dyn Channel>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(self.delay).await;
                self.inner.connect().await
            })
        }

        fn describe(&self) -> String {
            "slow".to_string()
        }
    }

    fn manager(connector: Arc<dyn Connector>) -> ConnectionManager {
        ConnectionManager::new(connector, RetryPolicy::with_max_attempts(3))
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_one_connect() {
        let connector = Arc::new(SlowConnector::new(Duration::from_millis(50)));
        let manager = Arc::new(manager(Arc::clone(&connector) as Arc<dyn Connector>));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let m = Arc::clone(&manager);
            handles.push(tokio::spawn(async move { m.ensure_connected().await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(connector.calls.load(Ordering::SeqCst), 1);
        assert_eq!(manager.connects(), 1);
        assert_eq!(manager.state(), LinkState::Connected);
    }

    #[tokio::test]
    async fn ensure_connected_is_idempotent() {
        let manager = manager(Arc::new(InMemoryConnector::default()));
        manager.ensure_connected().await.unwrap();
        let first = manager.channel().await.unwrap();
        manager.ensure_connected().await.unwrap();
        let second = manager.channel().await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(manager.connects(), 1);
    }

    #[tokio::test]
    async fn disconnect_without_connect_is_safe() {
        let manager = manager(Arc::new(InMemoryConnector::default()));
        manager.disconnect().await;
        assert_eq!(manager.state(), LinkState::Disconnected);
        assert_eq!(manager.connects(), 0);
    }

    #[tokio::test]
    async fn invalidate_forces_reconnect() {
        let manager = manager(Arc::new(InMemoryConnector::default()));
        let first = manager.channel().await.unwrap();

        manager.invalidate(&first).await;
        assert_eq!(manager.state(), LinkState::Disconnected);

        let second = manager.channel().await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(manager.connects(), 2);

        // Invalidating a stale handle leaves the fresh channel alone
        manager.invalidate(&first).await;
        assert_eq!(manager.state(), LinkState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_surface_transport_error() {
        let connector = InMemoryConnector::default();
        connector.substrate().set_online(false);
        let manager = manager(Arc::new(connector));

        let err = manager.ensure_connected().await.unwrap_err();
        assert!(err.is_transport());
        assert_eq!(manager.state(), LinkState::Disconnected);
    }

    #[tokio::test]
    async fn probe_never_fails() {
        let connector = InMemoryConnector::default();
        let substrate = connector.substrate().clone();
        let manager = manager(Arc::new(connector));

        assert!(manager.probe().await);

        substrate.set_online(false);
        assert!(!manager.probe().await);
        assert_eq!(manager.state(), LinkState::Disconnected);

        substrate.set_online(true);
        assert!(manager.probe().await);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_connect_does_not_stall_health_checks() {
        let connector = Arc::new(SlowConnector::new(Duration::from_secs(60)));
        let manager = manager(Arc::clone(&connector) as Arc<dyn Connector>);

        let started = tokio::time::Instant::now();
        assert!(!manager.probe().await);

        let elapsed = started.elapsed();
        assert!(elapsed >= PROBE_TIMEOUT);
        assert!(elapsed < PROBE_TIMEOUT + Duration::from_millis(100));
        assert_eq!(manager.state(), LinkState::Disconnected);
        assert!(manager.current.try_lock().is_ok());
        assert_eq!(connector.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_connect_leaves_state_disconnected() {
        let manager = Arc::new(manager(Arc::new(SlowConnector::new(Duration::from_secs(60)))));

        let connecting = Arc::clone(&manager);
        let handle = tokio::spawn(async move { connecting.ensure_connected().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(manager.state(), LinkState::Connecting);

        handle.abort();
        let _ = handle.await;
        assert_eq!(manager.state(), LinkState::Disconnected);
    }
}
