//! Agent memory: a small key/value store with per-entry expiry.

use crate::error::Result;
use chrono::{DateTime, Utc};
use relay_core::Value;
use relay_core::environment::{Clock, SystemClock};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Key/value memory used by the agent between requests.
pub trait MemoryStore: Send + Sync {
    /// Store `value` under `key`, replacing any previous value. With a `ttl`
    /// the entry disappears once it elapses.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Memory`](crate::AgentError::Memory) if the backing
    /// store rejects the write.
    fn store(
        &self,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Fetch the live value under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Memory`](crate::AgentError::Memory) if the backing
    /// store cannot be read.
    fn retrieve(&self, key: &str) -> impl Future<Output = Result<Option<Value>>> + Send;

    /// Remove `key`. Returns whether a live entry was removed.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Memory`](crate::AgentError::Memory) if the backing
    /// store rejects the delete.
    fn forget(&self, key: &str) -> impl Future<Output = Result<bool>> + Send;
}

struct Entry {
    value: Value,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|at| now < at)
    }
}

/// Process-local [`MemoryStore`]. Expiry is checked against the injected
/// [`Clock`] on every read.
#[derive(Clone)]
pub struct InMemoryStore {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Store on the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Store on a custom clock.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            clock,
        }
    }

    /// Number of live entries.
    pub async fn len(&self) -> usize {
        let now = self.clock.now();
        self.entries
            .read()
            .await
            .values()
            .filter(|entry| entry.is_live(now))
            .count()
    }

    /// Whether no live entries remain.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl MemoryStore for InMemoryStore {
    async fn store(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()> {
        let now = self.clock.now();
        let expires_at = ttl
            .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
            .and_then(|ttl| now.checked_add_signed(ttl));

        let mut entries = self.entries.write().await;
        entries.retain(|_, entry| entry.is_live(now));
        entries.insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn retrieve(&self, key: &str) -> Result<Option<Value>> {
        let now = self.clock.now();
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone()))
    }

    async fn forget(&self, key: &str) -> Result<bool> {
        let now = self.clock.now();
        let removed = self.entries.write().await.remove(key);
        Ok(removed.is_some_and(|entry| entry.is_live(now)))
    }
}
