//! # Relay Redis
//!
//! Redis implementation of the relay substrate.
//!
//! # Architecture
//!
//! - Short commands (`INCR`, `RPUSH`, `SET`, the publish script, `DEL`, `PING`) go
//!   through one shared [`ConnectionManager`].
//! - Blocking pops (`BLPOP`) run on dedicated connections checked out of a small
//!   pool, so a long wait never stalls other callers.
//! - `publish` is a Lua script that consumes the waiter registration and fills
//!   the slot atomically: the first publish wins, and publishes for retired or
//!   expired slots are dropped instead of leaking keys.
//!
//! # Example
//!
//! ```no_run
//! use relay_core::Connector;
//! use relay_redis::RedisConnector;
//!
//! # async fn example() -> relay_core::Result<()> {
//! let connector = RedisConnector::new("redis://127.0.0.1:6379/0", None)?;
//! let channel = connector.connect().await?;
//! channel.ping().await?;
//! # Ok(())
//! # }
//! ```

use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::{AsyncCommands, Client, RedisError, Script};
use relay_core::{
    Channel, Connector, CorrelationId, IdSource, PublishOutcome, RelayError, Request,
    RequestQueue, Response, ResponseSlots, SubstrateFuture, codec,
};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

pub mod keys;

pub use keys::Keys;

/// How long a delivered response may sit in its slot before Redis drops it.
pub const RESPONSE_TTL: Duration = Duration::from_secs(60);

/// Shortest `BLPOP` timeout sent to Redis; `0` would block forever.
const MIN_BLOCK_SECS: f64 = 0.01;

/// Idle blocking connections kept for reuse.
const MAX_IDLE_BLOCKING: usize = 16;

/// KEYS[1] = registration, KEYS[2] = slot, ARGV[1] = payload, ARGV[2] = slot TTL (ms).
const PUBLISH_SCRIPT: &str = r"
if redis.call('DEL', KEYS[1]) == 1 then
  redis.call('RPUSH', KEYS[2], ARGV[1])
  redis.call('PEXPIRE', KEYS[2], ARGV[2])
  return 1
end
return 0
";

fn redis_error(e: RedisError) -> RelayError {
    if e.kind() == redis::ErrorKind::TypeError {
        RelayError::Protocol(format!("unexpected Redis reply: {e}"))
    } else {
        RelayError::Transport(format!("Redis error: {e}"))
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX).max(1)
}

fn block_secs(timeout: Duration) -> f64 {
    timeout.as_secs_f64().max(MIN_BLOCK_SECS)
}

/// Opens [`RedisChannel`]s against one Redis endpoint.
#[derive(Clone)]
pub struct RedisConnector {
    client: Client,
    keys: Keys,
    endpoint: String,
}

impl RedisConnector {
    /// Create a connector. No connection is made until [`Connector::connect`].
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] if `url` is not a valid Redis URL.
    pub fn new(url: &str, namespace: Option<&str>) -> relay_core::Result<Self> {
        let client = Client::open(url)
            .map_err(|e| RelayError::Config(format!("Invalid Redis URL: {e}")))?;
        let info = client.get_connection_info();
        let endpoint = format!("redis://{}/{}", info.addr, info.redis.db);
        Ok(Self {
            client,
            keys: Keys::new(namespace),
            endpoint,
        })
    }

    /// Key layout used by channels from this connector.
    #[must_use]
    pub const fn keys(&self) -> &Keys {
        &self.keys
    }
}

impl Connector for RedisConnector {
    fn connect(&self) -> SubstrateFuture<'_, Arc<dyn Channel>> {
        Box::pin(async move {
            let manager = ConnectionManager::new(self.client.clone())
                .await
                .map_err(|e| {
                    RelayError::Transport(format!("Failed to connect to {}: {e}", self.endpoint))
                })?;

            tracing::debug!(endpoint = %self.endpoint, "Opened Redis channel");

            Ok(Arc::new(RedisChannel {
                client: self.client.clone(),
                manager,
                blocking: Mutex::new(Vec::new()),
                keys: self.keys.clone(),
                publish: Script::new(PUBLISH_SCRIPT),
            }) as Arc<dyn Channel>)
        })
    }

    fn describe(&self) -> String {
        self.endpoint.clone()
    }
}

/// One connection set to Redis: a shared manager for short commands plus a
/// pool of dedicated connections for blocking pops.
pub struct RedisChannel {
    client: Client,
    manager: ConnectionManager,
    blocking: Mutex<Vec<MultiplexedConnection>>,
    keys: Keys,
    publish: Script,
}

impl RedisChannel {
    async fn checkout(&self) -> relay_core::Result<MultiplexedConnection> {
        if let Some(conn) = self.blocking.lock().await.pop() {
            return Ok(conn);
        }
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(redis_error)
    }

    async fn checkin(&self, conn: MultiplexedConnection) {
        let mut idle = self.blocking.lock().await;
        if idle.len() < MAX_IDLE_BLOCKING {
            idle.push(conn);
        }
    }

    /// `BLPOP key timeout` on a dedicated connection.
    ///
    /// A connection that errored is discarded. If the caller is cancelled
    /// mid-pop the connection is dropped with it.
    async fn blocking_pop(&self, key: &str, timeout: Duration) -> relay_core::Result<Option<String>> {
        let mut conn = self.checkout().await?;
        let popped: Option<(String, String)> = conn
            .blpop(key, block_secs(timeout))
            .await
            .map_err(redis_error)?;
        self.checkin(conn).await;
        Ok(popped.map(|(_, payload)| payload))
    }
}

impl IdSource for RedisChannel {
    fn next_id(&self) -> SubstrateFuture<'_, CorrelationId> {
        Box::pin(async move {
            let mut conn = self.manager.clone();
            let id: u64 = conn.incr(self.keys.counter(), 1).await.map_err(redis_error)?;
            Ok(CorrelationId::new(id))
        })
    }
}

impl RequestQueue for RedisChannel {
    fn enqueue<'a>(&'a self, request: &'a Request) -> SubstrateFuture<'a, ()> {
        Box::pin(async move {
            let payload = codec::encode_request(request)?;
            let mut conn = self.manager.clone();
            let _: i64 = conn
                .rpush(self.keys.queue(), payload)
                .await
                .map_err(redis_error)?;
            Ok(())
        })
    }

    fn dequeue(&self, timeout: Duration) -> SubstrateFuture<'_, Option<Request>> {
        Box::pin(async move {
            let queue = self.keys.queue();
            match self.blocking_pop(&queue, timeout).await? {
                Some(payload) => codec::decode_request(&payload).map(Some),
                None => Ok(None),
            }
        })
    }
}

impl ResponseSlots for RedisChannel {
    fn reserve(&self, id: CorrelationId, ttl: Duration) -> SubstrateFuture<'_, ()> {
        Box::pin(async move {
            let mut conn = self.manager.clone();
            let set: Option<String> = redis::cmd("SET")
                .arg(self.keys.pending(id))
                .arg(1)
                .arg("NX")
                .arg("PX")
                .arg(millis(ttl))
                .query_async(&mut conn)
                .await
                .map_err(redis_error)?;
            if set.is_none() {
                return Err(RelayError::SlotBusy(id));
            }
            Ok(())
        })
    }

    fn wait(&self, id: CorrelationId, timeout: Duration) -> SubstrateFuture<'_, Option<Response>> {
        Box::pin(async move {
            let slot = self.keys.slot(id);
            match self.blocking_pop(&slot, timeout).await? {
                Some(payload) => codec::decode_response(id, &payload).map(Some),
                None => Ok(None),
            }
        })
    }

    fn publish<'a>(&'a self, response: &'a Response) -> SubstrateFuture<'a, PublishOutcome> {
        Box::pin(async move {
            let payload = codec::encode_response(response)?;
            let mut conn = self.manager.clone();
            let delivered: i64 = self
                .publish
                .key(self.keys.pending(response.id))
                .key(self.keys.slot(response.id))
                .arg(payload)
                .arg(millis(RESPONSE_TTL))
                .invoke_async(&mut conn)
                .await
                .map_err(redis_error)?;
            Ok(if delivered == 1 {
                PublishOutcome::Delivered
            } else {
                PublishOutcome::Dropped
            })
        })
    }

    fn retire(&self, id: CorrelationId) -> SubstrateFuture<'_, ()> {
        Box::pin(async move {
            let mut conn = self.manager.clone();
            let _: () = redis::pipe()
                .atomic()
                .del(self.keys.pending(id))
                .ignore()
                .del(self.keys.slot(id))
                .ignore()
                .query_async(&mut conn)
                .await
                .map_err(redis_error)?;
            Ok(())
        })
    }
}

impl Channel for RedisChannel {
    fn ping(&self) -> SubstrateFuture<'_, ()> {
        Box::pin(async move {
            let mut conn = self.manager.clone();
            let _: String = redis::cmd("PING")
                .query_async(&mut conn)
                .await
                .map_err(redis_error)?;
            Ok(())
        })
    }

    fn close(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            self.blocking.lock().await.clear();
        })
    }
}
