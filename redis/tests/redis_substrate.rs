//! Integration tests for [`RedisChannel`](relay_redis::RedisChannel) against a real Redis.
//!
//! # Running These Tests
//!
//! These tests are marked as `#[ignore]` by default because they require Docker
//! to be running (for testcontainers).
//!
//! To run explicitly:
//! ```bash
//! cargo test -p relay-redis --test redis_substrate -- --ignored
//! ```

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code

use relay_core::{
    AgentQuery, Connector, CorrelationId, IdSource, PublishOutcome, RelayError, Request,
    RequestQueue, Response, ResponseSlots,
};
use relay_redis::RedisConnector;
use relay_runtime::{
    ConnectionManager, Correlator, CorrelatorConfig, RetryPolicy, Worker, WorkerConfig,
};
use relay_testing::responders;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use testcontainers::ContainerAsync;
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::redis::{REDIS_PORT, Redis};
use tokio::sync::watch;

async fn start_redis() -> (ContainerAsync<Redis>, String) {
    let container = Redis::default()
        .start()
        .await
        .expect("Failed to start Redis container");
    let host = container.get_host().await.expect("container host");
    let port = container
        .get_host_port_ipv4(REDIS_PORT)
        .await
        .expect("container port");
    (container, format!("redis://{host}:{port}/0"))
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn ids_increase_across_channels() {
    let (_container, url) = start_redis().await;
    let connector = RedisConnector::new(&url, None).unwrap();
    let a = connector.connect().await.unwrap();
    let b = connector.connect().await.unwrap();

    let first = a.next_id().await.unwrap();
    let second = b.next_id().await.unwrap();
    assert_eq!(first, CorrelationId::new(1));
    assert!(second > first);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn queue_is_fifo_and_dequeue_times_out_when_empty() {
    let (_container, url) = start_redis().await;
    let channel = RedisConnector::new(&url, Some("fifo")).unwrap().connect().await.unwrap();

    for n in 1..=3 {
        let request = Request::new(CorrelationId::new(n), AgentQuery::new(format!("q{n}")));
        channel.enqueue(&request).await.unwrap();
    }
    for n in 1..=3 {
        let request = channel.dequeue(Duration::from_secs(1)).await.unwrap().unwrap();
        assert_eq!(request.id, CorrelationId::new(n));
    }
    assert!(channel.dequeue(Duration::from_millis(100)).await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn first_publish_wins_and_unreserved_publish_is_dropped() {
    let (_container, url) = start_redis().await;
    let channel = RedisConnector::new(&url, None).unwrap().connect().await.unwrap();
    let id = CorrelationId::new(10);

    let unreserved = channel.publish(&Response::success(id, json!("early"))).await.unwrap();
    assert_eq!(unreserved, PublishOutcome::Dropped);

    channel.reserve(id, Duration::from_secs(5)).await.unwrap();
    let err = channel.reserve(id, Duration::from_secs(5)).await.unwrap_err();
    assert_eq!(err, RelayError::SlotBusy(id));

    let first = channel.publish(&Response::success(id, json!("one"))).await.unwrap();
    let second = channel.publish(&Response::success(id, json!("two"))).await.unwrap();
    assert_eq!(first, PublishOutcome::Delivered);
    assert_eq!(second, PublishOutcome::Dropped);

    let response = channel.wait(id, Duration::from_secs(1)).await.unwrap().unwrap();
    assert_eq!(response.result, json!("one"));
    assert!(channel.wait(id, Duration::from_millis(100)).await.unwrap().is_none());
    channel.retire(id).await.unwrap();
    channel.retire(id).await.unwrap();
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn expired_registration_drops_late_publish() {
    let (_container, url) = start_redis().await;
    let channel = RedisConnector::new(&url, None).unwrap().connect().await.unwrap();
    let id = CorrelationId::new(20);

    channel.reserve(id, Duration::from_millis(50)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let outcome = channel.publish(&Response::success(id, json!("late"))).await.unwrap();
    assert_eq!(outcome, PublishOutcome::Dropped);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn correlator_and_worker_round_trip_through_redis() {
    let (_container, url) = start_redis().await;
    let connector: Arc<dyn Connector> = Arc::new(RedisConnector::new(&url, None).unwrap());

    let worker = Worker::new(
        Arc::new(ConnectionManager::new(Arc::clone(&connector), RetryPolicy::default())),
        responders::ping_pong(),
        WorkerConfig::default(),
    );
    let (shutdown, rx) = watch::channel(false);
    let worker_task = tokio::spawn(async move { worker.run_pool(2, rx).await });

    let correlator = Correlator::new(
        Arc::new(ConnectionManager::new(connector, RetryPolicy::default())),
        CorrelatorConfig::default(),
    );
    let response = correlator
        .submit(AgentQuery::new("ping"), Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(response.result, json!("pong"));

    let rejected = correlator
        .submit(AgentQuery::new("hello"), Duration::from_secs(5))
        .await
        .unwrap();
    assert!(!rejected.outcome.is_success());

    shutdown.send(true).unwrap();
    worker_task.await.unwrap();
}
