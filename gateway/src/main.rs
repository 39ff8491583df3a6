//! Relay gateway: the HTTP entry point of the agent relay.
//!
//! Accepts agent queries over HTTP, enqueues them on the configured substrate
//! and answers with the correlated worker response or a timeout.
//!
//! Run with: `cargo run --bin relay-gateway`
//! Query: `POST http://localhost:8000/api/v1/agent/query`
//! Health: `GET http://localhost:8000/api/v1/health`
//!
//! With `RELAY_BACKEND=memory` the gateway runs its own worker pool and needs
//! no Redis.

use anyhow::Context;
use metrics_exporter_prometheus::PrometheusHandle;
use relay_core::Connector;
use relay_redis::RedisConnector;
use relay_runtime::metrics::MetricsServer;
use relay_runtime::{
    Backend, ConnectionManager, Correlator, InMemoryConnector, InMemorySubstrate, RelayConfig,
    RetryPolicy, Worker,
};
use relay_web::{AppState, metrics_router, router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file (if present)
    let _ = dotenvy::dotenv();

    init_tracing();

    let config = RelayConfig::from_env().context("invalid configuration")?;
    let bind_addr = config.server.bind_addr()?;
    info!(
        backend = ?config.substrate.backend,
        endpoint = %config.substrate.redacted_url(),
        "Starting relay gateway"
    );

    let mut metrics = MetricsServer::new(config.server.metrics_addr()?.unwrap_or(bind_addr));
    metrics.start()?;
    let prometheus = metrics.handle().cloned();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Substrate, plus an embedded worker pool for the in-process backend
    let mut embedded_workers = None;
    let connector: Arc<dyn Connector> = match config.substrate.backend {
        Backend::Redis => Arc::new(RedisConnector::new(
            &config.substrate.redis_url,
            config.substrate.namespace.as_deref(),
        )?),
        Backend::Memory => {
            let connector = InMemoryConnector::new(InMemorySubstrate::new());
            let worker = Worker::new(
                Arc::new(ConnectionManager::new(
                    Arc::new(connector.clone()),
                    RetryPolicy::with_max_attempts(1),
                )),
                relay_agent::handler(&config.agent).context("invalid agent settings")?,
                config.worker,
            );
            let rx = shutdown_rx.clone();
            info!(concurrency = config.worker.concurrency, "Starting embedded worker pool");
            embedded_workers = Some(tokio::spawn(async move { worker.run_configured(rx).await }));
            Arc::new(connector)
        }
    };

    let connection = Arc::new(ConnectionManager::new(
        connector,
        config.substrate.retry_policy(),
    ));
    match connection.ensure_connected().await {
        Ok(()) => info!(endpoint = %connection.endpoint(), "Substrate connected"),
        Err(e) => warn!(error = %e, "Substrate unavailable at startup, will reconnect on demand"),
    }

    let correlator = Arc::new(Correlator::new(Arc::clone(&connection), config.correlator));

    let mut state = AppState::new(correlator);
    let metrics_listener = match (config.server.metrics_port, prometheus) {
        (Some(_), Some(handle)) => Some(
            spawn_metrics_listener(metrics.addr(), handle, shutdown_rx.clone()).await?,
        ),
        (None, Some(handle)) => {
            state = state.with_metrics(handle);
            None
        }
        (_, None) => None,
    };

    let app = router(state, &config.server);
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    info!(addr = %bind_addr, prefix = %config.server.api_prefix, "HTTP server listening");

    // In-flight requests finish before workers and the metrics listener stop
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_signal().await;
            info!("Shutdown signal received, draining");
        })
        .await;
    if let Err(e) = served {
        error!(error = %e, "HTTP server error");
    }
    let _ = shutdown_tx.send(true);

    for (name, task) in [
        ("embedded workers", embedded_workers),
        ("metrics listener", metrics_listener),
    ] {
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(task = name, error = %e, "Task failed during shutdown");
            }
        }
    }

    connection.disconnect().await;
    info!("Shutdown complete");
    Ok(())
}

/// Serve `/metrics` on its own port until shutdown.
async fn spawn_metrics_listener(
    addr: SocketAddr,
    handle: PrometheusHandle,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<JoinHandle<()>> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind metrics listener {addr}"))?;
    info!(addr = %addr, "Prometheus metrics listening");

    Ok(tokio::spawn(async move {
        let served = axum::serve(listener, metrics_router(handle))
            .with_graceful_shutdown(async move {
                let _ = shutdown.wait_for(|stop| *stop).await;
            })
            .await;
        if let Err(e) = served {
            error!(error = %e, "Metrics server error");
        }
    }))
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Unable to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Unable to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}
