//! Relay worker: drains the shared request queue and answers through the agent.
//!
//! Run with: `cargo run --bin relay-worker`
//!
//! Start as many worker processes as needed; they share the queue and every
//! request is handled by exactly one of them. `WORKER_CONCURRENCY` sets the
//! number of loops per process.

use anyhow::{Context, bail};
use relay_redis::RedisConnector;
use relay_runtime::metrics::MetricsServer;
use relay_runtime::{Backend, ConnectionManager, RelayConfig, Worker};
use relay_web::metrics_router;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file (if present)
    let _ = dotenvy::dotenv();

    init_tracing();

    let config = RelayConfig::from_env().context("invalid configuration")?;
    if config.substrate.backend == Backend::Memory {
        bail!("the in-process backend runs its workers inside relay-gateway; set RELAY_BACKEND=redis");
    }

    info!(
        agent = %config.agent.name,
        endpoint = %config.substrate.redacted_url(),
        concurrency = config.worker.concurrency,
        "Starting relay worker"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let metrics_listener = match config.server.metrics_addr()? {
        Some(addr) => {
            let mut metrics = MetricsServer::new(addr);
            metrics.start()?;
            match metrics.handle().cloned() {
                Some(handle) => {
                    let listener = tokio::net::TcpListener::bind(addr)
                        .await
                        .with_context(|| format!("failed to bind metrics listener {addr}"))?;
                    info!(addr = %addr, "Prometheus metrics listening");
                    let mut shutdown = shutdown_rx.clone();
                    Some(tokio::spawn(async move {
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
                None => None,
            }
        }
        None => None,
    };

    let connector = RedisConnector::new(
        &config.substrate.redis_url,
        config.substrate.namespace.as_deref(),
    )?;
    let connection = Arc::new(ConnectionManager::new(
        Arc::new(connector),
        config.substrate.retry_policy(),
    ));
    if let Err(e) = connection.ensure_connected().await {
        warn!(error = %e, "Substrate unavailable at startup, workers will keep retrying");
    }

    let worker = Worker::new(
        Arc::clone(&connection),
        relay_agent::handler(&config.agent).context("invalid agent settings")?,
        config.worker,
    );
    let pool = tokio::spawn(async move { worker.run_configured(shutdown_rx).await });

    shutdown_signal().await;
    info!("Shutdown signal received, finishing in-flight requests");
    let _ = shutdown_tx.send(true);

    if let Err(e) = pool.await {
        error!(error = %e, "Worker pool failed");
    }
    if let Some(task) = metrics_listener {
        if let Err(e) = task.await {
            warn!(error = %e, "Metrics listener failed during shutdown");
        }
    }

    connection.disconnect().await;
    info!("Shutdown complete");
    Ok(())
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
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}
