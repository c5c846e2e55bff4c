//! Script generation server binary.
//!
//! Hosts the HTTP/WebSocket API and the queue consumer in one process so
//! that job tasks and socket tasks share the same connection registry.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use scriptgen_api::{create_router, metrics, ApiConfig, AppState, StoreBackend};
use scriptgen_queue::JobQueue;
use scriptgen_store::{DocumentStore, FirestoreStore, MemoryStore};
use scriptgen_worker::{
    ConnectionRegistry, FanoutDispatcher, GeminiClient, JobConsumer, JobPipeline, ResultDelivery,
    StageExecutor, WorkerConfig,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Install rustls crypto provider (required for rustls 0.23+)
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    init_tracing()?;

    info!("Starting scriptgen-api");

    let config = ApiConfig::from_env();
    let worker_config = WorkerConfig::from_env();
    info!(
        "API config: host={}, port={}, store={:?}",
        config.host, config.port, config.store_backend
    );

    let store: Arc<dyn DocumentStore> = match config.store_backend {
        StoreBackend::Firestore => Arc::new(
            FirestoreStore::from_env()
                .await
                .context("Failed to create Firestore store")?,
        ),
        StoreBackend::Memory => {
            if config.is_production() {
                warn!("Running with the in-memory store in production; state is lost on restart");
            }
            Arc::new(MemoryStore::new())
        }
    };

    let queue = Arc::new(JobQueue::from_env().context("Failed to create job queue")?);
    let backend = Arc::new(GeminiClient::from_env().context("Failed to create Gemini client")?);

    let registry = Arc::new(ConnectionRegistry::new());
    let delivery = ResultDelivery::new(
        Arc::clone(&registry),
        Arc::clone(&store),
        worker_config.delivery_policy(),
    );
    let stages = StageExecutor::new(backend, Arc::clone(&store), worker_config.backend_timeout);
    let pipeline = Arc::new(JobPipeline::new(
        Arc::clone(&store),
        stages.clone(),
        FanoutDispatcher::new(queue.clone()),
        delivery.clone(),
    ));

    let metrics_handle = if config.metrics_enabled {
        info!("Prometheus metrics enabled at /metrics");
        Some(metrics::init_metrics().context("Failed to install Prometheus recorder")?)
    } else {
        None
    };

    let consumer = Arc::new(JobConsumer::new(
        worker_config.clone(),
        Arc::clone(&queue),
        pipeline,
    ));
    let heartbeat = Arc::clone(&registry)
        .start_heartbeat(worker_config.heartbeat_interval, consumer.subscribe_shutdown());

    let consumer_task = {
        let consumer = Arc::clone(&consumer);
        tokio::spawn(async move { consumer.run().await })
    };

    let state = AppState::new(config.clone(), store, queue, delivery, stages);
    let app = create_router(state, metrics_handle);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .context("Invalid bind address")?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("HTTP server stopped, draining consumer");
    consumer.shutdown();
    match consumer_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Consumer exited with error: {}", e),
        Err(e) => warn!("Consumer task panicked: {}", e),
    }
    let _ = heartbeat.await;

    info!("Server shutdown complete");
    Ok(())
}

/// Colored output for dev, JSON when `LOG_FORMAT=json`.
fn init_tracing() -> anyhow::Result<()> {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env()
        .add_directive("scriptgen=info".parse()?)
        .add_directive("scriptgen_api=info".parse()?)
        .add_directive("scriptgen_worker=info".parse()?);

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal");
}
