mod audit;
mod auth;
mod config;
mod db;
mod errors;
mod extractor;
mod importer;
mod models;
mod pipeline;
mod routes;
mod state;
mod storage;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::audit::LlmAuditSink;
use crate::config::Config;
use crate::db::create_pool;
use crate::extractor::ExtractionClient;
use crate::pipeline::worker::{CvWorker, WorkerConfig};
use crate::routes::build_router;
use crate::state::AppState;
use crate::storage::CvStorage;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_CRATE_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting CV pipeline API v{}", env!("CARGO_PKG_VERSION"));

    // Initialize PostgreSQL
    let pool = create_pool(&config.database_url).await?;

    // Initialize blob storage (backend selected once, here)
    let storage = Arc::new(
        CvStorage::from_env(
            config.cv_storage_mode.as_deref(),
            config.railway_environment.as_deref(),
        )
        .await?,
    );

    // Initialize the extraction service client
    let extractor = Arc::new(ExtractionClient::new(
        config.python_api_url.clone(),
        config.python_api_token.clone(),
        config.sync_timeout(),
        config.async_timeout(),
    ));
    info!(
        "Extraction client ready ({} mode)",
        if config.sync_mode { "sync" } else { "async" }
    );

    // Initialize the audit sink
    let audit = LlmAuditSink::new(pool.clone());

    // Spawn the background worker
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = CvWorker::new(
        pool.clone(),
        storage.clone(),
        extractor.clone(),
        audit.clone(),
        WorkerConfig {
            poll_interval: config.poll_interval(),
            sync_mode: config.sync_mode,
            max_retries: config.max_retries,
            stuck_deadline: config.stuck_deadline(),
            ..WorkerConfig::default()
        },
    );
    let worker_handle = tokio::spawn(worker.run(shutdown_rx));

    // Build app state
    let app_state = AppState {
        db: pool,
        storage,
        extractor,
        audit,
        config: config.clone(),
    };

    // Build router
    let app = build_router(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: tighten CORS in production

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop the worker at its next tick boundary and wait for it to drain.
    shutdown_tx.send(true).ok();
    worker_handle.await.ok();
    info!("Shutdown complete");

    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
