use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use evalhub_core::backend::completion_channel;
use evalhub_db::{JobStore, MemoryJobStore, PgJobStore};
use evalhub_events::EventBus;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use evalhub_api::config::{LogFormat, ServerConfig};
use evalhub_api::engine::Engine;
use evalhub_api::router::build_app_router;
use evalhub_api::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Configuration ---
    let config = ServerConfig::from_env().context("Invalid server configuration")?;

    // --- Tracing ---
    init_tracing(config.log_format);
    tracing::info!(
        host = %config.host,
        port = config.port,
        backend = ?config.backend.kind(),
        "Loaded server configuration",
    );

    // --- Job store ---
    let store = open_store(&config).await?;

    // --- Event bus ---
    let event_bus = Arc::new(EventBus::default());

    // --- Backend and engine ---
    let shutdown = CancellationToken::new();
    let (signal_tx, signal_rx) = completion_channel();
    let backend = evalhub_backend::build_backend(&config.backend, signal_tx.clone(), shutdown.child_token())
        .context("Failed to build execution backend")?;

    let engine = Engine::new(
        store,
        backend,
        Arc::clone(&event_bus),
        (signal_tx, signal_rx),
        config.engine.clone(),
        shutdown.child_token(),
    );
    let service = Arc::clone(&engine.service);
    let tasks = engine.spawn();
    tracing::info!("Dispatcher and result collector started");

    // --- App state ---
    let state = AppState {
        jobs: service,
        config: Arc::new(config.clone()),
        event_bus,
    };
    let app = build_app_router(state, &config).context("Invalid CORS_ORIGINS")?;

    // --- Start server ---
    let host = config
        .host
        .parse()
        .with_context(|| format!("Invalid HOST address '{}'", config.host))?;
    let addr = SocketAddr::new(host, config.port);
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, stopping engine");
    shutdown.cancel();

    let grace = Duration::from_secs(config.shutdown_timeout_secs);
    if tokio::time::timeout(grace, tasks.dispatcher).await.is_err() {
        tracing::warn!("Dispatcher did not stop within the shutdown timeout");
    }
    if tokio::time::timeout(grace, tasks.collector).await.is_err() {
        tracing::warn!("Result collector did not stop within the shutdown timeout");
    }

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "evalhub_api=debug,evalhub_backend=debug,tower_http=debug".into());
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
    }
}

/// PostgreSQL when `DATABASE_URL` is set, otherwise an in-memory store.
async fn open_store(config: &ServerConfig) -> anyhow::Result<Arc<dyn JobStore>> {
    let Some(database_url) = &config.database_url else {
        tracing::warn!("DATABASE_URL not set, jobs are kept in memory and lost on restart");
        return Ok(Arc::new(MemoryJobStore::new()));
    };

    let pool = evalhub_db::create_pool(database_url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connection pool created");

    evalhub_db::health_check(&pool)
        .await
        .context("Database health check failed")?;
    tracing::info!("Database health check passed");

    evalhub_db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database migrations applied");

    Ok(Arc::new(PgJobStore::new(pool)))
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the server
/// shuts down cleanly whether stopped interactively or by a process
/// manager.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
