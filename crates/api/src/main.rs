use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use jobline_db::{InMemoryJobStore, JobStore, PgJobStore};
use jobline_pipeline::MockExternalService;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use jobline_api::config::{EngineConfig, ServerConfig};
use jobline_api::engine::Engine;
use jobline_api::router::build_app_router;
use jobline_api::state::AppState;

/// How long in-flight executions get to observe cancellation on shutdown.
const WORKER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "jobline_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env().context("Invalid server configuration")?;
    let engine_config = EngineConfig::from_env().context("Invalid engine configuration")?;
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");
    tracing::info!(
        workers = engine_config.worker_concurrency,
        max_redeliveries = engine_config.max_redeliveries,
        failure_rate = engine_config.external_failure_rate,
        "Loaded engine configuration",
    );

    // --- Job store ---
    let store = connect_store().await?;

    // --- Engine ---
    let external = Arc::new(MockExternalService::new(engine_config.external_failure_rate));
    let engine = Engine::new(store, external, &engine_config);

    let recovered = engine
        .dispatcher
        .recover()
        .await
        .context("Failed to re-enqueue unfinished jobs")?;
    tracing::info!(recovered, "Unfinished jobs re-enqueued");

    let shutdown = CancellationToken::new();
    let dispatcher_handle = tokio::spawn(Arc::clone(&engine.dispatcher).run(shutdown.clone()));

    // --- Router ---
    let state = AppState::new(&engine, shutdown.clone());
    let app = build_app_router(state, &config).context("Failed to build router")?;

    // --- Start server ---
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .context("Invalid HOST/PORT")?;
    tracing::info!("Starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown({
            let shutdown = shutdown.clone();
            async move {
                shutdown_signal().await;
                // Stops workers and closes open status streams.
                shutdown.cancel();
            }
        })
        .await
        .context("Server error")?;

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, waiting for workers");

    match tokio::time::timeout(WORKER_DRAIN_TIMEOUT, dispatcher_handle).await {
        Ok(Ok(())) => tracing::info!("Workers stopped"),
        Ok(Err(e)) => tracing::error!(error = %e, "Dispatcher task failed"),
        Err(_) => tracing::warn!("Workers did not stop in time, abandoning in-flight executions"),
    }

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Postgres when `DATABASE_URL` is set, otherwise a process-local store.
async fn connect_store() -> anyhow::Result<Arc<dyn JobStore>> {
    let Ok(database_url) = std::env::var("DATABASE_URL") else {
        tracing::warn!("DATABASE_URL not set, using in-memory job store (jobs are lost on restart)");
        return Ok(Arc::new(InMemoryJobStore::new()));
    };

    let pool = jobline_db::create_pool(&database_url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connection pool created");

    jobline_db::health_check(&pool)
        .await
        .context("Database health check failed")?;
    tracing::info!("Database health check passed");

    jobline_db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database migrations applied");

    Ok(Arc::new(PgJobStore::new(pool)))
}

/// Wait for SIGINT (Ctrl-C) or SIGTERM.
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
