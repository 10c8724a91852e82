//! Binary entry point: load configuration, bring up storage and the
//! background services, serve the HTTP + push surface, and shut down
//! cleanly on SIGINT/SIGTERM. Grounded on `rust-srec::main`.

use std::sync::Arc;
use std::time::Duration;

use conversion_orchestrator::api::{build_router, serve};
use conversion_orchestrator::config::AppConfig;
use conversion_orchestrator::database::{init_pool, run_migrations, SqlxJobStore};
use conversion_orchestrator::logging::init_logging;
use conversion_orchestrator::orchestrator::MockBlobStore;
use conversion_orchestrator::processor::HttpProcessorClient;
use conversion_orchestrator::services::ServiceContainer;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let log_dir = std::env::var("LOG_DIR").ok();
    let _guard = init_logging(log_dir.as_deref())
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {e}"))?;

    info!("starting conversion-orchestrator v{}", env!("CARGO_PKG_VERSION"));

    let config = Arc::new(AppConfig::from_env());

    info!(database_url = %config.database_url, "connecting to database");
    let pool = init_pool(&config.database_url).await?;
    run_migrations(&pool).await?;
    info!("database migrations complete");

    let store = Arc::new(SqlxJobStore::new(pool));
    let processor = Arc::new(HttpProcessorClient::new(config.processor_base_url.clone(), Duration::from_secs(30)));
    let blob = Arc::new(MockBlobStore::new(format!("{}/blobs", config.processor_base_url)));

    let container = Arc::new(ServiceContainer::new(store, processor, blob, config.clone()));

    let router = build_router(container.app_state());
    let shutdown = CancellationToken::new();

    let server_shutdown = shutdown.clone();
    let bind_address = config.bind_address.clone();
    let port = config.port;
    let server_handle = tokio::spawn(async move { serve(&bind_address, port, router, server_shutdown).await });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received SIGINT, initiating shutdown");
        }
        _ = wait_for_sigterm() => {
            info!("received SIGTERM, initiating shutdown");
        }
    }

    shutdown.cancel();
    // `container.shutdown()` is what tells open push connections to close
    // (push::connection::writer_loop's Shutdown path); axum's graceful
    // shutdown waits for those same connections to finish, so it must run
    // concurrently with — not after — awaiting `server_handle`, or an open
    // `/ws` client would make the two wait on each other forever.
    let container_shutdown = container.clone();
    let shutdown_handle = tokio::spawn(async move { container_shutdown.shutdown().await });

    if let Err(e) = server_handle.await {
        error!(error = %e, "API server task panicked");
    }
    let _ = shutdown_handle.await;
    info!("shutdown complete");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
    sigterm.recv().await;
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    std::future::pending::<()>().await
}
