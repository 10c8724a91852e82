//! Axum application state and router assembly, grounded on
//! `rust-srec::api::server::{AppState, ApiServer}`: CORS, request tracing,
//! and graceful shutdown tied to the same cancellation token the background
//! services watch.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;
use crate::database::JobStore;
use crate::error::Result;
use crate::orchestrator::{BlobStore, CallbackRegistry};
use crate::processor::ProcessorClient;
use crate::push::{OriginAllowlist, PushManagerHandle};
use crate::queue::QueueManager;

use super::routes;

/// Everything a route handler needs. One instance is shared (via `Arc`-backed
/// fields, cheap to clone) across every request.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn JobStore>,
    pub queue: Arc<QueueManager>,
    pub processor: Arc<dyn ProcessorClient>,
    pub blob: Arc<dyn BlobStore>,
    pub push: PushManagerHandle,
    pub callbacks: CallbackRegistry,
    pub config: Arc<AppConfig>,
}

/// Build the full router: REST routes, the `/ws` push channel, and the
/// CORS + tracing layers every request passes through.
pub fn build_router(state: AppState) -> Router {
    let origin_allowlist = Arc::new(OriginAllowlist::new(
        &state.config.allowed_origins,
        &state.config.allowed_origin_patterns,
    ));
    let push_state = crate::push::route::PushRouteState {
        manager: state.push.clone(),
        store: state.store.clone(),
        queue: state.queue.clone(),
        config: state.config.clone(),
        origin_allowlist,
    };

    Router::new()
        .merge(routes::router(state))
        .merge(crate::push::route::router(push_state))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
}

/// Bind and serve until `cancel` fires, then return once the listener has
/// stopped accepting new connections.
pub async fn serve(bind_address: &str, port: u16, router: Router, cancel: CancellationToken) -> Result<()> {
    let addr: SocketAddr = format!("{bind_address}:{port}")
        .parse()
        .map_err(|e| crate::error::Error::Configuration(format!("invalid bind address: {e}")))?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "API server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            cancel.cancelled().await;
            tracing::info!("API server shutting down");
        })
        .await?;

    Ok(())
}

/// Grace period the caller should still allow background services to drain
/// after `serve` returns (push connections get their own `server_shutdown`
/// drain; this just documents the default used by `main`).
pub const SHUTDOWN_DRAIN: Duration = Duration::from_secs(5);
