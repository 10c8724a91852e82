//! The `/ws` upgrade route: origin check, then hand the socket to
//! `connection::handle_socket`. Kept inside `push` (rather than `api`) so
//! the push module owns its entire surface; `api` just mounts the router.

use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tracing::warn;

use super::connection::{handle_socket, ConnectionDeps};
use super::manager::PushManagerHandle;
use super::origin::OriginAllowlist;
use crate::config::AppConfig;
use crate::database::JobStore;
use crate::queue::QueueManager;

#[derive(Clone)]
pub struct PushRouteState {
    pub manager: PushManagerHandle,
    pub store: Arc<dyn JobStore>,
    pub queue: Arc<QueueManager>,
    pub config: Arc<AppConfig>,
    pub origin_allowlist: Arc<OriginAllowlist>,
}

pub fn router(state: PushRouteState) -> Router {
    Router::new().route("/ws", get(upgrade)).with_state(state)
}

async fn upgrade(
    State(state): State<PushRouteState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let origin = headers.get("origin").and_then(|v| v.to_str().ok()).unwrap_or_default();
    if !state.origin_allowlist.is_allowed(origin) {
        warn!(origin, "rejected websocket upgrade: origin not allowlisted");
        return (StatusCode::FORBIDDEN, "origin not allowed").into_response();
    }

    let deps = ConnectionDeps {
        manager: state.manager,
        store: state.store,
        queue: state.queue,
        config: state.config,
    };
    ws.on_upgrade(move |socket| handle_socket(socket, deps))
}
