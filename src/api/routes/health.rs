//! `GET /health` (SPEC_FULL.md §6): liveness/readiness, checking both the
//! job store and the processor are reachable. Not named in spec.md's REST
//! list but required by any deployable service; grounded on
//! `rust-srec::api::routes::health`.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::api::server::AppState;
use crate::domain::JobStatus;

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health))
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    store: &'static str,
    processor: &'static str,
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let store_ok = state.store.count_by(JobStatus::Queued).await.is_ok();
    let processor_ok = state.processor.health().await.is_ok();

    let status = if store_ok && processor_ok { "healthy" } else { "degraded" };
    let code = if store_ok && processor_ok { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };

    (
        code,
        Json(HealthResponse {
            status,
            store: if store_ok { "ok" } else { "unreachable" },
            processor: if processor_ok { "ok" } else { "unreachable" },
        }),
    )
}
