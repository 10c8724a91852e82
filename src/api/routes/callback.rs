//! Processor progress callback (spec.md §4.C transport 1): the processor
//! POSTs `{job_id, progress, step}` here; we forward it into whichever
//! worker currently owns that job via `CallbackRegistry::deliver`. A late or
//! unknown job id is logged and acknowledged anyway — callback delivery is
//! best-effort, the poll fallback covers the gap (spec.md §4.C).

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use tracing::debug;

use crate::api::server::AppState;
use crate::processor::ProcessorEvent;

pub fn router() -> Router<AppState> {
    Router::new().route("/callback", post(callback))
}

#[derive(Debug, Deserialize)]
struct CallbackBody {
    job_id: String,
    #[serde(flatten)]
    event: ProcessorEvent,
}

async fn callback(State(state): State<AppState>, Json(body): Json<CallbackBody>) -> StatusCode {
    if !state.callbacks.deliver(&body.job_id, body.event) {
        debug!(job_id = %body.job_id, "processor callback arrived for an unregistered job, ignoring");
    }
    StatusCode::OK
}
