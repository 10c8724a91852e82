//! `POST /convert` (spec.md §6): the single submission endpoint, sharing
//! the same `submit_job` admission path the push channel's
//! `start_conversion` message uses.

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::api::error::ApiResult;
use crate::api::server::AppState;
use crate::services::submit_job;

pub fn router() -> Router<AppState> {
    Router::new().route("/convert", post(convert))
}

#[derive(Debug, Deserialize)]
pub struct ConvertRequest {
    pub url: String,
    pub format: String,
    pub quality: String,
}

#[derive(Debug, Serialize)]
pub struct ConvertResponse {
    pub success: bool,
    #[serde(rename = "jobId")]
    pub job_id: String,
    pub status: String,
}

async fn convert(State(state): State<AppState>, Json(req): Json<ConvertRequest>) -> ApiResult<Json<ConvertResponse>> {
    let job = submit_job(&state.store, &state.queue, &state.config, &req.url, &req.format, &req.quality).await?;
    Ok(Json(ConvertResponse {
        success: true,
        job_id: job.id,
        status: job.status.as_str().to_string(),
    }))
}
