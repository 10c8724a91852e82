//! `GET /status/{jobId}` (spec.md §6, §4.C): flat status view, lazily
//! refreshing a completed job's presigned download URL when it is close
//! enough to expiry (spec.md §4.C, invariant 7 in spec.md §8).

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::api::error::{ApiResult, ErrorBody};
use crate::api::server::AppState;
use crate::database::store::JobPatch;
use crate::domain::{Job, JobMetadata, JobStatus};

pub fn router() -> Router<AppState> {
    Router::new().route("/status/{job_id}", get(status))
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub success: bool,
    #[serde(rename = "jobId")]
    pub job_id: String,
    pub status: String,
    pub progress: u8,
    #[serde(rename = "downloadUrl", skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(rename = "queuePosition", skip_serializing_if = "Option::is_none")]
    pub queue_position: Option<usize>,
    #[serde(rename = "estimatedTimeRemaining", skip_serializing_if = "Option::is_none")]
    pub estimated_time_remaining: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<JobMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl StatusResponse {
    fn from_job(job: &Job, queue_position: Option<usize>) -> Self {
        let filename = job.storage_key.as_ref().map(|_| format!("converted.{}", job.format.as_str()));
        Self {
            success: true,
            job_id: job.id.clone(),
            status: job.status.as_str().to_string(),
            progress: job.progress,
            download_url: job.download_url.clone(),
            filename,
            queue_position,
            // No estimation model exists yet; reserved for a future heuristic.
            estimated_time_remaining: None,
            metadata: job.metadata.clone(),
            error: job.error.as_ref().map(ErrorBody::from),
        }
    }
}

async fn status(State(state): State<AppState>, Path(job_id): Path<String>) -> ApiResult<Json<StatusResponse>> {
    let mut job = state.store.get(&job_id).await?;

    if job.needs_download_url_refresh(chrono::Duration::from_std(state.config.refresh_window).unwrap_or_default(), Utc::now()) {
        if let Some(storage_key) = job.storage_key.clone() {
            if let Ok((download_url, expires_at)) = state.blob.presign(&storage_key, state.config.presigned_url_ttl).await {
                let patch = JobPatch::default()
                    .download_url(Some(download_url))
                    .download_url_expires_at(Some(expires_at));
                match state.store.update(&job.id, patch, Some(JobStatus::Completed)).await {
                    Ok(updated) => job = updated,
                    Err(_) => { /* lost the race to a concurrent refresh; serve what we have */ }
                }
            }
        }
    }

    let queue_position = state.queue.position(&job.id).await.ok().flatten();
    Ok(Json(StatusResponse::from_job(&job, queue_position)))
}
