//! `POST /validate` (spec.md §6): URL classification without submitting a job.

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::api::server::AppState;
use crate::utils::url::validate_url;

pub fn router() -> Router<AppState> {
    Router::new().route("/validate", post(validate))
}

#[derive(Debug, Deserialize)]
pub struct ValidateRequest {
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct ValidateResponse {
    #[serde(rename = "isValid")]
    pub is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<&'static str>,
    #[serde(rename = "videoId", skip_serializing_if = "Option::is_none")]
    pub video_id: Option<String>,
    #[serde(rename = "normalizedUrl", skip_serializing_if = "Option::is_none")]
    pub normalized_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

async fn validate(State(_state): State<AppState>, Json(req): Json<ValidateRequest>) -> Json<ValidateResponse> {
    match validate_url(&req.url) {
        Some(v) => Json(ValidateResponse {
            is_valid: true,
            platform: Some(v.platform.as_str()),
            video_id: v.video_id,
            normalized_url: Some(v.normalized),
            error: None,
        }),
        None => Json(ValidateResponse {
            is_valid: false,
            platform: None,
            video_id: None,
            normalized_url: None,
            error: Some("the provided URL is not valid".to_string()),
        }),
    }
}
