//! `ProcessorClient`: the trait the orchestrator drives, plus the real
//! `reqwest`-backed implementation. Grounded on the teacher's pattern of a
//! thin typed client wrapping a `reqwest::Client` with a fixed base URL and
//! per-call timeouts (`notification::web_push`'s VAPID client shape).
//!
//! Wire shapes follow spec.md §6's "Processor protocol" section verbatim.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::domain::Stage;

use super::classify::RawFailure;

#[derive(Debug, Clone, Serialize)]
pub struct ConvertRequest<'a> {
    pub url: &'a str,
    pub format: &'a str,
    pub quality: &'a str,
    pub job_id: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConvertAccepted {
    pub processor_job_id: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ExtractMetadataResponse {
    #[allow(dead_code)]
    success: bool,
    metadata: RawExtractedMetadata,
}

#[derive(Debug, Clone, Deserialize)]
struct RawExtractedMetadata {
    #[allow(dead_code)]
    id: Option<String>,
    title: Option<String>,
    duration: Option<f64>,
    thumbnail: Option<String>,
    uploader: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ExtractedMetadata {
    pub title: Option<String>,
    pub duration_secs: Option<f64>,
    pub thumbnail_url: Option<String>,
    pub uploader: Option<String>,
}

impl From<RawExtractedMetadata> for ExtractedMetadata {
    fn from(raw: RawExtractedMetadata) -> Self {
        Self {
            title: raw.title,
            duration_secs: raw.duration,
            thumbnail_url: raw.thumbnail,
            uploader: raw.uploader,
        }
    }
}

/// A single `{progress, step}` event, or the terminal `{storage_key, size,
/// duration}` response — both come back from the same `/convert` stream (or
/// poll target), so this is untagged: whichever shape parses wins.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ProcessorEvent {
    Done {
        storage_key: String,
        #[allow(dead_code)]
        size: u64,
        #[allow(dead_code)]
        duration: f64,
    },
    Progress {
        step: String,
        progress: u8,
    },
}

impl ProcessorEvent {
    /// Map the processor's free-text `step` onto our closed `Stage` set.
    /// `None` for a step name the processor contract doesn't define, which
    /// the caller treats as "no stage change, progress only".
    pub fn stage(&self) -> Option<Stage> {
        match self {
            ProcessorEvent::Progress { step, .. } => match step.as_str() {
                "download" => Some(Stage::Download),
                "transcode" => Some(Stage::Transcode),
                "upload" => Some(Stage::Upload),
                _ => None,
            },
            ProcessorEvent::Done { .. } => Some(Stage::Upload),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessorErrorBody {
    pub code: String,
    pub message: String,
}

#[async_trait]
pub trait ProcessorClient: Send + Sync {
    async fn extract_metadata(&self, url: &str) -> Result<ExtractedMetadata, RawFailure>;
    async fn start_conversion(&self, request: ConvertRequest<'_>) -> Result<ConvertAccepted, RawFailure>;
    async fn poll_status(&self, processor_job_id: &str) -> Result<ProcessorEvent, RawFailure>;
    async fn health(&self) -> Result<(), RawFailure>;
}

pub struct HttpProcessorClient {
    client: Client,
    base_url: String,
}

impl HttpProcessorClient {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .expect("processor http client builds with static config");
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    async fn parse_or_classify<T: for<'de> Deserialize<'de>>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, RawFailure> {
        let status = response.status();
        if status.is_success() {
            response.json::<T>().await.map_err(RawFailure::Transport)
        } else {
            let retry_after = parse_retry_after(&response);
            let body = response.json::<ProcessorErrorBody>().await.ok();
            Err(RawFailure::Http {
                status: status.as_u16(),
                body,
                retry_after,
            })
        }
    }
}

/// Parse a `Retry-After` response header (spec.md §4.C). Only the
/// delay-seconds form is supported; the processor never sends an HTTP-date.
fn parse_retry_after(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[async_trait]
impl ProcessorClient for HttpProcessorClient {
    async fn extract_metadata(&self, url: &str) -> Result<ExtractedMetadata, RawFailure> {
        let response = self
            .client
            .post(format!("{}/extract-metadata", self.base_url))
            .json(&serde_json::json!({ "url": url }))
            .send()
            .await
            .map_err(RawFailure::Transport)?;
        let parsed: ExtractMetadataResponse = self.parse_or_classify(response).await?;
        Ok(parsed.metadata.into())
    }

    async fn start_conversion(&self, request: ConvertRequest<'_>) -> Result<ConvertAccepted, RawFailure> {
        let response = self
            .client
            .post(format!("{}/convert", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(RawFailure::Transport)?;
        self.parse_or_classify(response).await
    }

    async fn poll_status(&self, processor_job_id: &str) -> Result<ProcessorEvent, RawFailure> {
        let response = self
            .client
            .get(format!("{}/status/{}", self.base_url, processor_job_id))
            .send()
            .await
            .map_err(RawFailure::Transport)?;
        self.parse_or_classify(response).await
    }

    async fn health(&self) -> Result<(), RawFailure> {
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await
            .map_err(RawFailure::Transport)?;
        if response.status() == StatusCode::OK {
            Ok(())
        } else {
            Err(RawFailure::Http {
                status: response.status().as_u16(),
                body: None,
                retry_after: parse_retry_after(&response),
            })
        }
    }
}
