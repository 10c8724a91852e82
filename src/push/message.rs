//! Wire messages for the `/ws` push channel (spec.md §4.E, §6): `{type,
//! payload}` JSON frames, `payload.timestamp` a millisecond epoch on every
//! server-initiated message.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::domain::{Job, JobMetadata, JobStatus};

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientMessage {
    Ping { timestamp: i64 },
    SubscribeJob { id: String },
    StartConversion { url: String, format: String, quality: String },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshotPayload {
    pub job_id: String,
    pub status: JobStatus,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_position: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_time_remaining: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<JobMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<crate::domain::JobError>,
    pub timestamp: i64,
}

impl JobSnapshotPayload {
    pub fn from_job(job: &Job, queue_position: Option<usize>) -> Self {
        Self {
            job_id: job.id.clone(),
            status: job.status,
            progress: job.progress,
            download_url: job.download_url.clone(),
            filename: job.storage_key.as_ref().map(|_| format!("converted.{}", job.format.as_str())),
            queue_position,
            // No estimation model exists yet; reserved for a future heuristic.
            estimated_time_remaining: None,
            metadata: job.metadata.clone(),
            error: job.error.clone(),
            timestamp: now_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdatePayload {
    pub job_id: String,
    pub status: JobStatus,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryAttemptPayload {
    pub job_id: String,
    pub attempt: u32,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PongPayload {
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ShutdownPayload {
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload {
    pub message: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerMessage {
    Pong(PongPayload),
    ConversionStarted(JobSnapshotPayload),
    ProgressUpdate(ProgressUpdatePayload),
    JobStatus(JobSnapshotPayload),
    ConversionCompleted(JobSnapshotPayload),
    ConversionError(JobSnapshotPayload),
    RecoveryAttempt(RecoveryAttemptPayload),
    ServerShutdown(ShutdownPayload),
    Error(ErrorPayload),
}

impl ServerMessage {
    pub fn pong(client_timestamp: i64) -> Self {
        ServerMessage::Pong(PongPayload { timestamp: client_timestamp })
    }

    pub fn conversion_started(job: &Job) -> Self {
        ServerMessage::ConversionStarted(JobSnapshotPayload::from_job(job, None))
    }

    pub fn job_status(job: &Job, queue_position: Option<usize>) -> Self {
        ServerMessage::JobStatus(JobSnapshotPayload::from_job(job, queue_position))
    }

    pub fn progress_update(job: &Job) -> Self {
        ServerMessage::ProgressUpdate(ProgressUpdatePayload {
            job_id: job.id.clone(),
            status: job.status,
            progress: job.progress,
            current_step: job.current_step.clone(),
            timestamp: now_ms(),
        })
    }

    pub fn terminal(job: &Job) -> Self {
        match job.status {
            JobStatus::Completed => ServerMessage::ConversionCompleted(JobSnapshotPayload::from_job(job, None)),
            JobStatus::Failed => ServerMessage::ConversionError(JobSnapshotPayload::from_job(job, None)),
            _ => ServerMessage::progress_update(job),
        }
    }

    pub fn recovery_attempt(job: &Job) -> Self {
        ServerMessage::RecoveryAttempt(RecoveryAttemptPayload {
            job_id: job.id.clone(),
            attempt: job.attempt,
            timestamp: now_ms(),
        })
    }

    pub fn shutdown() -> Self {
        ServerMessage::ServerShutdown(ShutdownPayload { timestamp: now_ms() })
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error(ErrorPayload { message: message.into(), timestamp: now_ms() })
    }

    /// After one of these reaches a subscriber, the connection is only kept
    /// alive for the terminal grace window (spec.md §4.E).
    pub fn is_terminal(&self) -> bool {
        matches!(self, ServerMessage::ConversionCompleted(_) | ServerMessage::ConversionError(_))
    }

    pub fn is_shutdown(&self) -> bool {
        matches!(self, ServerMessage::ServerShutdown(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::store::new_queued_job;
    use crate::domain::{Format, Platform};

    fn sample_job() -> Job {
        new_queued_job(
            "job-1".to_string(),
            "https://www.youtube.com/watch?v=abc".to_string(),
            Platform::Youtube,
            Format::Mp3,
            "128".to_string(),
            1,
            chrono::Duration::hours(24),
        )
    }

    #[test]
    fn client_ping_parses_from_tagged_envelope() {
        let json = r#"{"type":"ping","payload":{"timestamp":123}}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        assert!(matches!(msg, ClientMessage::Ping { timestamp: 123 }));
    }

    #[test]
    fn client_subscribe_job_parses() {
        let json = r#"{"type":"subscribe_job","payload":{"id":"job-1"}}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        match msg {
            ClientMessage::SubscribeJob { id } => assert_eq!(id, "job-1"),
            _ => panic!("expected SubscribeJob"),
        }
    }

    #[test]
    fn job_status_serializes_with_type_and_payload_envelope() {
        let job = sample_job();
        let msg = ServerMessage::job_status(&job, Some(3));
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "job_status");
        assert_eq!(value["payload"]["jobId"], "job-1");
        assert_eq!(value["payload"]["queuePosition"], 3);
        assert!(value["payload"]["timestamp"].as_i64().is_some());
    }

    #[test]
    fn terminal_classification_matches_completed_and_failed_only() {
        let job = sample_job();
        assert!(!ServerMessage::progress_update(&job).is_terminal());
        assert!(!ServerMessage::terminal(&job).is_terminal());

        let mut completed = job.clone();
        completed.status = JobStatus::Completed;
        assert!(ServerMessage::terminal(&completed).is_terminal());

        let mut failed = job;
        failed.status = JobStatus::Failed;
        assert!(ServerMessage::terminal(&failed).is_terminal());
    }
}
