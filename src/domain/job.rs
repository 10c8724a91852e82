//! The `Job` record (spec.md §3) — owned exclusively by the Job Store and
//! mutated only through its operations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error_kind::JobError;
use super::platform::{Format, Platform};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unrecognized job status: {other}")),
        }
    }
}

/// Pipeline stages (spec.md §4.C) and their target progress ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    ExtractMetadata,
    Download,
    Transcode,
    Upload,
    Finalize,
}

impl Stage {
    pub fn label(&self) -> &'static str {
        match self {
            Stage::ExtractMetadata => "extracting metadata",
            Stage::Download => "downloading",
            Stage::Transcode => "transcoding",
            Stage::Upload => "uploading",
            Stage::Finalize => "finalizing",
        }
    }

    /// `(start, end)` target progress range, inclusive of start, per spec.md §4.C.
    pub fn progress_range(&self) -> (u8, u8) {
        match self {
            Stage::ExtractMetadata => (5, 15),
            Stage::Download => (15, 55),
            Stage::Transcode => (55, 85),
            Stage::Upload => (85, 98),
            Stage::Finalize => (98, 100),
        }
    }
}

/// Metadata captured at the extract-metadata stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobMetadata {
    pub title: Option<String>,
    pub duration_secs: Option<f64>,
    pub thumbnail_url: Option<String>,
    pub uploader: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub url: String,
    pub platform: Platform,
    pub format: Format,
    pub quality: String,
    pub status: JobStatus,
    pub progress: u8,
    pub current_step: Option<String>,
    /// Monotonic admission sequence number; authoritative ordering for FIFO dispatch.
    pub sequence: i64,
    pub attempt: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub download_url: Option<String>,
    pub download_url_expires_at: Option<DateTime<Utc>>,
    pub storage_key: Option<String>,
    pub metadata: Option<JobMetadata>,
    pub error: Option<JobError>,
    pub last_progress_at: DateTime<Utc>,
    /// Opaque id assigned by the processor for the poll-fallback transport (§4.C).
    pub processor_job_id: Option<String>,
}

impl Job {
    /// Invariant 1 (spec.md §3): completed ⇒ download_url set, progress 100, no error.
    pub fn completed_invariant_holds(&self) -> bool {
        if self.status != JobStatus::Completed {
            return true;
        }
        self.download_url.is_some() && self.progress == 100 && self.error.is_none()
    }

    /// Invariant 2 (spec.md §3): failed ⇒ error set.
    pub fn failed_invariant_holds(&self) -> bool {
        if self.status != JobStatus::Failed {
            return true;
        }
        self.error.is_some()
    }

    /// True if a completed job's presigned URL is close enough to expiry to
    /// warrant a lazy refresh on read (spec.md §4.C).
    pub fn needs_download_url_refresh(&self, refresh_window: chrono::Duration, now: DateTime<Utc>) -> bool {
        if self.status != JobStatus::Completed {
            return false;
        }
        match self.download_url_expires_at {
            Some(expires_at) => expires_at - now <= refresh_window,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_ranges_are_contiguous_and_cover_0_to_100() {
        let stages = [
            Stage::ExtractMetadata,
            Stage::Download,
            Stage::Transcode,
            Stage::Upload,
            Stage::Finalize,
        ];
        let mut prev_end = 5; // first stage starts at 5 per spec.md §4.C
        for stage in stages {
            let (start, end) = stage.progress_range();
            assert_eq!(start, prev_end);
            assert!(end >= start);
            prev_end = end;
        }
        assert_eq!(prev_end, 100);
    }

    #[test]
    fn job_status_round_trips() {
        for s in [
            JobStatus::Queued,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            let parsed: JobStatus = s.as_str().parse().unwrap();
            assert_eq!(parsed.as_str(), s.as_str());
        }
    }
}
