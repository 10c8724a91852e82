//! Row model mapping between SQLite columns and `domain::Job`.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use std::str::FromStr;

use crate::domain::{Format, Job, JobError, JobMetadata, JobStatus, Platform};
use crate::error::{Error, Result};

#[derive(Debug, Clone, FromRow)]
pub struct JobRow {
    pub id: String,
    pub url: String,
    pub platform: String,
    pub format: String,
    pub quality: String,
    pub status: String,
    pub progress: i64,
    pub current_step: Option<String>,
    pub sequence: i64,
    pub attempt: i64,
    pub created_at: String,
    pub updated_at: String,
    pub expires_at: String,
    pub download_url: Option<String>,
    pub download_url_expires_at: Option<String>,
    pub storage_key: Option<String>,
    pub metadata: Option<String>,
    pub error: Option<String>,
    pub last_progress_at: String,
    pub processor_job_id: Option<String>,
}

fn parse_ts(s: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Other(format!("invalid timestamp in column `{field}`: {e}")))
}

impl JobRow {
    pub fn into_job(self) -> Result<Job> {
        Ok(Job {
            id: self.id,
            url: self.url,
            platform: Platform::from_str(&self.platform).map_err(Error::Validation)?,
            format: Format::from_str(&self.format).map_err(Error::Validation)?,
            quality: self.quality,
            status: JobStatus::from_str(&self.status).map_err(Error::Other)?,
            progress: self.progress.clamp(0, 100) as u8,
            current_step: self.current_step,
            sequence: self.sequence,
            attempt: self.attempt.max(0) as u32,
            created_at: parse_ts(&self.created_at, "created_at")?,
            updated_at: parse_ts(&self.updated_at, "updated_at")?,
            expires_at: parse_ts(&self.expires_at, "expires_at")?,
            download_url: self.download_url,
            download_url_expires_at: self
                .download_url_expires_at
                .map(|s| parse_ts(&s, "download_url_expires_at"))
                .transpose()?,
            storage_key: self.storage_key,
            metadata: self
                .metadata
                .map(|s| serde_json::from_str::<JobMetadata>(&s))
                .transpose()?,
            error: self
                .error
                .map(|s| serde_json::from_str::<JobError>(&s))
                .transpose()?,
            last_progress_at: parse_ts(&self.last_progress_at, "last_progress_at")?,
            processor_job_id: self.processor_job_id,
        })
    }
}

impl Job {
    pub fn metadata_json(&self) -> Result<Option<String>> {
        self.metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(Error::from)
    }

    pub fn error_json(&self) -> Result<Option<String>> {
        self.error
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(Error::from)
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct PlatformOption {
    pub platform: String,
    pub format: String,
    pub quality: String,
}
