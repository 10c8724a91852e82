//! The Job Store (spec.md §4.A): the only component that writes to durable
//! storage. All operations are atomic at the row level; `update`'s optional
//! `expected_status` makes the `queued -> processing` claim (and any other
//! conditional transition) race-free via a single `UPDATE ... RETURNING`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::models::{JobRow, PlatformOption};
use super::retry::retry_db;
use super::DbPool;
use crate::domain::{Format, Job, JobError, JobMetadata, JobStatus, Platform};
use crate::error::{Error, Result};

/// A partial update to a job row. Only `Some` fields are written; applying
/// the same patch twice yields the same final state (spec.md §4.A).
#[derive(Debug, Clone, Default)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub progress: Option<u8>,
    pub current_step: Option<Option<String>>,
    pub attempt: Option<u32>,
    pub download_url: Option<Option<String>>,
    pub download_url_expires_at: Option<Option<DateTime<Utc>>>,
    pub storage_key: Option<Option<String>>,
    pub metadata: Option<Option<JobMetadata>>,
    pub error: Option<Option<JobError>>,
    pub last_progress_at: Option<DateTime<Utc>>,
    pub processor_job_id: Option<Option<String>>,
}

impl JobPatch {
    pub fn status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }
    pub fn progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress);
        self
    }
    pub fn current_step(mut self, step: Option<String>) -> Self {
        self.current_step = Some(step);
        self
    }
    pub fn attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }
    pub fn download_url(mut self, url: Option<String>) -> Self {
        self.download_url = Some(url);
        self
    }
    pub fn download_url_expires_at(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.download_url_expires_at = Some(at);
        self
    }
    pub fn storage_key(mut self, key: Option<String>) -> Self {
        self.storage_key = Some(key);
        self
    }
    pub fn metadata(mut self, metadata: Option<JobMetadata>) -> Self {
        self.metadata = Some(metadata);
        self
    }
    pub fn error(mut self, error: Option<JobError>) -> Self {
        self.error = Some(error);
        self
    }
    pub fn last_progress_at(mut self, at: DateTime<Utc>) -> Self {
        self.last_progress_at = Some(at);
        self
    }
    pub fn processor_job_id(mut self, id: Option<String>) -> Self {
        self.processor_job_id = Some(id);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct JobFilters {
    pub status: Option<JobStatus>,
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, job: &Job) -> Result<()>;
    async fn get(&self, id: &str) -> Result<Job>;
    async fn update(&self, id: &str, patch: JobPatch, expected_status: Option<JobStatus>) -> Result<Job>;
    async fn list_by(&self, status: JobStatus, limit: i64, offset: i64) -> Result<Vec<Job>>;
    async fn count_by(&self, status: JobStatus) -> Result<i64>;
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64>;
    async fn next_sequence(&self) -> Result<i64>;
    async fn list_platform_options(&self) -> Result<Vec<PlatformOption>>;
    /// Claim the oldest queued job, atomically transitioning it to processing.
    /// Returns `None` if no queued job is available. Backs `Queue::dispatch`.
    async fn claim_next_queued(&self, now: DateTime<Utc>) -> Result<Option<Job>>;
    /// Jobs in `processing` whose `updated_at` is older than the cutoff (used by
    /// both the Queue Manager's `reapTimeouts` and the Monitor's stuck sweep).
    async fn list_stale_processing(&self, cutoff: DateTime<Utc>) -> Result<Vec<Job>>;
}

pub struct SqlxJobStore {
    pool: DbPool,
}

impl SqlxJobStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn now_str() -> String {
    Utc::now().to_rfc3339()
}

#[async_trait]
impl JobStore for SqlxJobStore {
    async fn create(&self, job: &Job) -> Result<()> {
        let metadata_json = job.metadata_json()?;
        let error_json = job.error_json()?;

        retry_db("job_store.create", || async {
            let existing: Option<(String,)> = sqlx::query_as("SELECT id FROM jobs WHERE id = ?")
                .bind(&job.id)
                .fetch_optional(&self.pool)
                .await?;
            if existing.is_some() {
                return Err(Error::DuplicateId(job.id.clone()));
            }

            sqlx::query(
                r#"
                INSERT INTO jobs (
                    id, url, platform, format, quality, status, progress, current_step,
                    sequence, attempt, created_at, updated_at, expires_at,
                    download_url, download_url_expires_at, storage_key, metadata, error,
                    last_progress_at, processor_job_id
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&job.id)
            .bind(&job.url)
            .bind(job.platform.as_str())
            .bind(job.format.as_str())
            .bind(&job.quality)
            .bind(job.status.as_str())
            .bind(job.progress as i64)
            .bind(&job.current_step)
            .bind(job.sequence)
            .bind(job.attempt as i64)
            .bind(job.created_at.to_rfc3339())
            .bind(job.updated_at.to_rfc3339())
            .bind(job.expires_at.to_rfc3339())
            .bind(&job.download_url)
            .bind(job.download_url_expires_at.map(|t| t.to_rfc3339()))
            .bind(&job.storage_key)
            .bind(&metadata_json)
            .bind(&error_json)
            .bind(job.last_progress_at.to_rfc3339())
            .bind(&job.processor_job_id)
            .execute(&self.pool)
            .await?;

            Ok(())
        })
        .await
    }

    async fn get(&self, id: &str) -> Result<Job> {
        let row: Option<JobRow> = sqlx::query_as("SELECT * FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.ok_or_else(|| Error::not_found("job", id))?.into_job()
    }

    async fn update(&self, id: &str, patch: JobPatch, expected_status: Option<JobStatus>) -> Result<Job> {
        let metadata_json = match &patch.metadata {
            Some(m) => m
                .as_ref()
                .map(serde_json::to_string)
                .transpose()
                .map_err(Error::from)?,
            None => None,
        };
        let error_json = match &patch.error {
            Some(e) => e
                .as_ref()
                .map(serde_json::to_string)
                .transpose()
                .map_err(Error::from)?,
            None => None,
        };

        retry_db("job_store.update", || async {
            let mut sets: Vec<String> = vec!["updated_at = ?".to_string()];
            macro_rules! push {
                ($col:literal) => {
                    sets.push(format!("{} = ?", $col))
                };
            }
            if patch.status.is_some() {
                push!("status");
            }
            if patch.progress.is_some() {
                push!("progress");
            }
            if patch.current_step.is_some() {
                push!("current_step");
            }
            if patch.attempt.is_some() {
                push!("attempt");
            }
            if patch.download_url.is_some() {
                push!("download_url");
            }
            if patch.download_url_expires_at.is_some() {
                push!("download_url_expires_at");
            }
            if patch.storage_key.is_some() {
                push!("storage_key");
            }
            if patch.metadata.is_some() {
                push!("metadata");
            }
            if patch.error.is_some() {
                push!("error");
            }
            if patch.last_progress_at.is_some() {
                push!("last_progress_at");
            }
            if patch.processor_job_id.is_some() {
                push!("processor_job_id");
            }

            let mut sql = format!("UPDATE jobs SET {} WHERE id = ?", sets.join(", "));
            if expected_status.is_some() {
                sql.push_str(" AND status = ?");
            }
            sql.push_str(" RETURNING *");

            let mut query = sqlx::query_as::<_, JobRow>(&sql).bind(now_str());
            if let Some(status) = patch.status {
                query = query.bind(status.as_str());
            }
            if let Some(progress) = patch.progress {
                query = query.bind(progress as i64);
            }
            if let Some(step) = &patch.current_step {
                query = query.bind(step.clone());
            }
            if let Some(attempt) = patch.attempt {
                query = query.bind(attempt as i64);
            }
            if let Some(url) = &patch.download_url {
                query = query.bind(url.clone());
            }
            if let Some(at) = &patch.download_url_expires_at {
                query = query.bind(at.map(|t| t.to_rfc3339()));
            }
            if let Some(key) = &patch.storage_key {
                query = query.bind(key.clone());
            }
            if patch.metadata.is_some() {
                query = query.bind(metadata_json.clone());
            }
            if patch.error.is_some() {
                query = query.bind(error_json.clone());
            }
            if let Some(at) = patch.last_progress_at {
                query = query.bind(at.to_rfc3339());
            }
            if let Some(pid) = &patch.processor_job_id {
                query = query.bind(pid.clone());
            }

            query = query.bind(id);
            if let Some(status) = expected_status {
                query = query.bind(status.as_str());
            }

            let row = query.fetch_optional(&self.pool).await?;
            match row {
                Some(row) => row.into_job(),
                None => {
                    // Distinguish "missing row" from "conditional mismatch" so callers
                    // can retry a conflict but not a not-found.
                    let exists: Option<(String,)> =
                        sqlx::query_as("SELECT id FROM jobs WHERE id = ?")
                            .bind(id)
                            .fetch_optional(&self.pool)
                            .await?;
                    match exists {
                        Some(_) => Err(Error::conflict(
                            id,
                            expected_status.map(|s| s.as_str()).unwrap_or("<any>"),
                        )),
                        None => Err(Error::not_found("job", id)),
                    }
                }
            }
        })
        .await
    }

    async fn list_by(&self, status: JobStatus, limit: i64, offset: i64) -> Result<Vec<Job>> {
        let rows: Vec<JobRow> = sqlx::query_as(
            "SELECT * FROM jobs WHERE status = ? ORDER BY sequence ASC LIMIT ? OFFSET ?",
        )
        .bind(status.as_str())
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(JobRow::into_job).collect()
    }

    async fn count_by(&self, status: JobStatus) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM jobs WHERE status = ?")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM jobs WHERE expires_at < ?")
            .bind(now.to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn next_sequence(&self) -> Result<i64> {
        let (max,): (Option<i64>,) = sqlx::query_as("SELECT MAX(sequence) FROM jobs")
            .fetch_one(&self.pool)
            .await?;
        Ok(max.unwrap_or(0) + 1)
    }

    async fn list_platform_options(&self) -> Result<Vec<PlatformOption>> {
        let rows: Vec<PlatformOption> =
            sqlx::query_as("SELECT platform, format, quality FROM platforms ORDER BY platform, format, quality")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows)
    }

    async fn claim_next_queued(&self, now: DateTime<Utc>) -> Result<Option<Job>> {
        retry_db("job_store.claim_next_queued", || async {
            let row: Option<JobRow> = sqlx::query_as(
                r#"
                UPDATE jobs
                SET status = 'processing', updated_at = ?, last_progress_at = ?
                WHERE id = (
                    SELECT id FROM jobs WHERE status = 'queued' ORDER BY sequence ASC LIMIT 1
                )
                AND status = 'queued'
                RETURNING *
                "#,
            )
            .bind(now.to_rfc3339())
            .bind(now.to_rfc3339())
            .fetch_optional(&self.pool)
            .await?;

            row.map(JobRow::into_job).transpose()
        })
        .await
    }

    async fn list_stale_processing(&self, cutoff: DateTime<Utc>) -> Result<Vec<Job>> {
        let rows: Vec<JobRow> = sqlx::query_as(
            "SELECT * FROM jobs WHERE status = 'processing' AND last_progress_at < ? ORDER BY sequence ASC",
        )
        .bind(cutoff.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(JobRow::into_job).collect()
    }
}

/// Construct a fresh `queued` job ready for `JobStore::create`.
pub fn new_queued_job(
    id: String,
    url: String,
    platform: Platform,
    format: Format,
    quality: String,
    sequence: i64,
    result_ttl: chrono::Duration,
) -> Job {
    let now = Utc::now();
    Job {
        id,
        url,
        platform,
        format,
        quality,
        status: JobStatus::Queued,
        progress: 0,
        current_step: None,
        sequence,
        attempt: 0,
        created_at: now,
        updated_at: now,
        expires_at: now + result_ttl,
        download_url: None,
        download_url_expires_at: None,
        storage_key: None,
        metadata: None,
        error: None,
        last_progress_at: now,
        processor_job_id: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{init_pool, run_migrations};

    async fn test_store() -> SqlxJobStore {
        let pool = init_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        SqlxJobStore::new(pool)
    }

    fn sample_job(id: &str, sequence: i64) -> Job {
        new_queued_job(
            id.to_string(),
            "https://www.youtube.com/watch?v=abc".to_string(),
            Platform::Youtube,
            Format::Mp3,
            "128".to_string(),
            sequence,
            chrono::Duration::hours(24),
        )
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let store = test_store().await;
        let job = sample_job("job-1", 1);
        store.create(&job).await.unwrap();

        let fetched = store.get("job-1").await.unwrap();
        assert_eq!(fetched.id, "job-1");
        assert_eq!(fetched.status, JobStatus::Queued);
        assert_eq!(fetched.progress, 0);
    }

    #[tokio::test]
    async fn create_rejects_duplicate_id() {
        let store = test_store().await;
        let job = sample_job("dup", 1);
        store.create(&job).await.unwrap();
        let err = store.create(&job).await.unwrap_err();
        assert!(matches!(err, Error::DuplicateId(_)));
    }

    #[tokio::test]
    async fn get_missing_returns_not_found() {
        let store = test_store().await;
        let err = store.get("missing").await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn conditional_update_succeeds_when_status_matches() {
        let store = test_store().await;
        let job = sample_job("job-2", 1);
        store.create(&job).await.unwrap();

        let updated = store
            .update(
                "job-2",
                JobPatch::default().status(JobStatus::Processing).progress(5),
                Some(JobStatus::Queued),
            )
            .await
            .unwrap();
        assert_eq!(updated.status, JobStatus::Processing);
        assert_eq!(updated.progress, 5);
    }

    #[tokio::test]
    async fn conditional_update_conflicts_when_status_mismatches() {
        let store = test_store().await;
        let job = sample_job("job-3", 1);
        store.create(&job).await.unwrap();

        store
            .update("job-3", JobPatch::default().status(JobStatus::Processing), Some(JobStatus::Queued))
            .await
            .unwrap();

        let err = store
            .update("job-3", JobPatch::default().status(JobStatus::Processing), Some(JobStatus::Queued))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));
    }

    #[tokio::test]
    async fn only_one_of_two_concurrent_claims_succeeds() {
        let store = test_store().await;
        let job = sample_job("race", 1);
        store.create(&job).await.unwrap();

        let now = Utc::now();
        let (a, b) = tokio::join!(store.claim_next_queued(now), store.claim_next_queued(now));
        let claimed = [a.unwrap(), b.unwrap()];
        let successes = claimed.iter().filter(|c| c.is_some()).count();
        assert_eq!(successes, 1);
    }

    #[tokio::test]
    async fn delete_expired_removes_only_expired_rows() {
        let store = test_store().await;
        let mut expired = sample_job("old", 1);
        expired.expires_at = Utc::now() - chrono::Duration::hours(1);
        store.create(&expired).await.unwrap();

        let fresh = sample_job("fresh", 2);
        store.create(&fresh).await.unwrap();

        let deleted = store.delete_expired(Utc::now()).await.unwrap();
        assert_eq!(deleted, 1);
        assert!(store.get("fresh").await.is_ok());
        assert!(store.get("old").await.is_err());
    }

    #[tokio::test]
    async fn next_sequence_increments() {
        let store = test_store().await;
        let first = store.next_sequence().await.unwrap();
        store.create(&sample_job("s1", first)).await.unwrap();
        let second = store.next_sequence().await.unwrap();
        assert!(second > first);
    }
}
