//! The per-job pipeline runner (spec.md §4.C) — the single largest
//! component. One `run_job` call owns one claimed job end to end: extract
//! metadata, hand off to the processor's convert call, drain its progress
//! stream (callback-fed, polling as a staleness fallback), then finalize.
//!
//! Grounded on spec.md §9's re-architecture note: "a single stage-driven
//! procedure in the worker, with the processor-callback endpoint and poll
//! timer feeding a single progress event channel the worker selects on
//! alongside the cancellation signal" — replacing the deeply-nested
//! callback-polling pattern the note calls out.

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::database::store::JobPatch;
use crate::database::JobStore;
use crate::domain::{ErrorKind, Job, JobError, JobMetadata, JobStatus, Stage};
use crate::error::{Error, Result};
use crate::processor::{classify, ConvertRequest, ProcessorClient, ProcessorEvent, RawFailure};

use super::blob::BlobStore;
use super::progress::{map_stage_progress, CallbackRegistry, PushNotifier};

pub struct WorkerDeps {
    pub store: Arc<dyn JobStore>,
    pub processor: Arc<dyn ProcessorClient>,
    pub blob: Arc<dyn BlobStore>,
    pub push: Arc<dyn PushNotifier>,
    pub callbacks: CallbackRegistry,
    pub config: Arc<AppConfig>,
}

fn store_err_to_job_err(e: Error) -> JobError {
    JobError::with_message(ErrorKind::Internal, e.to_string())
}

/// Drive `job` (already claimed, status `processing`) through every stage.
/// On any unrecoverable failure, persists `failed` with the classified
/// error and notifies subscribers; never leaves the job silently stuck.
pub async fn run_job(job: Job, deps: Arc<WorkerDeps>, cancel: CancellationToken) {
    let job_id = job.id.clone();
    let mut job = job;

    match run_job_inner(&mut job, &deps, &cancel).await {
        Ok(()) => info!(job_id = %job_id, "job completed"),
        Err(job_err) => {
            warn!(job_id = %job_id, kind = ?job_err.kind, message = %job_err.message, "job failed");
            let patch = JobPatch::default()
                .status(JobStatus::Failed)
                .error(Some(job_err))
                .last_progress_at(Utc::now());
            match deps.store.update(&job_id, patch, Some(JobStatus::Processing)).await {
                Ok(updated) => deps.push.notify_job(&updated).await,
                Err(e) => error!(job_id = %job_id, error = %e, "failed to persist job failure"),
            }
        }
    }

    deps.callbacks.unregister(&job_id);
}

async fn run_job_inner(job: &mut Job, deps: &WorkerDeps, cancel: &CancellationToken) -> std::result::Result<(), JobError> {
    let mut current_progress = job.progress;

    if cancel.is_cancelled() {
        return Err(JobError::from_kind(ErrorKind::Cancelled));
    }

    write_progress(
        deps,
        &job.id,
        &mut current_progress,
        map_stage_progress(Stage::ExtractMetadata, 0),
        Some(Stage::ExtractMetadata.label()),
    )
    .await
    .map_err(store_err_to_job_err)?;

    let metadata = retry_call(deps, &job.id, Stage::ExtractMetadata, || {
        deps.processor.extract_metadata(&job.url)
    })
    .await?;

    let domain_metadata = JobMetadata {
        title: metadata.title,
        duration_secs: metadata.duration_secs,
        thumbnail_url: metadata.thumbnail_url,
        uploader: metadata.uploader,
    };
    let updated = deps
        .store
        .update(
            &job.id,
            JobPatch::default()
                .metadata(Some(domain_metadata))
                .progress(map_stage_progress(Stage::ExtractMetadata, 100))
                .current_step(Some(Stage::ExtractMetadata.label().to_string()))
                .last_progress_at(Utc::now()),
            Some(JobStatus::Processing),
        )
        .await
        .map_err(store_err_to_job_err)?;
    current_progress = updated.progress;
    deps.push.notify_job(&updated).await;

    if cancel.is_cancelled() {
        return Err(JobError::from_kind(ErrorKind::Cancelled));
    }

    write_progress(
        deps,
        &job.id,
        &mut current_progress,
        map_stage_progress(Stage::Download, 0),
        Some(Stage::Download.label()),
    )
    .await
    .map_err(store_err_to_job_err)?;

    let format_str = job.format.as_str();
    let accepted = retry_call(deps, &job.id, Stage::Download, || {
        deps.processor.start_conversion(ConvertRequest {
            url: &job.url,
            format: format_str,
            quality: &job.quality,
            job_id: &job.id,
        })
    })
    .await?;

    let updated = deps
        .store
        .update(
            &job.id,
            JobPatch::default().processor_job_id(Some(accepted.processor_job_id.clone())),
            Some(JobStatus::Processing),
        )
        .await
        .map_err(store_err_to_job_err)?;
    deps.push.notify_job(&updated).await;

    let storage_key = stream_conversion_progress(
        deps,
        &job.id,
        &accepted.processor_job_id,
        &mut current_progress,
        cancel,
    )
    .await?;

    write_progress(
        deps,
        &job.id,
        &mut current_progress,
        map_stage_progress(Stage::Finalize, 0),
        Some(Stage::Finalize.label()),
    )
    .await
    .map_err(store_err_to_job_err)?;

    let (download_url, expires_at) = deps
        .blob
        .presign(&storage_key, deps.config.presigned_url_ttl)
        .await
        .map_err(store_err_to_job_err)?;

    let final_patch = JobPatch::default()
        .status(JobStatus::Completed)
        .progress(100)
        .current_step(None)
        .storage_key(Some(storage_key))
        .download_url(Some(download_url))
        .download_url_expires_at(Some(expires_at))
        .last_progress_at(Utc::now());
    let updated = deps
        .store
        .update(&job.id, final_patch, Some(JobStatus::Processing))
        .await
        .map_err(store_err_to_job_err)?;
    deps.push.notify_job(&updated).await;

    Ok(())
}

/// Run `op` until it succeeds or its classified error's retry policy is
/// exhausted. `job.attempt` is overwritten with the number of calls made in
/// *this* retry loop (not accumulated across stages) — matching spec.md §8
/// scenario 2, where two `/convert` failures followed by a success leaves
/// `attempt == 3` at finalize regardless of how many calls the earlier
/// extract-metadata stage needed.
async fn retry_call<T, F, Fut>(
    deps: &WorkerDeps,
    job_id: &str,
    stage: Stage,
    mut op: F,
) -> std::result::Result<T, JobError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, RawFailure>>,
{
    let mut local_attempt = 0u32;
    loop {
        local_attempt += 1;
        let _ = deps
            .store
            .update(job_id, JobPatch::default().attempt(local_attempt), None)
            .await;

        match op().await {
            Ok(value) => return Ok(value),
            Err(failure) => {
                let retry_after = failure.retry_after();
                let job_err = classify(stage, &failure);
                let policy = job_err.kind.retry_policy();
                if !policy.retryable || local_attempt >= policy.max_attempts {
                    return Err(job_err);
                }
                // A processor-supplied Retry-After takes precedence over
                // exponential backoff (spec.md §4.C, RATE_LIMITED).
                let delay = retry_after.unwrap_or_else(|| policy.delay_for_attempt(local_attempt));
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Drain the processor's progress stream for the convert call until it
/// reports completion, selecting between the callback-delivered channel and
/// a staleness-triggered poll fallback, per spec.md §4.C / §9.
async fn stream_conversion_progress(
    deps: &WorkerDeps,
    job_id: &str,
    processor_job_id: &str,
    current_progress: &mut u8,
    cancel: &CancellationToken,
) -> std::result::Result<String, JobError> {
    let mut rx = deps.callbacks.register(job_id);
    let mut last_event_at = tokio::time::Instant::now();
    let mut last_stage = Stage::Download;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(JobError::from_kind(ErrorKind::Cancelled));
            }
            maybe_event = rx.recv() => {
                let Some(event) = maybe_event else { continue };
                last_event_at = tokio::time::Instant::now();
                if let Some(stage) = event.stage() {
                    last_stage = stage;
                }
                if let Some(storage_key) = apply_event(deps, job_id, &event, current_progress).await? {
                    return Ok(storage_key);
                }
            }
            _ = tokio::time::sleep(deps.config.poll_interval) => {
                if last_event_at.elapsed() < deps.config.progress_stale_after {
                    continue;
                }
                let event = retry_call(deps, job_id, last_stage, || {
                    deps.processor.poll_status(processor_job_id)
                })
                .await?;
                last_event_at = tokio::time::Instant::now();
                if let Some(stage) = event.stage() {
                    last_stage = stage;
                }
                if let Some(storage_key) = apply_event(deps, job_id, &event, current_progress).await? {
                    return Ok(storage_key);
                }
            }
        }
    }
}

async fn apply_event(
    deps: &WorkerDeps,
    job_id: &str,
    event: &ProcessorEvent,
    current_progress: &mut u8,
) -> std::result::Result<Option<String>, JobError> {
    match event {
        ProcessorEvent::Progress { progress, .. } => {
            let stage = event.stage().unwrap_or(Stage::Download);
            let global = map_stage_progress(stage, *progress);
            write_progress(deps, job_id, current_progress, global, Some(stage.label()))
                .await
                .map_err(store_err_to_job_err)?;
            Ok(None)
        }
        ProcessorEvent::Done { storage_key, .. } => {
            let global = map_stage_progress(Stage::Upload, 100);
            write_progress(deps, job_id, current_progress, global, Some(Stage::Upload.label()))
                .await
                .map_err(store_err_to_job_err)?;
            Ok(Some(storage_key.clone()))
        }
    }
}

/// Clamp to [0, 100], keep the higher of the new and currently-held value
/// (spec.md §4.C's non-decreasing rule), write `last_progress_at = now`, and
/// notify subscribers on success.
async fn write_progress(
    deps: &WorkerDeps,
    job_id: &str,
    current_progress: &mut u8,
    new_progress: u8,
    step: Option<&str>,
) -> Result<()> {
    let to_write = new_progress.min(100).max(*current_progress);
    let patch = JobPatch::default()
        .progress(to_write)
        .current_step(step.map(str::to_string))
        .last_progress_at(Utc::now());
    let updated = deps.store.update(job_id, patch, Some(JobStatus::Processing)).await?;
    *current_progress = to_write;
    deps.push.notify_job(&updated).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::store::{new_queued_job, SqlxJobStore};
    use crate::database::{init_pool, run_migrations};
    use crate::domain::{Format, Platform};
    use crate::orchestrator::blob::MockBlobStore;
    use crate::orchestrator::progress::NoopNotifier;
    use crate::processor::{ConvertAccepted, ExtractedMetadata};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration as StdDuration;

    struct StubProcessor {
        extract_calls: AtomicUsize,
        convert_calls: AtomicUsize,
        bot_block_failures: usize,
        events: Mutex<Vec<ProcessorEvent>>,
    }

    #[async_trait]
    impl ProcessorClient for StubProcessor {
        async fn extract_metadata(&self, _url: &str) -> std::result::Result<ExtractedMetadata, RawFailure> {
            self.extract_calls.fetch_add(1, Ordering::SeqCst);
            Ok(ExtractedMetadata {
                title: Some("Never Gonna Give You Up".to_string()),
                duration_secs: Some(212.0),
                thumbnail_url: None,
                uploader: Some("Rick Astley".to_string()),
            })
        }

        async fn start_conversion(
            &self,
            _request: ConvertRequest<'_>,
        ) -> std::result::Result<ConvertAccepted, RawFailure> {
            let call = self.convert_calls.fetch_add(1, Ordering::SeqCst);
            if call < self.bot_block_failures {
                return Err(RawFailure::Http {
                    status: 403,
                    body: Some(crate::processor::ProcessorErrorBody {
                        code: "bot_detected".to_string(),
                        message: "blocked".to_string(),
                    }),
                    retry_after: None,
                });
            }
            Ok(ConvertAccepted {
                processor_job_id: "proc-1".to_string(),
            })
        }

        async fn poll_status(&self, _processor_job_id: &str) -> std::result::Result<ProcessorEvent, RawFailure> {
            let mut events = self.events.lock().unwrap();
            if events.is_empty() {
                Ok(ProcessorEvent::Done {
                    storage_key: "key-final".to_string(),
                    size: 1024,
                    duration: 212.0,
                })
            } else {
                Ok(events.remove(0))
            }
        }

        async fn health(&self) -> std::result::Result<(), RawFailure> {
            Ok(())
        }
    }

    async fn test_deps(bot_block_failures: usize) -> (Arc<WorkerDeps>, Arc<dyn JobStore>) {
        let pool = init_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        let store: Arc<dyn JobStore> = Arc::new(SqlxJobStore::new(pool));
        let processor = Arc::new(StubProcessor {
            extract_calls: AtomicUsize::new(0),
            convert_calls: AtomicUsize::new(0),
            bot_block_failures,
            events: Mutex::new(vec![
                ProcessorEvent::Progress { step: "download".to_string(), progress: 50 },
                ProcessorEvent::Progress { step: "transcode".to_string(), progress: 50 },
            ]),
        });
        let mut config = AppConfig::default();
        config.poll_interval = StdDuration::from_millis(10);
        config.progress_stale_after = StdDuration::from_millis(5);
        let deps = Arc::new(WorkerDeps {
            store: store.clone(),
            processor,
            blob: Arc::new(MockBlobStore::new("https://blobs.example.com")),
            push: Arc::new(NoopNotifier),
            callbacks: CallbackRegistry::new(),
            config: Arc::new(config),
        });
        (deps, store)
    }

    fn sample_job(id: &str) -> Job {
        new_queued_job(
            id.to_string(),
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ".to_string(),
            Platform::Youtube,
            Format::Mp3,
            "128".to_string(),
            1,
            chrono::Duration::hours(24),
        )
    }

    #[tokio::test]
    async fn happy_path_completes_with_monotonic_progress() {
        let (deps, store) = test_deps(0).await;
        let mut job = sample_job("job-happy");
        store.create(&job).await.unwrap();
        job.status = JobStatus::Processing;
        store
            .update("job-happy", JobPatch::default().status(JobStatus::Processing), Some(JobStatus::Queued))
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        run_job(job, deps, cancel).await;

        let final_job = store.get("job-happy").await.unwrap();
        assert_eq!(final_job.status, JobStatus::Completed);
        assert_eq!(final_job.progress, 100);
        assert!(final_job.download_url.is_some());
        assert!(final_job.error.is_none());
    }

    #[tokio::test]
    async fn bot_block_retries_then_succeeds_with_attempt_3() {
        let (deps, store) = test_deps(2).await;
        let mut job = sample_job("job-retry");
        store.create(&job).await.unwrap();
        job.status = JobStatus::Processing;
        store
            .update("job-retry", JobPatch::default().status(JobStatus::Processing), Some(JobStatus::Queued))
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        run_job(job, deps, cancel).await;

        let final_job = store.get("job-retry").await.unwrap();
        assert_eq!(final_job.status, JobStatus::Completed);
        assert_eq!(final_job.attempt, 3);
    }

    #[tokio::test]
    async fn bot_block_exhausts_retries_and_fails_job() {
        let (deps, store) = test_deps(10).await;
        let mut job = sample_job("job-fail");
        store.create(&job).await.unwrap();
        job.status = JobStatus::Processing;
        store
            .update("job-fail", JobPatch::default().status(JobStatus::Processing), Some(JobStatus::Queued))
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        run_job(job, deps, cancel).await;

        let final_job = store.get("job-fail").await.unwrap();
        assert_eq!(final_job.status, JobStatus::Failed);
        let err = final_job.error.unwrap();
        assert_eq!(err.kind, ErrorKind::PlatformBotBlocked);
        assert!(err.retryable);
        assert!(!err.suggestion.unwrap_or_default().is_empty());
    }
}
