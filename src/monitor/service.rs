//! `Monitor`: the periodic sweep described in spec.md §4.D. Runs on its own
//! tick, entirely independent of the request path — a crashed or wedged
//! worker cannot starve this loop since it never touches the queue's
//! semaphore or worker pool.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::database::store::JobPatch;
use crate::database::JobStore;
use crate::domain::{ErrorKind, Job, JobError, JobStatus};
use crate::error::Result;
use crate::orchestrator::PushNotifier;
use crate::processor::ProcessorClient;

/// The Monitor's only dependency on the push subsystem: tell it which job
/// ids are still live so it can drop subscriptions for everything else.
/// Defined here (the consumer), implemented by the Push Channel Manager.
#[async_trait]
pub trait OrphanReaper: Send + Sync {
    async fn drop_orphans(&self, live_job_ids: &[String]);
}

pub struct MonitorDeps {
    pub store: Arc<dyn JobStore>,
    pub processor: Arc<dyn ProcessorClient>,
    pub push: Arc<dyn PushNotifier>,
    pub orphan_reaper: Arc<dyn OrphanReaper>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SweepReport {
    pub requeued: usize,
    pub failed_stuck: usize,
    pub recovered_in_place: usize,
    pub expired_deleted: u64,
}

pub struct Monitor {
    deps: MonitorDeps,
    stuck_threshold: Duration,
    max_attempts: u32,
}

impl Monitor {
    pub fn new(deps: MonitorDeps, stuck_threshold: Duration, max_attempts: u32) -> Self {
        Self {
            deps,
            stuck_threshold,
            max_attempts,
        }
    }

    /// Run the sweep on `tick_interval` until `cancel` fires.
    pub async fn run(&self, tick_interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(tick_interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("monitor stopping");
                    return;
                }
                _ = ticker.tick() => {
                    match self.sweep_once().await {
                        Ok(report) => info!(
                            requeued = report.requeued,
                            failed_stuck = report.failed_stuck,
                            recovered_in_place = report.recovered_in_place,
                            expired_deleted = report.expired_deleted,
                            "monitor sweep complete"
                        ),
                        Err(e) => warn!(error = %e, "monitor sweep failed"),
                    }
                }
            }
        }
    }

    pub async fn sweep_once(&self) -> Result<SweepReport> {
        let mut report = SweepReport::default();

        self.sweep_stuck_jobs(&mut report).await?;
        report.expired_deleted = self.deps.store.delete_expired(Utc::now()).await?;
        self.reap_orphan_subscriptions().await?;
        self.emit_metrics().await?;

        Ok(report)
    }

    async fn sweep_stuck_jobs(&self, report: &mut SweepReport) -> Result<()> {
        let cutoff = Utc::now() - chrono::Duration::from_std(self.stuck_threshold).unwrap_or_default();
        let stuck = self.deps.store.list_stale_processing(cutoff).await?;

        for job in stuck {
            self.recover_one(job, report).await?;
        }
        Ok(())
    }

    async fn recover_one(&self, job: Job, report: &mut SweepReport) -> Result<()> {
        let healthy = self.deps.processor.health().await.is_ok();
        let still_running = healthy
            && match &job.processor_job_id {
                Some(pid) => self.deps.processor.poll_status(pid).await.is_ok(),
                None => false,
            };

        if still_running {
            // The processor is alive and has state for this job; it was
            // merely slow to report, not stuck. Nudge `last_progress_at`
            // forward so the same job isn't re-swept next tick, but leave
            // attempt/status untouched — this isn't a recovery event.
            let patch = JobPatch::default().last_progress_at(Utc::now());
            if let Ok(updated) = self
                .deps
                .store
                .update(&job.id, patch, Some(JobStatus::Processing))
                .await
            {
                report.recovered_in_place += 1;
                self.deps.push.notify_job(&updated).await;
            }
            return Ok(());
        }

        let next_attempt = job.attempt + 1;
        if next_attempt <= self.max_attempts {
            warn!(job_id = %job.id, attempt = next_attempt, "stuck job recovered back to queued");
            let patch = JobPatch::default()
                .status(JobStatus::Queued)
                .attempt(next_attempt)
                .current_step(None)
                .last_progress_at(Utc::now());
            match self.deps.store.update(&job.id, patch, Some(JobStatus::Processing)).await {
                Ok(updated) => {
                    report.requeued += 1;
                    self.deps.push.notify_recovery_attempt(&updated).await;
                }
                Err(e) if matches!(e, crate::error::Error::Conflict { .. }) => {}
                Err(e) => return Err(e),
            }
        } else {
            warn!(job_id = %job.id, "stuck job exhausted recovery attempts, failing");
            let patch = JobPatch::default()
                .status(JobStatus::Failed)
                .attempt(next_attempt)
                .error(Some(JobError::from_kind(ErrorKind::StuckRecoveryFailed)))
                .last_progress_at(Utc::now());
            match self.deps.store.update(&job.id, patch, Some(JobStatus::Processing)).await {
                Ok(updated) => {
                    report.failed_stuck += 1;
                    self.deps.push.notify_job(&updated).await;
                }
                Err(e) if matches!(e, crate::error::Error::Conflict { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn reap_orphan_subscriptions(&self) -> Result<()> {
        let queued = self.deps.store.list_by(JobStatus::Queued, -1, 0).await?;
        let processing = self.deps.store.list_by(JobStatus::Processing, -1, 0).await?;
        let live_ids: Vec<String> = queued.into_iter().chain(processing).map(|j| j.id).collect();
        self.deps.orphan_reaper.drop_orphans(&live_ids).await;
        Ok(())
    }

    async fn emit_metrics(&self) -> Result<()> {
        let queued = self.deps.store.count_by(JobStatus::Queued).await?;
        let processing = self.deps.store.count_by(JobStatus::Processing).await?;
        let completed = self.deps.store.count_by(JobStatus::Completed).await?;
        let failed = self.deps.store.count_by(JobStatus::Failed).await?;

        let oldest_queued_age_secs = self
            .deps
            .store
            .list_by(JobStatus::Queued, 1, 0)
            .await?
            .first()
            .map(|j| (Utc::now() - j.created_at).num_seconds())
            .unwrap_or(0);

        info!(
            queued,
            processing,
            completed,
            failed,
            oldest_queued_age_secs,
            "queue metrics"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::store::{new_queued_job, SqlxJobStore};
    use crate::database::{init_pool, run_migrations};
    use crate::domain::{Format, Platform};
    use crate::orchestrator::NoopNotifier;
    use crate::processor::{ConvertAccepted, ConvertRequest, ExtractedMetadata, ProcessorEvent, RawFailure};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    struct FakeProcessor {
        healthy: AtomicBool,
        responsive: AtomicBool,
    }

    #[async_trait]
    impl ProcessorClient for FakeProcessor {
        async fn extract_metadata(&self, _url: &str) -> std::result::Result<ExtractedMetadata, RawFailure> {
            unimplemented!()
        }
        async fn start_conversion(
            &self,
            _request: ConvertRequest<'_>,
        ) -> std::result::Result<ConvertAccepted, RawFailure> {
            unimplemented!()
        }
        async fn poll_status(&self, _processor_job_id: &str) -> std::result::Result<ProcessorEvent, RawFailure> {
            if self.responsive.load(Ordering::SeqCst) {
                Ok(ProcessorEvent::Progress { step: "download".to_string(), progress: 10 })
            } else {
                Err(RawFailure::Http { status: 500, body: None, retry_after: None })
            }
        }
        async fn health(&self) -> std::result::Result<(), RawFailure> {
            if self.healthy.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(RawFailure::Http { status: 503, body: None, retry_after: None })
            }
        }
    }

    struct FakeOrphanReaper {
        last_call: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl OrphanReaper for FakeOrphanReaper {
        async fn drop_orphans(&self, live_job_ids: &[String]) {
            *self.last_call.lock().unwrap() = live_job_ids.to_vec();
        }
    }

    async fn test_monitor(healthy: bool, responsive: bool) -> (Monitor, Arc<dyn JobStore>) {
        let pool = init_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        let store: Arc<dyn JobStore> = Arc::new(SqlxJobStore::new(pool));
        let deps = MonitorDeps {
            store: store.clone(),
            processor: Arc::new(FakeProcessor {
                healthy: AtomicBool::new(healthy),
                responsive: AtomicBool::new(responsive),
            }),
            push: Arc::new(NoopNotifier),
            orphan_reaper: Arc::new(FakeOrphanReaper { last_call: Mutex::new(Vec::new()) }),
        };
        (Monitor::new(deps, Duration::from_secs(60), 3), store)
    }

    fn sample_job(id: &str) -> Job {
        new_queued_job(
            id.to_string(),
            "https://www.youtube.com/watch?v=abc".to_string(),
            Platform::Youtube,
            Format::Mp3,
            "128".to_string(),
            1,
            chrono::Duration::hours(24),
        )
    }

    async fn mark_stuck_processing(store: &Arc<dyn JobStore>, id: &str) {
        store
            .update(id, JobPatch::default().status(JobStatus::Processing), Some(JobStatus::Queued))
            .await
            .unwrap();
        store
            .update(
                id,
                JobPatch::default().last_progress_at(Utc::now() - chrono::Duration::hours(1)),
                None,
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unresponsive_processor_requeues_stuck_job() {
        let (monitor, store) = test_monitor(false, false).await;
        let job = sample_job("stuck-1");
        store.create(&job).await.unwrap();
        mark_stuck_processing(&store, "stuck-1").await;

        let report = monitor.sweep_once().await.unwrap();
        assert_eq!(report.requeued, 1);

        let updated = store.get("stuck-1").await.unwrap();
        assert_eq!(updated.status, JobStatus::Queued);
        assert_eq!(updated.attempt, 1);
    }

    #[tokio::test]
    async fn exhausted_attempts_fails_with_stuck_recovery_failed() {
        let (monitor, store) = test_monitor(false, false).await;
        let job = sample_job("stuck-2");
        store.create(&job).await.unwrap();
        mark_stuck_processing(&store, "stuck-2").await;
        store
            .update("stuck-2", JobPatch::default().attempt(3), None)
            .await
            .unwrap();

        let report = monitor.sweep_once().await.unwrap();
        assert_eq!(report.failed_stuck, 1);

        let updated = store.get("stuck-2").await.unwrap();
        assert_eq!(updated.status, JobStatus::Failed);
        assert_eq!(updated.error.unwrap().kind, ErrorKind::StuckRecoveryFailed);
    }

    #[tokio::test]
    async fn responsive_processor_recovers_in_place_without_requeue() {
        let (monitor, store) = test_monitor(true, true).await;
        let job = sample_job("stuck-3");
        store.create(&job).await.unwrap();
        mark_stuck_processing(&store, "stuck-3").await;

        let report = monitor.sweep_once().await.unwrap();
        assert_eq!(report.recovered_in_place, 1);
        assert_eq!(report.requeued, 0);

        let updated = store.get("stuck-3").await.unwrap();
        assert_eq!(updated.status, JobStatus::Processing);
        assert_eq!(updated.attempt, 0);
    }

    #[tokio::test]
    async fn expired_jobs_are_reaped() {
        let (monitor, store) = test_monitor(true, true).await;
        let mut job = sample_job("expired-1");
        job.expires_at = Utc::now() - chrono::Duration::hours(1);
        store.create(&job).await.unwrap();

        let report = monitor.sweep_once().await.unwrap();
        assert_eq!(report.expired_deleted, 1);
        assert!(store.get("expired-1").await.is_err());
    }
}
