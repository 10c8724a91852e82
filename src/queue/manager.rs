//! `QueueManager`: admission control (`enqueue`), FIFO dispatch gated on a
//! worker-pool semaphore (`claim_next`), and the end-to-end timeout reaper.
//!
//! Grounded on the teacher's `pipeline::job_queue` sizing (a bounded worker
//! pool plus a DB-backed queue) but simplified: there is no in-memory job
//! list here, `JobStore` is the single source of truth and every operation
//! re-reads it, so multiple `QueueManager` handles (e.g. one per process in
//! a future multi-node deployment) would stay consistent.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tracing::{info, warn};

use crate::database::store::JobPatch;
use crate::database::JobStore;
use crate::domain::{ErrorKind, Job, JobError, JobStatus};
use crate::error::{Error, Result};

/// Snapshot of queue occupancy, backing `GET /status` aggregate fields and
/// future metrics.
#[derive(Debug, Clone, Copy)]
pub struct QueueStats {
    pub queued: usize,
    pub processing: usize,
    pub available_permits: usize,
    pub hard_cap: usize,
}

/// Admission control rejected an `enqueue` because queued+processing has
/// reached `hard_cap` (spec.md §4.B).
pub type DispatchError = Error;

pub struct QueueManager {
    store: Arc<dyn JobStore>,
    semaphore: Arc<Semaphore>,
    notify: Arc<Notify>,
    hard_cap: usize,
}

impl QueueManager {
    pub fn new(store: Arc<dyn JobStore>, max_concurrent_conversions: usize, hard_cap: usize) -> Self {
        Self {
            store,
            semaphore: Arc::new(Semaphore::new(max_concurrent_conversions)),
            notify: Arc::new(Notify::new()),
            hard_cap,
        }
    }

    /// Admit `job` if the combined queued+processing count is below the hard
    /// cap. The job has already been assigned an id and sequence number by
    /// the caller (spec.md §4.A `create`); this only decides admission.
    pub async fn enqueue(&self, job: &Job) -> Result<()> {
        let queued = self.store.count_by(JobStatus::Queued).await?;
        let processing = self.store.count_by(JobStatus::Processing).await?;
        let in_flight = (queued + processing) as usize;
        if in_flight >= self.hard_cap {
            return Err(Error::CapacityExceeded);
        }

        self.store.create(job).await?;
        self.notify.notify_one();
        Ok(())
    }

    /// Wait for both a free worker slot and a queued job, then atomically
    /// claim it. Holds the returned permit for as long as the caller is
    /// actively processing the job; dropping it frees the slot.
    pub async fn claim_next(&self) -> Result<(Job, OwnedSemaphorePermit)> {
        loop {
            let permit = self
                .semaphore
                .clone()
                .acquire_owned()
                .await
                .expect("queue semaphore is never closed");

            match self.store.claim_next_queued(Utc::now()).await? {
                Some(job) => return Ok((job, permit)),
                None => {
                    drop(permit);
                    // Bounded wait so a job enqueued in the gap between the failed
                    // claim and this call isn't missed if the notify races it.
                    let _ = tokio::time::timeout(Duration::from_millis(500), self.notify.notified()).await;
                }
            }
        }
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        let queued = self.store.count_by(JobStatus::Queued).await? as usize;
        let processing = self.store.count_by(JobStatus::Processing).await? as usize;
        Ok(QueueStats {
            queued,
            processing,
            available_permits: self.semaphore.available_permits(),
            hard_cap: self.hard_cap,
        })
    }

    /// 1-indexed position among still-queued jobs, ordered by admission
    /// sequence. `None` if the job is no longer queued (already dispatched
    /// or terminal).
    pub async fn position(&self, job_id: &str) -> Result<Option<usize>> {
        let job = self.store.get(job_id).await?;
        if job.status != JobStatus::Queued {
            return Ok(None);
        }
        let queued = self.store.list_by(JobStatus::Queued, -1, 0).await?;
        Ok(queued.iter().position(|j| j.id == job.id).map(|i| i + 1))
    }

    /// Fail any job that has been in `processing` longer than `threshold`,
    /// end to end. This is distinct from the Monitor's stuck-job recovery
    /// sweep: the job already had its chance at retries within the
    /// orchestrator, so it goes straight to `failed` with a `Timeout` error
    /// rather than back to `queued`. The error is still user-facing
    /// retryable (the caller may resubmit), it's just never retried by this
    /// reaper itself.
    pub async fn reap_timeouts(&self, threshold: Duration) -> Result<Vec<Job>> {
        let cutoff = Utc::now() - chrono::Duration::from_std(threshold).unwrap_or_default();
        let stale = self.store.list_stale_processing(cutoff).await?;

        let mut reaped = Vec::with_capacity(stale.len());
        for job in stale {
            let patch = JobPatch::default()
                .status(JobStatus::Failed)
                .error(Some(JobError::from_kind(ErrorKind::Timeout)));

            match self.store.update(&job.id, patch, Some(JobStatus::Processing)).await {
                Ok(updated) => {
                    warn!(job_id = %updated.id, "job timed out end-to-end, marking failed");
                    reaped.push(updated);
                }
                Err(Error::Conflict { .. }) => {
                    // Already moved on (completed, failed, or reaped by a
                    // concurrent sweep) between the list and this update.
                    continue;
                }
                Err(e) => return Err(e),
            }
        }

        if !reaped.is_empty() {
            info!(count = reaped.len(), "queue manager reaped timed-out jobs");
        }
        Ok(reaped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::store::{new_queued_job, SqlxJobStore};
    use crate::database::{init_pool, run_migrations};
    use crate::domain::{Format, Platform};

    async fn test_manager(max_concurrent: usize, hard_cap: usize) -> (QueueManager, Arc<dyn JobStore>) {
        let pool = init_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        let store: Arc<dyn JobStore> = Arc::new(SqlxJobStore::new(pool));
        (QueueManager::new(store.clone(), max_concurrent, hard_cap), store)
    }

    fn sample(id: &str, sequence: i64) -> Job {
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
    async fn enqueue_rejects_past_hard_cap() {
        let (manager, _store) = test_manager(4, 1).await;
        manager.enqueue(&sample("a", 1)).await.unwrap();
        let err = manager.enqueue(&sample("b", 2)).await.unwrap_err();
        assert!(matches!(err, Error::CapacityExceeded));
    }

    #[tokio::test]
    async fn claim_next_respects_fifo_order() {
        let (manager, _store) = test_manager(4, 10).await;
        manager.enqueue(&sample("first", 1)).await.unwrap();
        manager.enqueue(&sample("second", 2)).await.unwrap();

        let (claimed, _permit) = manager.claim_next().await.unwrap();
        assert_eq!(claimed.id, "first");
        assert_eq!(claimed.status, JobStatus::Processing);
    }

    #[tokio::test]
    async fn claim_next_blocks_when_pool_is_saturated() {
        let (manager, _store) = test_manager(1, 10).await;
        manager.enqueue(&sample("a", 1)).await.unwrap();
        manager.enqueue(&sample("b", 2)).await.unwrap();

        let (first, permit) = manager.claim_next().await.unwrap();
        assert_eq!(first.id, "a");

        let second_attempt = tokio::time::timeout(Duration::from_millis(200), manager.claim_next()).await;
        assert!(second_attempt.is_err(), "should not claim while the only permit is held");

        drop(permit);
        let (second, _permit2) = tokio::time::timeout(Duration::from_secs(1), manager.claim_next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.id, "b");
    }

    #[tokio::test]
    async fn position_reports_1_indexed_rank_among_queued() {
        let (manager, _store) = test_manager(4, 10).await;
        manager.enqueue(&sample("a", 1)).await.unwrap();
        manager.enqueue(&sample("b", 2)).await.unwrap();
        manager.enqueue(&sample("c", 3)).await.unwrap();

        assert_eq!(manager.position("a").await.unwrap(), Some(1));
        assert_eq!(manager.position("c").await.unwrap(), Some(3));

        let (_claimed, _permit) = manager.claim_next().await.unwrap();
        assert_eq!(manager.position("a").await.unwrap(), None);
        assert_eq!(manager.position("b").await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn reap_timeouts_fails_stale_processing_jobs() {
        let (manager, store) = test_manager(4, 10).await;
        manager.enqueue(&sample("stale", 1)).await.unwrap();
        let (job, _permit) = manager.claim_next().await.unwrap();

        // Backdate last_progress_at to simulate a job stuck for longer than threshold.
        let patch = JobPatch::default().last_progress_at(Utc::now() - chrono::Duration::hours(1));
        store.update(&job.id, patch, None).await.unwrap();

        let reaped = manager.reap_timeouts(Duration::from_secs(60)).await.unwrap();
        assert_eq!(reaped.len(), 1);
        assert_eq!(reaped[0].status, JobStatus::Failed);
        assert_eq!(reaped[0].error.as_ref().unwrap().kind, ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn stats_reflects_queue_occupancy() {
        let (manager, _store) = test_manager(2, 10).await;
        manager.enqueue(&sample("a", 1)).await.unwrap();
        manager.enqueue(&sample("b", 2)).await.unwrap();

        let stats = manager.stats().await.unwrap();
        assert_eq!(stats.queued, 2);
        assert_eq!(stats.processing, 0);
        assert_eq!(stats.available_permits, 2);
        assert_eq!(stats.hard_cap, 10);
    }
}
