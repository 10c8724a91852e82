//! Progress plumbing shared by the worker: the stage→global-percentage
//! mapping, the in-process callback registry that lets an Axum callback
//! route feed events into a running worker, and the `PushNotifier` trait the
//! worker depends on (implemented by the Push Channel Manager).
//!
//! Grounded on `rust-srec::pipeline::progress::ProgressReporter` (an
//! `mpsc::Sender` wrapper with a `noop()` test double), generalized here
//! into a registry keyed by job id since one process runs many jobs
//! concurrently rather than one reporter per pipeline run.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::domain::{Job, Stage};
use crate::processor::ProcessorEvent;

/// Map a processor-reported in-stage percentage (0-100) onto the job's
/// global progress range for `stage` (spec.md §4.C's per-stage table).
pub fn map_stage_progress(stage: Stage, stage_pct: u8) -> u8 {
    let (start, end) = stage.progress_range();
    let pct = stage_pct.min(100) as u32;
    let span = (end - start) as u32;
    let scaled = start as u32 + (span * pct) / 100;
    scaled.min(100) as u8
}

/// Routes `{job_id, progress, step}` callbacks from the processor into the
/// worker that is currently driving that job. A worker registers itself
/// before starting the convert call and unregisters on completion/failure;
/// the Axum callback handler just looks up the sender and forwards.
#[derive(Clone, Default)]
pub struct CallbackRegistry {
    senders: Arc<DashMap<String, mpsc::UnboundedSender<ProcessorEvent>>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, job_id: &str) -> mpsc::UnboundedReceiver<ProcessorEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.insert(job_id.to_string(), tx);
        rx
    }

    pub fn unregister(&self, job_id: &str) {
        self.senders.remove(job_id);
    }

    /// Forward a callback POST body to the registered worker, if any. Returns
    /// `false` if no worker is currently waiting on this job id (callback
    /// arrived late, or for an unknown/finished job) so the route can log it.
    pub fn deliver(&self, job_id: &str, event: ProcessorEvent) -> bool {
        match self.senders.get(job_id) {
            Some(sender) => sender.send(event).is_ok(),
            None => false,
        }
    }
}

/// The worker's only dependency on the push subsystem: notify subscribers
/// that `job`'s stored state changed. Defined here (the consumer) rather
/// than in `push`, so the orchestrator has no compile-time dependency on the
/// push module's internals.
#[async_trait]
pub trait PushNotifier: Send + Sync {
    /// `job`'s stored state changed (progress, stage, or terminal status);
    /// the push layer picks the outgoing message type from `job.status`.
    async fn notify_job(&self, job: &Job);

    /// The Monitor attempted stuck-job recovery on `job` — surfaced to
    /// subscribers as a distinct `recovery_attempt` message (spec.md §6),
    /// separate from the ordinary progress/status notifications above.
    async fn notify_recovery_attempt(&self, job: &Job);
}

/// A notifier that does nothing, for orchestrator tests that don't care
/// about push delivery.
pub struct NoopNotifier;

#[async_trait]
impl PushNotifier for NoopNotifier {
    async fn notify_job(&self, _job: &Job) {}
    async fn notify_recovery_attempt(&self, _job: &Job) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_stage_progress_into_global_range() {
        assert_eq!(map_stage_progress(Stage::ExtractMetadata, 0), 5);
        assert_eq!(map_stage_progress(Stage::ExtractMetadata, 100), 15);
        assert_eq!(map_stage_progress(Stage::Download, 50), 35);
        assert_eq!(map_stage_progress(Stage::Finalize, 100), 100);
    }

    #[tokio::test]
    async fn callback_registry_routes_to_registered_worker_only() {
        let registry = CallbackRegistry::new();
        let mut rx = registry.register("job-1");

        let delivered = registry.deliver(
            "job-1",
            ProcessorEvent::Progress {
                step: "download".to_string(),
                progress: 10,
            },
        );
        assert!(delivered);
        assert!(rx.try_recv().is_ok());

        let missed = registry.deliver(
            "job-2",
            ProcessorEvent::Progress {
                step: "download".to_string(),
                progress: 10,
            },
        );
        assert!(!missed);

        registry.unregister("job-1");
        let after_unregister = registry.deliver(
            "job-1",
            ProcessorEvent::Progress {
                step: "download".to_string(),
                progress: 20,
            },
        );
        assert!(!after_unregister);
    }
}
