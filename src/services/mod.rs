//! Wires the Job Store, Queue Manager, Orchestrator, Monitor, and Push
//! Channel Manager into one running service, and exposes `submit_job` as
//! the one admission path both the REST `POST /convert` route and the
//! push channel's `start_conversion` message go through.

use std::sync::Arc;

use chrono::Duration as ChronoDuration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::database::store::new_queued_job;
use crate::database::JobStore;
use crate::domain::{Format, Job};
use crate::error::{Error, Result};
use crate::monitor::{Monitor, MonitorDeps};
use crate::orchestrator::{BlobStore, WorkerDeps, CallbackRegistry};
use crate::processor::ProcessorClient;
use crate::push::PushManagerHandle;
use crate::queue::QueueManager;
use crate::utils::url::validate_url;

/// Validate and admit a new job. The only way a job enters the system,
/// whatever surface took the request (`POST /convert` or `start_conversion`
/// over the push channel).
pub async fn submit_job(
    store: &Arc<dyn JobStore>,
    queue: &Arc<QueueManager>,
    config: &AppConfig,
    url: &str,
    format: &str,
    quality: &str,
) -> Result<Job> {
    let validated = validate_url(url).ok_or_else(|| Error::validation("the provided URL is not valid"))?;
    let format: Format = format
        .parse()
        .map_err(|_| Error::validation(format!("unsupported output format: {format}")))?;
    if !format.is_valid_quality(quality) {
        return Err(Error::validation(format!(
            "quality {quality} is not valid for format {}",
            format.as_str()
        )));
    }

    let sequence = store.next_sequence().await?;
    let job = new_queued_job(
        Uuid::new_v4().to_string(),
        validated.normalized,
        validated.platform,
        format,
        quality.to_string(),
        sequence,
        ChronoDuration::from_std(config.result_ttl).unwrap_or_else(|_| ChronoDuration::hours(24)),
    );
    queue.enqueue(&job).await?;
    Ok(job)
}

/// Everything the running process needs, built once at startup and shared
/// by every route handler and background task.
pub struct ServiceContainer {
    pub store: Arc<dyn JobStore>,
    pub queue: Arc<QueueManager>,
    pub processor: Arc<dyn ProcessorClient>,
    pub blob: Arc<dyn BlobStore>,
    pub push: PushManagerHandle,
    pub callbacks: CallbackRegistry,
    pub config: Arc<AppConfig>,
    cancel: CancellationToken,
    dispatch_handle: tokio::task::JoinHandle<()>,
    monitor_handle: tokio::task::JoinHandle<()>,
    reaper_handle: tokio::task::JoinHandle<()>,
}

impl ServiceContainer {
    pub fn new(
        store: Arc<dyn JobStore>,
        processor: Arc<dyn ProcessorClient>,
        blob: Arc<dyn BlobStore>,
        config: Arc<AppConfig>,
    ) -> Self {
        let queue = Arc::new(QueueManager::new(
            store.clone(),
            config.max_concurrent_conversions,
            config.hard_cap,
        ));
        let push = crate::push::spawn();
        let cancel = CancellationToken::new();
        let callbacks = CallbackRegistry::new();

        let worker_deps = Arc::new(WorkerDeps {
            store: store.clone(),
            processor: processor.clone(),
            blob: blob.clone(),
            push: Arc::new(push.clone()),
            callbacks: callbacks.clone(),
            config: config.clone(),
        });

        let dispatch_handle = tokio::spawn(run_dispatch_loop(queue.clone(), worker_deps, cancel.clone()));

        let monitor = Monitor::new(
            MonitorDeps {
                store: store.clone(),
                processor: processor.clone(),
                push: Arc::new(push.clone()),
                orphan_reaper: Arc::new(push.clone()),
            },
            config.stuck_threshold,
            config.max_attempts,
        );
        let monitor_tick = config.monitor_tick_interval;
        let monitor_cancel = cancel.clone();
        let monitor_handle = tokio::spawn(async move { monitor.run(monitor_tick, monitor_cancel).await });

        let reaper_handle = tokio::spawn(run_timeout_reaper(queue.clone(), config.processing_timeout, cancel.clone()));

        Self {
            store,
            queue,
            processor,
            blob,
            push,
            callbacks,
            config,
            cancel,
            dispatch_handle,
            monitor_handle,
            reaper_handle,
        }
    }

    /// Build the shared HTTP application state from this container's parts.
    pub fn app_state(&self) -> crate::api::AppState {
        crate::api::AppState {
            store: self.store.clone(),
            queue: self.queue.clone(),
            processor: self.processor.clone(),
            blob: self.blob.clone(),
            push: self.push.clone(),
            callbacks: self.callbacks.clone(),
            config: self.config.clone(),
        }
    }

    /// Submit a job through the shared admission path.
    pub async fn submit(&self, url: &str, format: &str, quality: &str) -> Result<Job> {
        submit_job(&self.store, &self.queue, &self.config, url, format, quality).await
    }

    /// Graceful shutdown (spec.md §5): tell the push manager to drain, stop
    /// dispatching new jobs, and let already-spawned workers finish their
    /// current stage (bounded by each call's own timeout).
    pub async fn shutdown(&self) {
        info!("service container shutting down");
        self.push.shutdown(std::time::Duration::from_secs(5)).await;
        self.cancel.cancel();

        self.dispatch_handle.abort();
        self.monitor_handle.abort();
        self.reaper_handle.abort();
    }
}

async fn run_dispatch_loop(queue: Arc<QueueManager>, worker_deps: Arc<WorkerDeps>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("dispatch loop stopping");
                return;
            }
            claimed = queue.claim_next() => {
                match claimed {
                    Ok((job, permit)) => {
                        let deps = worker_deps.clone();
                        let job_cancel = cancel.child_token();
                        tokio::spawn(async move {
                            let _permit = permit;
                            crate::orchestrator::run_job(job, deps, job_cancel).await;
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to claim next job, backing off");
                        tokio::time::sleep(std::time::Duration::from_millis(500)).await;
                    }
                }
            }
        }
    }
}

async fn run_timeout_reaper(queue: Arc<QueueManager>, threshold: std::time::Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(30));
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {
                if let Err(e) = queue.reap_timeouts(threshold).await {
                    warn!(error = %e, "timeout reaper sweep failed");
                }
            }
        }
    }
}
