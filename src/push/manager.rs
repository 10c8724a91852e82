//! The Push Channel Manager's single actor loop: owns `job_id ->
//! connections` and processes subscribe/unsubscribe/broadcast commands
//! serially, so connection lifecycle is never raced (spec.md §4.E, §5, §9).

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Duration;
use tracing::{info, warn};

use super::connection::ConnectionHandle;
use super::message::ServerMessage;
use crate::domain::Job;
use crate::monitor::OrphanReaper;
use crate::orchestrator::PushNotifier;

enum ManagerCommand {
    Subscribe { job_id: String, handle: ConnectionHandle },
    Unsubscribe { job_id: String, connection_id: String },
    UnsubscribeAll { connection_id: String },
    Broadcast { job_id: String, message: ServerMessage },
    DropOrphans { live_job_ids: Vec<String> },
    Shutdown,
}

/// A cheaply-cloneable front for the manager actor. Also the concrete
/// implementation of the `PushNotifier` and `OrphanReaper` traits the
/// orchestrator and monitor depend on.
#[derive(Clone)]
pub struct PushManagerHandle {
    tx: mpsc::UnboundedSender<ManagerCommand>,
}

impl PushManagerHandle {
    pub fn subscribe(&self, job_id: String, handle: ConnectionHandle) {
        let _ = self.tx.send(ManagerCommand::Subscribe { job_id, handle });
    }

    pub fn unsubscribe(&self, job_id: &str, connection_id: &str) {
        let _ = self.tx.send(ManagerCommand::Unsubscribe {
            job_id: job_id.to_string(),
            connection_id: connection_id.to_string(),
        });
    }

    pub fn unsubscribe_all(&self, connection_id: &str) {
        let _ = self.tx.send(ManagerCommand::UnsubscribeAll {
            connection_id: connection_id.to_string(),
        });
    }

    fn broadcast(&self, job_id: &str, message: ServerMessage) {
        let _ = self.tx.send(ManagerCommand::Broadcast {
            job_id: job_id.to_string(),
            message,
        });
    }

    /// Emit `server_shutdown` to every connection, then give them
    /// `drain_grace` to flush before the caller proceeds to close the
    /// listener (spec.md §5 graceful shutdown).
    pub async fn shutdown(&self, drain_grace: Duration) {
        let _ = self.tx.send(ManagerCommand::Shutdown);
        tokio::time::sleep(drain_grace).await;
    }
}

#[async_trait]
impl PushNotifier for PushManagerHandle {
    async fn notify_job(&self, job: &Job) {
        let message = if job.status.is_terminal() {
            ServerMessage::terminal(job)
        } else {
            ServerMessage::progress_update(job)
        };
        self.broadcast(&job.id, message);
    }

    async fn notify_recovery_attempt(&self, job: &Job) {
        self.broadcast(&job.id, ServerMessage::recovery_attempt(job));
    }
}

#[async_trait]
impl OrphanReaper for PushManagerHandle {
    async fn drop_orphans(&self, live_job_ids: &[String]) {
        let _ = self.tx.send(ManagerCommand::DropOrphans {
            live_job_ids: live_job_ids.to_vec(),
        });
    }
}

struct PushManager {
    rx: mpsc::UnboundedReceiver<ManagerCommand>,
    subscriptions: HashMap<String, Vec<ConnectionHandle>>,
}

impl PushManager {
    fn handle(&mut self, cmd: ManagerCommand) {
        match cmd {
            ManagerCommand::Subscribe { job_id, handle } => {
                let connections = self.subscriptions.entry(job_id).or_default();
                if !connections.iter().any(|c| c.id == handle.id) {
                    connections.push(handle);
                }
            }
            ManagerCommand::Unsubscribe { job_id, connection_id } => {
                if let Some(connections) = self.subscriptions.get_mut(&job_id) {
                    connections.retain(|c| c.id != connection_id);
                    if connections.is_empty() {
                        self.subscriptions.remove(&job_id);
                    }
                }
            }
            ManagerCommand::UnsubscribeAll { connection_id } => {
                self.subscriptions.retain(|_, connections| {
                    connections.retain(|c| c.id != connection_id);
                    !connections.is_empty()
                });
            }
            ManagerCommand::Broadcast { job_id, message } => {
                if let Some(connections) = self.subscriptions.get(&job_id) {
                    for connection in connections {
                        connection.queue.push(message.clone());
                    }
                }
            }
            ManagerCommand::DropOrphans { live_job_ids } => {
                let live: std::collections::HashSet<&str> =
                    live_job_ids.iter().map(String::as_str).collect();
                let before = self.subscriptions.len();
                self.subscriptions.retain(|job_id, _| live.contains(job_id.as_str()));
                let dropped = before - self.subscriptions.len();
                if dropped > 0 {
                    info!(dropped, "push manager reaped orphaned subscriptions");
                }
            }
            ManagerCommand::Shutdown => {
                let total: usize = self.subscriptions.values().map(Vec::len).sum();
                warn!(connections = total, "push manager broadcasting server_shutdown");
                for connections in self.subscriptions.values() {
                    for connection in connections {
                        connection.queue.push(ServerMessage::shutdown());
                    }
                }
            }
        }
    }
}

/// Spawn the manager actor and return a cloneable handle to it.
pub fn spawn() -> PushManagerHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut manager = PushManager { rx, subscriptions: HashMap::new() };
    tokio::spawn(async move {
        while let Some(cmd) = manager.rx.recv().await {
            manager.handle(cmd);
        }
    });
    PushManagerHandle { tx }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::store::new_queued_job;
    use crate::domain::{Format, Platform};
    use crate::push::connection::OutboundQueue;
    use std::sync::Arc;

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

    fn test_handle(id: &str) -> (ConnectionHandle, Arc<OutboundQueue>) {
        let queue = Arc::new(OutboundQueue::new(10));
        (ConnectionHandle { id: id.to_string(), queue: queue.clone() }, queue)
    }

    #[tokio::test]
    async fn broadcast_only_reaches_subscribed_connections() {
        let manager = spawn();
        let (handle_a, queue_a) = test_handle("conn-a");
        let (_handle_b, queue_b) = test_handle("conn-b");

        manager.subscribe("job-1".to_string(), handle_a);
        manager.notify_job(&sample_job("job-1")).await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!queue_a.is_empty());
        assert!(queue_b.is_empty());
    }

    #[tokio::test]
    async fn unsubscribe_all_removes_connection_from_every_job() {
        let manager = spawn();
        let (handle, queue) = test_handle("conn-c");
        manager.subscribe("job-a".to_string(), handle.clone());
        manager.subscribe("job-b".to_string(), handle);
        manager.unsubscribe_all("conn-c");

        tokio::time::sleep(Duration::from_millis(20)).await;
        manager.notify_job(&sample_job("job-a")).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn drop_orphans_keeps_only_live_job_subscriptions() {
        let manager = spawn();
        let (handle, queue) = test_handle("conn-d");
        manager.subscribe("stale-job".to_string(), handle.clone());
        manager.subscribe("live-job".to_string(), handle);

        manager.drop_orphans(&["live-job".to_string()]).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        manager.notify_job(&sample_job("stale-job")).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(queue.is_empty());

        manager.notify_job(&sample_job("live-job")).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!queue.is_empty());
    }
}
