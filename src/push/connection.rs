//! Per-connection plumbing: a bounded, drop-oldest outbound queue and the
//! two select-driven loops spec.md §4.E and §9 describe (one reader, one
//! writer), grounded on `rust-srec::api::routes::downloads::handle_socket`'s
//! `select!` shape — generalized here into two tasks so a slow client can
//! never block the manager's broadcast, and the outbound queue (not a
//! shared sink) is the only thing crossing the task boundary.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::Notify;
use tracing::debug;
use uuid::Uuid;

use super::manager::PushManagerHandle;
use super::message::{ClientMessage, ServerMessage};
use crate::config::AppConfig;
use crate::database::JobStore;
use crate::queue::QueueManager;

/// A bounded, drop-oldest-on-full outbound mailbox for one connection
/// (spec.md §4.E reliability contract). `push` is synchronous so call
/// sites (the manager's broadcast, the reader's direct replies) never
/// await a slow client.
pub struct OutboundQueue {
    capacity: usize,
    inner: Mutex<VecDeque<ServerMessage>>,
    notify: Notify,
    terminal_since: Mutex<Option<tokio::time::Instant>>,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            terminal_since: Mutex::new(None),
        }
    }

    pub fn push(&self, msg: ServerMessage) {
        if msg.is_terminal() {
            let mut since = self.terminal_since.lock();
            if since.is_none() {
                *since = Some(tokio::time::Instant::now());
            }
        }
        let mut guard = self.inner.lock();
        if guard.len() >= self.capacity {
            guard.pop_front();
        }
        guard.push_back(msg);
        drop(guard);
        self.notify.notify_one();
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    async fn recv_batch(&self) -> Vec<ServerMessage> {
        loop {
            {
                let mut guard = self.inner.lock();
                if !guard.is_empty() {
                    return guard.drain(..).collect();
                }
            }
            self.notify.notified().await;
        }
    }

    /// Once the first terminal message is queued, the reader loop should
    /// close the connection `grace` after that moment.
    fn terminal_deadline(&self, grace: Duration) -> Option<tokio::time::Instant> {
        self.terminal_since.lock().map(|since| since + grace)
    }
}

#[derive(Clone)]
pub struct ConnectionHandle {
    pub id: String,
    pub queue: Arc<OutboundQueue>,
}

struct HeartbeatState {
    awaiting_pong: AtomicBool,
}

pub struct ConnectionDeps {
    pub manager: PushManagerHandle,
    pub store: Arc<dyn JobStore>,
    pub queue: Arc<QueueManager>,
    pub config: Arc<AppConfig>,
}

/// Drive one upgraded WebSocket connection until the client disconnects or
/// the terminal grace period elapses.
pub async fn handle_socket(socket: WebSocket, deps: ConnectionDeps) {
    let connection_id = Uuid::new_v4().to_string();
    let (sink, stream) = socket.split();
    let outbound = Arc::new(OutboundQueue::new(deps.config.push_queue_capacity));
    let heartbeat = Arc::new(HeartbeatState { awaiting_pong: AtomicBool::new(false) });

    let writer = tokio::spawn(writer_loop(
        sink,
        outbound.clone(),
        heartbeat.clone(),
        deps.config.push_heartbeat_interval,
    ));

    reader_loop(stream, connection_id.clone(), outbound, heartbeat, &deps).await;

    writer.abort();
    deps.manager.unsubscribe_all(&connection_id);
    debug!(connection_id = %connection_id, "push connection closed");
}

async fn writer_loop(
    mut sink: futures::stream::SplitSink<WebSocket, Message>,
    outbound: Arc<OutboundQueue>,
    heartbeat: Arc<HeartbeatState>,
    heartbeat_interval: Duration,
) {
    let mut ticker = tokio::time::interval(heartbeat_interval);
    ticker.tick().await;
    loop {
        tokio::select! {
            batch = outbound.recv_batch() => {
                for msg in batch {
                    let shutdown = msg.is_shutdown();
                    let Ok(text) = serde_json::to_string(&msg) else { continue };
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        return;
                    }
                    if shutdown {
                        let _ = sink.close().await;
                        return;
                    }
                }
            }
            _ = ticker.tick() => {
                if heartbeat.awaiting_pong.swap(true, Ordering::SeqCst) {
                    debug!("push connection missed heartbeat pong, closing");
                    let _ = sink.close().await;
                    return;
                }
                if sink.send(Message::Ping(Bytes::new())).await.is_err() {
                    return;
                }
            }
        }
    }
}

async fn reader_loop(
    mut stream: futures::stream::SplitStream<WebSocket>,
    connection_id: String,
    outbound: Arc<OutboundQueue>,
    heartbeat: Arc<HeartbeatState>,
    deps: &ConnectionDeps,
) {
    let handle = ConnectionHandle { id: connection_id.clone(), queue: outbound.clone() };
    let mut subscribed: HashSet<String> = HashSet::new();

    loop {
        let deadline = outbound.terminal_deadline(deps.config.push_terminal_grace);
        let grace_elapsed = async {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = grace_elapsed => {
                debug!(connection_id = %connection_id, "terminal grace period elapsed, closing");
                break;
            }
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_client_message(&text, &handle, &mut subscribed, deps, &outbound).await;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        heartbeat.awaiting_pong.store(false, Ordering::SeqCst);
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!(connection_id = %connection_id, error = %e, "websocket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    for job_id in &subscribed {
        deps.manager.unsubscribe(job_id, &connection_id);
    }
}

async fn handle_client_message(
    text: &str,
    handle: &ConnectionHandle,
    subscribed: &mut HashSet<String>,
    deps: &ConnectionDeps,
    outbound: &Arc<OutboundQueue>,
) {
    let parsed: ClientMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            outbound.push(ServerMessage::error(format!("malformed message: {e}")));
            return;
        }
    };

    match parsed {
        ClientMessage::Ping { timestamp } => {
            outbound.push(ServerMessage::pong(timestamp));
        }
        ClientMessage::SubscribeJob { id } => {
            subscribe_and_snapshot(id, handle, subscribed, deps, outbound).await;
        }
        ClientMessage::StartConversion { url, format, quality } => {
            match crate::services::submit_job(&deps.store, &deps.queue, &deps.config, &url, &format, &quality).await {
                Ok(job) => {
                    outbound.push(ServerMessage::conversion_started(&job));
                    subscribe_and_snapshot(job.id.clone(), handle, subscribed, deps, outbound).await;
                }
                Err(e) => outbound.push(ServerMessage::error(e.to_string())),
            }
        }
    }
}

async fn subscribe_and_snapshot(
    job_id: String,
    handle: &ConnectionHandle,
    subscribed: &mut HashSet<String>,
    deps: &ConnectionDeps,
    outbound: &Arc<OutboundQueue>,
) {
    deps.manager.subscribe(job_id.clone(), handle.clone());
    subscribed.insert(job_id.clone());

    match deps.store.get(&job_id).await {
        Ok(job) => {
            let position = deps.queue.position(&job.id).await.ok().flatten();
            outbound.push(ServerMessage::job_status(&job, position));
        }
        Err(e) => outbound.push(ServerMessage::error(format!("unknown job: {e}"))),
    }
}
