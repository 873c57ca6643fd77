//! WebSocket + REST surface for the fleet.
//!
//! Workers connect on `/ws/workers/{worker_id}`; the socket becomes their
//! command channel binding and every inbound frame refreshes their
//! heartbeat. Task producers use the REST endpoints and receive
//! `{success, reason}`-shaped JSON for every outcome.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use async_trait::async_trait;
use axum::{
    Json, Router,
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::channels::{ChannelState, CommandChannel};
use crate::error::ChannelError;
use crate::fleet::FleetCoordinator;
use crate::fleet::queue::{Task, TaskSpec};
use crate::session::{SessionEvent, WorkerHandle};

const STATE_CONNECTING: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_CLOSING: u8 = 2;
const STATE_CLOSED: u8 = 3;

/// Command channel backed by a worker's WebSocket connection.
///
/// Sends go through an mpsc queue drained by the socket task, so channel
/// users never touch the socket directly.
pub struct WsCommandChannel {
    worker_id: String,
    tx: mpsc::Sender<Message>,
    state: Arc<AtomicU8>,
}

#[async_trait]
impl CommandChannel for WsCommandChannel {
    fn state(&self) -> ChannelState {
        match self.state.load(Ordering::Relaxed) {
            STATE_CONNECTING => ChannelState::Connecting,
            STATE_OPEN => ChannelState::Open,
            STATE_CLOSING => ChannelState::Closing,
            _ => ChannelState::Closed,
        }
    }

    async fn send(&self, text: &str) -> Result<(), ChannelError> {
        let state = self.state();
        if !state.is_open() {
            return Err(ChannelError::NotOpen { state });
        }
        self.tx
            .send(Message::Text(text.to_string().into()))
            .await
            .map_err(|_| ChannelError::SendFailed {
                worker_id: self.worker_id.clone(),
                reason: "socket writer gone".to_string(),
            })
    }

    async fn close(&self) {
        let prev = self.state.swap(STATE_CLOSING, Ordering::Relaxed);
        if prev == STATE_OPEN || prev == STATE_CONNECTING {
            let _ = self.tx.send(Message::Close(None)).await;
        }
        self.state.store(STATE_CLOSED, Ordering::Relaxed);
    }
}

/// Worker handle for socket-connected workers. They live remotely, so
/// there is no in-process delivery path to fall back to.
struct RemoteWorker {
    name: String,
}

#[async_trait]
impl WorkerHandle for RemoteWorker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deliver(&self, _command: &str) -> Result<(), ChannelError> {
        Err(ChannelError::NoDeliveryPath {
            worker_id: self.name.clone(),
        })
    }
}

/// Messages a worker sends over its socket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WorkerMessage {
    Heartbeat,
    /// In-session death — recoverable, not a disconnection.
    Died,
    RequestTask,
    TaskComplete { id: u64 },
    TaskFailed { id: u64 },
}

/// Messages the server pushes to a worker.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerMessage<'a> {
    Registered { worker_id: &'a str },
    Assignment { task: &'a Task },
    Idle,
    Ack { id: u64 },
    Error { reason: String },
}

/// Shared state for the fleet routes.
#[derive(Clone)]
pub struct FleetRouteState {
    pub coordinator: Arc<FleetCoordinator>,
}

/// Build the Axum router for the worker WS and the task-producer API.
pub fn fleet_routes(coordinator: Arc<FleetCoordinator>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws/workers/{worker_id}", get(ws_handler))
        .route("/api/tasks", post(submit_task))
        .route("/api/fleet", get(fleet_snapshot))
        .route("/api/fleet/stats", get(fleet_stats))
        .route("/api/broadcast", post(broadcast))
        .with_state(FleetRouteState { coordinator })
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(worker_id): Path<String>,
    State(state): State<FleetRouteState>,
) -> impl IntoResponse {
    info!(worker_id = %worker_id, "Worker WebSocket connecting");
    ws.on_upgrade(move |socket| handle_socket(socket, worker_id, state.coordinator))
}

async fn handle_socket(mut socket: WebSocket, worker_id: String, coordinator: Arc<FleetCoordinator>) {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<Message>(64);
    let channel_state = Arc::new(AtomicU8::new(STATE_OPEN));
    let channel = Arc::new(WsCommandChannel {
        worker_id: worker_id.clone(),
        tx: cmd_tx,
        state: Arc::clone(&channel_state),
    });

    let handle: Arc<dyn WorkerHandle> = Arc::new(RemoteWorker {
        name: worker_id.clone(),
    });
    if !coordinator.register(Arc::clone(&handle)).await {
        warn!(worker_id = %worker_id, "Registration rejected, dropping socket");
        return;
    }
    coordinator
        .bind_channel(&worker_id, Arc::clone(&channel) as Arc<dyn CommandChannel>)
        .await;

    // Registration ack so the worker knows its binding is live.
    let ack = ServerMessage::Registered {
        worker_id: &worker_id,
    };
    if let Ok(json) = serde_json::to_string(&ack)
        && socket.send(Message::Text(json.into())).await.is_err()
    {
        warn!(worker_id = %worker_id, "Failed to send registration ack");
        channel_state.store(STATE_CLOSED, Ordering::Relaxed);
        coordinator.handle_event(&worker_id, SessionEvent::Disconnected).await;
        return;
    }
    info!(worker_id = %worker_id, "Worker WebSocket connected");

    loop {
        tokio::select! {
            // Drain queued commands (broadcasts, assignments) to the socket.
            maybe_cmd = cmd_rx.recv() => {
                let Some(msg) = maybe_cmd else { break };
                let closing = matches!(msg, Message::Close(_));
                if socket.send(msg).await.is_err() {
                    channel_state.store(STATE_CLOSED, Ordering::Relaxed);
                    break;
                }
                if closing {
                    channel_state.store(STATE_CLOSED, Ordering::Relaxed);
                    break;
                }
            }

            result = socket.recv() => {
                match result {
                    Some(Ok(Message::Text(text))) => {
                        // Any inbound frame counts as activity.
                        coordinator.touch(&worker_id).await;
                        handle_worker_message(&coordinator, &worker_id, &channel, &text).await;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        coordinator.touch(&worker_id).await;
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        coordinator.touch(&worker_id).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!(worker_id = %worker_id, "Worker WebSocket disconnected");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(worker_id = %worker_id, error = %e, "Worker WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    channel_state.store(STATE_CLOSED, Ordering::Relaxed);
    // Socket teardown is a hard termination for this worker.
    coordinator
        .handle_event(&worker_id, SessionEvent::Disconnected)
        .await;
}

async fn handle_worker_message(
    coordinator: &Arc<FleetCoordinator>,
    worker_id: &str,
    channel: &Arc<WsCommandChannel>,
    text: &str,
) {
    let message = match serde_json::from_str::<WorkerMessage>(text) {
        Ok(message) => message,
        Err(e) => {
            debug!(worker_id, error = %e, "Unrecognized worker message ignored");
            return;
        }
    };

    match message {
        // The touch already happened on frame receipt.
        WorkerMessage::Heartbeat => {}

        WorkerMessage::Died => {
            coordinator.handle_event(worker_id, SessionEvent::Died).await;
        }

        WorkerMessage::RequestTask => {
            let reply = match coordinator.assign_next(worker_id).await {
                Some(task) => serde_json::to_string(&ServerMessage::Assignment { task: &task }),
                None => serde_json::to_string(&ServerMessage::Idle),
            };
            if let Ok(json) = reply
                && let Err(e) = channel.send(&json).await
            {
                debug!(worker_id, error = %e, "Failed to send assignment reply");
            }
        }

        WorkerMessage::TaskComplete { id } => {
            let reply = match coordinator.complete_task(id).await {
                Ok(()) => ServerMessage::Ack { id },
                Err(e) => {
                    warn!(worker_id, task_id = id, error = %e, "Task completion rejected");
                    ServerMessage::Error {
                        reason: e.to_string(),
                    }
                }
            };
            if let Ok(json) = serde_json::to_string(&reply) {
                let _ = channel.send(&json).await;
            }
        }

        WorkerMessage::TaskFailed { id } => {
            let reply = match coordinator.fail_task(id).await {
                Ok(_) => ServerMessage::Ack { id },
                Err(e) => {
                    warn!(worker_id, task_id = id, error = %e, "Task failure rejected");
                    ServerMessage::Error {
                        reason: e.to_string(),
                    }
                }
            };
            if let Ok(json) = serde_json::to_string(&reply) {
                let _ = channel.send(&json).await;
            }
        }
    }
}

// ── Task producer API ───────────────────────────────────────────────────

async fn submit_task(
    State(state): State<FleetRouteState>,
    Json(spec): Json<TaskSpec>,
) -> impl IntoResponse {
    match state.coordinator.submit_task(spec).await {
        Ok(id) => (
            StatusCode::OK,
            Json(serde_json::json!({ "success": true, "task_id": id })),
        ),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "success": false, "reason": e.to_string() })),
        ),
    }
}

async fn fleet_snapshot(State(state): State<FleetRouteState>) -> impl IntoResponse {
    Json(state.coordinator.snapshot().await)
}

async fn fleet_stats(State(state): State<FleetRouteState>) -> impl IntoResponse {
    Json(state.coordinator.fleet_stats().await)
}

#[derive(Debug, Deserialize)]
struct BroadcastRequest {
    command: String,
}

async fn broadcast(
    State(state): State<FleetRouteState>,
    Json(request): Json<BroadcastRequest>,
) -> impl IntoResponse {
    let envelope = serde_json::json!({ "type": "command", "command": request.command }).to_string();
    let report = state.coordinator.broadcast(&envelope).await;
    Json(serde_json::json!({
        "success": true,
        "delivered": report.delivered,
        "fallback": report.fallback,
        "failures": report.failures,
    }))
}
