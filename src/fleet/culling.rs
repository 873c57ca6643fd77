//! Event-driven culling — immediate eviction on terminal lifecycle signals.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::fleet::FleetCoordinator;
use crate::session::SessionEvent;

/// Spawn a listener draining one worker session's lifecycle events.
///
/// Hard terminations (disconnect, kick) evict the worker synchronously and
/// end the listener. An in-session death is explicitly not a termination:
/// the worker stays a member and only its heartbeat is refreshed.
pub fn spawn_event_listener(
    coordinator: Arc<FleetCoordinator>,
    worker_id: String,
    mut events: mpsc::Receiver<SessionEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            coordinator.handle_event(&worker_id, event).await;
            if event.is_terminal() {
                break;
            }
        }
        debug!(worker_id = %worker_id, "Event listener stopped");
    })
}
