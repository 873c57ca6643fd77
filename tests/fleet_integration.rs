//! Integration tests for the fleet coordinator.
//!
//! These run against the public coordinator API with stub workers and
//! channels, using a shrunk heartbeat timeout so liveness transitions
//! happen within test time.

use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use swarm_fleet::channels::{ChannelState, CommandChannel};
use swarm_fleet::config::FleetConfig;
use swarm_fleet::error::ChannelError;
use swarm_fleet::fleet::FleetCoordinator;
use swarm_fleet::fleet::queue::{TaskSpec, TaskStatus};
use swarm_fleet::session::{SessionEvent, WorkerHandle};

/// Heartbeats older than this are considered dead in these tests.
const SHORT_TIMEOUT: Duration = Duration::from_millis(100);

fn test_config() -> FleetConfig {
    FleetConfig {
        heartbeat_timeout: SHORT_TIMEOUT,
        sweep_interval: Duration::from_millis(50),
        ..FleetConfig::default()
    }
}

struct StubWorker {
    name: String,
    delivered: StdMutex<Vec<String>>,
}

impl StubWorker {
    fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            delivered: StdMutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl WorkerHandle for StubWorker {
    fn name(&self) -> &str {
        &self.name
    }
    async fn deliver(&self, command: &str) -> Result<(), ChannelError> {
        self.delivered.lock().unwrap().push(command.to_string());
        Ok(())
    }
}

struct StubChannel {
    state: StdMutex<ChannelState>,
    closed: AtomicBool,
    sent: StdMutex<Vec<String>>,
}

impl StubChannel {
    fn open() -> Arc<Self> {
        Arc::new(Self {
            state: StdMutex::new(ChannelState::Open),
            closed: AtomicBool::new(false),
            sent: StdMutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl CommandChannel for StubChannel {
    fn state(&self) -> ChannelState {
        *self.state.lock().unwrap()
    }
    async fn send(&self, text: &str) -> Result<(), ChannelError> {
        let state = self.state();
        if !state.is_open() {
            return Err(ChannelError::NotOpen { state });
        }
        self.sent.lock().unwrap().push(text.to_string());
        Ok(())
    }
    async fn close(&self) {
        *self.state.lock().unwrap() = ChannelState::Closed;
        self.closed.store(true, Ordering::SeqCst);
    }
}

// ── Membership ───────────────────────────────────────────────────────

#[tokio::test]
async fn register_twice_keeps_one_member() {
    let fleet = FleetCoordinator::new(test_config());
    assert!(fleet.register(StubWorker::new("w1")).await);
    assert!(fleet.register(StubWorker::new("w1")).await);

    let snapshot = fleet.snapshot().await;
    assert_eq!(snapshot.active_count, 1);
    assert_eq!(snapshot.per_worker_last_seen.len(), 1);
}

#[tokio::test]
async fn register_unregister_roundtrip() {
    let fleet = FleetCoordinator::new(test_config());
    fleet.register(StubWorker::new("w1")).await;
    assert!(fleet.is_active("w1").await);

    fleet.unregister("w1").await;
    assert!(!fleet.is_active("w1").await);

    let snapshot = fleet.snapshot().await;
    assert_eq!(snapshot.active_count, 0);
    assert!(snapshot.per_worker_last_seen.is_empty());
    assert_eq!(snapshot.bound_channels, 0);
}

#[tokio::test]
async fn death_is_not_disconnection() {
    let fleet = FleetCoordinator::new(test_config());
    fleet.register(StubWorker::new("w1")).await;

    fleet.handle_event("w1", SessionEvent::Died).await;
    assert!(fleet.is_active("w1").await, "died worker must stay a member");

    fleet.handle_event("w1", SessionEvent::Kicked).await;
    assert!(!fleet.is_active("w1").await);
}

// ── Liveness / sweep ─────────────────────────────────────────────────

#[tokio::test]
async fn sweep_evicts_timed_out_worker() {
    let fleet = FleetCoordinator::new(test_config());
    fleet.register(StubWorker::new("quiet")).await;
    fleet.register(StubWorker::new("chatty")).await;

    tokio::time::sleep(SHORT_TIMEOUT + Duration::from_millis(50)).await;
    fleet.touch("chatty").await;

    let report = fleet.sweep().await;
    assert_eq!(report.dead, 1);
    assert!(!fleet.is_active("quiet").await);
    assert!(fleet.is_active("chatty").await);
}

#[tokio::test]
async fn cascading_cleanup_on_timeout() {
    let fleet = FleetCoordinator::new(test_config());
    fleet.register(StubWorker::new("w1")).await;
    fleet.register(StubWorker::new("w2")).await;

    let channel = StubChannel::open();
    fleet.bind_channel("w1", channel.clone()).await;

    let id = fleet.submit_task(TaskSpec::new("scan", 5)).await.unwrap();
    assert_eq!(fleet.assign_next("w1").await.unwrap().id, id);

    tokio::time::sleep(SHORT_TIMEOUT + Duration::from_millis(50)).await;
    fleet.touch("w2").await;
    fleet.sweep().await;

    // Worker gone from every store, its channel closed, its task requeued.
    assert!(!fleet.is_active("w1").await);
    assert!(channel.closed.load(Ordering::SeqCst));
    let snapshot = fleet.snapshot().await;
    assert!(!snapshot.per_worker_last_seen.contains_key("w1"));
    assert_eq!(snapshot.bound_channels, 0);
    assert_eq!(fleet.task(id).await.unwrap().status, TaskStatus::Queued);
    assert_eq!(fleet.assign_next("w2").await.unwrap().id, id);
}

#[tokio::test]
async fn end_to_end_lifecycle() {
    let fleet = FleetCoordinator::new(test_config());
    for name in ["a", "b", "c", "d"] {
        fleet.register(StubWorker::new(name)).await;
    }

    // D goes silent past the timeout; the others stay fresh.
    tokio::time::sleep(SHORT_TIMEOUT + Duration::from_millis(50)).await;
    for name in ["a", "b", "c"] {
        fleet.touch(name).await;
    }

    fleet.handle_event("a", SessionEvent::Disconnected).await;
    fleet.handle_event("b", SessionEvent::Kicked).await;
    fleet.handle_event("c", SessionEvent::Died).await;
    let report = fleet.sweep().await;

    assert_eq!(report.dead, 1, "only d should time out");
    assert!(!fleet.is_active("a").await);
    assert!(!fleet.is_active("b").await);
    assert!(fleet.is_active("c").await, "death is recoverable");
    assert!(!fleet.is_active("d").await);
    assert_eq!(fleet.snapshot().await.active_count, 1);
}

// ── Task pool ────────────────────────────────────────────────────────

#[tokio::test]
async fn tasks_assigned_in_priority_order() {
    let fleet = FleetCoordinator::new(test_config());
    fleet.register(StubWorker::new("w1")).await;

    fleet.submit_task(TaskSpec::new("low", 3)).await.unwrap();
    fleet.submit_task(TaskSpec::new("high", 8)).await.unwrap();
    fleet.submit_task(TaskSpec::new("mid", 5)).await.unwrap();

    let order: Vec<String> = [
        fleet.assign_next("w1").await.unwrap(),
        fleet.assign_next("w1").await.unwrap(),
        fleet.assign_next("w1").await.unwrap(),
    ]
    .into_iter()
    .map(|t| t.task_type)
    .collect();
    assert_eq!(order, ["high", "mid", "low"]);
    assert!(fleet.assign_next("w1").await.is_none());
}

#[tokio::test]
async fn tasks_survive_worker_eviction() {
    let fleet = FleetCoordinator::new(test_config());
    fleet.register(StubWorker::new("w1")).await;

    let id = fleet
        .submit_task(TaskSpec::new("survey", 7).with_payload(serde_json::json!({"area": 4})))
        .await
        .unwrap();
    fleet.assign_next("w1").await.unwrap();

    fleet.unregister("w1").await;

    // Task is back in the queue with its payload intact.
    let task = fleet.task(id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Queued);
    assert_eq!(task.payload["area"], 4);

    fleet.register(StubWorker::new("w2")).await;
    assert_eq!(fleet.assign_next("w2").await.unwrap().id, id);
}

#[tokio::test]
async fn invalid_task_specs_rejected() {
    let fleet = FleetCoordinator::new(test_config());
    assert!(fleet.submit_task(TaskSpec::new("", 5)).await.is_err());
    assert!(fleet.submit_task(TaskSpec::new("dig", 0)).await.is_err());
    assert!(fleet.submit_task(TaskSpec::new("dig", 11)).await.is_err());
    assert_eq!(fleet.snapshot().await.queue_depth, 0);
}

// ── Broadcast ────────────────────────────────────────────────────────

#[tokio::test]
async fn broadcast_uses_channels_and_fallback() {
    let fleet = FleetCoordinator::new(test_config());
    let wired = StubWorker::new("wired");
    let local = StubWorker::new("local");
    fleet.register(wired.clone()).await;
    fleet.register(local.clone()).await;

    let channel = StubChannel::open();
    fleet.bind_channel("wired", channel.clone()).await;

    let report = fleet.broadcast("regroup").await;
    assert_eq!(report.delivered, 1);
    assert_eq!(report.fallback, 1);
    assert!(report.failures.is_empty());
    assert_eq!(channel.sent.lock().unwrap().as_slice(), ["regroup"]);
    assert_eq!(local.delivered.lock().unwrap().as_slice(), ["regroup"]);
}

#[tokio::test]
async fn broadcast_failure_never_evicts() {
    struct DeafWorker;

    #[async_trait]
    impl WorkerHandle for DeafWorker {
        fn name(&self) -> &str {
            "deaf"
        }
        async fn deliver(&self, _command: &str) -> Result<(), ChannelError> {
            Err(ChannelError::NoDeliveryPath {
                worker_id: "deaf".to_string(),
            })
        }
    }

    let fleet = FleetCoordinator::new(test_config());
    fleet.register(Arc::new(DeafWorker)).await;

    let report = fleet.broadcast("hold").await;
    assert_eq!(report.delivered, 0);
    assert_eq!(report.fallback, 0);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].worker_id, "deaf");

    // Delivery failure is reported, never punished.
    assert!(fleet.is_active("deaf").await);
}

// ── Snapshot ─────────────────────────────────────────────────────────

#[tokio::test]
async fn snapshot_reflects_all_stores() {
    let fleet = FleetCoordinator::new(test_config());
    fleet.register(StubWorker::new("w1")).await;
    fleet.register(StubWorker::new("w2")).await;
    fleet.bind_channel("w1", StubChannel::open()).await;

    fleet.submit_task(TaskSpec::new("dig", 5)).await.unwrap();
    fleet.submit_task(TaskSpec::new("haul", 2)).await.unwrap();
    fleet.assign_next("w1").await.unwrap();

    let snapshot = fleet.snapshot().await;
    assert_eq!(snapshot.active_count, 2);
    assert!(snapshot.per_worker_last_seen.contains_key("w1"));
    assert!(snapshot.per_worker_last_seen.contains_key("w2"));
    assert_eq!(snapshot.queue_depth, 1);
    assert_eq!(snapshot.queue_counts.queued, 1);
    assert_eq!(snapshot.queue_counts.assigned, 1);
    assert_eq!(snapshot.bound_channels, 1);
}
