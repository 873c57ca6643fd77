//! Fleet coordinator — registration and eviction fan-out across all stores.
//!
//! All four stores live behind a single async mutex, so every compound
//! mutation ("pop from queue and mark assigned", the eviction cascade) is
//! one critical section. Nothing awaits channel I/O while the lock is
//! held; close and send calls are collected and issued after release, so
//! a slow channel can never stall the stores.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::channels::CommandChannel;
use crate::config::FleetConfig;
use crate::error::TaskError;
use crate::fleet::heartbeat::{ActiveWorkerSet, HeartbeatStore};
use crate::fleet::queue::{QueueCounts, Task, TaskQueue, TaskSpec, TaskStatus};
use crate::fleet::registry::SwarmRegistry;
use crate::fleet::sweep::SweepReport;
use crate::session::{SessionEvent, WorkerHandle};

/// All fleet stores, guarded as one critical section.
struct FleetStores {
    active: ActiveWorkerSet,
    heartbeats: HeartbeatStore,
    queue: TaskQueue,
    registry: SwarmRegistry,
}

impl FleetStores {
    /// Idempotent ensure-absent cascade for one worker: membership and
    /// heartbeat removal, task requeue, channel unbind. Returns whether the
    /// worker was present, how many tasks were requeued, and a channel that
    /// still needs a close call (issued by the caller after unlocking).
    fn evict_worker(&mut self, worker_id: &str) -> (bool, usize, Option<Arc<dyn CommandChannel>>) {
        let was_member = self.active.remove(worker_id).is_some();
        let had_heartbeat = self.heartbeats.remove(worker_id).is_some();
        let requeued = self.queue.on_worker_lost(worker_id).len();
        let channel = self.registry.unregister(worker_id);
        (was_member || had_heartbeat, requeued, channel)
    }
}

/// Read-only view of the fleet. Never blocks for long, never mutates.
#[derive(Debug, Clone, Serialize)]
pub struct FleetSnapshot {
    pub active_count: usize,
    pub per_worker_last_seen: HashMap<String, DateTime<Utc>>,
    pub queue_depth: usize,
    pub queue_counts: QueueCounts,
    pub bound_channels: usize,
}

/// A broadcast delivery that failed, reported as data instead of raised.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryFailure {
    pub worker_id: String,
    pub reason: String,
}

/// Outcome of one broadcast. Failed deliveries never evict workers —
/// eviction belongs exclusively to the event and sweep paths.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BroadcastReport {
    /// Deliveries over an open transport channel.
    pub delivered: usize,
    /// Deliveries over the in-process fallback path.
    pub fallback: usize,
    pub failures: Vec<DeliveryFailure>,
}

enum BroadcastTarget {
    Channel(Arc<dyn CommandChannel>),
    Handle(Arc<dyn WorkerHandle>),
}

/// Orchestrates heartbeats, membership, task assignment and channel
/// bindings for a fleet of worker sessions.
pub struct FleetCoordinator {
    config: FleetConfig,
    stores: Mutex<FleetStores>,
}

impl FleetCoordinator {
    pub fn new(config: FleetConfig) -> Arc<Self> {
        Arc::new(Self {
            stores: Mutex::new(FleetStores {
                active: ActiveWorkerSet::default(),
                heartbeats: HeartbeatStore::default(),
                queue: TaskQueue::new(config.max_task_failures),
                registry: SwarmRegistry::default(),
            }),
            config,
        })
    }

    pub fn config(&self) -> &FleetConfig {
        &self.config
    }

    /// Register a worker: membership entry plus a heartbeat stamped now.
    ///
    /// Idempotent — re-registering an already-present worker is a silent
    /// no-op and does not reset its heartbeat. A worker without an identity
    /// is rejected (logged, not fatal) and `false` is returned.
    pub async fn register(&self, worker: Arc<dyn WorkerHandle>) -> bool {
        if worker.name().is_empty() {
            warn!("Rejecting registration for worker without identity");
            return false;
        }
        let name = worker.name().to_string();

        let mut stores = self.stores.lock().await;
        if stores.active.contains(&name) {
            debug!(worker_id = %name, "Worker already registered");
            return true;
        }
        stores.active.insert(Arc::clone(&worker));
        stores.heartbeats.insert(worker);
        info!(worker_id = %name, active = stores.active.len(), "Worker registered");
        true
    }

    /// Remove a worker from every store. Unregistering an unknown or
    /// absent worker is a silent no-op, never an error.
    pub async fn unregister(&self, worker_id: &str) {
        self.evict(worker_id).await;
    }

    /// Refresh a worker's heartbeat. No-op for unknown ids.
    pub async fn touch(&self, worker_id: &str) {
        let mut stores = self.stores.lock().await;
        stores.heartbeats.touch(worker_id);
    }

    /// Dispatch a session lifecycle signal. Hard terminations run the full
    /// eviction cascade synchronously; an in-session death only refreshes
    /// the heartbeat — the worker stays a member.
    pub async fn handle_event(&self, worker_id: &str, event: SessionEvent) {
        if event.is_terminal() {
            info!(worker_id, event = %event, "Terminal session event, evicting");
            self.evict(worker_id).await;
        } else {
            debug!(worker_id, event = %event, "Recoverable session event, refreshing heartbeat");
            self.touch(worker_id).await;
        }
    }

    /// Eviction cascade. Every step is independently idempotent, so two
    /// concurrent triggers for the same worker (a kicked event racing a
    /// timeout sweep) resolve safely — the second is a no-op.
    ///
    /// Returns whether the worker was present in any store.
    pub async fn evict(&self, worker_id: &str) -> bool {
        let (was_present, requeued, channel) = {
            let mut stores = self.stores.lock().await;
            stores.evict_worker(worker_id)
        };
        if let Some(channel) = channel {
            channel.close().await;
        }
        if was_present {
            info!(worker_id, requeued, "Worker evicted");
        }
        was_present
    }

    // ── Task pool ───────────────────────────────────────────────────────

    /// Submit a task to the shared pool. Returns its monotonic id, or a
    /// structured validation error for malformed input.
    pub async fn submit_task(&self, spec: TaskSpec) -> Result<u64, TaskError> {
        let mut stores = self.stores.lock().await;
        stores.queue.submit(spec)
    }

    /// Assign the highest-priority queued task to `worker_id`. `None`
    /// means idle — there is nothing to do, or the worker is not a fleet
    /// member (an assigned task's worker is always in the active set).
    pub async fn assign_next(&self, worker_id: &str) -> Option<Task> {
        let mut stores = self.stores.lock().await;
        if !stores.active.contains(worker_id) {
            debug!(worker_id, "Assignment requested by unregistered worker");
            return None;
        }
        stores.queue.assign_next(worker_id)
    }

    pub async fn complete_task(&self, id: u64) -> Result<(), TaskError> {
        let mut stores = self.stores.lock().await;
        stores.queue.complete(id)
    }

    /// Fail an assigned task back into the queue (or park it when the
    /// configured failure bound is reached). Returns the resulting status.
    pub async fn fail_task(&self, id: u64) -> Result<TaskStatus, TaskError> {
        let mut stores = self.stores.lock().await;
        stores.queue.fail(id)
    }

    pub async fn task(&self, id: u64) -> Option<Task> {
        let stores = self.stores.lock().await;
        stores.queue.get(id).cloned()
    }

    // ── Channel bindings ────────────────────────────────────────────────

    /// Bind a transport channel to a worker. Idempotent per worker id. A
    /// binding for a worker that is not (or no longer) active is allowed;
    /// the sweep's channel pass reconciles it within one interval.
    pub async fn bind_channel(&self, worker_id: &str, channel: Arc<dyn CommandChannel>) -> bool {
        let mut stores = self.stores.lock().await;
        if !stores.active.contains(worker_id) {
            debug!(worker_id, "Binding channel for inactive worker, sweep will reconcile");
        }
        stores.registry.register(worker_id, channel)
    }

    /// Remove a worker's channel binding, closing the channel if open.
    pub async fn unbind_channel(&self, worker_id: &str) {
        let channel = {
            let mut stores = self.stores.lock().await;
            stores.registry.unregister(worker_id)
        };
        if let Some(channel) = channel {
            channel.close().await;
        }
    }

    /// Broadcast a command to every active worker. Open channels are
    /// preferred; a worker without one gets the in-process delivery path,
    /// so delivery degrades gracefully instead of depending on channel
    /// freshness. Per-target failures are collected, never escalated.
    pub async fn broadcast(&self, command: &str) -> BroadcastReport {
        let targets: Vec<(String, BroadcastTarget)> = {
            let stores = self.stores.lock().await;
            stores
                .active
                .iter()
                .map(|(id, handle)| {
                    let target = match stores.registry.open_channel(id) {
                        Some(channel) => BroadcastTarget::Channel(channel),
                        None => BroadcastTarget::Handle(Arc::clone(handle)),
                    };
                    (id.clone(), target)
                })
                .collect()
        };

        let mut report = BroadcastReport::default();
        for (worker_id, target) in targets {
            let (via_channel, result) = match target {
                BroadcastTarget::Channel(channel) => (true, channel.send(command).await),
                BroadcastTarget::Handle(handle) => (false, handle.deliver(command).await),
            };
            match result {
                Ok(()) if via_channel => report.delivered += 1,
                Ok(()) => report.fallback += 1,
                Err(e) => {
                    warn!(worker_id = %worker_id, error = %e, "Broadcast delivery failed");
                    report.failures.push(DeliveryFailure {
                        worker_id,
                        reason: e.to_string(),
                    });
                }
            }
        }
        debug!(
            delivered = report.delivered,
            fallback = report.fallback,
            failures = report.failures.len(),
            "Broadcast complete"
        );
        report
    }

    // ── Sweep ───────────────────────────────────────────────────────────

    /// One sweep tick: dead-by-timeout pass, orphan pass, channel pass.
    /// O(n) over registered workers; the store lock is held without any
    /// await. The returned counts are for observability only.
    pub async fn sweep(&self) -> SweepReport {
        let now = Utc::now();
        let mut report = SweepReport::default();
        let mut to_close: Vec<Arc<dyn CommandChannel>> = Vec::new();

        {
            let mut stores = self.stores.lock().await;

            // Pass 1: workers whose heartbeat timed out.
            let dead = stores.heartbeats.stale(now, self.config.heartbeat_timeout);
            for worker_id in dead {
                info!(worker_id = %worker_id, "Heartbeat timeout, evicting");
                let (_, _, channel) = stores.evict_worker(&worker_id);
                if let Some(channel) = channel {
                    to_close.push(channel);
                }
                report.dead += 1;
            }

            // Pass 2: membership entries without a heartbeat record —
            // something bypassed the coordinator. Repaired, not escalated.
            let orphans: Vec<String> = stores
                .active
                .names()
                .into_iter()
                .filter(|id| !stores.heartbeats.contains(id))
                .collect();
            for worker_id in orphans {
                debug!(worker_id = %worker_id, "Removing orphaned membership entry");
                let (_, _, channel) = stores.evict_worker(&worker_id);
                if let Some(channel) = channel {
                    to_close.push(channel);
                }
                report.orphans += 1;
            }

            // Pass 3: channel bindings that are not open or whose worker
            // left the fleet.
            let active: HashSet<String> = stores.active.names().into_iter().collect();
            let (swept, channels) = stores.registry.sweep(|id| active.contains(id));
            report.channels = swept;
            to_close.extend(channels);
        }

        for channel in to_close {
            channel.close().await;
        }
        report
    }

    // ── Observability ───────────────────────────────────────────────────

    /// Read-only fleet snapshot for dashboards and task producers.
    pub async fn snapshot(&self) -> FleetSnapshot {
        let stores = self.stores.lock().await;
        FleetSnapshot {
            active_count: stores.active.len(),
            per_worker_last_seen: stores.heartbeats.last_seen_map(),
            queue_depth: stores.queue.depth(),
            queue_counts: stores.queue.counts(),
            bound_channels: stores.registry.len(),
        }
    }

    /// Aggregate the numeric top-level fields of every active worker's
    /// stats blob. Non-numeric fields and broken blobs are skipped.
    pub async fn fleet_stats(&self) -> serde_json::Value {
        let handles = {
            let stores = self.stores.lock().await;
            stores.active.handles()
        };

        let mut totals = serde_json::Map::new();
        for handle in handles {
            let serde_json::Value::Object(stats) = handle.stats() else {
                continue;
            };
            for (key, value) in stats {
                if let Some(n) = value.as_f64() {
                    let current = totals.get(&key).and_then(|v| v.as_f64()).unwrap_or(0.0);
                    totals.insert(key, serde_json::Value::from(current + n));
                }
            }
        }
        serde_json::Value::Object(totals)
    }

    /// Whether a worker is currently a fleet member.
    pub async fn is_active(&self, worker_id: &str) -> bool {
        let stores = self.stores.lock().await;
        stores.active.contains(worker_id)
    }
}
