//! Heartbeat tracking and canonical fleet membership.
//!
//! Two stores, one invariant: a worker belongs to [`ActiveWorkerSet`] iff
//! it has a record in [`HeartbeatStore`]. Both are plain maps mutated only
//! under the coordinator's lock; divergence (from code bypassing the
//! coordinator) is repaired by the sweep's orphan pass.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::session::WorkerHandle;

/// Last-seen bookkeeping for one worker.
#[derive(Clone)]
pub struct HeartbeatRecord {
    pub last_seen: DateTime<Utc>,
    pub worker: Arc<dyn WorkerHandle>,
}

/// Per-worker last-seen timestamps.
#[derive(Default)]
pub struct HeartbeatStore {
    records: HashMap<String, HeartbeatRecord>,
}

impl HeartbeatStore {
    /// Create a record stamped with the current time.
    pub fn insert(&mut self, worker: Arc<dyn WorkerHandle>) {
        let name = worker.name().to_string();
        self.records.insert(
            name,
            HeartbeatRecord {
                last_seen: Utc::now(),
                worker,
            },
        );
    }

    /// Refresh last-seen. Unknown ids are a no-op.
    pub fn touch(&mut self, worker_id: &str) -> bool {
        match self.records.get_mut(worker_id) {
            Some(record) => {
                record.last_seen = Utc::now();
                true
            }
            None => {
                debug!(worker_id, "Touch for unknown worker ignored");
                false
            }
        }
    }

    pub fn remove(&mut self, worker_id: &str) -> Option<HeartbeatRecord> {
        self.records.remove(worker_id)
    }

    pub fn contains(&self, worker_id: &str) -> bool {
        self.records.contains_key(worker_id)
    }

    pub fn get(&self, worker_id: &str) -> Option<&HeartbeatRecord> {
        self.records.get(worker_id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Worker ids whose heartbeat is older than `timeout` at `now`.
    pub fn stale(&self, now: DateTime<Utc>, timeout: Duration) -> Vec<String> {
        let timeout_ms = timeout.as_millis() as i64;
        self.records
            .iter()
            .filter(|(_, record)| {
                now.signed_duration_since(record.last_seen).num_milliseconds() > timeout_ms
            })
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Last-seen timestamps keyed by worker id, for snapshots.
    pub fn last_seen_map(&self) -> HashMap<String, DateTime<Utc>> {
        self.records
            .iter()
            .map(|(id, record)| (id.clone(), record.last_seen))
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn set_last_seen(&mut self, worker_id: &str, last_seen: DateTime<Utc>) {
        if let Some(record) = self.records.get_mut(worker_id) {
            record.last_seen = last_seen;
        }
    }
}

/// Canonical membership of currently-live workers, keyed by name.
#[derive(Default)]
pub struct ActiveWorkerSet {
    workers: HashMap<String, Arc<dyn WorkerHandle>>,
}

impl ActiveWorkerSet {
    /// Insert a worker. Returns false if it was already a member.
    pub fn insert(&mut self, worker: Arc<dyn WorkerHandle>) -> bool {
        let name = worker.name().to_string();
        self.workers.insert(name, worker).is_none()
    }

    pub fn remove(&mut self, worker_id: &str) -> Option<Arc<dyn WorkerHandle>> {
        self.workers.remove(worker_id)
    }

    pub fn contains(&self, worker_id: &str) -> bool {
        self.workers.contains_key(worker_id)
    }

    pub fn get(&self, worker_id: &str) -> Option<&Arc<dyn WorkerHandle>> {
        self.workers.get(worker_id)
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.workers.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Arc<dyn WorkerHandle>)> {
        self.workers.iter()
    }

    pub fn handles(&self) -> Vec<Arc<dyn WorkerHandle>> {
        self.workers.values().cloned().collect()
    }
}
