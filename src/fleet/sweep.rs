//! Periodic sweep — timer-driven detection of stale and orphaned entries.
//!
//! Liveness detection is best-effort within the configured sweep interval,
//! not instantaneous. The interval is independent of the heartbeat
//! timeout; both come from [`crate::config::FleetConfig`].

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::fleet::FleetCoordinator;

/// What one sweep tick cleaned up. Counts feed logging only — never
/// control flow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Workers evicted for a stale heartbeat.
    pub dead: usize,
    /// Membership entries that had no heartbeat record.
    pub orphans: usize,
    /// Channel bindings dropped (not open, or worker gone).
    pub channels: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.dead + self.orphans + self.channels
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// Spawn the periodic sweep loop. The first tick fires immediately.
///
/// Aborting the handle cancels the timer without leaving a partially
/// evicted worker: each eviction completes inside one lock acquisition.
pub fn spawn_sweep_loop(coordinator: Arc<FleetCoordinator>) -> JoinHandle<()> {
    let interval = coordinator.config().sweep_interval;
    tokio::spawn(async move {
        info!(interval_ms = interval.as_millis() as u64, "Sweep loop started");
        let mut tick = tokio::time::interval(interval);
        loop {
            tick.tick().await;
            let report = coordinator.sweep().await;
            if report.is_empty() {
                debug!("Sweep tick: nothing to clean");
            } else {
                info!(
                    dead = report.dead,
                    orphans = report.orphans,
                    channels = report.channels,
                    "Sweep cleaned up entries"
                );
            }
        }
    })
}
