//! Configuration types.

use std::time::Duration;

/// Fleet coordinator configuration.
#[derive(Debug, Clone)]
pub struct FleetConfig {
    /// Coordinator name for identification.
    pub name: String,
    /// Heartbeat timeout (workers unseen for longer are evicted by the sweep).
    pub heartbeat_timeout: Duration,
    /// Sweep cadence, independent of the heartbeat timeout.
    pub sweep_interval: Duration,
    /// Failures before a task is parked as failed instead of requeued.
    /// `None` requeues forever and leaves retry bounding to callers.
    pub max_task_failures: Option<u32>,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            name: "swarm-fleet".to_string(),
            heartbeat_timeout: Duration::from_millis(30_000),
            sweep_interval: Duration::from_secs(5),
            max_task_failures: None,
        }
    }
}
