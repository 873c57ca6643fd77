//! Fleet coordination core: membership, liveness, task assignment and
//! channel bindings for many concurrent worker sessions.

pub mod coordinator;
pub mod culling;
pub mod heartbeat;
pub mod queue;
pub mod registry;
pub mod sweep;

pub use coordinator::{BroadcastReport, DeliveryFailure, FleetCoordinator, FleetSnapshot};
pub use culling::spawn_event_listener;
pub use sweep::{SweepReport, spawn_sweep_loop};
