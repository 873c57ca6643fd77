//! Error types for the fleet coordinator.

use crate::channels::ChannelState;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Task error: {0}")]
    Task(#[from] TaskError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Transport channel errors.
///
/// These travel back to callers as structured failure reasons. A failed
/// send never evicts a worker — eviction belongs exclusively to the event
/// and sweep paths.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ChannelError {
    #[error("Cannot send on channel in state {state}")]
    NotOpen { state: ChannelState },

    #[error("Send to worker {worker_id} failed: {reason}")]
    SendFailed { worker_id: String, reason: String },

    #[error("Worker {worker_id} has no in-process delivery path")]
    NoDeliveryPath { worker_id: String },
}

/// Task queue errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    #[error("Task priority {priority} out of range (expected 1..=10)")]
    PriorityOutOfRange { priority: u8 },

    #[error("Task type must not be empty")]
    EmptyType,

    #[error("Task {id} not found")]
    NotFound { id: u64 },

    #[error("Task {id} is {status}, expected assigned")]
    NotAssigned { id: u64, status: String },
}

/// Result type alias for the coordinator.
pub type Result<T> = std::result::Result<T, Error>;
