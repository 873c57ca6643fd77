//! Transport channel abstraction for command delivery.

pub mod ws;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ChannelError;

/// Transport channel state, mirroring WebSocket ready states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl ChannelState {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }
}

impl std::fmt::Display for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        write!(f, "{s}")
    }
}

/// A per-worker transport channel.
#[async_trait]
pub trait CommandChannel: Send + Sync {
    /// Current channel state.
    fn state(&self) -> ChannelState;

    /// Send a command string. Non-open channels fail with a structured
    /// reason; the failure never evicts the worker.
    async fn send(&self, text: &str) -> Result<(), ChannelError>;

    /// Request channel close. Idempotent.
    async fn close(&self);
}
