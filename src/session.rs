//! Worker session seam — what the coordinator needs from a session.
//!
//! Worker sessions are owned by per-worker logic outside this crate. The
//! coordinator holds only a handle for bookkeeping, stats aggregation and
//! in-process command delivery, plus a stream of lifecycle signals.

use async_trait::async_trait;

use crate::error::ChannelError;

/// Lifecycle signals emitted by a worker session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// The session ended (transport dropped).
    Disconnected,
    /// The session was forcibly removed by the remote side.
    Kicked,
    /// In-session death. Recoverable — the worker respawns and stays a
    /// fleet member; only its heartbeat is refreshed.
    Died,
}

impl SessionEvent {
    /// Hard terminations trigger the full eviction cascade. Death does not.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Kicked)
    }
}

impl std::fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Kicked => "kicked",
            Self::Died => "died",
        };
        write!(f, "{s}")
    }
}

/// Handle to a live worker session.
#[async_trait]
pub trait WorkerHandle: Send + Sync {
    /// Unique worker name. This is the worker's fleet identity.
    fn name(&self) -> &str;

    /// Read-only stats blob for fleet-wide aggregation.
    fn stats(&self) -> serde_json::Value {
        serde_json::Value::Null
    }

    /// In-process command delivery, used when the worker has no open
    /// transport channel.
    async fn deliver(&self, command: &str) -> Result<(), ChannelError>;
}
