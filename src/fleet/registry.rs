//! Swarm registry — per-worker transport channel bindings.
//!
//! Bindings converge with the active worker set within one sweep interval:
//! the registry's own sweep pass drops bindings whose channel is no longer
//! open or whose worker has left the fleet.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::channels::{ChannelState, CommandChannel};

/// A worker's transport binding.
#[derive(Clone)]
pub struct ChannelBinding {
    pub worker_id: String,
    pub channel: Arc<dyn CommandChannel>,
    pub registered_at: DateTime<Utc>,
}

impl ChannelBinding {
    pub fn state(&self) -> ChannelState {
        self.channel.state()
    }
}

/// Registry of channel bindings, one per worker.
#[derive(Default)]
pub struct SwarmRegistry {
    bindings: HashMap<String, ChannelBinding>,
}

impl SwarmRegistry {
    /// Bind a channel to a worker. Idempotent per worker id: an existing
    /// binding is kept as-is.
    pub fn register(&mut self, worker_id: &str, channel: Arc<dyn CommandChannel>) -> bool {
        if self.bindings.contains_key(worker_id) {
            debug!(worker_id, "Channel already bound, keeping existing binding");
            return false;
        }
        info!(worker_id, state = %channel.state(), "Channel bound");
        self.bindings.insert(
            worker_id.to_string(),
            ChannelBinding {
                worker_id: worker_id.to_string(),
                channel,
                registered_at: Utc::now(),
            },
        );
        true
    }

    /// Remove a worker's binding. When the channel still reports OPEN, it
    /// is returned so the caller can issue the close outside the store
    /// lock — resource release on every exit path.
    pub fn unregister(&mut self, worker_id: &str) -> Option<Arc<dyn CommandChannel>> {
        let binding = self.bindings.remove(worker_id)?;
        debug!(worker_id, "Channel binding removed");
        match binding.state() {
            ChannelState::Open => Some(binding.channel),
            _ => None,
        }
    }

    /// The worker's channel, only if it currently reports OPEN.
    pub fn open_channel(&self, worker_id: &str) -> Option<Arc<dyn CommandChannel>> {
        let binding = self.bindings.get(worker_id)?;
        binding.state().is_open().then(|| Arc::clone(&binding.channel))
    }

    pub fn get(&self, worker_id: &str) -> Option<&ChannelBinding> {
        self.bindings.get(worker_id)
    }

    pub fn contains(&self, worker_id: &str) -> bool {
        self.bindings.contains_key(worker_id)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Channel-state sweep pass: drop every binding that is not OPEN or
    /// whose worker is no longer active. Returns the number of bindings
    /// removed and any channels that still need a close call.
    pub fn sweep(
        &mut self,
        is_active: impl Fn(&str) -> bool,
    ) -> (usize, Vec<Arc<dyn CommandChannel>>) {
        let stale: Vec<String> = self
            .bindings
            .iter()
            .filter(|(id, binding)| !binding.state().is_open() || !is_active(id))
            .map(|(id, _)| id.clone())
            .collect();

        let mut to_close = Vec::new();
        for worker_id in &stale {
            debug!(worker_id = %worker_id, "Sweeping stale channel binding");
            if let Some(channel) = self.unregister(worker_id) {
                to_close.push(channel);
            }
        }
        (stale.len(), to_close)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    use crate::error::ChannelError;

    struct StubChannel {
        state: Mutex<ChannelState>,
        closed: Mutex<bool>,
    }

    impl StubChannel {
        fn new(state: ChannelState) -> Arc<Self> {
            Arc::new(Self {
                state: Mutex::new(state),
                closed: Mutex::new(false),
            })
        }
    }

    #[async_trait]
    impl CommandChannel for StubChannel {
        fn state(&self) -> ChannelState {
            *self.state.lock().unwrap()
        }
        async fn send(&self, _text: &str) -> Result<(), ChannelError> {
            Ok(())
        }
        async fn close(&self) {
            *self.state.lock().unwrap() = ChannelState::Closed;
            *self.closed.lock().unwrap() = true;
        }
    }

    #[test]
    fn register_is_idempotent_per_worker() {
        let mut registry = SwarmRegistry::default();
        assert!(registry.register("w1", StubChannel::new(ChannelState::Open)));
        assert!(!registry.register("w1", StubChannel::new(ChannelState::Open)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn unregister_returns_open_channels_for_close() {
        let mut registry = SwarmRegistry::default();
        registry.register("open", StubChannel::new(ChannelState::Open));
        registry.register("closed", StubChannel::new(ChannelState::Closed));

        assert!(registry.unregister("open").is_some());
        assert!(registry.unregister("closed").is_none());
        assert!(registry.unregister("ghost").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn open_channel_filters_by_state() {
        let mut registry = SwarmRegistry::default();
        registry.register("w1", StubChannel::new(ChannelState::Closing));
        assert!(registry.open_channel("w1").is_none());

        let mut registry = SwarmRegistry::default();
        registry.register("w1", StubChannel::new(ChannelState::Open));
        assert!(registry.open_channel("w1").is_some());
    }

    #[test]
    fn sweep_drops_non_open_and_unowned_bindings() {
        let mut registry = SwarmRegistry::default();
        registry.register("live", StubChannel::new(ChannelState::Open));
        registry.register("stale", StubChannel::new(ChannelState::Closed));
        registry.register("gone", StubChannel::new(ChannelState::Open));

        // "gone" is no longer an active worker; its open channel must be
        // handed back for closing.
        let (removed, to_close) = registry.sweep(|id| id != "gone");
        assert_eq!(removed, 2);
        assert_eq!(to_close.len(), 1);
        assert!(registry.contains("live"));
        assert_eq!(registry.len(), 1);
    }
}
