//! Packet listener registry with parent delegation.
//!
//! Every transport channel owns a registry that is chained to the owning
//! server's or client's global registry: channel-local listeners are tried
//! first, and only when the local registry has no listeners for a channel id
//! does the lookup fall through to the parent.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::warn;

use flotilla_wire::Packet;

use crate::channel::TransportChannel;
use crate::error::NetError;

/// Listener for packets on one application channel id.
#[async_trait]
pub trait PacketListener: Send + Sync {
    async fn handle(
        &self,
        channel: &Arc<TransportChannel>,
        packet: &Packet,
    ) -> Result<(), NetError>;
}

/// Mapping from packet channel id to the listeners handling that id.
///
/// Registration and removal are safe while dispatch is running on other
/// tasks; dispatch always operates on a snapshot of the listener set taken
/// at lookup time.
#[derive(Default)]
pub struct PacketListenerRegistry {
    parent: Option<Arc<PacketListenerRegistry>>,
    listeners: DashMap<i32, Vec<Arc<dyn PacketListener>>>,
}

impl PacketListenerRegistry {
    /// Creates a root registry without a parent.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry chained to `parent`.
    pub fn with_parent(parent: Arc<PacketListenerRegistry>) -> Self {
        Self {
            parent: Some(parent),
            listeners: DashMap::new(),
        }
    }

    /// Registers a listener for `channel_id`.
    pub fn add_listener(&self, channel_id: i32, listener: Arc<dyn PacketListener>) {
        self.listeners.entry(channel_id).or_default().push(listener);
    }

    /// Removes all listeners registered for `channel_id` locally.
    pub fn remove_listeners(&self, channel_id: i32) {
        self.listeners.remove(&channel_id);
    }

    /// Removes every local listener.
    pub fn clear(&self) {
        self.listeners.clear();
    }

    /// Whether this registry (ignoring the parent) has listeners for the id.
    pub fn has_listeners(&self, channel_id: i32) -> bool {
        self.listeners
            .get(&channel_id)
            .map(|entry| !entry.is_empty())
            .unwrap_or(false)
    }

    /// Snapshot of the listeners responsible for `channel_id`, falling
    /// through to the parent when the local registry has none.
    fn listeners_for(&self, channel_id: i32) -> Vec<Arc<dyn PacketListener>> {
        let local: Vec<_> = self
            .listeners
            .get(&channel_id)
            .map(|entry| entry.clone())
            .unwrap_or_default();
        if !local.is_empty() {
            return local;
        }
        match &self.parent {
            Some(parent) => parent.listeners_for(channel_id),
            None => Vec::new(),
        }
    }

    /// Dispatches `packet` to every responsible listener.
    ///
    /// Listener errors are logged and do not prevent the remaining
    /// listeners from running.
    pub async fn dispatch(&self, channel: &Arc<TransportChannel>, packet: &Packet) {
        for listener in self.listeners_for(packet.channel_id()) {
            if let Err(error) = listener.handle(channel, packet).await {
                warn!(
                    channel = channel.id(),
                    packet_channel = packet.channel_id(),
                    "packet listener failed: {error}"
                );
            }
        }
    }
}
