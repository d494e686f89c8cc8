//! Lifecycle callbacks for transport channels.

use std::sync::Arc;

use async_trait::async_trait;

use flotilla_wire::Packet;

use crate::channel::TransportChannel;

/// Factory producing one handler per established channel.
///
/// Servers and clients take a factory rather than a shared handler so each
/// channel exclusively owns its collaborator, as required by the lifecycle
/// contract. The handler can still be replaced later through
/// [`TransportChannel::set_handler`].
pub type ChannelHandlerFactory = Arc<dyn Fn() -> Arc<dyn ChannelHandler> + Send + Sync>;

/// External collaborator notified about channel lifecycle events.
///
/// The callbacks fire in a fixed order for every channel, on both the
/// accepting and the dialing side: `handle_channel_initialize` once the
/// channel is created and registered, `handle_packet_receive` for every
/// decoded packet, and `handle_channel_close` exactly once on disconnect,
/// before the socket is released and the channel deregistered.
#[async_trait]
pub trait ChannelHandler: Send + Sync {
    /// Called once the channel is created and registered.
    async fn handle_channel_initialize(&self, channel: &Arc<TransportChannel>);

    /// Called for every decoded packet before listener dispatch.
    ///
    /// Returning `false` consumes the packet early and suppresses listener
    /// dispatch entirely.
    async fn handle_packet_receive(
        &self,
        _channel: &Arc<TransportChannel>,
        _packet: &Packet,
    ) -> bool {
        true
    }

    /// Called exactly once when the channel disconnects.
    async fn handle_channel_close(&self, channel: &Arc<TransportChannel>);
}

/// Handler that ignores every lifecycle event.
#[derive(Debug, Default)]
pub struct NoopChannelHandler;

#[async_trait]
impl ChannelHandler for NoopChannelHandler {
    async fn handle_channel_initialize(&self, _channel: &Arc<TransportChannel>) {}

    async fn handle_channel_close(&self, _channel: &Arc<TransportChannel>) {}
}
