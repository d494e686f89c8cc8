//! Transport channel: one established connection and its lifecycle.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::debug;
use uuid::Uuid;

use flotilla_wire::{encode_frame, Packet};

use crate::error::NetError;
use crate::handler::ChannelHandler;
use crate::registry::PacketListenerRegistry;

/// How long [`TransportChannel::send_query`] waits for a response.
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Lifecycle state of a transport channel.
///
/// The only legal transitions are `Connecting → Open → Closing → Closed`,
/// triggered by the lifecycle callbacks; socket-state probing is never used
/// to infer closure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChannelState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl ChannelState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => ChannelState::Connecting,
            1 => ChannelState::Open,
            2 => ChannelState::Closing,
            _ => ChannelState::Closed,
        }
    }
}

/// Instruction for the channel's writer task.
pub(crate) enum WriterCommand {
    /// Write one already-encoded frame.
    Frame(Bytes),
    /// Flush pending writes and shut the socket down.
    Shutdown,
}

/// One established connection, either accepted or dialed.
///
/// The channel id identifies the connection itself and is unrelated to
/// [`Packet::channel_id`], which is an application routing key. Ids are
/// assigned monotonically by the owning server or client context and are
/// never reused across connections.
pub struct TransportChannel {
    id: u64,
    server_addr: SocketAddr,
    client_addr: SocketAddr,
    client_provided: bool,
    state: AtomicU8,
    outbound: mpsc::Sender<WriterCommand>,
    packet_registry: Arc<PacketListenerRegistry>,
    handler: RwLock<Arc<dyn ChannelHandler>>,
    pending_queries: DashMap<Uuid, oneshot::Sender<Packet>>,
}

impl TransportChannel {
    pub(crate) fn new(
        id: u64,
        server_addr: SocketAddr,
        client_addr: SocketAddr,
        client_provided: bool,
        packet_registry: Arc<PacketListenerRegistry>,
        handler: Arc<dyn ChannelHandler>,
        outbound: mpsc::Sender<WriterCommand>,
    ) -> Self {
        Self {
            id,
            server_addr,
            client_addr,
            client_provided,
            state: AtomicU8::new(ChannelState::Connecting as u8),
            outbound,
            packet_registry,
            handler: RwLock::new(handler),
            pending_queries: DashMap::new(),
        }
    }

    /// Process-unique identifier of this connection.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }

    pub fn client_addr(&self) -> SocketAddr {
        self.client_addr
    }

    /// True when this side dialed the connection, false when it accepted.
    pub fn is_client_provided(&self) -> bool {
        self.client_provided
    }

    pub fn state(&self) -> ChannelState {
        ChannelState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// The channel-local listener registry, chained to the global one.
    pub fn packet_registry(&self) -> &Arc<PacketListenerRegistry> {
        &self.packet_registry
    }

    /// The current lifecycle handler of this channel.
    pub fn handler(&self) -> Arc<dyn ChannelHandler> {
        self.handler.read().expect("handler lock poisoned").clone()
    }

    /// Replaces the lifecycle handler.
    pub fn set_handler(&self, handler: Arc<dyn ChannelHandler>) {
        *self.handler.write().expect("handler lock poisoned") = handler;
    }

    /// Sends a packet on this channel.
    ///
    /// The encoded frame is enqueued on the channel's outbound queue; a
    /// single writer task drains that queue, so writes are strictly ordered
    /// no matter which task calls this.
    pub async fn send_packet(&self, packet: &Packet) -> Result<(), NetError> {
        let payload = packet.encode();
        let mut frame = BytesMut::with_capacity(payload.len() + 5);
        encode_frame(&payload, &mut frame);

        self.outbound
            .send(WriterCommand::Frame(frame.freeze()))
            .await
            .map_err(|_| NetError::ChannelClosed(self.id))
    }

    /// Sends a packet and waits for the response carrying the same
    /// correlation id.
    ///
    /// Response packets are intercepted on the receive path before listener
    /// dispatch. Waiting is bounded by [`QUERY_TIMEOUT`].
    pub async fn send_query(&self, packet: &Packet) -> Result<Packet, NetError> {
        let correlation_id = packet.correlation_id();
        let (tx, rx) = oneshot::channel();
        self.pending_queries.insert(correlation_id, tx);

        if let Err(error) = self.send_packet(packet).await {
            self.pending_queries.remove(&correlation_id);
            return Err(error);
        }

        match timeout(QUERY_TIMEOUT, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => {
                // Writer side dropped, the channel is going away.
                Err(NetError::ChannelClosed(self.id))
            }
            Err(_) => {
                self.pending_queries.remove(&correlation_id);
                Err(NetError::QueryTimeout(QUERY_TIMEOUT))
            }
        }
    }

    /// Completes a pending query if `packet` is the awaited response.
    ///
    /// Returns true when the packet was consumed by a waiting query and
    /// must not reach listener dispatch.
    pub(crate) fn complete_query(&self, packet: &Packet) -> bool {
        match self.pending_queries.remove(&packet.correlation_id()) {
            Some((_, waiter)) => {
                let _ = waiter.send(packet.clone());
                true
            }
            None => false,
        }
    }

    /// Closes the channel. Idempotent; pending writes are flushed first.
    pub fn close(&self) {
        if matches!(self.state(), ChannelState::Closing | ChannelState::Closed) {
            return;
        }
        debug!(channel = self.id, "closing transport channel");
        match self.outbound.try_send(WriterCommand::Shutdown) {
            Ok(()) | Err(mpsc::error::TrySendError::Closed(_)) => {}
            // Queue full: pending writes drain first, then the shutdown.
            Err(mpsc::error::TrySendError::Full(command)) => {
                let outbound = self.outbound.clone();
                tokio::spawn(async move {
                    let _ = outbound.send(command).await;
                });
            }
        }
    }

    pub(crate) fn mark_open(&self) {
        let _ = self.state.compare_exchange(
            ChannelState::Connecting as u8,
            ChannelState::Open as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Transitions to `Closing`. Returns true only for the transition that
    /// actually won, which is the one allowed to fire the close callback
    /// and deregister the channel.
    pub(crate) fn begin_close(&self) -> bool {
        loop {
            let current = self.state.load(Ordering::Acquire);
            if current >= ChannelState::Closing as u8 {
                return false;
            }
            if self
                .state
                .compare_exchange(
                    current,
                    ChannelState::Closing as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                return true;
            }
        }
    }

    pub(crate) fn mark_closed(&self) {
        self.state
            .store(ChannelState::Closed as u8, Ordering::Release);
    }
}

impl std::fmt::Debug for TransportChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportChannel")
            .field("id", &self.id)
            .field("server_addr", &self.server_addr)
            .field("client_addr", &self.client_addr)
            .field("client_provided", &self.client_provided)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::handler::NoopChannelHandler;

    /// Builds a detached channel plus the receiving end of its outbound
    /// queue, without any socket behind it.
    pub(crate) fn detached_channel(
        id: u64,
        registry: Arc<PacketListenerRegistry>,
    ) -> (Arc<TransportChannel>, mpsc::Receiver<WriterCommand>) {
        let (tx, rx) = mpsc::channel(16);
        let channel = Arc::new(TransportChannel::new(
            id,
            "127.0.0.1:7070".parse().unwrap(),
            "127.0.0.1:50000".parse().unwrap(),
            false,
            registry,
            Arc::new(NoopChannelHandler),
            tx,
        ));
        channel.mark_open();
        (channel, rx)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::detached_channel;
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct CountingListener(Arc<AtomicUsize>);

    #[async_trait]
    impl crate::registry::PacketListener for CountingListener {
        async fn handle(
            &self,
            _channel: &Arc<TransportChannel>,
            _packet: &Packet,
        ) -> Result<(), NetError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn state_machine_transitions_once() {
        let registry = Arc::new(PacketListenerRegistry::new());
        let (channel, _rx) = detached_channel(1, registry);

        assert_eq!(channel.state(), ChannelState::Open);
        assert!(channel.begin_close());
        assert!(!channel.begin_close(), "second close must not win");
        channel.mark_closed();
        assert_eq!(channel.state(), ChannelState::Closed);
    }

    #[tokio::test]
    async fn local_listeners_shadow_the_parent() {
        let parent = Arc::new(PacketListenerRegistry::new());
        let parent_hits = Arc::new(AtomicUsize::new(0));
        parent.add_listener(9, Arc::new(CountingListener(parent_hits.clone())));

        let local = Arc::new(PacketListenerRegistry::with_parent(parent.clone()));
        let local_hits = Arc::new(AtomicUsize::new(0));
        local.add_listener(9, Arc::new(CountingListener(local_hits.clone())));

        let (channel, _rx) = detached_channel(2, local.clone());
        let packet = Packet::empty(9);

        // Local listeners win; the parent is shadowed.
        local.dispatch(&channel, &packet).await;
        assert_eq!(local_hits.load(Ordering::SeqCst), 1);
        assert_eq!(parent_hits.load(Ordering::SeqCst), 0);

        // Without local listeners the lookup falls through.
        local.remove_listeners(9);
        local.dispatch(&channel, &packet).await;
        assert_eq!(parent_hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn query_response_is_intercepted() {
        let registry = Arc::new(PacketListenerRegistry::new());
        let (channel, mut rx) = detached_channel(3, registry);

        let request = Packet::empty(4);
        let response = Packet::response_to(&request, serde_json::json!({"ok": true}), Bytes::new());

        let waiter = {
            let channel = channel.clone();
            let request = request.clone();
            tokio::spawn(async move { channel.send_query(&request).await })
        };

        // The encoded request must show up on the outbound queue.
        assert!(matches!(rx.recv().await, Some(WriterCommand::Frame(_))));

        assert!(channel.complete_query(&response));
        let received = waiter.await.unwrap().unwrap();
        assert_eq!(received.correlation_id(), request.correlation_id());

        // A second packet with the same correlation id is no longer awaited.
        assert!(!channel.complete_query(&response));
    }
}
