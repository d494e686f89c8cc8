//! Dialing side of the transport.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::TlsConnector;
use tracing::{info, warn};

use flotilla_wire::Packet;

use crate::channel::TransportChannel;
use crate::connection::ChannelRuntime;
use crate::dispatcher::PacketDispatcher;
use crate::handler::ChannelHandlerFactory;
use crate::registry::PacketListenerRegistry;
use crate::tls::TlsSettings;
use crate::NetError;

const CONNECT_TIMEOUT: Duration = Duration::from_millis(2500);

/// A transport client that can hold any number of outgoing connections.
pub struct NetworkClient {
    runtime: Arc<ChannelRuntime>,
    tls_connector: Option<TlsConnector>,
}

impl NetworkClient {
    /// Creates a plaintext client.
    pub fn new(handler_factory: ChannelHandlerFactory) -> Self {
        Self::build(handler_factory, None)
    }

    /// Creates a TLS client from the given settings.
    pub fn with_tls(
        handler_factory: ChannelHandlerFactory,
        tls: &TlsSettings,
    ) -> Result<Self, NetError> {
        let config = tls.client_config()?;
        Ok(Self::build(
            handler_factory,
            Some(TlsConnector::from(Arc::new(config))),
        ))
    }

    fn build(handler_factory: ChannelHandlerFactory, tls_connector: Option<TlsConnector>) -> Self {
        let registry = Arc::new(PacketListenerRegistry::new());
        let dispatcher = Arc::new(PacketDispatcher::with_default_size());
        Self {
            runtime: Arc::new(ChannelRuntime::new(registry, dispatcher, handler_factory)),
            tls_connector,
        }
    }

    /// The client-wide packet listener registry, shared by all channels
    /// as their fallback.
    pub fn packet_registry(&self) -> &Arc<PacketListenerRegistry> {
        &self.runtime.registry
    }

    /// Connects to `host:port`, reporting success as a boolean.
    ///
    /// All failure modes, including the connect timeout, are logged here
    /// and collapse to `false`.
    pub async fn connect(&self, host: &str, port: u16) -> bool {
        match timeout(CONNECT_TIMEOUT, self.try_connect(host, port)).await {
            Ok(Ok(channel)) => {
                info!("🔗 Connected to {}:{} as channel {}", host, port, channel.id());
                true
            }
            Ok(Err(e)) => {
                warn!("Connection to {}:{} failed: {}", host, port, e);
                false
            }
            Err(_) => {
                warn!(
                    "Connection to {}:{} timed out after {:?}",
                    host, port, CONNECT_TIMEOUT
                );
                false
            }
        }
    }

    async fn try_connect(&self, host: &str, port: u16) -> Result<Arc<TransportChannel>, NetError> {
        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;
        let server_addr = stream.peer_addr()?;
        let local_addr = stream.local_addr()?;

        let channel = match &self.tls_connector {
            Some(connector) => {
                let server_name = ServerName::try_from(host.to_string())
                    .map_err(|e| NetError::Tls(e.to_string()))?;
                let tls_stream = connector.connect(server_name, stream).await?;
                self.runtime
                    .install(Box::new(tls_stream), server_addr, local_addr, true)
                    .await
            }
            None => {
                self.runtime
                    .install(Box::new(stream), server_addr, local_addr, true)
                    .await
            }
        };
        Ok(channel)
    }

    /// All currently open channels.
    pub fn channels(&self) -> Vec<Arc<TransportChannel>> {
        self.runtime
            .channels
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Sends a packet on every open channel.
    pub async fn send_packet_to_all(&self, packet: &Packet) {
        for channel in self.channels() {
            if let Err(e) = channel.send_packet(packet).await {
                warn!(channel = channel.id(), "Broadcast skipped channel: {}", e);
            }
        }
    }

    /// Closes all open channels.
    pub fn shutdown(&self) {
        for entry in self.runtime.channels.iter() {
            entry.value().close();
        }
    }
}
