//! Accepting side of the transport.

use std::net::SocketAddr;
use std::sync::Arc;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, Mutex};
use tokio_rustls::TlsAcceptor;
use tracing::{error, info, warn};

use flotilla_wire::Packet;

use crate::channel::TransportChannel;
use crate::connection::ChannelRuntime;
use crate::dispatcher::PacketDispatcher;
use crate::handler::ChannelHandlerFactory;
use crate::registry::PacketListenerRegistry;
use crate::tls::TlsSettings;
use crate::NetError;

/// A transport server accepting connections on any number of listeners.
///
/// All listeners feed the same channel set, listener registry and
/// dispatcher, so a packet arrives the same way no matter which port it
/// came in on.
pub struct NetworkServer {
    runtime: Arc<ChannelRuntime>,
    tls_acceptor: Option<TlsAcceptor>,
    shutdown: broadcast::Sender<()>,
    bound: Mutex<Vec<SocketAddr>>,
}

impl NetworkServer {
    /// Creates a plaintext server.
    pub fn new(handler_factory: ChannelHandlerFactory) -> Self {
        Self::build(handler_factory, None)
    }

    /// Creates a TLS server from the given settings.
    pub fn with_tls(
        handler_factory: ChannelHandlerFactory,
        tls: &TlsSettings,
    ) -> Result<Self, NetError> {
        let config = tls.server_config()?;
        Ok(Self::build(
            handler_factory,
            Some(TlsAcceptor::from(Arc::new(config))),
        ))
    }

    fn build(handler_factory: ChannelHandlerFactory, tls_acceptor: Option<TlsAcceptor>) -> Self {
        let registry = Arc::new(PacketListenerRegistry::new());
        let dispatcher = Arc::new(PacketDispatcher::with_default_size());
        let (shutdown, _) = broadcast::channel(1);
        Self {
            runtime: Arc::new(ChannelRuntime::new(registry, dispatcher, handler_factory)),
            tls_acceptor,
            shutdown,
            bound: Mutex::new(Vec::new()),
        }
    }

    /// The server-wide packet listener registry, shared by all channels
    /// as their fallback.
    pub fn packet_registry(&self) -> &Arc<PacketListenerRegistry> {
        &self.runtime.registry
    }

    /// Binds a listener and starts accepting on it.
    ///
    /// Returns false if the bind failed; the server keeps running with
    /// whatever listeners it already has.
    pub async fn add_listener(&self, addr: SocketAddr) -> bool {
        let listener = match bind_listener(addr) {
            Ok(listener) => listener,
            Err(e) => {
                error!("❌ Failed to bind listener on {}: {}", addr, e);
                return false;
            }
        };
        let local_addr = match listener.local_addr() {
            Ok(local) => local,
            Err(e) => {
                error!("❌ Failed to resolve bound address for {}: {}", addr, e);
                return false;
            }
        };
        self.bound.lock().await.push(local_addr);
        info!("✅ Transport listener bound on {}", local_addr);

        let runtime = self.runtime.clone();
        let tls_acceptor = self.tls_acceptor.clone();
        let mut shutdown_rx = self.shutdown.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Transport listener on {} shutting down", local_addr);
                        break;
                    }
                    accepted = listener.accept() => {
                        let (stream, peer) = match accepted {
                            Ok(pair) => pair,
                            Err(e) => {
                                warn!("Accept failed on {}: {}", local_addr, e);
                                continue;
                            }
                        };
                        let runtime = runtime.clone();
                        let tls_acceptor = tls_acceptor.clone();
                        tokio::spawn(async move {
                            match tls_acceptor {
                                Some(acceptor) => match acceptor.accept(stream).await {
                                    Ok(tls_stream) => {
                                        runtime
                                            .install(Box::new(tls_stream), local_addr, peer, false)
                                            .await;
                                    }
                                    Err(e) => {
                                        warn!("TLS handshake with {} failed: {}", peer, e);
                                    }
                                },
                                None => {
                                    runtime.install(Box::new(stream), local_addr, peer, false).await;
                                }
                            }
                        });
                    }
                }
            }
        });
        true
    }

    /// Addresses of all bound listeners, with ephemeral ports resolved.
    pub async fn bound_addresses(&self) -> Vec<SocketAddr> {
        self.bound.lock().await.clone()
    }

    /// All currently open channels.
    pub fn channels(&self) -> Vec<Arc<TransportChannel>> {
        self.runtime
            .channels
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn channel_count(&self) -> usize {
        self.runtime.channels.len()
    }

    /// Broadcasts a packet to every open channel. Channels that fail to
    /// accept the packet are skipped.
    pub async fn send_packet_to_all(&self, packet: &Packet) {
        for channel in self.channels() {
            if let Err(e) = channel.send_packet(packet).await {
                warn!(channel = channel.id(), "Broadcast skipped channel: {}", e);
            }
        }
    }

    /// Stops all listeners and closes every open channel.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
        for entry in self.runtime.channels.iter() {
            entry.value().close();
        }
        info!("🛑 Transport server shut down");
    }
}

fn bind_listener(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let domain = if addr.is_ipv6() {
        Domain::IPV6
    } else {
        Domain::IPV4
    };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;

    let std_listener: std::net::TcpListener = socket.into();
    std_listener.set_nonblocking(true)?;
    TcpListener::from_std(std_listener)
}
