//! Shared connection plumbing for accepted and dialed sockets.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use dashmap::DashMap;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use flotilla_wire::{decode_frame, Packet, DEFAULT_MAX_FRAME_LENGTH};

use crate::channel::{TransportChannel, WriterCommand};
use crate::dispatcher::PacketDispatcher;
use crate::handler::ChannelHandlerFactory;
use crate::registry::PacketListenerRegistry;

/// Capacity of each channel's outbound write queue.
const OUTBOUND_QUEUE_CAPACITY: usize = 128;

pub(crate) trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

/// Everything a live socket needs to become a [`TransportChannel`].
///
/// Shared between a server's accept loop and a client's dialing path so
/// both sides run identical framing, dispatch and teardown.
pub(crate) struct ChannelRuntime {
    pub(crate) registry: Arc<PacketListenerRegistry>,
    pub(crate) channels: Arc<DashMap<u64, Arc<TransportChannel>>>,
    next_channel_id: AtomicU64,
    dispatcher: Arc<PacketDispatcher>,
    handler_factory: ChannelHandlerFactory,
}

impl ChannelRuntime {
    pub(crate) fn new(
        registry: Arc<PacketListenerRegistry>,
        dispatcher: Arc<PacketDispatcher>,
        handler_factory: ChannelHandlerFactory,
    ) -> Self {
        Self {
            registry,
            channels: Arc::new(DashMap::new()),
            next_channel_id: AtomicU64::new(1),
            dispatcher,
            handler_factory,
        }
    }

    /// Wraps an established stream into a channel and spawns its reader
    /// and writer tasks.
    pub(crate) async fn install(
        self: &Arc<Self>,
        stream: Box<dyn AsyncStream>,
        server_addr: SocketAddr,
        client_addr: SocketAddr,
        client_provided: bool,
    ) -> Arc<TransportChannel> {
        let id = self.next_channel_id.fetch_add(1, Ordering::Relaxed);
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        let local_registry = Arc::new(PacketListenerRegistry::with_parent(self.registry.clone()));
        let handler = (self.handler_factory)();

        let channel = Arc::new(TransportChannel::new(
            id,
            server_addr,
            client_addr,
            client_provided,
            local_registry,
            handler.clone(),
            outbound_tx,
        ));
        self.channels.insert(id, channel.clone());

        handler.handle_channel_initialize(&channel).await;
        channel.mark_open();
        debug!(channel = id, client = %client_addr, "channel open");

        let runtime = self.clone();
        let connection_channel = channel.clone();
        tokio::spawn(async move {
            run_connection(stream, connection_channel, outbound_rx, runtime).await;
        });

        channel
    }
}

/// Drives one connection until it closes.
///
/// The write half is drained by a dedicated task so frame writes stay
/// ordered; the read half is decoded inline. Whichever side finishes
/// first ends the other, then teardown runs exactly once.
async fn run_connection(
    stream: Box<dyn AsyncStream>,
    channel: Arc<TransportChannel>,
    mut outbound_rx: mpsc::Receiver<WriterCommand>,
    runtime: Arc<ChannelRuntime>,
) {
    let (mut read_half, mut write_half) = tokio::io::split(stream);

    let mut writer = tokio::spawn(async move {
        while let Some(command) = outbound_rx.recv().await {
            match command {
                WriterCommand::Frame(frame) => {
                    if let Err(error) = write_half.write_all(&frame).await {
                        warn!(error = %error, "write failed, closing connection");
                        break;
                    }
                }
                WriterCommand::Shutdown => break,
            }
        }
        let _ = write_half.shutdown().await;
    });

    let mut buffer = BytesMut::with_capacity(8 * 1024);
    'read: loop {
        tokio::select! {
            _ = &mut writer => break 'read,
            read = tokio::io::AsyncReadExt::read_buf(&mut read_half, &mut buffer) => {
                match read {
                    Ok(0) => break 'read,
                    Ok(_) => {}
                    Err(error) => {
                        debug!(channel = channel.id(), error = %error, "read failed");
                        break 'read;
                    }
                }

                loop {
                    match decode_frame(&mut buffer, DEFAULT_MAX_FRAME_LENGTH) {
                        Ok(Some(frame)) => match Packet::decode(&frame) {
                            Ok(packet) => {
                                if channel.complete_query(&packet) {
                                    continue;
                                }
                                if let Err(error) =
                                    runtime.dispatcher.dispatch(channel.clone(), packet).await
                                {
                                    warn!(channel = channel.id(), error = %error, "dispatch failed");
                                }
                            }
                            // Framing stays aligned, so a bad packet only
                            // costs its own frame.
                            Err(error) => {
                                warn!(channel = channel.id(), error = %error, "dropping malformed packet")
                            }
                        },
                        Ok(None) => break,
                        Err(error) => {
                            error!(channel = channel.id(), error = %error, "unrecoverable framing error");
                            break 'read;
                        }
                    }
                }
            }
        }
    }

    // Wake the writer first so queued frames flush and the socket gets a
    // proper shutdown; marking the channel closed would turn this into a
    // no-op.
    channel.close();
    if channel.begin_close() {
        channel.handler().handle_channel_close(&channel).await;
        runtime.channels.remove(&channel.id());
        channel.mark_closed();
        debug!(channel = channel.id(), "channel closed");
    }
}
