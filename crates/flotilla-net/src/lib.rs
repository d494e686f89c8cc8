//! # Flotilla Network Transport
//!
//! Connection orchestration for the fleet control plane. Nodes exchange
//! [`Packet`]s over TCP (optionally TLS) using the var-int framing from
//! `flotilla-wire`; every established connection is represented by a
//! [`TransportChannel`] with an explicit lifecycle state machine and a
//! per-channel packet listener registry chained to the owning component's
//! global registry.
//!
//! ## Threading model
//!
//! Each socket is driven by exactly two tasks: a read task that decodes
//! frames and a writer task that drains the channel's outbound queue, so all
//! writes to one channel are strictly ordered regardless of caller task.
//! Decoded packets are handed off to a bounded [`PacketDispatcher`] worker
//! pool; no ordering is guaranteed between two packets once both are queued
//! there.
//!
//! [`Packet`]: flotilla_wire::Packet

pub mod channel;
pub mod client;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod registry;
pub mod server;
pub mod tls;

mod connection;

pub use channel::{ChannelState, TransportChannel};
pub use client::NetworkClient;
pub use dispatcher::PacketDispatcher;
pub use error::NetError;
pub use handler::{ChannelHandler, ChannelHandlerFactory, NoopChannelHandler};
pub use registry::{PacketListener, PacketListenerRegistry};
pub use server::NetworkServer;
pub use tls::{ClientAuth, TlsSettings};

pub use flotilla_wire::Packet;
