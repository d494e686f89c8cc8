//! # Flotilla Wire Protocol
//!
//! Binary wire format shared by every node and wrapper process in a Flotilla
//! fleet. The format is deliberately small:
//!
//! 1. A **frame codec** that turns a raw byte stream into discrete frames.
//!    Each frame is a var-int payload length followed by the payload bytes.
//! 2. A **packet codec** that interprets one frame payload as a [`Packet`]:
//!    a routing channel id, a correlation id, a small JSON header and a
//!    binary body.
//!
//! The frame codec never emits partial frames: decoding rolls back and waits
//! for more input whenever either the length prefix or the declared payload
//! is incomplete. The packet codec in contrast operates on one complete
//! frame, so any truncation inside it is a hard decode error that callers
//! are expected to log and discard.

pub mod error;
pub mod frame;
pub mod packet;
pub mod varint;

pub use error::WireError;
pub use frame::{decode_frame, encode_frame, DEFAULT_MAX_FRAME_LENGTH};
pub use packet::Packet;
pub use varint::{read_varint, varint_length, write_varint, MAX_VARINT_BYTES};
