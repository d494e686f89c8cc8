//! Length-delimited frame codec.
//!
//! Each frame on the wire is a var-int payload length followed by exactly
//! that many payload bytes. Decoding peeks at the length prefix and rolls
//! back whenever the buffered input does not yet contain a whole frame, so a
//! partial frame is never emitted and nothing is consumed prematurely.

use bytes::{Buf, Bytes, BytesMut};

use crate::error::WireError;
use crate::varint::{read_varint, write_varint};

/// Default upper bound for a single frame payload (16 MiB).
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;

/// Appends `payload` to `out` as one length-prefixed frame.
pub fn encode_frame(payload: &[u8], out: &mut BytesMut) {
    write_varint(out, payload.len() as u32);
    out.extend_from_slice(payload);
}

/// Attempts to decode one frame from the front of `buf`.
///
/// Returns `Ok(Some(payload))` when a complete frame was consumed and
/// `Ok(None)` when more input is required; in the latter case `buf` is left
/// untouched. Zero buffered input is simply "no frame yet", not an error.
///
/// A length prefix that does not terminate within five bytes, or one that
/// declares a payload above `max_length`, is a fatal protocol violation.
pub fn decode_frame(buf: &mut BytesMut, max_length: usize) -> Result<Option<Bytes>, WireError> {
    if buf.is_empty() {
        return Ok(None);
    }

    let Some((length, prefix_len)) = read_varint(&buf[..])? else {
        return Ok(None);
    };

    let length = length as usize;
    if length > max_length {
        return Err(WireError::FrameTooLarge {
            length,
            limit: max_length,
        });
    }

    if buf.len() < prefix_len + length {
        // Declared payload not fully buffered yet, roll back and wait.
        return Ok(None);
    }

    buf.advance(prefix_len);
    Ok(Some(buf.split_to(length).freeze()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(buf: &mut BytesMut) -> Vec<Bytes> {
        let mut frames = Vec::new();
        while let Some(frame) = decode_frame(buf, DEFAULT_MAX_FRAME_LENGTH).unwrap() {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn round_trip_single_frame() {
        let mut wire = BytesMut::new();
        encode_frame(b"fleet sync", &mut wire);

        let frames = decode_all(&mut wire);
        assert_eq!(frames, vec![Bytes::from_static(b"fleet sync")]);
        assert!(wire.is_empty());
    }

    #[test]
    fn empty_input_yields_no_frame() {
        let mut wire = BytesMut::new();
        assert!(decode_frame(&mut wire, DEFAULT_MAX_FRAME_LENGTH)
            .unwrap()
            .is_none());
    }

    #[test]
    fn partial_frame_rolls_back() {
        let mut wire = BytesMut::new();
        encode_frame(&[7u8; 300], &mut wire);

        // Feed the wire bytes one chunk short of complete.
        let mut partial = BytesMut::from(&wire[..wire.len() - 1]);
        let before = partial.len();
        assert!(decode_frame(&mut partial, DEFAULT_MAX_FRAME_LENGTH)
            .unwrap()
            .is_none());
        assert_eq!(partial.len(), before, "rollback must not consume input");
    }

    #[test]
    fn reassembly_across_arbitrary_chunks() {
        let payload: Vec<u8> = (0..u8::MAX).cycle().take(4096).collect();
        let mut wire = BytesMut::new();
        encode_frame(&payload, &mut wire);
        encode_frame(b"second", &mut wire);
        let wire = wire.freeze();

        // Deliver the same bytes in several odd-sized chunks and verify the
        // decoded frames are identical to a single-chunk delivery.
        for chunk_size in [1usize, 3, 17, 1000, wire.len()] {
            let mut buf = BytesMut::new();
            let mut frames = Vec::new();
            for chunk in wire.chunks(chunk_size) {
                buf.extend_from_slice(chunk);
                frames.extend(decode_all(&mut buf));
            }
            assert_eq!(frames.len(), 2, "chunk size {chunk_size}");
            assert_eq!(&frames[0][..], &payload[..]);
            assert_eq!(&frames[1][..], b"second");
        }
    }

    #[test]
    fn oversized_frame_is_fatal() {
        let mut wire = BytesMut::new();
        encode_frame(&[0u8; 128], &mut wire);

        let err = decode_frame(&mut wire, 64).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn zero_length_payload_is_a_valid_frame() {
        let mut wire = BytesMut::new();
        encode_frame(&[], &mut wire);

        let frames = decode_all(&mut wire);
        assert_eq!(frames.len(), 1);
        assert!(frames[0].is_empty());
    }
}
