//! Variable-length integer codec.
//!
//! Seven data bits per byte with the high bit as a continuation flag,
//! least significant group first. A 32-bit value therefore never takes more
//! than five bytes on the wire.

use bytes::{BufMut, BytesMut};

use crate::error::WireError;

/// Maximum number of bytes a 32-bit var-int may occupy.
pub const MAX_VARINT_BYTES: usize = 5;

/// Writes `value` to `buf` as a var-int.
pub fn write_varint(buf: &mut BytesMut, mut value: u32) {
    loop {
        if value & !0x7F == 0 {
            buf.put_u8(value as u8);
            return;
        }
        buf.put_u8((value as u8 & 0x7F) | 0x80);
        value >>= 7;
    }
}

/// Returns the number of bytes `value` occupies when var-int encoded.
pub fn varint_length(value: u32) -> usize {
    match value {
        0..=0x7F => 1,
        0x80..=0x3FFF => 2,
        0x4000..=0x1F_FFFF => 3,
        0x20_0000..=0x0FFF_FFFF => 4,
        _ => 5,
    }
}

/// Reads a var-int from the start of `input` without consuming it.
///
/// Returns `Ok(Some((value, bytes_read)))` on success and `Ok(None)` when
/// the input ends before the var-int terminates, so callers can wait for
/// more data and retry. More than [`MAX_VARINT_BYTES`] continuation bytes
/// are a protocol violation reported as [`WireError::VarIntTooLong`].
pub fn read_varint(input: &[u8]) -> Result<Option<(u32, usize)>, WireError> {
    let mut value: u32 = 0;
    for (index, byte) in input.iter().take(MAX_VARINT_BYTES).enumerate() {
        value |= u32::from(byte & 0x7F) << (index * 7);
        if byte & 0x80 == 0 {
            return Ok(Some((value, index + 1)));
        }
    }

    if input.len() >= MAX_VARINT_BYTES {
        Err(WireError::VarIntTooLong)
    } else {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(value: u32) -> Vec<u8> {
        let mut buf = BytesMut::new();
        write_varint(&mut buf, value);
        buf.to_vec()
    }

    #[test]
    fn round_trip_at_boundaries() {
        let cases: [(u32, usize); 9] = [
            (0, 1),
            (1, 1),
            (127, 1),
            (128, 2),
            (16_383, 2),
            (16_384, 3),
            (2_097_151, 3),
            (2_097_152, 4),
            (u32::MAX >> 1, 5), // 2^31 - 1
        ];

        for (value, expected_len) in cases {
            let encoded = encode(value);
            assert_eq!(encoded.len(), expected_len, "length for {value}");
            assert_eq!(varint_length(value), expected_len, "varint_length for {value}");

            let (decoded, consumed) = read_varint(&encoded).unwrap().unwrap();
            assert_eq!(decoded, value);
            assert_eq!(consumed, expected_len);
        }
    }

    #[test]
    fn incomplete_input_yields_none() {
        // 0x80 says "more bytes follow" but none do.
        assert!(matches!(read_varint(&[0x80]), Ok(None)));
        assert!(matches!(read_varint(&[]), Ok(None)));
    }

    #[test]
    fn overlong_varint_is_fatal() {
        let overlong = [0x80, 0x80, 0x80, 0x80, 0x80, 0x01];
        let err = read_varint(&overlong).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn trailing_bytes_are_not_consumed() {
        let mut buf = BytesMut::new();
        write_varint(&mut buf, 300);
        buf.extend_from_slice(b"tail");

        let (value, consumed) = read_varint(&buf).unwrap().unwrap();
        assert_eq!(value, 300);
        assert_eq!(&buf[consumed..], b"tail");
    }
}
