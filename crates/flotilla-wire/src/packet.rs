//! Packet codec: the decoded application message carried inside one frame.
//!
//! Wire layout of one frame payload:
//!
//! ```text
//! varint   channel_id
//! string   correlation_id   (UUID text, varint-length-prefixed UTF-8)
//! string   header           (JSON object text, varint-length-prefixed UTF-8)
//! varint   body_length
//! bytes    body
//! ```

use bytes::{Bytes, BytesMut};
use serde_json::Value;
use uuid::Uuid;

use crate::error::WireError;
use crate::varint::{read_varint, write_varint};

/// A single unit of the binary protocol.
///
/// The channel id is an application-level routing key selecting which
/// listener set handles the payload; it is unrelated to the identity of the
/// transport connection carrying the packet. Packets are immutable once
/// constructed.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    channel_id: i32,
    correlation_id: Uuid,
    header: Value,
    body: Bytes,
}

impl Packet {
    /// Creates a packet with a fresh random correlation id.
    pub fn new(channel_id: i32, header: Value, body: impl Into<Bytes>) -> Self {
        Self::with_correlation_id(channel_id, Uuid::new_v4(), header, body)
    }

    /// Creates a packet with an explicit correlation id.
    pub fn with_correlation_id(
        channel_id: i32,
        correlation_id: Uuid,
        header: Value,
        body: impl Into<Bytes>,
    ) -> Self {
        let header = match header {
            Value::Null => Value::Object(Default::default()),
            other => other,
        };
        Self {
            channel_id,
            correlation_id,
            header,
            body: body.into(),
        }
    }

    /// Creates a packet without header or body, useful for signals.
    pub fn empty(channel_id: i32) -> Self {
        Self::new(channel_id, Value::Object(Default::default()), Bytes::new())
    }

    /// Creates a response packet that inherits the correlation id of
    /// `request`, so the sender of the request can match it.
    pub fn response_to(request: &Packet, header: Value, body: impl Into<Bytes>) -> Self {
        Self::with_correlation_id(request.channel_id, request.correlation_id, header, body)
    }

    pub fn channel_id(&self) -> i32 {
        self.channel_id
    }

    pub fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    pub fn header(&self) -> &Value {
        &self.header
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Encodes this packet into one frame payload.
    pub fn encode(&self) -> Bytes {
        let correlation = self
            .correlation_id
            .as_hyphenated()
            .encode_lower(&mut Uuid::encode_buffer())
            .to_owned();
        let header = self.header.to_string();

        let mut out = BytesMut::with_capacity(24 + correlation.len() + header.len() + self.body.len());
        write_varint(&mut out, self.channel_id as u32);
        write_string(&mut out, &correlation);
        write_string(&mut out, &header);
        write_varint(&mut out, self.body.len() as u32);
        out.extend_from_slice(&self.body);
        out.freeze()
    }

    /// Decodes one frame payload into a packet.
    ///
    /// Any failure invalidates only this frame; the surrounding frame codec
    /// keeps the byte stream aligned, so the caller logs the error, drops
    /// the frame and keeps the connection open.
    pub fn decode(payload: &[u8]) -> Result<Self, WireError> {
        let mut reader = FrameReader::new(payload);

        let channel_id = reader.read_varint()? as i32;
        let correlation_id = Uuid::parse_str(&reader.read_string()?)?;
        let header: Value = serde_json::from_str(&reader.read_string()?)?;
        let body_length = reader.read_varint()? as usize;
        let body = Bytes::copy_from_slice(reader.read_slice(body_length)?);

        Ok(Self {
            channel_id,
            correlation_id,
            header,
            body,
        })
    }
}

fn write_string(out: &mut BytesMut, value: &str) {
    write_varint(out, value.len() as u32);
    out.extend_from_slice(value.as_bytes());
}

/// Cursor over one complete frame payload. Running out of bytes here is a
/// hard error, unlike the frame codec where it means "wait for more input".
struct FrameReader<'a> {
    input: &'a [u8],
    position: usize,
}

impl<'a> FrameReader<'a> {
    fn new(input: &'a [u8]) -> Self {
        Self { input, position: 0 }
    }

    fn read_varint(&mut self) -> Result<u32, WireError> {
        match read_varint(&self.input[self.position..])? {
            Some((value, consumed)) => {
                self.position += consumed;
                Ok(value)
            }
            None => Err(WireError::UnexpectedEnd),
        }
    }

    fn read_slice(&mut self, length: usize) -> Result<&'a [u8], WireError> {
        let end = self
            .position
            .checked_add(length)
            .ok_or(WireError::UnexpectedEnd)?;
        if end > self.input.len() {
            return Err(WireError::UnexpectedEnd);
        }
        let slice = &self.input[self.position..end];
        self.position = end;
        Ok(slice)
    }

    fn read_string(&mut self) -> Result<String, WireError> {
        let length = self.read_varint()? as usize;
        let bytes = self.read_slice(length)?;
        Ok(String::from_utf8(bytes.to_vec())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn round_trip_all_fields() {
        let packet = Packet::new(
            42,
            json!({"service": "lobby-1", "state": "RUNNING"}),
            Bytes::from_static(b"\x00\x01\x02snapshot"),
        );

        let decoded = Packet::decode(&packet.encode()).unwrap();
        assert_eq!(decoded, packet);
        assert_eq!(decoded.channel_id(), 42);
        assert_eq!(decoded.correlation_id(), packet.correlation_id());
        assert_eq!(decoded.header()["service"], "lobby-1");
        assert_eq!(&decoded.body()[..], b"\x00\x01\x02snapshot");
    }

    #[test]
    fn round_trip_empty_body_and_default_header() {
        let packet = Packet::empty(-7);
        let decoded = Packet::decode(&packet.encode()).unwrap();

        assert_eq!(decoded.channel_id(), -7);
        assert_eq!(decoded.header(), &json!({}));
        assert!(decoded.body().is_empty());
    }

    #[test]
    fn response_keeps_correlation_id() {
        let request = Packet::new(5, json!({"query": "nodes"}), Bytes::new());
        let response = Packet::response_to(&request, json!({"nodes": 3}), Bytes::new());

        assert_eq!(response.correlation_id(), request.correlation_id());
        assert_eq!(response.channel_id(), request.channel_id());
    }

    #[test]
    fn truncated_payload_is_rejected_without_panic() {
        let encoded = Packet::new(1, json!({"k": "v"}), Bytes::from_static(b"body")).encode();

        for cut in 0..encoded.len() {
            // Every prefix must either decode (never, here) or error cleanly.
            assert!(Packet::decode(&encoded[..cut]).is_err(), "prefix of {cut} bytes");
        }
    }

    #[test]
    fn garbage_correlation_id_is_rejected() {
        let mut out = BytesMut::new();
        write_varint(&mut out, 9);
        write_string(&mut out, "not-a-uuid");
        write_string(&mut out, "{}");
        write_varint(&mut out, 0);

        let err = Packet::decode(&out).unwrap_err();
        assert!(!err.is_fatal());
    }
}
