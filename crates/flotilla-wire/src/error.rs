//! Error types for the wire protocol.

use thiserror::Error;

/// Errors that can occur while encoding or decoding wire data.
///
/// Frame-level errors ([`WireError::VarIntTooLong`],
/// [`WireError::FrameTooLarge`]) are protocol violations that poison the
/// whole byte stream and must tear the connection down. Packet-level errors
/// only invalidate the single frame they were found in.
#[derive(Debug, Error)]
pub enum WireError {
    /// A var-int ran past the five byte maximum without terminating.
    #[error("var int exceeds the maximum of 5 bytes")]
    VarIntTooLong,

    /// A frame declared a payload larger than the configured limit.
    #[error("frame of {length} bytes exceeds the limit of {limit} bytes")]
    FrameTooLarge { length: usize, limit: usize },

    /// A frame payload ended while more packet data was declared.
    #[error("unexpected end of frame payload")]
    UnexpectedEnd,

    /// A length-prefixed string field was not valid UTF-8.
    #[error("invalid UTF-8 in string field: {0}")]
    InvalidString(#[from] std::string::FromUtf8Error),

    /// The correlation id field did not contain a parseable UUID.
    #[error("invalid correlation id: {0}")]
    InvalidCorrelationId(#[from] uuid::Error),

    /// The header field did not contain a parseable JSON document.
    #[error("invalid header document: {0}")]
    InvalidHeader(#[from] serde_json::Error),
}

impl WireError {
    /// Whether this error poisons the byte stream beyond the current frame.
    ///
    /// Fatal errors require the connection to be closed; non-fatal errors
    /// only discard the frame they occurred in.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            WireError::VarIntTooLong | WireError::FrameTooLarge { .. }
        )
    }
}
