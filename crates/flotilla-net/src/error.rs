//! Error types for the network transport.

use std::time::Duration;

use thiserror::Error;

use flotilla_wire::WireError;

/// Errors that can occur during transport operations.
#[derive(Debug, Error)]
pub enum NetError {
    /// Underlying socket failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Wire protocol violation.
    #[error("wire protocol error: {0}")]
    Wire(#[from] WireError),

    /// The transport channel is no longer open.
    #[error("transport channel {0} is closed")]
    ChannelClosed(u64),

    /// A query did not receive a response in time.
    #[error("query timed out after {0:?}")]
    QueryTimeout(Duration),

    /// TLS material could not be loaded or a TLS configuration is invalid.
    #[error("tls error: {0}")]
    Tls(String),
}
