use thiserror::Error;

/// Errors surfaced by HTTP handlers and WebSocket listeners.
#[derive(Debug, Error)]
pub enum HttpError {
    /// A handler failed; the message is logged and routing continues with
    /// the next matching handler.
    #[error("handler error: {0}")]
    Handler(String),

    /// [`crate::HttpContext::upgrade`] was called on a request that is not
    /// a WebSocket upgrade request.
    #[error("request did not ask for a websocket upgrade")]
    UpgradeNotRequested,

    /// A frame was sent on a WebSocket channel that already closed.
    #[error("websocket channel is closed")]
    WebSocketClosed,

    /// A text frame did not contain valid UTF-8.
    #[error("text frame is not valid utf-8")]
    InvalidTextFrame,
}
