//! WebSocket upgrade and frame fan-out.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

use crate::context::HttpContext;
use crate::error::HttpError;

const DEFAULT_CLOSE_CODE: u16 = 1000;
const DEFAULT_CLOSE_REASON: &str = "connection closed";

/// Kind of a WebSocket frame as seen by listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebSocketFrameType {
    Ping,
    Pong,
    Text,
    Binary,
    Close,
}

/// Receives frames from one upgraded connection.
///
/// Listeners are invoked in registration order for every frame; an error
/// from one listener is logged and does not stop the remaining listeners.
#[async_trait]
pub trait WebSocketListener: Send + Sync + 'static {
    async fn handle_frame(
        &self,
        channel: &Arc<WebSocketChannel>,
        frame_type: WebSocketFrameType,
        payload: &[u8],
    ) -> Result<(), HttpError>;

    /// Called once when the connection closes, from either side.
    async fn handle_close(&self, _channel: &Arc<WebSocketChannel>, _code: u16, _reason: &str) {}
}

/// An upgraded WebSocket connection.
///
/// Outgoing frames are queued and written by a single pump task, so sends
/// are ordered regardless of caller. Once closed, further sends fail with
/// [`HttpError::WebSocketClosed`].
pub struct WebSocketChannel {
    listeners: RwLock<Vec<Arc<dyn WebSocketListener>>>,
    outbound: mpsc::Sender<Message>,
    closed: AtomicBool,
}

impl WebSocketChannel {
    pub(crate) fn new(outbound: mpsc::Sender<Message>) -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
            outbound,
            closed: AtomicBool::new(false),
        }
    }

    pub async fn add_listener(&self, listener: Arc<dyn WebSocketListener>) {
        self.listeners.write().await.push(listener);
    }

    pub async fn clear_listeners(&self) {
        self.listeners.write().await.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Sends one frame of the given type.
    pub async fn send_frame(
        self: &Arc<Self>,
        frame_type: WebSocketFrameType,
        payload: impl Into<Bytes>,
    ) -> Result<(), HttpError> {
        let payload = payload.into();
        let message = match frame_type {
            WebSocketFrameType::Ping => Message::Ping(payload),
            WebSocketFrameType::Pong => Message::Pong(payload),
            WebSocketFrameType::Binary => Message::Binary(payload),
            WebSocketFrameType::Text => {
                let text =
                    std::str::from_utf8(&payload).map_err(|_| HttpError::InvalidTextFrame)?;
                Message::Text(Utf8Bytes::from(text))
            }
            WebSocketFrameType::Close => {
                return self.close(DEFAULT_CLOSE_CODE, DEFAULT_CLOSE_REASON).await
            }
        };
        self.send_message(message).await
    }

    pub async fn send_text(&self, text: impl Into<String>) -> Result<(), HttpError> {
        self.send_message(Message::Text(Utf8Bytes::from(text.into()))).await
    }

    pub async fn send_binary(&self, payload: impl Into<Bytes>) -> Result<(), HttpError> {
        self.send_message(Message::Binary(payload.into())).await
    }

    /// Closes the connection. Listeners observe the close before the
    /// close frame is queued; repeated calls fail as already closed.
    pub async fn close(self: &Arc<Self>, code: u16, reason: &str) -> Result<(), HttpError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(HttpError::WebSocketClosed);
        }
        notify_close(self, code, reason).await;
        let close = Message::Close(Some(CloseFrame {
            code,
            reason: Utf8Bytes::from(reason.to_string()),
        }));
        self.outbound
            .send(close)
            .await
            .map_err(|_| HttpError::WebSocketClosed)
    }

    async fn send_message(&self, message: Message) -> Result<(), HttpError> {
        if self.is_closed() {
            return Err(HttpError::WebSocketClosed);
        }
        self.outbound
            .send(message)
            .await
            .map_err(|_| HttpError::WebSocketClosed)
    }
}

impl HttpContext {
    /// Takes over the request as a WebSocket connection.
    ///
    /// Only valid for requests carrying the upgrade handshake headers.
    /// The first call builds the upgrade response, suppresses the normal
    /// response path and stops the handler chain; repeated calls return
    /// the same channel.
    pub fn upgrade(&mut self) -> Result<Arc<WebSocketChannel>, HttpError> {
        if let Some(existing) = &self.websocket {
            return Ok(existing.clone());
        }
        let upgrade = self.upgrade.take().ok_or(HttpError::UpgradeNotRequested)?;

        let (outbound_tx, outbound_rx) = mpsc::channel(64);
        let channel = Arc::new(WebSocketChannel::new(outbound_tx));

        let pump_channel = channel.clone();
        self.upgrade_response =
            Some(upgrade.on_upgrade(move |socket| pump(pump_channel, socket, outbound_rx)));
        self.cancel_next = true;
        self.cancel_send_response = true;
        self.close_after = false;
        self.websocket = Some(channel.clone());
        Ok(channel)
    }
}

/// Drives one upgraded socket: writes queued outbound frames and fans
/// incoming frames out to listeners.
async fn pump(
    channel: Arc<WebSocketChannel>,
    socket: WebSocket,
    mut outbound_rx: mpsc::Receiver<Message>,
) {
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            outgoing = outbound_rx.recv() => {
                let Some(message) = outgoing else { break };
                let is_close = matches!(message, Message::Close(_));
                if sink.send(message).await.is_err() {
                    break;
                }
                if is_close {
                    break;
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(message)) => {
                        if handle_incoming(&channel, message).await {
                            break;
                        }
                    }
                    Some(Err(error)) => {
                        debug!(%error, "websocket read failed");
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    // The peer may have vanished without a close frame; listeners still
    // get exactly one close notification.
    if !channel.closed.swap(true, Ordering::AcqRel) {
        notify_close(&channel, DEFAULT_CLOSE_CODE, DEFAULT_CLOSE_REASON).await;
    }
}

/// Dispatches one incoming message to the channel's listeners. Returns
/// true when the connection should end.
pub(crate) async fn handle_incoming(channel: &Arc<WebSocketChannel>, message: Message) -> bool {
    let (frame_type, payload) = match message {
        Message::Ping(payload) => (WebSocketFrameType::Ping, payload),
        Message::Pong(payload) => (WebSocketFrameType::Pong, payload),
        Message::Text(text) => (WebSocketFrameType::Text, Bytes::from(text.to_string())),
        Message::Binary(payload) => (WebSocketFrameType::Binary, payload),
        // The peer's own code and reason are not surfaced; every remote
        // close runs the same fixed close sequence.
        Message::Close(_) => {
            if !channel.closed.swap(true, Ordering::AcqRel) {
                notify_close(channel, DEFAULT_CLOSE_CODE, DEFAULT_CLOSE_REASON).await;
            }
            return true;
        }
    };

    let listeners = channel.listeners.read().await.clone();
    for listener in listeners {
        if let Err(error) = listener.handle_frame(channel, frame_type, &payload).await {
            warn!(%error, ?frame_type, "websocket listener failed");
        }
    }
    false
}

async fn notify_close(channel: &Arc<WebSocketChannel>, code: u16, reason: &str) {
    let listeners = channel.listeners.read().await.clone();
    for listener in listeners {
        listener.handle_close(channel, code, reason).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingListener {
        frames: Arc<Mutex<Vec<(WebSocketFrameType, Vec<u8>)>>>,
        closes: Arc<Mutex<Vec<(u16, String)>>>,
    }

    #[async_trait]
    impl WebSocketListener for RecordingListener {
        async fn handle_frame(
            &self,
            _channel: &Arc<WebSocketChannel>,
            frame_type: WebSocketFrameType,
            payload: &[u8],
        ) -> Result<(), HttpError> {
            self.frames
                .lock()
                .unwrap()
                .push((frame_type, payload.to_vec()));
            Ok(())
        }

        async fn handle_close(&self, _channel: &Arc<WebSocketChannel>, code: u16, reason: &str) {
            self.closes.lock().unwrap().push((code, reason.to_string()));
        }
    }

    struct FailingListener;

    #[async_trait]
    impl WebSocketListener for FailingListener {
        async fn handle_frame(
            &self,
            _channel: &Arc<WebSocketChannel>,
            _frame_type: WebSocketFrameType,
            _payload: &[u8],
        ) -> Result<(), HttpError> {
            Err(HttpError::Handler("boom".into()))
        }
    }

    fn channel_with_recorder() -> (
        Arc<WebSocketChannel>,
        mpsc::Receiver<Message>,
        Arc<Mutex<Vec<(WebSocketFrameType, Vec<u8>)>>>,
        Arc<Mutex<Vec<(u16, String)>>>,
    ) {
        let (tx, rx) = mpsc::channel(8);
        let channel = Arc::new(WebSocketChannel::new(tx));
        let frames = Arc::new(Mutex::new(Vec::new()));
        let closes = Arc::new(Mutex::new(Vec::new()));
        (channel, rx, frames, closes)
    }

    #[tokio::test]
    async fn frames_fan_out_in_listener_order() {
        let (channel, _rx, frames, closes) = channel_with_recorder();
        channel
            .add_listener(Arc::new(FailingListener))
            .await;
        channel
            .add_listener(Arc::new(RecordingListener {
                frames: frames.clone(),
                closes: closes.clone(),
            }))
            .await;

        let ended = handle_incoming(&channel, Message::Text(Utf8Bytes::from("hello"))).await;
        assert!(!ended);
        let ended = handle_incoming(&channel, Message::Binary(Bytes::from_static(&[1, 2]))).await;
        assert!(!ended);

        let seen = frames.lock().unwrap();
        // The failing listener does not stop the second one.
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], (WebSocketFrameType::Text, b"hello".to_vec()));
        assert_eq!(seen[1], (WebSocketFrameType::Binary, vec![1, 2]));
    }

    #[tokio::test]
    async fn remote_close_runs_the_fixed_close_sequence_once() {
        let (channel, _rx, frames, closes) = channel_with_recorder();
        channel
            .add_listener(Arc::new(RecordingListener {
                frames,
                closes: closes.clone(),
            }))
            .await;

        // The peer-supplied code and reason are ignored.
        let close = Message::Close(Some(CloseFrame {
            code: 4000,
            reason: Utf8Bytes::from("done"),
        }));
        assert!(handle_incoming(&channel, close).await);
        assert!(handle_incoming(&channel, Message::Close(None)).await);

        let seen = closes.lock().unwrap();
        assert_eq!(
            seen.as_slice(),
            &[(DEFAULT_CLOSE_CODE, DEFAULT_CLOSE_REASON.to_string())]
        );
        assert!(channel.is_closed());
    }

    #[tokio::test]
    async fn sends_fail_after_close() {
        let (channel, mut rx, _frames, _closes) = channel_with_recorder();

        channel.send_text("before").await.unwrap();
        channel.close(1001, "going away").await.unwrap();
        assert!(matches!(
            channel.send_text("after").await,
            Err(HttpError::WebSocketClosed)
        ));
        assert!(matches!(
            channel.close(1001, "again").await,
            Err(HttpError::WebSocketClosed)
        ));

        assert!(matches!(rx.recv().await, Some(Message::Text(_))));
        match rx.recv().await {
            Some(Message::Close(Some(frame))) => {
                assert_eq!(frame.code, 1001);
                assert_eq!(frame.reason.as_str(), "going away");
            }
            other => panic!("expected close frame, got {other:?}"),
        }
    }
}
