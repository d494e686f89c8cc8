//! Built-in handlers of a control-plane node.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use flotilla_http::{
    HttpContext, HttpError, HttpHandler, StatusCode, WebSocketChannel, WebSocketFrameType,
    WebSocketListener,
};
use flotilla_net::{
    ChannelHandler, ChannelHandlerFactory, NetError, Packet, PacketListener, TransportChannel,
};

/// Packet channel carrying ping requests between nodes.
pub const PING_CHANNEL: i32 = 1;

/// Logs channel lifecycle transitions of this node.
pub struct NodeChannelHandler;

/// Factory handed to servers and clients so every channel gets a fresh
/// lifecycle handler.
pub fn node_handler_factory() -> ChannelHandlerFactory {
    Arc::new(|| Arc::new(NodeChannelHandler) as Arc<dyn ChannelHandler>)
}

#[async_trait]
impl ChannelHandler for NodeChannelHandler {
    async fn handle_channel_initialize(&self, channel: &Arc<TransportChannel>) {
        info!(
            "🔌 Channel {} established with {}",
            channel.id(),
            channel.client_addr()
        );
    }

    async fn handle_channel_close(&self, channel: &Arc<TransportChannel>) {
        info!("👋 Channel {} closed", channel.id());
    }
}

/// Answers ping packets with a pong carrying the request body back.
pub struct PingPacketListener;

#[async_trait]
impl PacketListener for PingPacketListener {
    async fn handle(
        &self,
        channel: &Arc<TransportChannel>,
        packet: &Packet,
    ) -> Result<(), NetError> {
        let response = Packet::response_to(packet, json!({"pong": true}), packet.body().clone());
        channel.send_packet(&response).await
    }
}

/// Serves the node status document.
pub struct StatusHttpHandler {
    pub node_name: String,
}

#[async_trait]
impl HttpHandler for StatusHttpHandler {
    async fn handle(&self, _path: &str, context: &mut HttpContext) -> Result<(), HttpError> {
        context.response.set_json(&json!({
            "node": self.node_name,
            "online": true,
            "version": env!("CARGO_PKG_VERSION"),
        }));
        Ok(())
    }
}

/// Serves per-node details addressed by name.
pub struct NodeInfoHttpHandler {
    pub node_name: String,
}

#[async_trait]
impl HttpHandler for NodeInfoHttpHandler {
    async fn handle(&self, _path: &str, context: &mut HttpContext) -> Result<(), HttpError> {
        let requested = context
            .request
            .path_param("name")
            .unwrap_or_default()
            .to_string();
        if requested == self.node_name {
            context.response.set_json(&json!({
                "name": self.node_name,
                "local": true,
            }));
        } else {
            context
                .response
                .set_json(&json!({"error": format!("unknown node '{requested}'")}))
                .set_status(StatusCode::NOT_FOUND);
        }
        Ok(())
    }
}

/// Upgrades `/ws` requests and echoes console input back.
pub struct WsConsoleHandler;

struct EchoFrameListener;

#[async_trait]
impl WebSocketListener for EchoFrameListener {
    async fn handle_frame(
        &self,
        channel: &Arc<WebSocketChannel>,
        frame_type: WebSocketFrameType,
        payload: &[u8],
    ) -> Result<(), HttpError> {
        match frame_type {
            WebSocketFrameType::Text => {
                let text =
                    std::str::from_utf8(payload).map_err(|_| HttpError::InvalidTextFrame)?;
                channel.send_text(text).await
            }
            WebSocketFrameType::Ping => channel.send_frame(WebSocketFrameType::Pong, payload.to_vec()).await,
            _ => Ok(()),
        }
    }

    async fn handle_close(&self, _channel: &Arc<WebSocketChannel>, code: u16, reason: &str) {
        info!("Console session closed ({code}: {reason})");
    }
}

#[async_trait]
impl HttpHandler for WsConsoleHandler {
    async fn handle(&self, _path: &str, context: &mut HttpContext) -> Result<(), HttpError> {
        match context.upgrade() {
            Ok(channel) => {
                channel.add_listener(Arc::new(EchoFrameListener)).await;
                Ok(())
            }
            Err(e) => {
                warn!("Console upgrade rejected: {}", e);
                Err(e)
            }
        }
    }
}
