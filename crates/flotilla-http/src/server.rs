//! HTTP listener setup and request dispatch.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{FromRequestParts, Request, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, Mutex};
use tracing::{error, info, warn};

use crate::context::{parse_query, HttpContext, HttpRequest};
use crate::registry::HttpHandlerRegistry;
use crate::routing::route_request;

/// Request bodies beyond this size are rejected with 400.
const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// An HTTP server with any number of listeners sharing one handler
/// registry.
///
/// Every request, regardless of method or path, runs through the
/// registry's handler chain; axum provides the connection handling and
/// the WebSocket handshake underneath.
pub struct HttpServer {
    registry: Arc<HttpHandlerRegistry>,
    shutdown: broadcast::Sender<()>,
    bound: Mutex<Vec<SocketAddr>>,
}

#[derive(Clone)]
struct ListenerState {
    registry: Arc<HttpHandlerRegistry>,
    port: u16,
}

impl HttpServer {
    pub fn new() -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            registry: Arc::new(HttpHandlerRegistry::new()),
            shutdown,
            bound: Mutex::new(Vec::new()),
        }
    }

    /// The registry backing all listeners of this server.
    pub fn registry(&self) -> &Arc<HttpHandlerRegistry> {
        &self.registry
    }

    /// Binds a listener and starts serving on it.
    ///
    /// Returns false if the bind failed; the server keeps running with
    /// whatever listeners it already has.
    pub async fn add_listener(&self, addr: SocketAddr) -> bool {
        let listener = match TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(e) => {
                error!("❌ Failed to bind http listener on {}: {}", addr, e);
                return false;
            }
        };
        let local_addr = match listener.local_addr() {
            Ok(local) => local,
            Err(e) => {
                error!("❌ Failed to resolve bound address for {}: {}", addr, e);
                return false;
            }
        };
        self.bound.lock().await.push(local_addr);
        info!("🌐 Http listener bound on {}", local_addr);

        let state = ListenerState {
            registry: self.registry.clone(),
            port: local_addr.port(),
        };
        let router = Router::new().fallback(dispatch_request).with_state(state);
        let mut shutdown_rx = self.shutdown.subscribe();

        tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.recv().await;
                })
                .await;
            if let Err(e) = result {
                error!("Http listener on {} failed: {}", local_addr, e);
            } else {
                info!("Http listener on {} shut down", local_addr);
            }
        });
        true
    }

    /// Addresses of all bound listeners, with ephemeral ports resolved.
    pub async fn bound_addresses(&self) -> Vec<SocketAddr> {
        self.bound.lock().await.clone()
    }

    /// Stops all listeners.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }
}

impl Default for HttpServer {
    fn default() -> Self {
        Self::new()
    }
}

async fn dispatch_request(State(state): State<ListenerState>, request: Request) -> Response {
    let (mut parts, body) = request.into_parts();

    // Present on every request whose headers form a websocket handshake,
    // consumed only if a handler asks for the upgrade.
    let upgrade = WebSocketUpgrade::from_request_parts(&mut parts, &())
        .await
        .ok();

    let body = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Rejecting request to {}: {}", parts.uri.path(), e);
            return Response::builder()
                .status(StatusCode::BAD_REQUEST)
                .body(Body::empty())
                .unwrap_or_else(|_| Response::new(Body::empty()));
        }
    };

    let path = parts.uri.path().to_string();
    let http_request = HttpRequest {
        method: parts.method.clone(),
        path: path.clone(),
        headers: parts.headers.clone(),
        query: parse_query(parts.uri.query()),
        body,
        path_params: HashMap::new(),
    };

    let mut context = HttpContext::new(http_request, upgrade);
    route_request(&state.registry, state.port, &path, &mut context).await;
    context.into_response()
}
