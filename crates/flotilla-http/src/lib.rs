//! # Flotilla HTTP Layer
//!
//! Minimal HTTP routing engine for the control plane's REST and WebSocket
//! endpoints. Handlers are registered against path patterns with `{param}`
//! placeholders and a trailing `*` wildcard, filtered by listener port and
//! invoked in ascending priority order; any handler can cancel the rest of
//! the chain or take over the connection as a WebSocket.

pub mod context;
pub mod cookie;
pub mod error;
pub mod handler;
pub mod registry;
pub mod routing;
pub mod server;
pub mod websocket;

pub use axum::http::{HeaderMap, Method, StatusCode};
pub use context::{HttpContext, HttpRequest, HttpResponse};
pub use cookie::HttpCookie;
pub use error::HttpError;
pub use handler::HttpHandler;
pub use registry::HttpHandlerRegistry;
pub use server::HttpServer;
pub use websocket::{WebSocketChannel, WebSocketFrameType, WebSocketListener};
