//! End-to-end HTTP tests over a real listener, using a raw client so the
//! response bytes can be asserted exactly.

use std::time::Duration;

use async_trait::async_trait;
use axum::http::StatusCode;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use flotilla_http::{HttpContext, HttpError, HttpHandler, HttpServer};

struct StatusHandler;

#[async_trait]
impl HttpHandler for StatusHandler {
    async fn handle(&self, _path: &str, context: &mut HttpContext) -> Result<(), HttpError> {
        context
            .response
            .set_json(&serde_json::json!({"online": true}));
        Ok(())
    }
}

struct NodeHandler;

#[async_trait]
impl HttpHandler for NodeHandler {
    async fn handle(&self, _path: &str, context: &mut HttpContext) -> Result<(), HttpError> {
        let name = context
            .request
            .path_param("name")
            .unwrap_or_default()
            .to_string();
        context.response.set_status(StatusCode::OK).set_body(name);
        Ok(())
    }
}

async fn raw_get(port: u16, path: &str) -> String {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut response = Vec::new();
    timeout(Duration::from_secs(5), stream.read_to_end(&mut response))
        .await
        .expect("response should arrive")
        .unwrap();
    String::from_utf8(response).unwrap()
}

async fn started_server() -> (HttpServer, u16) {
    let server = HttpServer::new();
    assert!(server.add_listener("127.0.0.1:0".parse().unwrap()).await);
    let port = server.bound_addresses().await[0].port();
    (server, port)
}

#[tokio::test(flavor = "multi_thread")]
async fn registered_handler_answers_its_path() {
    let (server, port) = started_server().await;
    server.registry().register("/api/status", None, 0, StatusHandler);

    let response = raw_get(port, "/api/status").await;
    assert!(response.starts_with("HTTP/1.1 200"), "got: {response}");
    assert!(response.contains(r#"{"online":true}"#));

    server.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn path_parameters_reach_the_handler() {
    let (server, port) = started_server().await;
    server
        .registry()
        .register("/api/node/{name}", None, 0, NodeHandler);

    let response = raw_get(port, "/api/node/alpha-1").await;
    assert!(response.starts_with("HTTP/1.1 200"), "got: {response}");
    assert!(response.ends_with("alpha-1"), "got: {response}");

    server.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_path_returns_the_fallback_body() {
    let (server, port) = started_server().await;

    let response = raw_get(port, "/missing").await;
    assert!(response.starts_with("HTTP/1.1 404"), "got: {response}");
    assert!(response.contains("Resource not found!"));
    assert!(response.to_ascii_lowercase().contains("connection: close"));

    server.shutdown();
}
