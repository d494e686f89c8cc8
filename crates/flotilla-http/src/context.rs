//! Per-request state shared by the handler chain.

use std::collections::HashMap;

use axum::body::Body;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::header::{CONNECTION, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::Response;
use bytes::Bytes;

use crate::cookie::{parse_cookie_header, HttpCookie, EXPIRE_NOW};

/// The inbound request as seen by handlers.
#[derive(Debug)]
pub struct HttpRequest {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    /// Decoded query parameters; a key may appear more than once.
    pub query: HashMap<String, Vec<String>>,
    pub body: Bytes,
    /// Captures from `{param}` pattern segments, filled in per match.
    pub path_params: HashMap<String, String>,
}

impl HttpRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    pub fn path_param(&self, name: &str) -> Option<&str> {
        self.path_params.get(name).map(String::as_str)
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }
}

/// The response being assembled by the handler chain.
#[derive(Debug)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    body: Option<Vec<u8>>,
}

impl HttpResponse {
    fn new() -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn set_status(&mut self, status: StatusCode) -> &mut Self {
        self.status = status;
        self
    }

    pub fn set_header(&mut self, name: &'static str, value: &str) -> &mut Self {
        if let Ok(value) = HeaderValue::from_str(value) {
            self.headers.insert(name, value);
        }
        self
    }

    pub fn set_body(&mut self, body: impl Into<Vec<u8>>) -> &mut Self {
        self.body = Some(body.into());
        self
    }

    /// Convenience for JSON responses: serializes, sets the content type
    /// and a 200 status.
    pub fn set_json(&mut self, value: &serde_json::Value) -> &mut Self {
        self.status = StatusCode::OK;
        self.set_header("content-type", "application/json");
        self.body = Some(value.to_string().into_bytes());
        self
    }

    pub fn has_body(&self) -> bool {
        self.body.is_some()
    }
}

/// Mutable state threaded through every handler that matches a request.
pub struct HttpContext {
    pub request: HttpRequest,
    pub response: HttpResponse,
    cookies: Vec<HttpCookie>,
    /// Stops the handler chain after the current handler returns.
    pub cancel_next: bool,
    /// Suppresses the assembled response, used by WebSocket upgrades.
    pub cancel_send_response: bool,
    /// Whether the connection is closed after the response. Defaults to
    /// true; handlers clear it to keep the connection alive.
    pub close_after: bool,
    /// Type name of the last handler that ran successfully.
    pub last_handler: Option<&'static str>,
    pub(crate) upgrade: Option<WebSocketUpgrade>,
    pub(crate) upgrade_response: Option<Response>,
    pub(crate) websocket: Option<std::sync::Arc<crate::websocket::WebSocketChannel>>,
}

impl HttpContext {
    pub(crate) fn new(request: HttpRequest, upgrade: Option<WebSocketUpgrade>) -> Self {
        let cookies = request
            .header("cookie")
            .map(parse_cookie_header)
            .unwrap_or_default();
        Self {
            request,
            response: HttpResponse::new(),
            cookies,
            cancel_next: false,
            cancel_send_response: false,
            close_after: true,
            last_handler: None,
            upgrade,
            upgrade_response: None,
            websocket: None,
        }
    }

    /// Looks up a cookie by name, case-insensitively.
    pub fn cookie(&self, name: &str) -> Option<&HttpCookie> {
        self.cookies
            .iter()
            .find(|cookie| cookie.name.eq_ignore_ascii_case(name))
    }

    pub fn cookies(&self) -> &[HttpCookie] {
        &self.cookies
    }

    /// Adds or replaces a cookie and stages it as a `Set-Cookie` header.
    pub fn add_cookie(&mut self, cookie: HttpCookie) {
        self.cookies
            .retain(|existing| !existing.name.eq_ignore_ascii_case(&cookie.name));
        self.cookies.push(cookie);
        self.sync_cookie_headers();
    }

    /// Removes a cookie: the client is told to drop it via an immediate
    /// expiry.
    pub fn remove_cookie(&mut self, name: &str) {
        if let Some(cookie) = self
            .cookies
            .iter_mut()
            .find(|cookie| cookie.name.eq_ignore_ascii_case(name))
        {
            cookie.value.clear();
            cookie.max_age = Some(EXPIRE_NOW);
        }
        self.sync_cookie_headers();
    }

    pub fn clear_cookies(&mut self) {
        self.cookies.clear();
        self.sync_cookie_headers();
    }

    fn sync_cookie_headers(&mut self) {
        self.response.headers.remove(SET_COOKIE);
        for cookie in &self.cookies {
            if let Ok(value) = HeaderValue::from_str(&cookie.to_set_cookie()) {
                self.response.headers.append(SET_COOKIE, value);
            }
        }
    }

    /// Finalizes the request into the wire response.
    pub(crate) fn into_response(self) -> Response {
        // A completed upgrade owns the connection.
        if let Some(response) = self.upgrade_response {
            return response;
        }
        if self.cancel_send_response {
            return Response::new(Body::empty());
        }

        let HttpResponse {
            status,
            mut headers,
            body,
        } = self.response;

        let body = match body {
            Some(body) => body,
            // Nothing answered: a plain-text marker mirrors what operators
            // see when probing unknown endpoints.
            None if status == StatusCode::NOT_FOUND => b"Resource not found!".to_vec(),
            None => Vec::new(),
        };
        headers.insert(
            CONNECTION,
            HeaderValue::from_static(if self.close_after { "close" } else { "keep-alive" }),
        );

        let mut builder = Response::builder().status(status);
        if let Some(map) = builder.headers_mut() {
            *map = headers;
        }
        builder
            .body(Body::from(body))
            .unwrap_or_else(|_| Response::new(Body::empty()))
    }
}

pub(crate) fn parse_query(query: Option<&str>) -> HashMap<String, Vec<String>> {
    let mut params: HashMap<String, Vec<String>> = HashMap::new();
    let Some(query) = query else {
        return params;
    };
    for pair in query.split('&') {
        if pair.is_empty() {
            continue;
        }
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        params
            .entry(key.to_string())
            .or_default()
            .push(value.to_string());
    }
    params
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_with_cookie_header(value: &str) -> HttpRequest {
        let mut headers = HeaderMap::new();
        headers.insert("cookie", HeaderValue::from_str(value).unwrap());
        HttpRequest {
            method: Method::GET,
            path: "/test".into(),
            headers,
            query: HashMap::new(),
            body: Bytes::new(),
            path_params: HashMap::new(),
        }
    }

    #[test]
    fn cookie_lookup_ignores_case() {
        let context = HttpContext::new(request_with_cookie_header("Session=abc"), None);
        assert_eq!(context.cookie("session").unwrap().value, "abc");
        assert_eq!(context.cookie("SESSION").unwrap().value, "abc");
        assert!(context.cookie("other").is_none());
    }

    #[test]
    fn removing_a_cookie_expires_it_instead_of_dropping_it() {
        let mut context = HttpContext::new(request_with_cookie_header("session=abc"), None);
        context.remove_cookie("SESSION");

        let cookie = context.cookie("session").unwrap();
        assert_eq!(cookie.max_age, Some(0));
        assert!(cookie.value.is_empty());

        let set_cookie = context.response.headers.get(SET_COOKIE).unwrap();
        assert_eq!(set_cookie.to_str().unwrap(), "session=; Max-Age=0");
    }

    #[test]
    fn unanswered_request_gets_the_fallback_body() {
        let context = HttpContext::new(request_with_cookie_header("a=b"), None);
        let response = context.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            response.headers().get(CONNECTION).unwrap(),
            HeaderValue::from_static("close")
        );
    }

    #[test]
    fn query_parsing_keeps_repeated_keys() {
        let params = parse_query(Some("a=1&b=2&a=3&flag"));
        assert_eq!(params["a"], vec!["1", "3"]);
        assert_eq!(params["b"], vec!["2"]);
        assert_eq!(params["flag"], vec![""]);
        assert!(parse_query(None).is_empty());
    }
}
