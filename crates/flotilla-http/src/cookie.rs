//! Request/response cookie handling.

/// Max-Age value that instructs the browser to drop the cookie now.
pub(crate) const EXPIRE_NOW: i64 = 0;

/// An HTTP cookie, either parsed from a request or staged for a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpCookie {
    pub name: String,
    pub value: String,
    pub domain: Option<String>,
    pub path: Option<String>,
    pub http_only: bool,
    pub secure: bool,
    pub max_age: Option<i64>,
}

impl HttpCookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: None,
            path: None,
            http_only: false,
            secure: false,
            max_age: None,
        }
    }

    /// Renders this cookie as a `Set-Cookie` header value.
    pub(crate) fn to_set_cookie(&self) -> String {
        let mut out = format!("{}={}", self.name, self.value);
        if let Some(domain) = &self.domain {
            out.push_str("; Domain=");
            out.push_str(domain);
        }
        if let Some(path) = &self.path {
            out.push_str("; Path=");
            out.push_str(path);
        }
        if let Some(max_age) = self.max_age {
            out.push_str("; Max-Age=");
            out.push_str(&max_age.to_string());
        }
        if self.secure {
            out.push_str("; Secure");
        }
        if self.http_only {
            out.push_str("; HttpOnly");
        }
        out
    }
}

/// Parses a request `Cookie` header into name/value pairs. Malformed
/// segments without `=` are skipped.
pub(crate) fn parse_cookie_header(header: &str) -> Vec<HttpCookie> {
    header
        .split(';')
        .filter_map(|segment| {
            let (name, value) = segment.split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            Some(HttpCookie::new(name, value.trim()))
        })
        .collect()
}
