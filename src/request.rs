//! The outgoing-request value that matchers inspect.
//!
//! A [`StubRequest`] is built by the transport-interception layer hosting this
//! crate and is read-only for the whole duration of matching and delivery.

use bytes::Bytes;
use http::{HeaderMap, Method};
use url::Url;

/// An outgoing HTTP request, as seen by stub matchers.
#[derive(Debug, Clone)]
pub struct StubRequest {
    /// HTTP method.
    pub method: Method,
    /// Absolute request URL.
    pub url: Url,
    /// Request headers (case-insensitive names, may hold repeated values).
    pub headers: HeaderMap,
    /// Request body, if any.
    pub body: Option<Bytes>,
}

impl StubRequest {
    /// Create a request from a method and an absolute URL.
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    /// Shorthand for a GET request.
    ///
    /// # Panics
    ///
    /// Panics if `url` is not a valid absolute URL. This type only exists in
    /// test setups, so a bad URL should fail the test loudly.
    pub fn get(url: &str) -> Self {
        Self::new(Method::GET, Url::parse(url).expect("invalid request URL"))
    }

    /// Shorthand for a POST request.
    pub fn post(url: &str) -> Self {
        Self::new(Method::POST, Url::parse(url).expect("invalid request URL"))
    }

    /// Shorthand for a PUT request.
    pub fn put(url: &str) -> Self {
        Self::new(Method::PUT, Url::parse(url).expect("invalid request URL"))
    }

    /// Shorthand for a DELETE request.
    pub fn delete(url: &str) -> Self {
        Self::new(Method::DELETE, Url::parse(url).expect("invalid request URL"))
    }

    /// Add a header, keeping any previously set values for the same name.
    ///
    /// # Panics
    ///
    /// Panics if the header name or value is invalid.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        let name: http::HeaderName = name.parse().expect("invalid header name");
        let value: http::HeaderValue = value.parse().expect("invalid header value");
        self.headers.append(name, value);
        self
    }

    /// Set the request body.
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// URL scheme, e.g. `https`.
    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    /// URL host, if present.
    pub fn host(&self) -> Option<&str> {
        self.url.host_str()
    }

    /// URL path, e.g. `/api/users`.
    pub fn path(&self) -> &str {
        self.url.path()
    }

    /// Extension of the last path segment, without the dot.
    ///
    /// `/data.json` yields `json`; `/data` and `/.hidden` yield `None`.
    pub fn path_extension(&self) -> Option<&str> {
        let segment = self.url.path_segments()?.next_back()?;
        match segment.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => Some(ext),
            _ => None,
        }
    }

    /// Header value for `name` (case-insensitive). If the header is repeated,
    /// the last value wins.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get_all(name)
            .iter()
            .next_back()
            .and_then(|v| v.to_str().ok())
    }

    /// Query items in URL order, duplicates preserved.
    ///
    /// A parameter with no `=` at all (`?flag`) yields `("flag", None)`; a
    /// parameter with an empty value (`?flag=`) yields `("flag", Some(""))`.
    /// The two are distinct and never conflated.
    pub fn query_items(&self) -> Vec<(String, Option<String>)> {
        let Some(raw) = self.url.query() else {
            return Vec::new();
        };
        raw.split('&')
            .filter(|part| !part.is_empty())
            .map(|part| match part.split_once('=') {
                Some((name, value)) => (percent_decode(name), Some(percent_decode(value))),
                None => (percent_decode(part), None),
            })
            .collect()
    }
}

/// Decode `%XX` escapes and `+` in a query component.
fn percent_decode(s: &str) -> String {
    let mut out = Vec::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '%' {
            let hex: String = chars.by_ref().take(2).collect();
            if hex.len() == 2 {
                if let Ok(byte) = u8::from_str_radix(&hex, 16) {
                    out.push(byte);
                    continue;
                }
            }
            out.push(b'%');
            out.extend_from_slice(hex.as_bytes());
        } else if ch == '+' {
            out.push(b' ');
        } else {
            let mut buf = [0u8; 4];
            out.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
        }
    }

    String::from_utf8_lossy(&out).into_owned()
}
