//! Request matching logic.
//!
//! A [`Matcher`] is a pure predicate over a [`StubRequest`]. Matchers compose
//! with [`and`](Matcher::and) / [`or`](Matcher::or) / [`not`](Matcher::not)
//! (also available as the `&`, `|` and `!` operators) and are safe to call
//! from any thread, any number of times, in any order.

use crate::request::StubRequest;
use bytes::Bytes;
use http::Method;
use regex::Regex;
use std::fmt;
use std::ops::{BitAnd, BitOr, Not};
use std::sync::Arc;
use tracing::warn;

/// A predicate over an outgoing request, deciding stub applicability.
#[derive(Clone)]
pub struct Matcher(Arc<dyn Fn(&StubRequest) -> bool + Send + Sync>);

impl Matcher {
    /// Wrap an arbitrary predicate.
    ///
    /// The closure must be a pure function of the request: no side effects,
    /// no shared mutable state beyond read-only captures.
    pub fn new(test: impl Fn(&StubRequest) -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(test))
    }

    /// Evaluate the predicate.
    pub fn matches(&self, request: &StubRequest) -> bool {
        (self.0)(request)
    }

    /// Succeeds only if both `self` and `other` succeed. Short-circuits on
    /// the first false.
    pub fn and(self, other: Matcher) -> Matcher {
        Matcher::new(move |req| self.matches(req) && other.matches(req))
    }

    /// Succeeds if either `self` or `other` succeeds. Short-circuits on the
    /// first true.
    pub fn or(self, other: Matcher) -> Matcher {
        Matcher::new(move |req| self.matches(req) || other.matches(req))
    }

    /// Inverts `self`.
    pub fn not(self) -> Matcher {
        Matcher::new(move |req| !self.matches(req))
    }

    /// Matches every request.
    pub fn any() -> Matcher {
        Matcher::new(|_| true)
    }

    /// Matches no request.
    pub fn none() -> Matcher {
        Matcher::new(|_| false)
    }
}

impl BitAnd for Matcher {
    type Output = Matcher;

    fn bitand(self, rhs: Matcher) -> Matcher {
        self.and(rhs)
    }
}

impl BitOr for Matcher {
    type Output = Matcher;

    fn bitor(self, rhs: Matcher) -> Matcher {
        self.or(rhs)
    }
}

impl Not for Matcher {
    type Output = Matcher;

    fn not(self) -> Matcher {
        Matcher::not(self)
    }
}

impl fmt::Debug for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Matcher")
    }
}

/// Matches requests with the given HTTP method.
pub fn is_method(method: Method) -> Matcher {
    Matcher::new(move |req| req.method == method)
}

/// Matches GET requests.
pub fn is_get() -> Matcher {
    is_method(Method::GET)
}

/// Matches POST requests.
pub fn is_post() -> Matcher {
    is_method(Method::POST)
}

/// Matches PUT requests.
pub fn is_put() -> Matcher {
    is_method(Method::PUT)
}

/// Matches PATCH requests.
pub fn is_patch() -> Matcher {
    is_method(Method::PATCH)
}

/// Matches DELETE requests.
pub fn is_delete() -> Matcher {
    is_method(Method::DELETE)
}

/// Matches HEAD requests.
pub fn is_head() -> Matcher {
    is_method(Method::HEAD)
}

/// Matches the full absolute URL string, query and fragment included.
pub fn is_absolute_url(url: &str) -> Matcher {
    let url = url.to_string();
    Matcher::new(move |req| req.url.as_str() == url)
}

/// Matches the URL scheme, e.g. `https`.
///
/// # Panics
///
/// Panics if `scheme` contains `://` or `/`; the scheme part of a URL never
/// does, so such an argument is a bug in the calling test.
pub fn is_scheme(scheme: &str) -> Matcher {
    assert!(
        !scheme.contains("://"),
        "the scheme part of a URL never contains '://'; use values like \"https\""
    );
    assert!(
        !scheme.contains('/'),
        "the scheme part of a URL never contains a slash; use values like \"https\""
    );
    let scheme = scheme.to_string();
    Matcher::new(move |req| req.scheme() == scheme)
}

/// Matches the URL host, e.g. `api.example.com`.
///
/// # Panics
///
/// Panics if `host` contains a slash.
pub fn is_host(host: &str) -> Matcher {
    assert!(
        !host.contains('/'),
        "the host part of a URL never contains a slash; use values like \"api.example.com\""
    );
    let host = host.to_string();
    Matcher::new(move |req| req.host() == Some(host.as_str()))
}

/// Matches the exact URL path. Paths are absolute, so `path` should normally
/// start with `/`.
pub fn is_path(path: &str) -> Matcher {
    let path = path.to_string();
    Matcher::new(move |req| req.path() == path)
}

/// Matches paths starting with `prefix`.
pub fn path_starts_with(prefix: &str) -> Matcher {
    let prefix = prefix.to_string();
    Matcher::new(move |req| req.path().starts_with(&prefix))
}

/// Matches paths ending with `suffix`.
pub fn path_ends_with(suffix: &str) -> Matcher {
    let suffix = suffix.to_string();
    Matcher::new(move |req| req.path().ends_with(&suffix))
}

/// Matches paths against a regular expression. An invalid pattern yields a
/// matcher that never succeeds.
pub fn path_matches(pattern: &str) -> Matcher {
    match Regex::new(pattern) {
        Ok(regex) => Matcher::new(move |req| regex.is_match(req.path())),
        Err(e) => {
            warn!(pattern, error = %e, "Invalid path regex, matcher will never succeed");
            Matcher::none()
        }
    }
}

/// Matches paths against a glob pattern, e.g. `/api/*/detail`. An invalid
/// pattern yields a matcher that never succeeds.
pub fn path_glob(pattern: &str) -> Matcher {
    match globset::Glob::new(pattern) {
        Ok(glob) => {
            let glob = glob.compile_matcher();
            Matcher::new(move |req| glob.is_match(req.path()))
        }
        Err(e) => {
            warn!(pattern, error = %e, "Invalid path glob, matcher will never succeed");
            Matcher::none()
        }
    }
}

/// Matches the extension of the last path segment, without the dot.
pub fn is_extension(ext: &str) -> Matcher {
    let ext = ext.to_string();
    Matcher::new(move |req| req.path_extension() == Some(ext.as_str()))
}

/// Matches requests whose query contains every requested `(name, value)`
/// pair, under subset semantics.
///
/// A `None` value matches only a parameter with no value at all (`?flag`),
/// while `Some("")` matches only an explicitly empty value (`?flag=`).
/// Duplicate query keys are checked independently: each requested pair must
/// occur at least once among the URL's actual query items.
pub fn contains_query_params(params: &[(&str, Option<&str>)]) -> Matcher {
    let params: Vec<(String, Option<String>)> = params
        .iter()
        .map(|(name, value)| (name.to_string(), value.map(str::to_string)))
        .collect();
    Matcher::new(move |req| {
        let items = req.query_items();
        params.iter().all(|(name, value)| {
            items
                .iter()
                .any(|(n, v)| n == name && v.as_deref() == value.as_deref())
        })
    })
}

/// Matches requests carrying a header with the given name, any value.
pub fn has_header(name: &str) -> Matcher {
    let name = name.to_string();
    Matcher::new(move |req| req.header(&name).is_some())
}

/// Matches requests carrying a header with the given name and exact value.
pub fn header_equals(name: &str, value: &str) -> Matcher {
    let name = name.to_string();
    let value = value.to_string();
    Matcher::new(move |req| req.header(&name) == Some(value.as_str()))
}

/// Matches requests whose body is exactly the given bytes.
pub fn has_body(body: impl Into<Bytes>) -> Matcher {
    let body = body.into();
    Matcher::new(move |req| req.body.as_ref() == Some(&body))
}

/// Matches requests whose body parses as JSON structurally equal to `value`.
pub fn has_json_body(value: serde_json::Value) -> Matcher {
    Matcher::new(move |req| {
        req.body
            .as_ref()
            .and_then(|body| serde_json::from_slice::<serde_json::Value>(body).ok())
            .map(|parsed| parsed == value)
            .unwrap_or(false)
    })
}
