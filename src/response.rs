//! Canned response descriptors.
//!
//! A [`StubResponse`] is an immutable description of the response a stub
//! delivers: status, headers, a body source, and the simulated timing
//! (`request_time` before the first byte, `response_time` over which the body
//! streams).

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// A simulated connection-level failure.
///
/// Delivered as a network-error signal instead of any HTTP status, the way a
/// real transport reports a failed exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum NetworkError {
    /// No route to the network.
    #[error("not connected to the internet")]
    NotConnected,
    /// The exchange timed out.
    #[error("request timed out")]
    TimedOut,
    /// Host name could not be resolved.
    #[error("dns lookup failed")]
    DnsLookupFailed,
    /// The connection dropped mid-exchange.
    #[error("connection lost")]
    ConnectionLost,
}

/// Where the response body comes from.
#[derive(Debug, Clone)]
pub enum BodySource {
    /// In-memory bytes.
    Bytes(Bytes),
    /// A fixture file, read lazily at delivery time.
    File(PathBuf),
    /// No body at all: fail the exchange with a simulated connection error.
    Error(NetworkError),
}

/// How fast the body is streamed back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseTiming {
    /// Deliver the whole body at once.
    Instant,
    /// Stream the body over a fixed total duration.
    Duration(Duration),
    /// Stream the body at a throughput in bytes per second.
    Rate(u64),
}

/// Throughput presets for [`ResponseTiming::Rate`], modeled after common
/// real-world link speeds.
pub mod download_speed {
    use super::ResponseTiming;

    /// GPRS, ~7 KB/s.
    pub const GPRS: ResponseTiming = ResponseTiming::Rate(7 * 1024);
    /// EDGE, ~16 KB/s.
    pub const EDGE: ResponseTiming = ResponseTiming::Rate(16 * 1024);
    /// 3G, ~400 KB/s.
    pub const THREE_G: ResponseTiming = ResponseTiming::Rate(400 * 1024);
    /// 3G+, ~900 KB/s.
    pub const THREE_G_PLUS: ResponseTiming = ResponseTiming::Rate(900 * 1024);
    /// WiFi, ~1500 KB/s.
    pub const WIFI: ResponseTiming = ResponseTiming::Rate(1500 * 1024);
}

/// An immutable description of a canned response.
#[derive(Debug, Clone)]
pub struct StubResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers (one value per name).
    pub headers: HeaderMap,
    /// Body source.
    pub body: BodySource,
    /// Simulated delay before status and headers become available.
    pub request_time: Duration,
    /// Simulated pacing of the body.
    pub response_time: ResponseTiming,
}

impl StubResponse {
    /// An empty-bodied response with the given status and no simulated delay.
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: BodySource::Bytes(Bytes::new()),
            request_time: Duration::ZERO,
            response_time: ResponseTiming::Instant,
        }
    }

    /// A response whose body is the JSON serialization of `value`, with
    /// `Content-Type: application/json` preset.
    pub fn json(status: u16, value: &serde_json::Value) -> Self {
        let body = serde_json::to_vec(value).expect("serde_json::Value always serializes");
        Self::new(status)
            .with_header("Content-Type", "application/json")
            .with_body(body)
    }

    /// A response whose body is read from a fixture file at delivery time.
    pub fn from_file(status: u16, path: impl Into<PathBuf>) -> Self {
        let mut response = Self::new(status);
        response.body = BodySource::File(path.into());
        response
    }

    /// A response that simulates a connection-level failure instead of
    /// delivering any status, headers or body.
    pub fn network_error(error: NetworkError) -> Self {
        let mut response = Self::new(0);
        response.body = BodySource::Error(error);
        response
    }

    /// Set the body to in-memory bytes.
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = BodySource::Bytes(body.into());
        self
    }

    /// Set a header, replacing any previous value for the same name.
    ///
    /// # Panics
    ///
    /// Panics if the header name or value is invalid; a stub with a broken
    /// header should fail the test that declares it.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        let name: HeaderName = name.parse().expect("invalid header name");
        let value: HeaderValue = value.parse().expect("invalid header value");
        self.headers.insert(name, value);
        self
    }

    /// Set the simulated delay before headers are delivered.
    pub fn with_request_time(mut self, request_time: Duration) -> Self {
        self.request_time = request_time;
        self
    }

    /// Set the simulated body pacing.
    pub fn with_response_time(mut self, response_time: ResponseTiming) -> Self {
        self.response_time = response_time;
        self
    }

    /// Set both timing knobs at once.
    pub fn with_times(self, request_time: Duration, response_time: ResponseTiming) -> Self {
        self.with_request_time(request_time)
            .with_response_time(response_time)
    }
}
