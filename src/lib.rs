//! httpstub
//!
//! In-process HTTP request stubbing: register matcher/response pairs in a
//! [`StubRegistry`], and answer outgoing requests with canned responses
//! instead of real network I/O. Perfect for deterministic client tests.
//!
//! # Features
//!
//! - **Request Matching**: composable predicates over method, scheme, host,
//!   path, query parameters, headers, and body
//! - **Canned Responses**: in-memory bodies, fixture files, or simulated
//!   connection failures
//! - **Latency Simulation**: delay before headers (`request_time`) and paced
//!   body streaming (`response_time` as a duration or a byte rate)
//! - **Layered Overrides**: the most recently installed matching stub wins,
//!   so specific stubs can shadow broad defaults
//! - **Activation Diagnostics**: a replaceable observer sees every matched
//!   and unmatched request
//! - **Declarative Stub Sets**: YAML-defined stubs with Handlebars-templated
//!   bodies
//!
//! # Example
//!
//! ```
//! use httpstub::{matcher, StubRegistry, StubRequest, StubResponse};
//!
//! # tokio_test::block_on(async {
//! let registry = StubRegistry::new();
//! registry.install(
//!     matcher::is_get() & matcher::is_extension("json"),
//!     |_req| StubResponse::json(200, &serde_json::json!({"ok": true})),
//! );
//!
//! let request = StubRequest::get("https://api.example.com/data.json");
//! let response = registry.handle(&request).await.unwrap().unwrap();
//! assert_eq!(response.status, 200);
//! assert_eq!(response.body_bytes().await.as_ref(), br#"{"ok":true}"#);
//! # });
//! ```
//!
//! The transport-interception layer hosting this crate calls
//! [`StubRegistry::can_handle`] to decide whether a request is stubbed and
//! [`StubRegistry::handle`] to obtain the canned response; unmatched requests
//! fall through to real networking at the host's discretion.

pub mod delivery;
pub mod matcher;
pub mod observer;
pub mod registry;
pub mod request;
pub mod response;
pub mod stubset;
pub mod template;

pub use delivery::{
    BodyStream, ByteSource, Clock, DeliveryError, FsByteSource, StubbedResponse, TokioClock,
};
pub use matcher::Matcher;
pub use observer::{ActivationObserver, ActivationOutcome, FanoutObserver, StubInfo};
pub use registry::{
    default_registry, remove_all_stubs, remove_stub, set_enabled, stub, stub_named, MatchedStub,
    ResponseBuilder, StubHandle, StubListing, StubRegistry,
};
pub use request::StubRequest;
pub use response::{download_speed, BodySource, NetworkError, ResponseTiming, StubResponse};
pub use stubset::StubSet;
pub use template::TemplateEngine;
