//! Declarative stub sets.
//!
//! A [`StubSet`] describes stubs in YAML instead of code: request rules,
//! canned responses (optionally Handlebars-templated), simulated timing, and
//! connection faults. Loading a set compiles each definition into a
//! [`Matcher`] and response builder and installs them into a registry, so
//! fixture-driven suites and programmatic stubs share one engine.

use crate::matcher::{self, Matcher};
use crate::registry::{StubHandle, StubRegistry};
use crate::request::StubRequest;
use crate::response::{NetworkError, ResponseTiming, StubResponse};
use crate::template::TemplateEngine;
use http::{HeaderName, HeaderValue};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// A set of declarative stub definitions.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct StubSet {
    /// Stub definitions, in the order they will be installed.
    #[serde(default)]
    pub stubs: Vec<StubDefinition>,
}

impl StubSet {
    /// Load a stub set from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse a stub set from a YAML string.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let set: Self = serde_yaml::from_str(yaml)?;
        set.validate()?;
        Ok(set)
    }

    /// Validate every definition.
    pub fn validate(&self) -> anyhow::Result<()> {
        for (i, stub) in self.stubs.iter().enumerate() {
            stub.validate()
                .map_err(|e| anyhow::anyhow!("Stub {}: {}", i, e))?;
        }
        Ok(())
    }

    /// Compile each enabled definition and install it into `registry`, in
    /// order. Later definitions therefore override earlier ones wherever
    /// their request rules overlap.
    pub fn install_into(&self, registry: &StubRegistry) -> anyhow::Result<Vec<StubHandle>> {
        let engine = Arc::new(TemplateEngine::new());
        let mut handles = Vec::new();
        for (i, stub) in self.stubs.iter().enumerate() {
            if !stub.enabled {
                continue;
            }
            let matcher = stub
                .request
                .compile()
                .map_err(|e| anyhow::anyhow!("Stub {}: {}", i, e))?;
            let builder = stub.compile_builder(Arc::clone(&engine))?;
            handles.push(registry.install_entry(matcher, builder, stub.name.clone()));
        }
        Ok(handles)
    }
}

/// A single declarative stub.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StubDefinition {
    /// Optional name, reported in listings and activations.
    #[serde(default)]
    pub name: Option<String>,

    /// Request rules; all must hold (AND semantics).
    pub request: RequestRule,

    /// Response to deliver.
    #[serde(default)]
    pub response: ResponseRule,

    /// Simulated timing.
    #[serde(default)]
    pub timing: Option<TimingRule>,

    /// Simulated connection fault, overriding the response entirely.
    #[serde(default)]
    pub fault: Option<FaultRule>,

    /// Whether this stub is installed at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl StubDefinition {
    fn validate(&self) -> anyhow::Result<()> {
        self.request.validate()?;
        self.response.validate()?;
        Ok(())
    }

    fn compile_builder(
        &self,
        engine: Arc<TemplateEngine>,
    ) -> anyhow::Result<crate::registry::ResponseBuilder> {
        let response = self.response.clone();
        let timing = self.timing.clone();
        let fault = self.fault;

        Ok(Arc::new(move |req: &StubRequest| {
            let request_time = timing
                .as_ref()
                .map(|t| t.request_time())
                .unwrap_or(Duration::ZERO);
            let response_time = timing
                .as_ref()
                .map(|t| t.response_time())
                .unwrap_or(ResponseTiming::Instant);

            if let Some(fault) = fault {
                return Ok(StubResponse::network_error(fault.network_error())
                    .with_request_time(request_time));
            }

            let built = response.build(req, &engine)?;
            Ok(built.with_times(request_time, response_time))
        }))
    }
}

/// Request rules for one stub.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct RequestRule {
    /// HTTP method(s) to match (empty = any).
    #[serde(default)]
    pub method: Vec<String>,

    /// Path rule.
    #[serde(default)]
    pub path: Option<PathRule>,

    /// Query parameter rules, by parameter name.
    #[serde(default)]
    pub query: HashMap<String, QueryRule>,

    /// Header rules, by header name (case-insensitive).
    #[serde(default)]
    pub headers: HashMap<String, HeaderRule>,

    /// Body rule.
    #[serde(default)]
    pub body: Option<BodyRule>,
}

impl RequestRule {
    fn validate(&self) -> anyhow::Result<()> {
        if let Some(path) = &self.path {
            path.validate()?;
        }
        for rule in self.query.values() {
            if let QueryRule::Regex { pattern } = rule {
                Regex::new(pattern).map_err(|e| anyhow::anyhow!("Invalid query regex: {}", e))?;
            }
        }
        for rule in self.headers.values() {
            if let HeaderRule::Regex { pattern } = rule {
                Regex::new(pattern).map_err(|e| anyhow::anyhow!("Invalid header regex: {}", e))?;
            }
        }
        if let Some(BodyRule::Regex { pattern }) = &self.body {
            Regex::new(pattern).map_err(|e| anyhow::anyhow!("Invalid body regex: {}", e))?;
        }
        Ok(())
    }

    /// Compile the rules into one AND-composed [`Matcher`].
    pub fn compile(&self) -> anyhow::Result<Matcher> {
        let mut compiled = Matcher::any();

        if !self.method.is_empty() {
            let methods: Vec<String> = self.method.iter().map(|m| m.to_uppercase()).collect();
            compiled = compiled & Matcher::new(move |req| {
                methods.iter().any(|m| req.method.as_str() == m)
            });
        }

        if let Some(path) = &self.path {
            compiled = compiled & path.compile()?;
        }

        for (name, rule) in &self.query {
            compiled = compiled & rule.compile(name)?;
        }

        for (name, rule) in &self.headers {
            compiled = compiled & rule.compile(name)?;
        }

        if let Some(body) = &self.body {
            compiled = compiled & body.compile()?;
        }

        Ok(compiled)
    }
}

/// Path rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PathRule {
    /// Exact path match
    Exact { value: String },
    /// Path prefix match
    Prefix { value: String },
    /// Path suffix match
    Suffix { value: String },
    /// Regex pattern match
    Regex { pattern: String },
    /// Glob pattern match
    Glob { pattern: String },
}

impl PathRule {
    fn validate(&self) -> anyhow::Result<()> {
        match self {
            PathRule::Regex { pattern } => {
                Regex::new(pattern).map_err(|e| anyhow::anyhow!("Invalid regex: {}", e))?;
            }
            PathRule::Glob { pattern } => {
                globset::Glob::new(pattern).map_err(|e| anyhow::anyhow!("Invalid glob: {}", e))?;
            }
            _ => {}
        }
        Ok(())
    }

    fn compile(&self) -> anyhow::Result<Matcher> {
        Ok(match self {
            PathRule::Exact { value } => matcher::is_path(value),
            PathRule::Prefix { value } => matcher::path_starts_with(value),
            PathRule::Suffix { value } => matcher::path_ends_with(value),
            PathRule::Regex { pattern } => {
                let regex = Regex::new(pattern)?;
                Matcher::new(move |req| regex.is_match(req.path()))
            }
            PathRule::Glob { pattern } => {
                let glob = globset::Glob::new(pattern)?.compile_matcher();
                Matcher::new(move |req| glob.is_match(req.path()))
            }
        })
    }
}

/// Query parameter rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueryRule {
    /// Exact value match
    Exact { value: String },
    /// Regex pattern match on the value
    Regex { pattern: String },
    /// Parameter present with no value at all (`?flag`, not `?flag=`)
    Flag,
    /// Parameter must be present (any value, or none)
    Present,
    /// Parameter must be absent
    Absent,
}

impl QueryRule {
    fn compile(&self, name: &str) -> anyhow::Result<Matcher> {
        let name = name.to_string();
        Ok(match self {
            QueryRule::Exact { value } => {
                let value = value.clone();
                Matcher::new(move |req| {
                    req.query_items()
                        .iter()
                        .any(|(n, v)| *n == name && v.as_deref() == Some(value.as_str()))
                })
            }
            QueryRule::Regex { pattern } => {
                let regex = Regex::new(pattern)?;
                Matcher::new(move |req| {
                    req.query_items().iter().any(|(n, v)| {
                        *n == name && v.as_deref().map(|v| regex.is_match(v)).unwrap_or(false)
                    })
                })
            }
            QueryRule::Flag => Matcher::new(move |req| {
                req.query_items()
                    .iter()
                    .any(|(n, v)| *n == name && v.is_none())
            }),
            QueryRule::Present => Matcher::new(move |req| {
                req.query_items().iter().any(|(n, _)| *n == name)
            }),
            QueryRule::Absent => Matcher::new(move |req| {
                !req.query_items().iter().any(|(n, _)| *n == name)
            }),
        })
    }
}

/// Header rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HeaderRule {
    /// Exact value match
    Exact { value: String },
    /// Regex pattern match
    Regex { pattern: String },
    /// Header must be present (any value)
    Present,
    /// Header must be absent
    Absent,
    /// Value must contain substring
    Contains { value: String },
}

impl HeaderRule {
    fn compile(&self, name: &str) -> anyhow::Result<Matcher> {
        let name = name.to_string();
        Ok(match self {
            HeaderRule::Exact { value } => matcher::header_equals(&name, value),
            HeaderRule::Regex { pattern } => {
                let regex = Regex::new(pattern)?;
                Matcher::new(move |req| {
                    req.header(&name).map(|v| regex.is_match(v)).unwrap_or(false)
                })
            }
            HeaderRule::Present => matcher::has_header(&name),
            HeaderRule::Absent => !matcher::has_header(&name),
            HeaderRule::Contains { value } => {
                let value = value.clone();
                Matcher::new(move |req| {
                    req.header(&name).map(|v| v.contains(&value)).unwrap_or(false)
                })
            }
        })
    }
}

/// Body rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BodyRule {
    /// Exact body match
    Exact { value: String },
    /// Regex pattern match
    Regex { pattern: String },
    /// Body must contain substring
    Contains { value: String },
    /// Body must parse as JSON structurally equal to the given value
    JsonEquals { value: serde_json::Value },
    /// Body must be valid JSON (any structure)
    Json,
    /// Body must be empty
    Empty,
}

impl BodyRule {
    fn compile(&self) -> anyhow::Result<Matcher> {
        Ok(match self {
            BodyRule::Exact { value } => matcher::has_body(value.clone().into_bytes()),
            BodyRule::Regex { pattern } => {
                let regex = Regex::new(pattern)?;
                Matcher::new(move |req| {
                    body_str(req).map(|s| regex.is_match(s)).unwrap_or(false)
                })
            }
            BodyRule::Contains { value } => {
                let value = value.clone();
                Matcher::new(move |req| {
                    body_str(req).map(|s| s.contains(&value)).unwrap_or(false)
                })
            }
            BodyRule::JsonEquals { value } => matcher::has_json_body(value.clone()),
            BodyRule::Json => Matcher::new(|req| {
                req.body
                    .as_ref()
                    .map(|b| serde_json::from_slice::<serde_json::Value>(b).is_ok())
                    .unwrap_or(false)
            }),
            BodyRule::Empty => Matcher::new(|req| {
                req.body.as_ref().map(|b| b.is_empty()).unwrap_or(true)
            }),
        })
    }
}

fn body_str(req: &StubRequest) -> Option<&str> {
    req.body.as_ref().and_then(|b| std::str::from_utf8(b).ok())
}

/// Set a response header, surfacing malformed names or values as builder
/// errors instead of panicking inside a delivery.
fn insert_header(response: &mut StubResponse, name: &str, value: &str) -> anyhow::Result<()> {
    let name: HeaderName = name
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid header name {:?}: {}", name, e))?;
    let value: HeaderValue = value
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid header value for {:?}: {}", name, e))?;
    response.headers.insert(name, value);
    Ok(())
}

/// Response definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResponseRule {
    /// HTTP status code
    #[serde(default = "default_status")]
    pub status: u16,

    /// Response headers
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Response body
    #[serde(default)]
    pub body: Option<ResponseBodyRule>,

    /// Whether string bodies are Handlebars templates rendered per request
    #[serde(default)]
    pub template: bool,
}

fn default_status() -> u16 {
    200
}

impl Default for ResponseRule {
    fn default() -> Self {
        Self {
            status: default_status(),
            headers: HashMap::new(),
            body: None,
            template: false,
        }
    }
}

impl ResponseRule {
    fn validate(&self) -> anyhow::Result<()> {
        if self.status < 100 || self.status > 599 {
            anyhow::bail!("Invalid status code: {}", self.status);
        }
        for (name, value) in &self.headers {
            name.parse::<HeaderName>()
                .map_err(|e| anyhow::anyhow!("Invalid header name {:?}: {}", name, e))?;
            value
                .parse::<HeaderValue>()
                .map_err(|e| anyhow::anyhow!("Invalid header value for {:?}: {}", name, e))?;
        }
        Ok(())
    }

    fn build(&self, req: &StubRequest, engine: &TemplateEngine) -> anyhow::Result<StubResponse> {
        let mut response = StubResponse::new(self.status);

        // Fixture files stay lazy: the delivery layer reads them through its
        // injected byte source.
        let body_bytes = match &self.body {
            None => None,
            Some(ResponseBodyRule::File { path }) => {
                response = StubResponse::from_file(self.status, path.clone());
                None
            }
            Some(body) if self.template => Some(body.render(req, engine)?),
            Some(body) => Some(body.to_bytes()?),
        };

        let content_type = self
            .headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("content-type"))
            .map(|(_, value)| value.clone())
            .or_else(|| self.body.as_ref().map(|b| b.content_type().to_string()));
        if let Some(content_type) = content_type {
            insert_header(&mut response, "Content-Type", &content_type)?;
        }

        for (name, value) in &self.headers {
            if !name.eq_ignore_ascii_case("content-type") {
                insert_header(&mut response, name, value)?;
            }
        }

        if let Some(bytes) = body_bytes {
            response = response.with_body(bytes);
        }

        Ok(response)
    }
}

/// Response body configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseBodyRule {
    /// Plain text body
    Text { content: String },
    /// JSON body
    Json { content: serde_json::Value },
    /// Base64 encoded binary
    Base64 { content: String },
    /// Load from file at delivery time
    File { path: String },
}

impl ResponseBodyRule {
    /// Get the body content as bytes.
    pub fn to_bytes(&self) -> anyhow::Result<Vec<u8>> {
        match self {
            ResponseBodyRule::Text { content } => Ok(content.as_bytes().to_vec()),
            ResponseBodyRule::Json { content } => Ok(serde_json::to_vec(content)?),
            ResponseBodyRule::Base64 { content } => {
                use base64::Engine;
                base64::engine::general_purpose::STANDARD
                    .decode(content)
                    .map_err(|e| anyhow::anyhow!("Invalid base64: {}", e))
            }
            ResponseBodyRule::File { path } => std::fs::read(path)
                .map_err(|e| anyhow::anyhow!("Failed to read file {}: {}", path, e)),
        }
    }

    fn render(&self, req: &StubRequest, engine: &TemplateEngine) -> anyhow::Result<Vec<u8>> {
        match self {
            ResponseBodyRule::Text { content } => {
                Ok(engine.render(content, req)?.into_bytes())
            }
            ResponseBodyRule::Json { content } => {
                Ok(serde_json::to_vec(&engine.render_json(content, req)?)?)
            }
            _ => self.to_bytes(),
        }
    }

    /// Default content type for this body.
    pub fn content_type(&self) -> &'static str {
        match self {
            ResponseBodyRule::Text { .. } => "text/plain",
            ResponseBodyRule::Json { .. } => "application/json",
            ResponseBodyRule::Base64 { .. } => "application/octet-stream",
            ResponseBodyRule::File { .. } => "application/octet-stream",
        }
    }
}

/// Simulated timing configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct TimingRule {
    /// Fixed delay before headers, in milliseconds
    #[serde(default)]
    pub request_time_ms: u64,

    /// Minimum extra random delay (ms)
    #[serde(default)]
    pub jitter_min_ms: u64,

    /// Maximum extra random delay (ms)
    #[serde(default)]
    pub jitter_max_ms: u64,

    /// Total duration over which the body streams (ms)
    #[serde(default)]
    pub response_duration_ms: Option<u64>,

    /// Body throughput in bytes per second
    #[serde(default)]
    pub bytes_per_second: Option<u64>,
}

impl TimingRule {
    /// Delay before headers, jitter included. Recomputed per request.
    pub fn request_time(&self) -> Duration {
        let mut ms = self.request_time_ms;
        if self.jitter_max_ms > self.jitter_min_ms {
            use rand::Rng;
            let mut rng = rand::thread_rng();
            ms += rng.gen_range(self.jitter_min_ms..=self.jitter_max_ms);
        } else {
            ms += self.jitter_min_ms;
        }
        Duration::from_millis(ms)
    }

    /// Body pacing. A duration takes precedence over a rate.
    pub fn response_time(&self) -> ResponseTiming {
        if let Some(ms) = self.response_duration_ms {
            ResponseTiming::Duration(Duration::from_millis(ms))
        } else if let Some(rate) = self.bytes_per_second {
            ResponseTiming::Rate(rate)
        } else {
            ResponseTiming::Instant
        }
    }
}

/// Simulated connection fault.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FaultRule {
    /// No route to the network
    NotConnected,
    /// The exchange times out
    Timeout,
    /// Host name resolution fails
    DnsFailure,
    /// The connection drops
    ConnectionLost,
}

impl FaultRule {
    fn network_error(self) -> NetworkError {
        match self {
            FaultRule::NotConnected => NetworkError::NotConnected,
            FaultRule::Timeout => NetworkError::TimedOut,
            FaultRule::DnsFailure => NetworkError::DnsLookupFailed,
            FaultRule::ConnectionLost => NetworkError::ConnectionLost,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_stub() {
        let yaml = r#"
stubs:
  - name: hello-world
    request:
      method: [GET]
      path:
        type: exact
        value: /hello
    response:
      status: 200
      body:
        type: text
        content: "Hello, World!"
"#;
        let set = StubSet::from_yaml(yaml).unwrap();
        assert_eq!(set.stubs.len(), 1);
        assert_eq!(set.stubs[0].name.as_deref(), Some("hello-world"));
    }

    #[test]
    fn test_parse_json_response() {
        let yaml = r#"
stubs:
  - request:
      path:
        type: prefix
        value: /api
    response:
      status: 200
      headers:
        Content-Type: application/json
      body:
        type: json
        content:
          message: "success"
          code: 0
"#;
        let set = StubSet::from_yaml(yaml).unwrap();
        assert_eq!(set.stubs.len(), 1);

        if let Some(ResponseBodyRule::Json { content }) = &set.stubs[0].response.body {
            assert_eq!(content["message"], "success");
        } else {
            panic!("Expected JSON body");
        }
    }

    #[test]
    fn test_parse_timing() {
        let yaml = r#"
stubs:
  - request:
      path:
        type: exact
        value: /slow
    response:
      status: 200
    timing:
      request_time_ms: 1000
      bytes_per_second: 2048
"#;
        let set = StubSet::from_yaml(yaml).unwrap();
        let timing = set.stubs[0].timing.as_ref().unwrap();
        assert_eq!(timing.request_time(), Duration::from_secs(1));
        assert_eq!(timing.response_time(), ResponseTiming::Rate(2048));
    }

    #[test]
    fn test_timing_jitter_range() {
        let timing = TimingRule {
            request_time_ms: 100,
            jitter_min_ms: 50,
            jitter_max_ms: 150,
            ..Default::default()
        };
        let delay = timing.request_time();
        assert!(delay >= Duration::from_millis(150));
        assert!(delay <= Duration::from_millis(250));
    }

    #[test]
    fn test_invalid_regex_rejected() {
        let yaml = r#"
stubs:
  - request:
      path:
        type: regex
        pattern: "[unclosed"
    response:
      status: 200
"#;
        assert!(StubSet::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_invalid_header_name_rejected() {
        let yaml = r#"
stubs:
  - request: {}
    response:
      status: 200
      headers:
        "bad header": "value"
"#;
        let err = StubSet::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("header name"));
    }

    #[test]
    fn test_invalid_header_value_rejected() {
        let yaml = r#"
stubs:
  - request: {}
    response:
      status: 200
      headers:
        X-Marker: "bad\0value"
"#;
        let err = StubSet::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("header value"));
    }

    #[tokio::test]
    async fn test_unvalidated_bad_header_fails_delivery_not_panics() {
        // A definition that skipped from_yaml's validation still must not
        // panic at delivery time.
        let set = StubSet {
            stubs: vec![StubDefinition {
                name: None,
                request: RequestRule::default(),
                response: ResponseRule {
                    status: 200,
                    headers: [("bad header".to_string(), "v".to_string())].into(),
                    body: None,
                    template: false,
                },
                timing: None,
                fault: None,
                enabled: true,
            }],
        };
        let registry = StubRegistry::new();
        set.install_into(&registry).unwrap();

        let req = StubRequest::get("https://example.com/");
        match registry.handle(&req).await.unwrap() {
            Err(crate::delivery::DeliveryError::Builder(e)) => {
                assert!(e.to_string().contains("header name"));
            }
            other => panic!("expected builder failure, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_invalid_status_rejected() {
        let yaml = r#"
stubs:
  - request: {}
    response:
      status: 42
"#;
        assert!(StubSet::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_compiled_matcher_semantics() {
        let yaml = r#"
stubs:
  - request:
      method: [GET]
      path:
        type: regex
        pattern: "^/users/\\d+$"
      query:
        verbose:
          type: flag
      headers:
        authorization:
          type: present
    response:
      status: 200
"#;
        let set = StubSet::from_yaml(yaml).unwrap();
        let matcher = set.stubs[0].request.compile().unwrap();

        let matching = StubRequest::get("https://api.example.com/users/7?verbose")
            .with_header("Authorization", "Bearer t");
        assert!(matcher.matches(&matching));

        // `?verbose=` is an empty value, not a bare flag.
        let empty_value = StubRequest::get("https://api.example.com/users/7?verbose=")
            .with_header("Authorization", "Bearer t");
        assert!(!matcher.matches(&empty_value));

        let wrong_method = StubRequest::post("https://api.example.com/users/7?verbose")
            .with_header("Authorization", "Bearer t");
        assert!(!matcher.matches(&wrong_method));
    }

    #[test]
    fn test_header_contains_rule() {
        let rule = HeaderRule::Contains {
            value: "Bearer".to_string(),
        };
        let matcher = rule.compile("authorization").unwrap();
        let with = StubRequest::get("https://example.com/")
            .with_header("Authorization", "Bearer token");
        let without = StubRequest::get("https://example.com/")
            .with_header("Authorization", "Basic abc");
        assert!(matcher.matches(&with));
        assert!(!matcher.matches(&without));
    }

    #[test]
    fn test_body_rules() {
        let json_req = StubRequest::post("https://example.com/").with_body(r#"{"id":7}"#);
        let text_req = StubRequest::post("https://example.com/").with_body("id equals 7");
        let empty_req = StubRequest::post("https://example.com/");

        let regex = BodyRule::Regex {
            pattern: r"^id equals \d+$".to_string(),
        }
        .compile()
        .unwrap();
        assert!(regex.matches(&text_req));
        assert!(!regex.matches(&json_req));
        assert!(!regex.matches(&empty_req));

        let contains = BodyRule::Contains {
            value: "equals".to_string(),
        }
        .compile()
        .unwrap();
        assert!(contains.matches(&text_req));
        assert!(!contains.matches(&json_req));

        let json = BodyRule::Json.compile().unwrap();
        assert!(json.matches(&json_req));
        assert!(!json.matches(&text_req));

        let empty = BodyRule::Empty.compile().unwrap();
        assert!(empty.matches(&empty_req));
        assert!(!empty.matches(&text_req));
    }

    #[tokio::test]
    async fn test_install_and_handle() {
        let yaml = r#"
stubs:
  - name: wide-open
    request:
      path:
        type: prefix
        value: /
    response:
      status: 418
      body:
        type: text
        content: "teapot"

  - name: user-endpoint
    request:
      method: [GET]
      path:
        type: exact
        value: /users/me
    response:
      status: 200
      template: true
      body:
        type: json
        content:
          greeting: "hello {{query.name}}"
"#;
        let registry = StubRegistry::new();
        let set = StubSet::from_yaml(yaml).unwrap();
        let handles = set.install_into(&registry).unwrap();
        assert_eq!(handles.len(), 2);

        // The later, more specific stub wins over the wide-open one.
        let req = StubRequest::get("https://example.com/users/me?name=ada");
        let response = registry.handle(&req).await.unwrap().unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(
            response.headers.get("content-type").unwrap(),
            "application/json"
        );
        let body = response.body_bytes().await;
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["greeting"], "hello ada");

        let other = StubRequest::get("https://example.com/anything");
        let response = registry.handle(&other).await.unwrap().unwrap();
        assert_eq!(response.status, 418);
        assert_eq!(response.body_bytes().await.as_ref(), b"teapot");
    }

    #[tokio::test]
    async fn test_fault_stub_fails_delivery() {
        let yaml = r#"
stubs:
  - request:
      path:
        type: exact
        value: /flaky
    response:
      status: 200
    fault:
      type: timeout
"#;
        let registry = StubRegistry::new();
        StubSet::from_yaml(yaml)
            .unwrap()
            .install_into(&registry)
            .unwrap();

        let req = StubRequest::get("https://example.com/flaky");
        let result = registry.handle(&req).await.unwrap();
        match result {
            Err(crate::delivery::DeliveryError::Connection(e)) => {
                assert_eq!(e, NetworkError::TimedOut);
            }
            other => panic!("expected connection failure, got {:?}", other.map(|_| ())),
        }
    }
}
