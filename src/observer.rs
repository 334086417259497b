//! Activation diagnostics.
//!
//! A process sets at most one [`ActivationObserver`] per registry; installing
//! a new one replaces the previous one. Observers are purely diagnostic: a
//! panic inside an observer is caught and logged, never propagated to the
//! request being served. To notify several parties, compose them explicitly
//! with [`FanoutObserver`].

use crate::registry::StubHandle;
use crate::request::StubRequest;
use crate::response::StubResponse;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::warn;

/// Identity of the stub that answered a request.
#[derive(Debug, Clone)]
pub struct StubInfo {
    /// Handle of the winning stub.
    pub handle: StubHandle,
    /// Its human-readable name, if one was set.
    pub name: Option<String>,
}

/// How a matched request ended up.
#[derive(Debug, Clone)]
pub enum ActivationOutcome {
    /// The descriptor was delivered in full.
    Delivered(Arc<StubResponse>),
    /// Delivery failed: simulated connection error, builder error, or a
    /// fixture that could not be read.
    Failed(String),
}

/// Observer invoked once per matched-and-delivered request, and once per
/// unmatched request.
pub trait ActivationObserver: Send + Sync {
    /// A stub answered `request`; `outcome` tells how delivery ended.
    fn on_activation(&self, request: &StubRequest, stub: &StubInfo, outcome: &ActivationOutcome);

    /// No stub matched `request`; the host falls through to real networking
    /// or fails the request, at its discretion.
    fn on_missing(&self, request: &StubRequest) {
        let _ = request;
    }
}

/// Explicit fan-out to several observers, invoked in order.
#[derive(Default)]
pub struct FanoutObserver {
    observers: Vec<Arc<dyn ActivationObserver>>,
}

impl FanoutObserver {
    /// An empty fan-out.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an observer.
    pub fn push(mut self, observer: Arc<dyn ActivationObserver>) -> Self {
        self.observers.push(observer);
        self
    }
}

impl ActivationObserver for FanoutObserver {
    fn on_activation(&self, request: &StubRequest, stub: &StubInfo, outcome: &ActivationOutcome) {
        for observer in &self.observers {
            observer.on_activation(request, stub, outcome);
        }
    }

    fn on_missing(&self, request: &StubRequest) {
        for observer in &self.observers {
            observer.on_missing(request);
        }
    }
}

/// Invoke `on_activation`, swallowing any panic.
pub(crate) fn notify_activation(
    observer: &Arc<dyn ActivationObserver>,
    request: &StubRequest,
    stub: &StubInfo,
    outcome: &ActivationOutcome,
) {
    let result = catch_unwind(AssertUnwindSafe(|| {
        observer.on_activation(request, stub, outcome)
    }));
    if result.is_err() {
        warn!(
            handle = ?stub.handle,
            "Activation observer panicked; ignoring"
        );
    }
}

/// Invoke `on_missing`, swallowing any panic.
pub(crate) fn notify_missing(observer: &Arc<dyn ActivationObserver>, request: &StubRequest) {
    let result = catch_unwind(AssertUnwindSafe(|| observer.on_missing(request)));
    if result.is_err() {
        warn!(url = %request.url, "Activation observer panicked; ignoring");
    }
}
