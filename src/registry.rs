//! The stub registry: ordered stubs, matching, and the host surface.
//!
//! A [`StubRegistry`] owns an insertion-ordered list of stubs behind one
//! mutex. Matching snapshots that list and evaluates matchers outside the
//! lock, so response builders may re-enter the registry (install, remove)
//! without deadlocking, and concurrent requests never serialize on each
//! other's simulated delays.

use crate::delivery::{
    BodyStream, ByteSource, Clock, DeliveryError, DeliveryReceipt, FsByteSource, StubbedResponse,
    TokioClock,
};
use crate::matcher::Matcher;
use crate::observer::{
    notify_activation, notify_missing, ActivationObserver, ActivationOutcome, StubInfo,
};
use crate::request::StubRequest;
use crate::response::{BodySource, StubResponse};
use bytes::Bytes;
use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Builds the response descriptor for the winning stub, lazily, once per
/// matched request.
pub type ResponseBuilder =
    Arc<dyn Fn(&StubRequest) -> anyhow::Result<StubResponse> + Send + Sync>;

/// Opaque identity of an installed stub, valid until the stub is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StubHandle(u64);

impl StubHandle {
    #[cfg(test)]
    pub(crate) fn from_raw(id: u64) -> Self {
        Self(id)
    }
}

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

struct StubEntry {
    handle: StubHandle,
    matcher: Matcher,
    builder: ResponseBuilder,
    /// The only mutable field of an installed stub.
    name: Mutex<Option<String>>,
}

impl StubEntry {
    fn name(&self) -> Option<String> {
        self.name.lock().expect("stub name lock poisoned").clone()
    }
}

/// Introspection record for one installed stub.
#[derive(Debug, Clone)]
pub struct StubListing {
    /// The stub's handle.
    pub handle: StubHandle,
    /// Its name, if any.
    pub name: Option<String>,
}

/// The result of matching a request: identity plus the not-yet-invoked
/// builder of the winning stub.
pub struct MatchedStub {
    /// Handle of the winning stub.
    pub handle: StubHandle,
    /// Its name at match time.
    pub name: Option<String>,
    builder: ResponseBuilder,
}

impl MatchedStub {
    /// Invoke the stub's builder for `request`.
    pub fn build_response(&self, request: &StubRequest) -> anyhow::Result<StubResponse> {
        (self.builder)(request)
    }
}

struct Inner {
    entries: Vec<Arc<StubEntry>>,
    enabled: bool,
}

/// Ordered collection of stubs with a global enable switch.
///
/// All operations are safe under concurrent calls from multiple threads; a
/// test-control thread may install and remove stubs while request tasks
/// match against the registry.
pub struct StubRegistry {
    inner: Mutex<Inner>,
    observer: Mutex<Option<Arc<dyn ActivationObserver>>>,
    clock: Arc<dyn Clock>,
    byte_source: Arc<dyn ByteSource>,
}

impl Default for StubRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StubRegistry {
    /// An empty, enabled registry with the default tokio clock and
    /// file-system byte source.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: Vec::new(),
                enabled: true,
            }),
            observer: Mutex::new(None),
            clock: Arc::new(TokioClock),
            byte_source: Arc::new(FsByteSource),
        }
    }

    /// Replace the timer used for simulated delays. For tests of the engine
    /// itself.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the fixture byte source. For tests of the engine itself.
    pub fn with_byte_source(mut self, byte_source: Arc<dyn ByteSource>) -> Self {
        self.byte_source = byte_source;
        self
    }

    /// Install a stub with an infallible response builder. Returns a handle
    /// valid until the stub is removed.
    pub fn install<F>(&self, matcher: Matcher, builder: F) -> StubHandle
    where
        F: Fn(&StubRequest) -> StubResponse + Send + Sync + 'static,
    {
        self.install_entry(matcher, Arc::new(move |req: &StubRequest| Ok(builder(req))), None)
    }

    /// Install a stub with a human-readable name for diagnostics.
    pub fn install_named<F>(&self, name: impl Into<String>, matcher: Matcher, builder: F) -> StubHandle
    where
        F: Fn(&StubRequest) -> StubResponse + Send + Sync + 'static,
    {
        self.install_entry(
            matcher,
            Arc::new(move |req: &StubRequest| Ok(builder(req))),
            Some(name.into()),
        )
    }

    /// Install a stub whose builder may fail. Builder errors surface as
    /// [`DeliveryError::Builder`] when the stub wins a match.
    pub fn install_fallible<F>(&self, matcher: Matcher, builder: F) -> StubHandle
    where
        F: Fn(&StubRequest) -> anyhow::Result<StubResponse> + Send + Sync + 'static,
    {
        self.install_entry(matcher, Arc::new(builder), None)
    }

    pub(crate) fn install_entry(
        &self,
        matcher: Matcher,
        builder: ResponseBuilder,
        name: Option<String>,
    ) -> StubHandle {
        let handle = StubHandle(NEXT_HANDLE.fetch_add(1, Ordering::Relaxed));
        let entry = Arc::new(StubEntry {
            handle,
            matcher,
            builder,
            name: Mutex::new(name),
        });
        let mut inner = self.lock();
        inner.entries.push(entry);
        debug!(?handle, stubs = inner.entries.len(), "Stub installed");
        handle
    }

    /// Remove a stub by handle. Idempotent: returns whether a stub was
    /// actually removed. Remaining stubs keep their relative order, and a
    /// delivery already in flight for the removed stub completes with the
    /// descriptor it obtained.
    pub fn remove(&self, handle: StubHandle) -> bool {
        let mut inner = self.lock();
        let before = inner.entries.len();
        inner.entries.retain(|entry| entry.handle != handle);
        let removed = inner.entries.len() != before;
        if removed {
            debug!(?handle, "Stub removed");
        }
        removed
    }

    /// Remove the most recently installed stub, returning its handle.
    pub fn remove_last(&self) -> Option<StubHandle> {
        let mut inner = self.lock();
        let entry = inner.entries.pop()?;
        debug!(handle = ?entry.handle, "Last stub removed");
        Some(entry.handle)
    }

    /// Remove every stub, returning how many were removed. Used to isolate
    /// test cases from each other.
    pub fn remove_all(&self) -> usize {
        let mut inner = self.lock();
        let removed = inner.entries.len();
        inner.entries.clear();
        info!(removed, "All stubs removed");
        removed
    }

    /// Global kill-switch. While disabled, [`find_match`](Self::find_match)
    /// reports no match for every request; installed stubs are preserved and
    /// re-enabling restores prior behavior.
    pub fn set_enabled(&self, enabled: bool) {
        self.lock().enabled = enabled;
        info!(enabled, "Stub registry toggled");
    }

    /// Whether the registry currently answers requests.
    pub fn is_enabled(&self) -> bool {
        self.lock().enabled
    }

    /// Rename a stub. Returns false if the handle is no longer installed.
    pub fn set_name(&self, handle: StubHandle, name: impl Into<String>) -> bool {
        let entry = {
            let inner = self.lock();
            inner
                .entries
                .iter()
                .find(|entry| entry.handle == handle)
                .cloned()
        };
        match entry {
            Some(entry) => {
                *entry.name.lock().expect("stub name lock poisoned") = Some(name.into());
                true
            }
            None => false,
        }
    }

    /// List installed stubs in registration order, for diagnostics.
    pub fn all_stubs(&self) -> Vec<StubListing> {
        self.lock()
            .entries
            .iter()
            .map(|entry| StubListing {
                handle: entry.handle,
                name: entry.name(),
            })
            .collect()
    }

    /// Replace (or with `None`, clear) the activation observer.
    pub fn set_activation_observer(&self, observer: Option<Arc<dyn ActivationObserver>>) {
        *self.observer.lock().expect("observer lock poisoned") = observer;
    }

    /// Find the stub answering `request`, without invoking its builder.
    ///
    /// Entries are scanned in reverse registration order, so the most
    /// recently installed matching stub wins: test code can layer a specific
    /// override on top of a broad default without removing the default.
    /// Yields `None` when disabled or when no matcher accepts the request.
    pub fn find_match(&self, request: &StubRequest) -> Option<MatchedStub> {
        // Snapshot under the lock; matchers run after it is released so a
        // slow or re-entrant matcher cannot stall registry mutation.
        let snapshot: Vec<Arc<StubEntry>> = {
            let inner = self.lock();
            if !inner.enabled {
                return None;
            }
            inner.entries.clone()
        };

        for entry in snapshot.iter().rev() {
            if entry.matcher.matches(request) {
                debug!(handle = ?entry.handle, url = %request.url, "Request matched stub");
                return Some(MatchedStub {
                    handle: entry.handle,
                    name: entry.name(),
                    builder: Arc::clone(&entry.builder),
                });
            }
        }
        None
    }

    /// True iff the registry is enabled and some stub matches `request`.
    ///
    /// This is the host transport layer's cheap pre-check; it does not touch
    /// the activation observer.
    pub fn can_handle(&self, request: &StubRequest) -> bool {
        self.find_match(request).is_some()
    }

    /// Answer `request` from the registry.
    ///
    /// `None` means no stub matched: a defined fall-through, not an error.
    /// The host decides whether to pass the request through to real
    /// networking or fail it. On a match, the winning builder runs, the
    /// simulated `request_time` elapses, and the status/headers are returned
    /// with a paced [`BodyStream`].
    ///
    /// The activation observer is informed exactly once per completed or
    /// failed delivery, and once per unmatched request. A delivery cancelled
    /// by dropping the future or the stream informs nobody.
    pub async fn handle(
        &self,
        request: &StubRequest,
    ) -> Option<Result<StubbedResponse, DeliveryError>> {
        let matched = match self.find_match(request) {
            Some(matched) => matched,
            None => {
                warn!(method = %request.method, url = %request.url, "No matching stub");
                if let Some(observer) = self.current_observer() {
                    notify_missing(&observer, request);
                }
                return None;
            }
        };
        Some(self.deliver(request, matched).await)
    }

    async fn deliver(
        &self,
        request: &StubRequest,
        matched: MatchedStub,
    ) -> Result<StubbedResponse, DeliveryError> {
        let observer = self.current_observer();
        let stub = StubInfo {
            handle: matched.handle,
            name: matched.name.clone(),
        };

        // The builder runs outside the registry lock and may itself install
        // or remove stubs.
        let response = match matched.build_response(request) {
            Ok(response) => Arc::new(response),
            Err(e) => {
                self.notify_failure(&observer, request, &stub, &format!("builder failed: {e:#}"));
                return Err(DeliveryError::Builder(e));
            }
        };

        let data: Bytes = match &response.body {
            BodySource::Bytes(bytes) => bytes.clone(),
            BodySource::File(path) => match self.byte_source.load(path).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    self.notify_failure(
                        &observer,
                        request,
                        &stub,
                        &format!("fixture read failed: {e}"),
                    );
                    return Err(DeliveryError::Fixture(e));
                }
            },
            BodySource::Error(error) => {
                // The failure surfaces only after the simulated time to
                // receive a response has elapsed.
                self.clock.sleep(response.request_time).await;
                self.notify_failure(&observer, request, &stub, &error.to_string());
                return Err(DeliveryError::Connection(*error));
            }
        };

        self.clock.sleep(response.request_time).await;

        debug!(
            handle = ?stub.handle,
            status = response.status,
            bytes = data.len(),
            "Delivering stubbed response"
        );

        let receipt = DeliveryReceipt {
            observer,
            request: request.clone(),
            stub,
            response: Arc::clone(&response),
        };
        Ok(StubbedResponse {
            status: response.status,
            headers: response.headers.clone(),
            body: BodyStream::new(data, response.response_time, Arc::clone(&self.clock), Some(receipt)),
        })
    }

    fn notify_failure(
        &self,
        observer: &Option<Arc<dyn ActivationObserver>>,
        request: &StubRequest,
        stub: &StubInfo,
        reason: &str,
    ) {
        if let Some(observer) = observer {
            notify_activation(
                observer,
                request,
                stub,
                &ActivationOutcome::Failed(reason.to_string()),
            );
        }
    }

    fn current_observer(&self) -> Option<Arc<dyn ActivationObserver>> {
        self.observer
            .lock()
            .expect("observer lock poisoned")
            .clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("stub registry lock poisoned")
    }
}

static DEFAULT_REGISTRY: Lazy<StubRegistry> = Lazy::new(StubRegistry::new);

/// The process-wide default registry.
///
/// Convenient for app-level tests that stub the whole process; anything that
/// needs isolation should construct its own [`StubRegistry`] instead. Tear
/// down with [`remove_all_stubs`] between test cases.
pub fn default_registry() -> &'static StubRegistry {
    &DEFAULT_REGISTRY
}

/// Install a stub into the default registry.
pub fn stub<F>(matcher: Matcher, builder: F) -> StubHandle
where
    F: Fn(&StubRequest) -> StubResponse + Send + Sync + 'static,
{
    default_registry().install(matcher, builder)
}

/// Install a named stub into the default registry.
pub fn stub_named<F>(name: impl Into<String>, matcher: Matcher, builder: F) -> StubHandle
where
    F: Fn(&StubRequest) -> StubResponse + Send + Sync + 'static,
{
    default_registry().install_named(name, matcher, builder)
}

/// Remove a stub from the default registry.
pub fn remove_stub(handle: StubHandle) -> bool {
    default_registry().remove(handle)
}

/// Remove every stub from the default registry.
pub fn remove_all_stubs() -> usize {
    default_registry().remove_all()
}

/// Enable or disable the default registry.
pub fn set_enabled(enabled: bool) {
    default_registry().set_enabled(enabled)
}
