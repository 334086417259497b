//! Response delivery: simulated latency and body pacing.
//!
//! Delivery turns a winning [`StubResponse`](crate::StubResponse) into a
//! status/header pair available after `request_time` and a [`BodyStream`] of
//! chunks paced per `response_time`. All waits are suspension points on the
//! calling task; dropping the stream or the future cancels them and delivers
//! nothing further.

use crate::observer::{notify_activation, ActivationObserver, ActivationOutcome, StubInfo};
use crate::request::StubRequest;
use crate::response::{NetworkError, ResponseTiming, StubResponse};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use http::HeaderMap;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// How an attempted delivery can fail.
///
/// A request no stub matches is not a failure; it never reaches delivery.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The user-supplied response builder returned an error. Misconfigured
    /// stubs fail loudly rather than being swallowed.
    #[error("stub response builder failed: {0}")]
    Builder(#[source] anyhow::Error),

    /// The descriptor asked for a simulated connection failure.
    #[error("simulated connection failure: {0}")]
    Connection(#[from] NetworkError),

    /// The descriptor's fixture file could not be read.
    #[error("failed to read fixture body: {0}")]
    Fixture(#[from] io::Error),
}

/// Timer abstraction so delivery pacing can be faked in tests.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Suspend the calling task for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// The default clock, backed by the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }
}

/// Byte-source abstraction for fixture bodies, so registry and delivery can
/// be tested without touching the file system.
#[async_trait]
pub trait ByteSource: Send + Sync {
    /// Read the whole fixture at `path`.
    async fn load(&self, path: &Path) -> io::Result<Bytes>;
}

/// The default byte source, reading fixtures with `tokio::fs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsByteSource;

#[async_trait]
impl ByteSource for FsByteSource {
    async fn load(&self, path: &Path) -> io::Result<Bytes> {
        Ok(tokio::fs::read(path).await?.into())
    }
}

/// Scheduling granularity floor: chunks grow so the inter-chunk sleep never
/// drops below this, keeping timer overhead sane for tiny durations or huge
/// rates.
const MIN_TICK: Duration = Duration::from_millis(10);

/// Preferred chunk size when pacing allows it.
const BASE_CHUNK: usize = 1024;

/// Chunking and pacing derived from a body length and a [`ResponseTiming`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct ChunkPlan {
    pub chunk_size: usize,
    /// Sleep per delivered byte, in seconds. Zero means unpaced.
    secs_per_byte: f64,
}

impl ChunkPlan {
    pub(crate) fn new(total: usize, timing: ResponseTiming) -> Self {
        let unpaced = Self {
            chunk_size: total.max(1),
            secs_per_byte: 0.0,
        };
        match timing {
            ResponseTiming::Instant => unpaced,
            ResponseTiming::Duration(d) if d.is_zero() || total == 0 => unpaced,
            ResponseTiming::Duration(d) => {
                Self::paced(d.as_secs_f64() / total as f64, total)
            }
            ResponseTiming::Rate(0) => unpaced,
            ResponseTiming::Rate(rate) => Self::paced(1.0 / rate as f64, total),
        }
    }

    fn paced(secs_per_byte: f64, total: usize) -> Self {
        let floor = (MIN_TICK.as_secs_f64() / secs_per_byte).ceil() as usize;
        Self {
            chunk_size: BASE_CHUNK.max(floor).min(total.max(1)),
            secs_per_byte,
        }
    }

    /// Sleep owed before handing out a chunk of `len` bytes.
    pub(crate) fn delay_for(&self, len: usize) -> Duration {
        if self.secs_per_byte == 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(len as f64 * self.secs_per_byte)
        }
    }
}

/// Everything needed to inform the activation observer once delivery ends.
pub(crate) struct DeliveryReceipt {
    pub observer: Option<Arc<dyn ActivationObserver>>,
    pub request: StubRequest,
    pub stub: StubInfo,
    pub response: Arc<StubResponse>,
}

impl DeliveryReceipt {
    fn fire(self) {
        if let Some(observer) = &self.observer {
            notify_activation(
                observer,
                &self.request,
                &self.stub,
                &ActivationOutcome::Delivered(Arc::clone(&self.response)),
            );
        }
    }
}

/// A lazily paced sequence of body chunks.
///
/// Dropping the stream before it finishes counts as cancelling the request:
/// pending sleeps are dropped with the future, no further chunks are
/// produced, and the activation observer is not informed.
pub struct BodyStream {
    data: Bytes,
    offset: usize,
    plan: ChunkPlan,
    clock: Arc<dyn Clock>,
    receipt: Option<DeliveryReceipt>,
}

impl BodyStream {
    pub(crate) fn new(
        data: Bytes,
        timing: ResponseTiming,
        clock: Arc<dyn Clock>,
        receipt: Option<DeliveryReceipt>,
    ) -> Self {
        let plan = ChunkPlan::new(data.len(), timing);
        let mut stream = Self {
            data,
            offset: 0,
            plan,
            clock,
            receipt,
        };
        // An empty body is fully delivered the moment headers are out.
        if stream.data.is_empty() {
            stream.complete();
        }
        stream
    }

    /// Total body length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the body has no bytes at all.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Next paced chunk, or `None` once the body is exhausted.
    ///
    /// The simulated transfer delay for a chunk elapses before the chunk is
    /// returned, so the total elapsed time approximates the descriptor's
    /// `response_time`.
    pub async fn next_chunk(&mut self) -> Option<Bytes> {
        if self.offset >= self.data.len() {
            return None;
        }
        let end = (self.offset + self.plan.chunk_size).min(self.data.len());
        let chunk = self.data.slice(self.offset..end);
        self.clock.sleep(self.plan.delay_for(chunk.len())).await;
        self.offset = end;
        if self.offset >= self.data.len() {
            self.complete();
        }
        Some(chunk)
    }

    /// Drain every remaining chunk into one buffer.
    pub async fn collect(mut self) -> Bytes {
        let mut out = BytesMut::with_capacity(self.data.len() - self.offset);
        while let Some(chunk) = self.next_chunk().await {
            out.extend_from_slice(&chunk);
        }
        out.freeze()
    }

    fn complete(&mut self) {
        if let Some(receipt) = self.receipt.take() {
            debug!(bytes = self.data.len(), "Stubbed body fully delivered");
            receipt.fire();
        }
    }
}

/// A stubbed exchange as seen by the host transport layer: status and
/// headers, available once `request_time` has elapsed, plus the paced body.
pub struct StubbedResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: HeaderMap,
    /// Paced body chunks.
    pub body: BodyStream,
}

impl StubbedResponse {
    /// Convenience: drain the whole body.
    pub async fn body_bytes(self) -> Bytes {
        self.body.collect().await
    }
}
