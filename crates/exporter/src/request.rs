//! Request - the unit of work flowing through the sender chain
//!
//! A request wraps one batch of telemetry of a single signal type. The
//! payload sits behind an `Arc` so retry re-sends and queue put-backs are
//! cheap clones, mirroring how batches fan out across sinks elsewhere in
//! the collector.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use thiserror::Error;

use crate::scope::Scope;

/// A batch of telemetry carried by a [`Request`]
///
/// The chain treats the payload as opaque; it only needs the item count for
/// queue accounting and drop metrics.
pub trait Payload: Send + Sync + 'static {
    /// Number of telemetry items in this batch
    fn item_count(&self) -> usize;
}

/// Failure to rebuild a payload from persisted bytes
#[derive(Debug, Error)]
#[error("failed to decode persisted payload: {0}")]
pub struct DecodeError(pub String);

/// A payload that can round-trip through the persistent queue
///
/// `decode(encode(p))` must reproduce the payload byte-for-byte. The request
/// scope is not persisted; recovery attaches a fresh root scope.
pub trait Persistable: Payload + Sized {
    /// Marshal the payload to a stable byte form
    fn encode(&self) -> Bytes;

    /// Rebuild the payload from bytes produced by [`Persistable::encode`]
    fn decode(bytes: &[u8]) -> Result<Self, DecodeError>;
}

/// How a request left the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The transport accepted the batch
    Delivered,
    /// The batch was dropped (overflow, permanent failure, shutdown)
    Dropped,
    /// The batch was written back to storage for redelivery after restart
    Requeued,
}

type FinishFn = Box<dyn FnOnce(Outcome) + Send>;

/// Fires the processing-finished callback at most once
#[derive(Default)]
struct FinishOnce {
    callback: Mutex<Option<FinishFn>>,
}

impl FinishOnce {
    fn fire(&self, outcome: Outcome) {
        if let Some(callback) = self.callback.lock().take() {
            callback(outcome);
        }
    }
}

/// The unit of work: one batch plus scope, accounting and settle callback
pub struct Request<P> {
    payload: Arc<P>,
    scope: Scope,
    items: usize,
    finish: Arc<FinishOnce>,
}

// Manual impl: cloning shares payload and settle state, so P itself does
// not have to be Clone.
impl<P> Clone for Request<P> {
    fn clone(&self) -> Self {
        Self {
            payload: Arc::clone(&self.payload),
            scope: self.scope.clone(),
            items: self.items,
            finish: Arc::clone(&self.finish),
        }
    }
}

impl<P: Payload> Request<P> {
    /// Create a request for one batch under the given scope
    ///
    /// The item count is captured once and never changes; empty batches
    /// still count as one item for drop accounting.
    pub fn new(payload: P, scope: Scope) -> Self {
        let items = payload.item_count().max(1);
        Self {
            payload: Arc::new(payload),
            scope,
            items,
            finish: Arc::new(FinishOnce::default()),
        }
    }

    /// Attach a processing-finished callback
    ///
    /// The callback fires exactly once, when the request leaves the
    /// pipeline: delivered, dropped, or requeued to storage on shutdown.
    pub fn on_finish(self, callback: impl FnOnce(Outcome) + Send + 'static) -> Self {
        *self.finish.callback.lock() = Some(Box::new(callback));
        self
    }

    /// The batch carried by this request
    #[inline]
    pub fn payload(&self) -> &P {
        &self.payload
    }

    /// The request's cancellation scope
    #[inline]
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Item count captured at construction
    #[inline]
    pub fn item_count(&self) -> usize {
        self.items
    }

    /// Fire the processing-finished callback; later calls are no-ops
    pub fn finish(&self, outcome: Outcome) {
        self.finish.fire(outcome);
    }

    /// Same request under a narrowed scope
    pub(crate) fn with_scope(&self, scope: Scope) -> Self {
        Self {
            payload: Arc::clone(&self.payload),
            scope,
            items: self.items,
            finish: Arc::clone(&self.finish),
        }
    }
}

impl<P> std::fmt::Debug for Request<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("items", &self.items)
            .field("cancelled", &self.scope.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountedPayload(usize);

    impl Payload for CountedPayload {
        fn item_count(&self) -> usize {
            self.0
        }
    }

    #[test]
    fn test_item_count_floor_is_one() {
        let req = Request::new(CountedPayload(0), Scope::root());
        assert_eq!(req.item_count(), 1);

        let req = Request::new(CountedPayload(17), Scope::root());
        assert_eq!(req.item_count(), 17);
    }

    #[test]
    fn test_finish_fires_exactly_once() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);

        let req = Request::new(CountedPayload(1), Scope::root()).on_finish(move |outcome| {
            assert_eq!(outcome, Outcome::Delivered);
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let clone = req.clone();
        req.finish(Outcome::Delivered);
        clone.finish(Outcome::Dropped);
        req.finish(Outcome::Dropped);

        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_finish_without_callback_is_noop() {
        let req = Request::new(CountedPayload(1), Scope::root());
        req.finish(Outcome::Dropped);
    }

    #[test]
    fn test_clone_shares_payload() {
        let req = Request::new(CountedPayload(3), Scope::root());
        let clone = req.clone();

        assert_eq!(req.payload().0, clone.payload().0);
        assert_eq!(clone.item_count(), 3);
    }
}
