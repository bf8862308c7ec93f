//! Queue sender - admission point and worker pool
//!
//! The first stage of the chain. `send` is produce: non-blocking, rejecting
//! when the buffer is full or the exporter is shutting down. A pool of
//! long-lived worker tasks drains the buffer into the rest of the chain and
//! settles each request when its send comes back.
//!
//! With a storage backend configured, every accepted request is written
//! durably *before* produce reports success, and the record is only removed
//! once the downstream send has settled. On start, un-acked records are
//! re-enqueued in their original order before workers begin to pull new
//! work, which gives at-least-once delivery across a crash.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use async_trait::async_trait;
use ferry_storage::Storage;

use crate::error::{ExportError, ExportResult};
use crate::metrics::{ExporterMetrics, QueueGauges};
use crate::request::{DecodeError, Outcome, Payload, Request};
use crate::scope::Scope;
use crate::sender::Sender;

mod memory;

pub(crate) use memory::BoundedQueue;

/// Marshal a payload to its stable byte form
pub(crate) type EncodeFn<P> = Arc<dyn Fn(&P) -> Bytes + Send + Sync>;

/// Rebuild a payload from persisted bytes
pub(crate) type DecodeFn<P> = Arc<dyn Fn(&[u8]) -> Result<P, DecodeError> + Send + Sync>;

/// Re-enqueue a request; published by the queue, handed to the retry stage
pub(crate) type PutBackFn<P> = Arc<dyn Fn(Request<P>) + Send + Sync>;

/// A buffered request plus its storage record, if persisted
struct Entry<P> {
    req: Request<P>,
    record: Option<u64>,
}

/// Storage side of the persistent queue
pub(crate) struct PersistentBacking<P> {
    storage: Arc<dyn Storage>,
    next_seq: AtomicU64,
    encode: EncodeFn<P>,
    decode: DecodeFn<P>,
}

impl<P: Payload> PersistentBacking<P> {
    pub(crate) fn new(storage: Arc<dyn Storage>, encode: EncodeFn<P>, decode: DecodeFn<P>) -> Self {
        Self {
            storage,
            next_seq: AtomicU64::new(0),
            encode,
            decode,
        }
    }

    /// Write the request durably; returns the record's sequence number
    fn persist(&self, req: &Request<P>) -> Result<u64, ExportError> {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let bytes = (self.encode)(req.payload());
        self.storage
            .set(seq, &bytes)
            .map_err(|e| ExportError::transient(format!("failed to persist request: {e}")))?;
        Ok(seq)
    }

    /// Remove a settled record
    fn ack(&self, seq: u64) {
        if let Err(err) = self.storage.delete(seq) {
            tracing::warn!(record = seq, error = %err, "failed to remove settled record");
        }
    }
}

/// State shared between producers, workers and the put-back hook
pub(crate) struct QueueCore<P: Payload> {
    name: String,
    queue: BoundedQueue<Entry<P>>,
    next: Arc<dyn Sender<P>>,
    metrics: Arc<ExporterMetrics>,
    persist: Option<PersistentBacking<P>>,
    /// Whether the retry stage re-enqueues retryable failures through
    /// put-back; decides who settles a failed request.
    put_back_wired: bool,
}

impl<P: Payload> QueueCore<P> {
    pub(crate) fn new(
        name: impl Into<String>,
        capacity: usize,
        next: Arc<dyn Sender<P>>,
        metrics: Arc<ExporterMetrics>,
        persist: Option<PersistentBacking<P>>,
        put_back_wired: bool,
    ) -> Self {
        Self {
            name: name.into(),
            queue: BoundedQueue::new(capacity),
            next,
            metrics,
            persist,
            put_back_wired,
        }
    }

    /// Produce path: persist (if configured), then admit to the buffer
    fn produce_request(&self, req: Request<P>) -> ExportResult {
        let items = req.item_count();

        let record = match &self.persist {
            Some(persist) => match persist.persist(&req) {
                Ok(seq) => Some(seq),
                Err(err) => {
                    self.metrics.record_enqueue_failed(items as u64);
                    tracing::error!(
                        exporter = %self.name,
                        dropped_items = items,
                        error = %err,
                        "failed to persist request, dropping data"
                    );
                    req.finish(Outcome::Dropped);
                    return Err(err);
                }
            },
            None => None,
        };

        if self.queue.produce(Entry {
            req: req.clone(),
            record,
        }) {
            return Ok(());
        }

        // Rejected: roll the record back so storage only holds live work.
        if let (Some(persist), Some(seq)) = (&self.persist, record) {
            persist.ack(seq);
        }
        self.metrics.record_enqueue_failed(items as u64);
        req.finish(Outcome::Dropped);

        if self.queue.is_closed() {
            tracing::error!(
                exporter = %self.name,
                dropped_items = items,
                "sending queue is closed, dropping data"
            );
            Err(ExportError::Closed)
        } else {
            tracing::error!(
                exporter = %self.name,
                dropped_items = items,
                "sending queue is full, dropping data"
            );
            Err(ExportError::QueueFull {
                dropped_items: items,
            })
        }
    }

    /// Worker side: push one entry through the chain and settle it
    async fn dispatch(&self, entry: Entry<P>) {
        let Entry { req, record } = entry;
        let settle = req.clone();

        match self.next.send(req).await {
            Ok(()) => {
                settle.finish(Outcome::Delivered);
                self.ack(record);
            }
            Err(err) if self.put_back_wired
                && !err.is_permanent()
                && !matches!(err, ExportError::Cancelled) =>
            {
                // The retry stage re-owned the request through put-back; its
                // fresh record supersedes this one.
                self.ack(record);
            }
            Err(err) => {
                tracing::warn!(
                    exporter = %self.name,
                    dropped_items = settle.item_count(),
                    error = %err,
                    "export failed, dropping request"
                );
                settle.finish(Outcome::Dropped);
                self.ack(record);
            }
        }
    }

    fn ack(&self, record: Option<u64>) {
        if let (Some(persist), Some(seq)) = (&self.persist, record) {
            persist.ack(seq);
        }
    }

    /// Re-enqueue a request after the retry stage gave up on it
    ///
    /// Persists a fresh record first. If the buffer no longer admits the
    /// request (shutdown, or full), the record stays durable and the
    /// request leaves this process as requeued.
    pub(crate) fn put_back(&self, req: Request<P>) {
        let Some(persist) = &self.persist else {
            req.finish(Outcome::Dropped);
            return;
        };

        let seq = match persist.persist(&req) {
            Ok(seq) => seq,
            Err(err) => {
                tracing::error!(
                    exporter = %self.name,
                    dropped_items = req.item_count(),
                    error = %err,
                    "failed to re-persist request, dropping data"
                );
                req.finish(Outcome::Dropped);
                return;
            }
        };

        if !self.queue.produce(Entry {
            req: req.clone(),
            record: Some(seq),
        }) {
            tracing::info!(
                exporter = %self.name,
                record = seq,
                "request parked in storage for redelivery after restart"
            );
            req.finish(Outcome::Requeued);
        }
    }

    /// Re-enqueue every un-acked record, oldest first
    fn recover(&self, persist: &PersistentBacking<P>) -> ExportResult {
        let keys = persist
            .storage
            .keys()
            .map_err(|e| ExportError::transient(format!("failed to scan storage: {e}")))?;

        let mut restored = 0usize;
        let mut highest = None;
        for seq in keys {
            highest = Some(seq);
            let bytes = match persist.storage.get(seq) {
                Ok(Some(bytes)) => bytes,
                Ok(None) => continue,
                Err(err) => {
                    tracing::warn!(
                        exporter = %self.name,
                        record = seq,
                        error = %err,
                        "failed to read persisted record, skipping"
                    );
                    continue;
                }
            };

            match (persist.decode)(&bytes) {
                Ok(payload) => {
                    // Scopes do not cross a restart; recovered work gets a
                    // fresh root.
                    let req = Request::new(payload, Scope::root());
                    self.queue.restore(Entry {
                        req,
                        record: Some(seq),
                    });
                    restored += 1;
                }
                Err(err) => {
                    tracing::warn!(
                        exporter = %self.name,
                        record = seq,
                        error = %err,
                        "dropping undecodable persisted record"
                    );
                    persist.ack(seq);
                }
            }
        }

        if let Some(highest) = highest {
            persist.next_seq.store(highest + 1, Ordering::SeqCst);
        }
        if restored > 0 {
            tracing::info!(
                exporter = %self.name,
                restored,
                "re-enqueued persisted requests from a previous run"
            );
        }
        Ok(())
    }
}

impl<P: Payload> QueueGauges for QueueCore<P> {
    fn queue_size(&self) -> usize {
        self.queue.len()
    }

    fn queue_capacity(&self) -> usize {
        self.queue.capacity()
    }
}

/// The queue stage: produce-side admission plus the worker pool
pub(crate) struct QueueSender<P: Payload> {
    core: Arc<QueueCore<P>>,
    num_workers: usize,
    workers: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
}

impl<P: Payload> QueueSender<P> {
    pub(crate) fn new(core: Arc<QueueCore<P>>, num_workers: usize) -> Self {
        Self {
            core,
            num_workers,
            workers: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        }
    }

    pub(crate) fn core(&self) -> &Arc<QueueCore<P>> {
        &self.core
    }

    fn spawn_worker(core: Arc<QueueCore<P>>, worker_id: usize) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::debug!(exporter = %core.name, worker_id, "queue worker started");
            while let Some(entry) = core.queue.pop().await {
                core.dispatch(entry).await;
            }
            tracing::debug!(exporter = %core.name, worker_id, "queue worker stopped");
        })
    }
}

#[async_trait]
impl<P: Payload> Sender<P> for QueueSender<P> {
    async fn send(&self, req: Request<P>) -> ExportResult {
        self.core.produce_request(req)
    }

    /// Recover persisted work, then bring the workers up
    ///
    /// Called after the transport has started, so workers never dequeue
    /// into a transport that is not ready.
    async fn start(&self) -> ExportResult {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Some(persist) = &self.core.persist {
            self.core.recover(persist)?;
        }

        let mut workers = self.workers.lock();
        for worker_id in 0..self.num_workers {
            workers.push(Self::spawn_worker(Arc::clone(&self.core), worker_id));
        }

        tracing::debug!(
            exporter = %self.core.name,
            num_workers = self.num_workers,
            capacity = self.core.queue.capacity(),
            persistent = self.core.persist.is_some(),
            "sending queue started"
        );
        Ok(())
    }

    /// Close to producers and drain the workers
    ///
    /// Workers finish the buffered backlog (bounded by the transport's own
    /// shutdown) before their tasks exit.
    async fn shutdown(&self) -> ExportResult {
        self.core.queue.close();

        let handles: Vec<_> = self.workers.lock().drain(..).collect();
        for handle in handles {
            if let Err(err) = handle.await {
                tracing::warn!(exporter = %self.core.name, error = %err, "queue worker failed");
            }
        }

        tracing::debug!(exporter = %self.core.name, "sending queue drained");
        Ok(())
    }
}

#[cfg(test)]
#[path = "persistent_test.rs"]
mod persistent_test;
