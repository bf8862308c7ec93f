//! Exporter - chain assembly and lifecycle
//!
//! The builder wires the fixed chain `queue → observability → retry →
//! timeout → transport` as an owned, immutable composition: each optional
//! stage wraps its successor at construction, unconfigured slots are simply
//! not wrapped, and a disabled retry or queue becomes an error-logging
//! pass-through. The put-back handshake between the persistent queue and
//! the retry stage also happens here, at wiring time.
//!
//! # Example
//!
//! ```ignore
//! let exporter = ExporterBuilder::new("otlp", Signal::Traces, transport)
//!     .with_retry(RetryConfig::enabled())
//!     .with_queue(QueueConfig::default().with_capacity(5000))
//!     .build()?;
//!
//! exporter.start().await?;
//! exporter.send(Request::new(batch, Scope::root())).await?;
//! exporter.shutdown().await?;
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use ferry_storage::StorageRegistry;

use crate::config::{Capabilities, QueueConfig, RetryConfig, Signal, TimeoutConfig};
use crate::error::{BuildError, ExportError, ExportResult, ShutdownError};
use crate::metrics::{ExporterMetrics, ExporterMetricsHandle, QueueGauges};
use crate::observe::ObservabilitySender;
use crate::queue::{DecodeFn, EncodeFn, PersistentBacking, PutBackFn, QueueCore, QueueSender};
use crate::request::{Outcome, Payload, Persistable, Request};
use crate::retry::RetrySender;
use crate::sender::{LoggingSender, Sender, Transport, TransportSender};
use crate::timeout::TimeoutSender;

const QUEUE_DISABLED_HINT: &str =
    "export failed, enable the sending queue to survive temporary failures";
const RETRY_DISABLED_HINT: &str =
    "export failed, enable retry_on_failure to retry transient errors";

/// User callback run at the outermost layer of start/shutdown
pub type LifecycleHook = Box<dyn Fn() -> ExportResult + Send + Sync>;

/// Marshal/unmarshal pair captured when persistence is configured
struct PayloadCodec<P> {
    encode: EncodeFn<P>,
    decode: DecodeFn<P>,
}

/// Builds an [`Exporter`] from its transport and options
///
/// Options are applied in any order and frozen at [`ExporterBuilder::build`];
/// the chain's link order is fixed and cannot be re-ordered.
pub struct ExporterBuilder<P: Payload> {
    name: String,
    signal: Signal,
    transport: Arc<dyn Transport<P>>,
    timeout: TimeoutConfig,
    retry: RetryConfig,
    queue: QueueConfig,
    capabilities: Capabilities,
    registry: Option<StorageRegistry>,
    codec: Option<PayloadCodec<P>>,
    start_hooks: Vec<LifecycleHook>,
    shutdown_hooks: Vec<LifecycleHook>,
}

impl<P: Payload> ExporterBuilder<P> {
    /// Start building an exporter around a transport
    pub fn new(
        name: impl Into<String>,
        signal: Signal,
        transport: Arc<dyn Transport<P>>,
    ) -> Self {
        Self {
            name: name.into(),
            signal,
            transport,
            timeout: TimeoutConfig::default(),
            retry: RetryConfig::default(),
            queue: QueueConfig::default(),
            capabilities: Capabilities::default(),
            registry: None,
            codec: None,
            start_hooks: Vec::new(),
            shutdown_hooks: Vec::new(),
        }
    }

    /// Override the per-attempt deadline (default 5 s)
    #[must_use]
    pub fn with_timeout(mut self, timeout: TimeoutConfig) -> Self {
        self.timeout = timeout;
        self
    }

    /// Override the retry policy (default: retries off)
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Override the queue policy (default: 1000-element queue, 10 workers)
    #[must_use]
    pub fn with_queue(mut self, queue: QueueConfig) -> Self {
        self.queue = queue;
        self
    }

    /// Override the capabilities advertised upstream
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Add a callback run at the start of `start()`
    #[must_use]
    pub fn on_start(mut self, hook: impl Fn() -> ExportResult + Send + Sync + 'static) -> Self {
        self.start_hooks.push(Box::new(hook));
        self
    }

    /// Add a callback run at the end of `shutdown()`
    #[must_use]
    pub fn on_shutdown(mut self, hook: impl Fn() -> ExportResult + Send + Sync + 'static) -> Self {
        self.shutdown_hooks.push(Box::new(hook));
        self
    }

    /// Assemble the chain; the option set is frozen from here on
    pub fn build(self) -> Result<Exporter<P>, BuildError> {
        self.retry.validate()?;
        self.queue.validate()?;

        let metrics = Arc::new(ExporterMetrics::new());

        let persist = if self.queue.enabled {
            match self.queue.storage_id.as_deref() {
                Some(id) => {
                    let registry = self.registry.as_ref().ok_or(BuildError::MissingRegistry)?;
                    let codec = self.codec.as_ref().ok_or(BuildError::MissingRegistry)?;
                    let storage = registry
                        .get(id)
                        .ok_or_else(|| BuildError::UnknownStorage(id.to_string()))?;
                    Some(PersistentBacking::new(
                        storage,
                        Arc::clone(&codec.encode),
                        Arc::clone(&codec.decode),
                    ))
                }
                None => None,
            }
        } else {
            None
        };

        let transport_stage: Arc<dyn Sender<P>> =
            Arc::new(TransportSender::new(Arc::clone(&self.transport)));
        let timeout_stage: Arc<dyn Sender<P>> =
            Arc::new(TimeoutSender::new(self.timeout.timeout, transport_stage));

        let mut retry_handle: Option<Arc<RetrySender<P>>> = None;
        let put_back_wired = self.retry.enabled && persist.is_some();

        let (head, queue_stage): (Arc<dyn Sender<P>>, Option<Arc<QueueSender<P>>>) =
            if self.queue.enabled {
                let name = self.name.clone();
                let signal = self.signal;
                let retry_cfg = self.retry.clone();
                let capacity = self.queue.capacity;
                let chain_metrics = Arc::clone(&metrics);

                let core = Arc::new_cyclic(|weak: &Weak<QueueCore<P>>| {
                    let put_back: Option<PutBackFn<P>> = if put_back_wired {
                        let weak = weak.clone();
                        Some(Arc::new(move |req: Request<P>| match weak.upgrade() {
                            Some(core) => core.put_back(req),
                            None => req.finish(Outcome::Dropped),
                        }))
                    } else {
                        None
                    };

                    let retry_stage: Arc<dyn Sender<P>> = if retry_cfg.enabled {
                        let retry = Arc::new(RetrySender::new(
                            name.clone(),
                            retry_cfg,
                            timeout_stage,
                            put_back,
                        ));
                        retry_handle = Some(Arc::clone(&retry));
                        retry
                    } else {
                        Arc::new(LoggingSender::new(
                            name.clone(),
                            RETRY_DISABLED_HINT,
                            timeout_stage,
                        ))
                    };

                    let observe: Arc<dyn Sender<P>> = Arc::new(ObservabilitySender::new(
                        name.clone(),
                        signal,
                        Arc::clone(&chain_metrics),
                        retry_stage,
                    ));

                    QueueCore::new(name, capacity, observe, chain_metrics, persist, put_back_wired)
                });

                let queue = Arc::new(QueueSender::new(core, self.queue.num_workers));
                (Arc::clone(&queue) as Arc<dyn Sender<P>>, Some(queue))
            } else {
                let retry_stage: Arc<dyn Sender<P>> = if self.retry.enabled {
                    let retry = Arc::new(RetrySender::new(
                        self.name.clone(),
                        self.retry.clone(),
                        timeout_stage,
                        None,
                    ));
                    retry_handle = Some(Arc::clone(&retry));
                    retry
                } else {
                    Arc::new(LoggingSender::new(
                        self.name.clone(),
                        RETRY_DISABLED_HINT,
                        timeout_stage,
                    ))
                };

                let observe: Arc<dyn Sender<P>> = Arc::new(ObservabilitySender::new(
                    self.name.clone(),
                    self.signal,
                    Arc::clone(&metrics),
                    retry_stage,
                ));
                let head: Arc<dyn Sender<P>> = Arc::new(LoggingSender::new(
                    self.name.clone(),
                    QUEUE_DISABLED_HINT,
                    observe,
                ));
                (head, None)
            };

        let gauges = queue_stage
            .as_ref()
            .map(|queue| Arc::clone(queue.core()) as Arc<dyn QueueGauges>);

        Ok(Exporter {
            name: self.name,
            signal: self.signal,
            capabilities: self.capabilities,
            head,
            transport: self.transport,
            queue: queue_stage,
            retry: retry_handle,
            metrics,
            gauges,
            start_hooks: self.start_hooks,
            shutdown_hooks: self.shutdown_hooks,
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }
}

impl<P: Persistable> ExporterBuilder<P> {
    /// Provide the host's storage backends for queue persistence
    ///
    /// Captures the payload's marshal/unmarshal pair; the queue's
    /// `storage_id` is resolved against this registry at build time.
    #[must_use]
    pub fn with_storage_registry(mut self, registry: StorageRegistry) -> Self {
        self.codec = Some(PayloadCodec {
            encode: Arc::new(|payload: &P| payload.encode()),
            decode: Arc::new(|bytes: &[u8]| P::decode(bytes)),
        });
        self.registry = Some(registry);
        self
    }
}

/// The assembled export pipeline
///
/// `send` enters the chain at the queue stage; lifecycle runs transport
/// first on start (workers must not dequeue into a transport that is not
/// ready) and unwinds in the reverse direction on shutdown, accumulating
/// errors instead of short-circuiting.
pub struct Exporter<P: Payload> {
    name: String,
    signal: Signal,
    capabilities: Capabilities,
    head: Arc<dyn Sender<P>>,
    transport: Arc<dyn Transport<P>>,
    queue: Option<Arc<QueueSender<P>>>,
    retry: Option<Arc<RetrySender<P>>>,
    metrics: Arc<ExporterMetrics>,
    gauges: Option<Arc<dyn QueueGauges>>,
    start_hooks: Vec<LifecycleHook>,
    shutdown_hooks: Vec<LifecycleHook>,
    started: AtomicBool,
    closed: AtomicBool,
}

impl<P: Payload> Exporter<P> {
    /// The exporter's id, used in logs and metric labels
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The signal type this exporter ships
    #[inline]
    pub fn signal(&self) -> Signal {
        self.signal
    }

    /// Capabilities advertised to the upstream producer
    #[inline]
    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Get a metrics handle for reporting
    ///
    /// The handle stays valid after the exporter shuts down.
    pub fn metrics_handle(&self) -> ExporterMetricsHandle {
        ExporterMetricsHandle {
            id: self.name.clone(),
            signal: self.signal,
            metrics: Arc::clone(&self.metrics),
            gauges: self.gauges.clone(),
        }
    }

    /// Push one request into the pipeline
    ///
    /// With the queue enabled this returns as soon as the request is
    /// admitted; a worker finishes the job. With the queue disabled the
    /// whole chain runs inline and the request settles before returning.
    pub async fn send(&self, req: Request<P>) -> ExportResult {
        if self.closed.load(Ordering::Acquire) {
            req.finish(Outcome::Dropped);
            return Err(ExportError::Closed);
        }

        if self.queue.is_some() {
            self.head.send(req).await
        } else {
            let settle = req.clone();
            let result = self.head.send(req).await;
            match &result {
                Ok(()) => settle.finish(Outcome::Delivered),
                Err(_) => settle.finish(Outcome::Dropped),
            }
            result
        }
    }

    /// Bring the exporter up: hooks, then transport, then queue workers
    pub async fn start(&self) -> ExportResult {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        for hook in &self.start_hooks {
            hook()?;
        }
        self.transport.start().await?;
        if let Some(queue) = &self.queue {
            queue.start().await?;
        }

        tracing::info!(exporter = %self.name, signal = %self.signal, "exporter started");
        Ok(())
    }

    /// Tear the exporter down, accumulating errors from every stage
    ///
    /// Order: the retry stage stops new attempts and pushes in-flight
    /// retries back to the queue; the queue closes to producers and drains
    /// its workers; the transport shuts down; user hooks run last.
    pub async fn shutdown(&self) -> Result<(), ShutdownError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut errors = Vec::new();

        if let Some(retry) = &self.retry
            && let Err(err) = retry.shutdown().await
        {
            errors.push(err);
        }
        if let Some(queue) = &self.queue
            && let Err(err) = queue.shutdown().await
        {
            errors.push(err);
        }
        if let Err(err) = self.transport.shutdown().await {
            errors.push(err);
        }
        for hook in &self.shutdown_hooks {
            if let Err(err) = hook() {
                errors.push(err);
            }
        }

        tracing::info!(
            exporter = %self.name,
            signal = %self.signal,
            errors = errors.len(),
            "exporter shut down"
        );

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ShutdownError { errors })
        }
    }
}

impl<P: Payload> std::fmt::Debug for Exporter<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Exporter")
            .field("name", &self.name)
            .field("signal", &self.signal)
            .field("queued", &self.queue.is_some())
            .field("retry", &self.retry.is_some())
            .finish()
    }
}

#[cfg(test)]
#[path = "exporter_test.rs"]
mod exporter_test;
