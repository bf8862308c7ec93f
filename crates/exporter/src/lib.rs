//! Ferry - Exporter
//!
//! The export pipeline helper of a telemetry collector: reusable machinery
//! between an in-process producer of telemetry batches and the transport
//! that ships them to a remote backend. It decouples production rate from
//! delivery rate, rides out transient backend failures, bounds in-memory
//! resource use, and can preserve accepted work across process restarts.
//!
//! # Architecture
//!
//! Every outbound request flows through a fixed, ordered chain of senders:
//!
//! ```text
//! [Producer] --send--> [Queue] --> [Observability] --> [Retry] --> [Timeout] --> [Transport]
//!                        |  \
//!                        |   `--> (storage records, optional)
//!                        `--> W worker tasks drain into the rest of the chain
//! ```
//!
//! # Key Design
//!
//! - **Immutable composition**: each stage owns its successor, wired once
//!   at build time; unconfigured stages are simply absent
//! - **Non-blocking produce**: back-pressure is produce-reject with drop
//!   metrics, never producer-block
//! - **Tagged errors**: `Permanent` short-circuits, `Throttled` floors the
//!   next backoff, everything else retries until the budget runs out
//! - **Put-back**: when retries exhaust (or shutdown preempts a backoff),
//!   the persistent queue re-owns the request so it survives a restart
//! - **Explicit scope**: cancellation and deadline travel with the request;
//!   stages narrow the scope, never widen it
//!
//! # Example
//!
//! ```ignore
//! use ferry_exporter::{ExporterBuilder, QueueConfig, Request, RetryConfig, Scope, Signal};
//!
//! let exporter = ExporterBuilder::new("otlp", Signal::Traces, transport)
//!     .with_retry(RetryConfig::enabled())
//!     .with_queue(QueueConfig::default().with_capacity(5000))
//!     .build()?;
//!
//! exporter.start().await?;
//! exporter.send(Request::new(batch, Scope::root())).await?;
//! exporter.shutdown().await?;
//! ```

mod config;
mod error;
mod exporter;
mod metrics;
mod observe;
mod queue;
mod request;
mod retry;
mod scope;
mod sender;
mod timeout;

#[cfg(test)]
mod testing;

pub use config::{
    Capabilities, QueueConfig, RetryConfig, Signal, TimeoutConfig, DEFAULT_INITIAL_INTERVAL,
    DEFAULT_MAX_ELAPSED, DEFAULT_MAX_INTERVAL, DEFAULT_MULTIPLIER, DEFAULT_NUM_WORKERS,
    DEFAULT_QUEUE_CAPACITY, DEFAULT_RANDOMIZATION_FACTOR, DEFAULT_TIMEOUT,
};
pub use error::{BuildError, ExportError, ExportResult, ShutdownError};
pub use exporter::{Exporter, ExporterBuilder, LifecycleHook};
pub use metrics::{
    ExporterMetrics, ExporterMetricsHandle, ExporterMetricsProvider, ExporterMetricsSnapshot,
    QueueGauges,
};
pub use request::{DecodeError, Outcome, Payload, Persistable, Request};
pub use scope::Scope;
pub use sender::{Sender, Transport};

// Re-export the storage contracts for convenience
pub use ferry_storage::{Storage, StorageError, StorageRegistry};
