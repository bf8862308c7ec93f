//! Exporter metrics
//!
//! Atomic counters around the sender chain. All operations use relaxed
//! ordering; values are eventually consistent, not real-time.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::config::Signal;

/// Counters for one exporter's sender chain
///
/// `sent_items`/`send_failed_items` are recorded by the observability stage
/// around each downstream send; `enqueue_failed_items` is recorded by the
/// queue stage on produce-time rejection.
#[derive(Debug, Default)]
pub struct ExporterMetrics {
    /// Items accepted by the transport
    sent_items: AtomicU64,

    /// Items whose send settled with an error
    send_failed_items: AtomicU64,

    /// Items dropped because the sending queue rejected them
    enqueue_failed_items: AtomicU64,

    /// Downstream send attempts (success or failure)
    sends: AtomicU64,

    /// Cumulative downstream send latency in nanoseconds
    send_duration_ns: AtomicU64,
}

impl ExporterMetrics {
    /// Create new metrics with all counters at zero
    #[inline]
    pub const fn new() -> Self {
        Self {
            sent_items: AtomicU64::new(0),
            send_failed_items: AtomicU64::new(0),
            enqueue_failed_items: AtomicU64::new(0),
            sends: AtomicU64::new(0),
            send_duration_ns: AtomicU64::new(0),
        }
    }

    /// Record a successful downstream send
    #[inline]
    pub fn record_sent(&self, items: u64, duration: Duration) {
        self.sent_items.fetch_add(items, Ordering::Relaxed);
        self.sends.fetch_add(1, Ordering::Relaxed);
        self.send_duration_ns
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
    }

    /// Record a failed downstream send
    #[inline]
    pub fn record_send_failed(&self, items: u64, duration: Duration) {
        self.send_failed_items.fetch_add(items, Ordering::Relaxed);
        self.sends.fetch_add(1, Ordering::Relaxed);
        self.send_duration_ns
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
    }

    /// Record a produce-time rejection
    #[inline]
    pub fn record_enqueue_failed(&self, items: u64) {
        self.enqueue_failed_items.fetch_add(items, Ordering::Relaxed);
    }

    /// Get sent items count
    #[inline]
    pub fn sent_items(&self) -> u64 {
        self.sent_items.load(Ordering::Relaxed)
    }

    /// Get failed items count
    #[inline]
    pub fn send_failed_items(&self) -> u64 {
        self.send_failed_items.load(Ordering::Relaxed)
    }

    /// Get enqueue-failed items count
    #[inline]
    pub fn enqueue_failed_items(&self) -> u64 {
        self.enqueue_failed_items.load(Ordering::Relaxed)
    }

    /// Get a snapshot of the counters (queue gauges zeroed)
    pub fn snapshot(&self) -> ExporterMetricsSnapshot {
        ExporterMetricsSnapshot {
            sent_items: self.sent_items.load(Ordering::Relaxed),
            send_failed_items: self.send_failed_items.load(Ordering::Relaxed),
            enqueue_failed_items: self.enqueue_failed_items.load(Ordering::Relaxed),
            sends: self.sends.load(Ordering::Relaxed),
            send_duration_ns: self.send_duration_ns.load(Ordering::Relaxed),
            queue_size: 0,
            queue_capacity: 0,
        }
    }

    /// Reset all counters to zero
    pub fn reset(&self) {
        self.sent_items.store(0, Ordering::Relaxed);
        self.send_failed_items.store(0, Ordering::Relaxed);
        self.enqueue_failed_items.store(0, Ordering::Relaxed);
        self.sends.store(0, Ordering::Relaxed);
        self.send_duration_ns.store(0, Ordering::Relaxed);
    }
}

/// Point-in-time snapshot of exporter metrics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct ExporterMetricsSnapshot {
    /// Items accepted by the transport
    pub sent_items: u64,
    /// Items whose send settled with an error
    pub send_failed_items: u64,
    /// Items dropped at produce time
    pub enqueue_failed_items: u64,
    /// Downstream send attempts
    pub sends: u64,
    /// Cumulative send latency in nanoseconds
    pub send_duration_ns: u64,
    /// Requests currently buffered in the sending queue
    pub queue_size: u64,
    /// Sending queue capacity
    pub queue_capacity: u64,
}

impl ExporterMetricsSnapshot {
    /// Average downstream send latency
    #[inline]
    pub fn avg_send_duration(&self) -> Duration {
        if self.sends == 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos(self.send_duration_ns / self.sends)
        }
    }
}

/// Live queue depth readings, implemented by the queue stage
pub trait QueueGauges: Send + Sync {
    /// Requests currently buffered
    fn queue_size(&self) -> usize;

    /// Configured queue capacity
    fn queue_capacity(&self) -> usize;
}

/// Trait for exporters to expose metrics to a reporter
pub trait ExporterMetricsProvider: Send + Sync {
    /// Unique identifier for this exporter instance
    fn exporter_id(&self) -> &str;

    /// Signal type this exporter ships
    fn signal(&self) -> Signal;

    /// Get a snapshot of current metrics
    fn snapshot(&self) -> ExporterMetricsSnapshot;
}

/// Handle for accessing exporter metrics
///
/// Holds an `Arc` to the counters (and to the queue for its gauges), so it
/// stays valid after the exporter shuts down.
#[derive(Clone)]
pub struct ExporterMetricsHandle {
    pub(crate) id: String,
    pub(crate) signal: Signal,
    pub(crate) metrics: Arc<ExporterMetrics>,
    pub(crate) gauges: Option<Arc<dyn QueueGauges>>,
}

impl ExporterMetricsProvider for ExporterMetricsHandle {
    fn exporter_id(&self) -> &str {
        &self.id
    }

    fn signal(&self) -> Signal {
        self.signal
    }

    fn snapshot(&self) -> ExporterMetricsSnapshot {
        let mut snapshot = self.metrics.snapshot();
        if let Some(gauges) = &self.gauges {
            snapshot.queue_size = gauges.queue_size() as u64;
            snapshot.queue_capacity = gauges.queue_capacity() as u64;
        }
        snapshot
    }
}

impl std::fmt::Debug for ExporterMetricsHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExporterMetricsHandle")
            .field("id", &self.id)
            .field("signal", &self.signal)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new() {
        let metrics = ExporterMetrics::new();
        let snapshot = metrics.snapshot();

        assert_eq!(snapshot.sent_items, 0);
        assert_eq!(snapshot.send_failed_items, 0);
        assert_eq!(snapshot.enqueue_failed_items, 0);
        assert_eq!(snapshot.sends, 0);
    }

    #[test]
    fn test_record_sent_and_failed() {
        let metrics = ExporterMetrics::new();

        metrics.record_sent(100, Duration::from_millis(3));
        metrics.record_sent(50, Duration::from_millis(1));
        metrics.record_send_failed(25, Duration::from_millis(2));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.sent_items, 150);
        assert_eq!(snapshot.send_failed_items, 25);
        assert_eq!(snapshot.sends, 3);
        assert_eq!(snapshot.send_duration_ns, 6_000_000);
        assert_eq!(snapshot.avg_send_duration(), Duration::from_millis(2));
    }

    #[test]
    fn test_record_enqueue_failed() {
        let metrics = ExporterMetrics::new();

        metrics.record_enqueue_failed(10);
        metrics.record_enqueue_failed(5);

        assert_eq!(metrics.enqueue_failed_items(), 15);
    }

    #[test]
    fn test_reset() {
        let metrics = ExporterMetrics::new();
        metrics.record_sent(10, Duration::from_millis(1));
        metrics.record_enqueue_failed(2);

        metrics.reset();

        assert_eq!(metrics.snapshot(), ExporterMetricsSnapshot::default());
    }

    #[test]
    fn test_avg_send_duration_empty() {
        assert_eq!(
            ExporterMetricsSnapshot::default().avg_send_duration(),
            Duration::ZERO
        );
    }

    #[test]
    fn test_handle_merges_queue_gauges() {
        struct FixedGauges;
        impl QueueGauges for FixedGauges {
            fn queue_size(&self) -> usize {
                7
            }
            fn queue_capacity(&self) -> usize {
                1000
            }
        }

        let handle = ExporterMetricsHandle {
            id: "otlp".into(),
            signal: Signal::Traces,
            metrics: Arc::new(ExporterMetrics::new()),
            gauges: Some(Arc::new(FixedGauges)),
        };

        let snapshot = handle.snapshot();
        assert_eq!(handle.exporter_id(), "otlp");
        assert_eq!(handle.signal(), Signal::Traces);
        assert_eq!(snapshot.queue_size, 7);
        assert_eq!(snapshot.queue_capacity, 1000);
    }
}
