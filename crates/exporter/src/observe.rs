//! Observability sender - counters, latency and a span per attempt
//!
//! Wraps the downstream call with a timer and the per-result item counters,
//! and opens one short-lived tracing span per send, labeled with the
//! exporter id and signal type. Never touches the request or its scope.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::Instrument;

use crate::config::Signal;
use crate::error::ExportResult;
use crate::metrics::ExporterMetrics;
use crate::request::{Payload, Request};
use crate::sender::Sender;

/// The observability stage
pub(crate) struct ObservabilitySender<P: Payload> {
    name: String,
    signal: Signal,
    metrics: Arc<ExporterMetrics>,
    next: Arc<dyn Sender<P>>,
}

impl<P: Payload> ObservabilitySender<P> {
    pub(crate) fn new(
        name: impl Into<String>,
        signal: Signal,
        metrics: Arc<ExporterMetrics>,
        next: Arc<dyn Sender<P>>,
    ) -> Self {
        Self {
            name: name.into(),
            signal,
            metrics,
            next,
        }
    }
}

#[async_trait]
impl<P: Payload> Sender<P> for ObservabilitySender<P> {
    async fn send(&self, req: Request<P>) -> ExportResult {
        let items = req.item_count() as u64;
        let span = tracing::debug_span!(
            "export",
            exporter = %self.name,
            signal = %self.signal,
            items,
        );

        let started = Instant::now();
        let result = self.next.send(req).instrument(span).await;
        let elapsed = started.elapsed();

        match &result {
            Ok(()) => self.metrics.record_sent(items, elapsed),
            Err(_) => self.metrics.record_send_failed(items, elapsed),
        }

        result
    }
}
