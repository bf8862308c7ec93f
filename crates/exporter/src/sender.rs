//! Sender and transport contracts
//!
//! A sender is one stage of the chain. Stages own their successor as an
//! `Arc<dyn Sender>`, fixed at construction; there is no re-linking after
//! the exporter is built.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ExportResult;
use crate::request::{Payload, Request};
use crate::scope::Scope;

/// One stage of the sender chain
///
/// `send` must be safe for concurrent callers. `start` and `shutdown` are
/// idempotent, and `shutdown` is safe to call after a failed `start`; the
/// defaults are no-ops for stages without lifecycle of their own.
#[async_trait]
pub trait Sender<P: Payload>: Send + Sync {
    /// Push a request through this stage and its successors
    async fn send(&self, req: Request<P>) -> ExportResult;

    /// Bring the stage up; called after the transport is ready
    async fn start(&self) -> ExportResult {
        Ok(())
    }

    /// Tear the stage down
    async fn shutdown(&self) -> ExportResult {
        Ok(())
    }
}

/// The transport plugged in beyond the chain
///
/// Implementations ship one batch per `consume` call and classify their
/// failures: [`ExportError::Permanent`] for requests that can never
/// succeed, [`ExportError::Throttled`] when the remote asked for back-off.
/// Anything else is treated as transient and retried.
///
/// [`ExportError::Permanent`]: crate::ExportError::Permanent
/// [`ExportError::Throttled`]: crate::ExportError::Throttled
#[async_trait]
pub trait Transport<P: Payload>: Send + Sync {
    /// Ship one batch; the scope carries the attempt deadline
    async fn consume(&self, scope: &Scope, payload: &P) -> ExportResult;

    /// Bring the transport up before any worker dequeues
    async fn start(&self) -> ExportResult {
        Ok(())
    }

    /// Tear the transport down after the queue has drained
    async fn shutdown(&self) -> ExportResult {
        Ok(())
    }
}

/// Adapts a [`Transport`] into the innermost chain stage
pub(crate) struct TransportSender<P: Payload> {
    transport: Arc<dyn Transport<P>>,
}

impl<P: Payload> TransportSender<P> {
    pub(crate) fn new(transport: Arc<dyn Transport<P>>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl<P: Payload> Sender<P> for TransportSender<P> {
    async fn send(&self, req: Request<P>) -> ExportResult {
        self.transport.consume(req.scope(), req.payload()).await
    }
}

/// Error-logging pass-through filling a disabled retry or queue slot
///
/// Forwards every request unchanged; on failure it logs the error with the
/// dropped item count and a hint naming the option that would have saved
/// the data, then propagates the error.
pub(crate) struct LoggingSender<P: Payload> {
    exporter: String,
    hint: &'static str,
    next: Arc<dyn Sender<P>>,
}

impl<P: Payload> LoggingSender<P> {
    pub(crate) fn new(
        exporter: impl Into<String>,
        hint: &'static str,
        next: Arc<dyn Sender<P>>,
    ) -> Self {
        Self {
            exporter: exporter.into(),
            hint,
            next,
        }
    }
}

#[async_trait]
impl<P: Payload> Sender<P> for LoggingSender<P> {
    async fn send(&self, req: Request<P>) -> ExportResult {
        let items = req.item_count();
        let result = self.next.send(req).await;
        if let Err(err) = &result {
            tracing::error!(
                exporter = %self.exporter,
                dropped_items = items,
                error = %err,
                "{}",
                self.hint
            );
        }
        result
    }
}
