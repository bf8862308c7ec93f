//! Timeout sender - per-attempt deadline
//!
//! Narrows the request scope with `now + timeout` and drives the transport
//! under that deadline. A fired deadline cancels the attempt and surfaces
//! as a retryable error; a zero timeout makes this stage a pass-through.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::{ExportError, ExportResult};
use crate::request::{Payload, Request};
use crate::sender::Sender;

/// The timeout stage
pub(crate) struct TimeoutSender<P: Payload> {
    timeout: Duration,
    next: Arc<dyn Sender<P>>,
}

impl<P: Payload> TimeoutSender<P> {
    pub(crate) fn new(timeout: Duration, next: Arc<dyn Sender<P>>) -> Self {
        Self { timeout, next }
    }
}

#[async_trait]
impl<P: Payload> Sender<P> for TimeoutSender<P> {
    async fn send(&self, req: Request<P>) -> ExportResult {
        if self.timeout.is_zero() {
            return self.next.send(req).await;
        }

        let deadline = Instant::now() + self.timeout;
        let scoped = req.with_scope(req.scope().with_deadline(deadline));

        match tokio::time::timeout_at(deadline, self.next.send(scoped)).await {
            Ok(result) => result,
            Err(_) => Err(ExportError::DeadlineExceeded(self.timeout)),
        }
    }
}

#[cfg(test)]
#[path = "timeout_test.rs"]
mod timeout_test;
