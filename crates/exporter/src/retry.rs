//! Retry sender - backoff with jitter
//!
//! Re-drives the downstream stage on retryable errors, sleeping an
//! exponentially growing, jittered interval between attempts. Permanent
//! errors short-circuit. Throttle errors floor the next sleep at the
//! remote's requested wait. The backoff sleep is interruptible both by the
//! request's own scope and by exporter shutdown, which pushes the in-flight
//! request back to the queue so it survives a restart.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::RetryConfig;
use crate::error::{ExportError, ExportResult};
use crate::queue::PutBackFn;
use crate::request::{Payload, Request};
use crate::sender::Sender;

/// The retry stage
///
/// Retry state is stack-local to each `send`; the sender itself only holds
/// configuration, its successor, the optional put-back hook published by
/// the persistent queue, and the shutdown token that preempts sleeps.
pub(crate) struct RetrySender<P: Payload> {
    name: String,
    cfg: RetryConfig,
    next: Arc<dyn Sender<P>>,
    put_back: Option<PutBackFn<P>>,
    halt: CancellationToken,
}

impl<P: Payload> RetrySender<P> {
    pub(crate) fn new(
        name: impl Into<String>,
        cfg: RetryConfig,
        next: Arc<dyn Sender<P>>,
        put_back: Option<PutBackFn<P>>,
    ) -> Self {
        Self {
            name: name.into(),
            cfg,
            next,
            put_back,
            halt: CancellationToken::new(),
        }
    }

    /// Hand the request back to the queue (if wired) and surface `err`
    fn hand_back(&self, req: Request<P>, err: ExportError) -> ExportResult {
        if let Some(put_back) = &self.put_back {
            put_back(req);
        }
        Err(err)
    }

    /// Next sleep for the current interval: jittered, floored by throttle
    fn backoff(&self, interval: Duration, err: &ExportError) -> Duration {
        let mut backoff = jitter(interval, self.cfg.randomization_factor);
        if let Some(retry_after) = err.retry_after()
            && retry_after > backoff
        {
            backoff = retry_after;
        }
        backoff
    }
}

#[async_trait]
impl<P: Payload> Sender<P> for RetrySender<P> {
    async fn send(&self, req: Request<P>) -> ExportResult {
        let started = Instant::now();
        let cutoff = if self.cfg.max_elapsed.is_zero() {
            None
        } else {
            Some(started + self.cfg.max_elapsed)
        };

        let mut interval = self.cfg.initial_interval;
        let mut attempts = 0usize;

        loop {
            if self.halt.is_cancelled() {
                return self.hand_back(req, ExportError::Closed);
            }

            attempts += 1;
            let err = match self.next.send(req.clone()).await {
                Ok(()) => return Ok(()),
                Err(err) => err,
            };

            if err.is_permanent() {
                return Err(err);
            }
            if matches!(err, ExportError::Cancelled) {
                return Err(err);
            }

            let backoff = self.backoff(interval, &err);

            // Check the budget before sleeping: a sleep that would overrun
            // the cutoff returns immediately instead.
            if let Some(cutoff) = cutoff
                && Instant::now() + backoff > cutoff
            {
                let exhausted = ExportError::Exhausted {
                    attempts,
                    elapsed: started.elapsed(),
                    last: Box::new(err),
                };
                return self.hand_back(req, exhausted);
            }

            if req.scope().is_cancelled() {
                return Err(ExportError::Cancelled);
            }

            tracing::info!(
                exporter = %self.name,
                attempt = attempts,
                backoff_ms = backoff.as_millis() as u64,
                error = %err,
                "export failed, will retry"
            );

            let scope = req.scope().clone();
            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = scope.cancelled() => {
                    return Err(ExportError::Cancelled);
                }
                _ = self.halt.cancelled() => {
                    return self.hand_back(req, ExportError::Closed);
                }
            }

            interval = grow(interval, self.cfg.multiplier, self.cfg.max_interval);
        }
    }

    /// Stop accepting new attempts and preempt in-flight backoff sleeps
    async fn shutdown(&self) -> ExportResult {
        self.halt.cancel();
        Ok(())
    }
}

/// Uniform jitter in `[d*(1-r), d*(1+r)]`
fn jitter(interval: Duration, factor: f64) -> Duration {
    if factor <= 0.0 || interval.is_zero() {
        return interval;
    }
    let secs = interval.as_secs_f64();
    let delta = secs * factor;
    let jittered = rand::thread_rng().gen_range((secs - delta).max(0.0)..=secs + delta);
    Duration::from_secs_f64(jittered)
}

/// Grow the interval by `multiplier`, capped at `max_interval`
fn grow(interval: Duration, multiplier: f64, max_interval: Duration) -> Duration {
    let grown = Duration::from_secs_f64(interval.as_secs_f64() * multiplier);
    grown.min(max_interval)
}

#[cfg(test)]
#[path = "retry_test.rs"]
mod retry_test;
