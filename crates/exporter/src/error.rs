//! Exporter error taxonomy
//!
//! Every error carries a classification that drives the retry state
//! machine: permanent errors short-circuit, throttled errors floor the next
//! backoff, everything else is retryable by default.

use std::time::Duration;

use thiserror::Error;

/// Result alias used across the sender chain
pub type ExportResult = Result<(), ExportError>;

/// Errors surfaced by the sender chain and by transports
#[derive(Debug, Error)]
pub enum ExportError {
    /// The request will never succeed (bad payload, auth rejected)
    #[error("permanent failure: {0}")]
    Permanent(String),

    /// The remote signalled back-off; the next retry waits at least `retry_after`
    #[error("throttled for {retry_after:?}: {message}")]
    Throttled {
        retry_after: Duration,
        message: String,
    },

    /// Transient failure, retried until the retry budget runs out
    #[error("transient failure: {0}")]
    Transient(String),

    /// The per-attempt deadline fired; classified retryable
    #[error("attempt deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    /// The request's scope was cancelled; not retried, not counted as failure
    #[error("request cancelled")]
    Cancelled,

    /// Produce-time rejection from a full sending queue
    #[error("sending queue is full, dropping {dropped_items} items")]
    QueueFull { dropped_items: usize },

    /// The exporter is shutting down or shut down
    #[error("exporter is shut down")]
    Closed,

    /// Retry budget exhausted; still looks retryable to the queue
    #[error("retry budget exhausted after {attempts} attempts over {elapsed:?}: {last}")]
    Exhausted {
        attempts: usize,
        elapsed: Duration,
        last: Box<ExportError>,
    },
}

impl ExportError {
    /// Shorthand for a permanent failure
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent(message.into())
    }

    /// Shorthand for a transient failure
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    /// Shorthand for a throttle signal from the remote
    pub fn throttled(retry_after: Duration, message: impl Into<String>) -> Self {
        Self::Throttled {
            retry_after,
            message: message.into(),
        }
    }

    /// Check if the error can never be resolved by retrying
    #[inline]
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent(_))
    }

    /// Check if the error belongs to the retryable class
    ///
    /// Untagged transport failures arrive as [`ExportError::Transient`], so
    /// unknown errors are retryable by default.
    #[inline]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transient(_)
                | Self::Throttled { .. }
                | Self::DeadlineExceeded(_)
                | Self::Exhausted { .. }
        )
    }

    /// Minimum wait requested by the remote, if any
    #[inline]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Throttled { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }
}

/// Accumulated errors from an exporter shutdown
///
/// Shutdown never short-circuits: every stage gets to tear down and all
/// failures are reported together.
#[derive(Debug, Default)]
pub struct ShutdownError {
    /// Errors in shutdown order (retry, queue, transport, hooks)
    pub errors: Vec<ExportError>,
}

impl std::fmt::Display for ShutdownError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "shutdown finished with {} error(s): ", self.errors.len())?;
        for (i, err) in self.errors.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ShutdownError {}

/// Fatal conditions detected at exporter construction
#[derive(Debug, Error)]
pub enum BuildError {
    /// Retry enabled with unusable parameters
    #[error("invalid retry configuration: {0}")]
    InvalidRetry(String),

    /// Queue configuration is unusable
    #[error("invalid queue configuration: {0}")]
    InvalidQueue(String),

    /// The configured storage id is not present in the registry
    #[error("unknown storage id: {0}")]
    UnknownStorage(String),

    /// A storage id was configured but no registry was provided
    #[error("queue persistence requires a storage registry")]
    MissingRegistry,
}
