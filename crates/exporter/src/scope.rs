//! Request scope - explicit cancellation, deadline and correlation handle
//!
//! Every request carries a `Scope` that downstream stages may narrow but
//! never widen. Cancellation from the producer propagates into retry sleeps
//! and transport calls; the timeout stage narrows the deadline per attempt.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::ExportError;

/// Cancellation/deadline context bound to a request
///
/// Cloning a scope shares the same cancellation root. [`Scope::child`] and
/// the narrowing constructors derive a scope that is cancelled when the
/// parent is, but can be cancelled independently without affecting the
/// parent.
#[derive(Debug, Clone)]
pub struct Scope {
    cancel: CancellationToken,
    deadline: Option<Instant>,
    baggage: Arc<HashMap<String, String>>,
}

impl Scope {
    /// Create a root scope with no deadline
    pub fn root() -> Self {
        Self {
            cancel: CancellationToken::new(),
            deadline: None,
            baggage: Arc::new(HashMap::new()),
        }
    }

    /// Derive a child scope; cancelling the child does not cancel the parent
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            deadline: self.deadline,
            baggage: Arc::clone(&self.baggage),
        }
    }

    /// Derive a child scope whose deadline is at most `deadline`
    ///
    /// An existing earlier deadline is kept; deadlines only narrow.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let mut child = self.child();
        child.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        child
    }

    /// Derive a scope with an out-of-band correlation field attached
    pub fn with_value(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut baggage: HashMap<String, String> = (*self.baggage).clone();
        baggage.insert(key.into(), value.into());
        Self {
            cancel: self.cancel.clone(),
            deadline: self.deadline,
            baggage: Arc::new(baggage),
        }
    }

    /// Read a correlation field
    pub fn value(&self, key: &str) -> Option<&str> {
        self.baggage.get(key).map(String::as_str)
    }

    /// The absolute deadline, if any
    #[inline]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Cancel this scope and everything derived from it
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Check if the scope is cancelled or past its deadline
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// The cancellation error, if the scope has ended
    pub fn error(&self) -> Option<ExportError> {
        if self.is_cancelled() {
            Some(ExportError::Cancelled)
        } else {
            None
        }
    }

    /// Wait until the scope is cancelled or its deadline passes
    ///
    /// Cancel-safe, so it can sit in a `select!` opposite a backoff sleep or
    /// a transport call.
    pub async fn cancelled(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.cancel.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.cancel.cancelled().await,
        }
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::root()
    }
}

#[cfg(test)]
#[path = "scope_test.rs"]
mod scope_test;
