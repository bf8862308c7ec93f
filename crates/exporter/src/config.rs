//! Exporter configuration
//!
//! Option structs applied through the builder and frozen once the exporter
//! is constructed. Defaults follow the collector's conventions: a 5 second
//! per-attempt deadline, retries off, a 1000-element queue with 10 workers.

use std::time::Duration;

use crate::error::BuildError;

/// Default per-attempt deadline
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default first backoff interval
pub const DEFAULT_INITIAL_INTERVAL: Duration = Duration::from_secs(5);

/// Default backoff cap
pub const DEFAULT_MAX_INTERVAL: Duration = Duration::from_secs(30);

/// Default total retry budget per request
pub const DEFAULT_MAX_ELAPSED: Duration = Duration::from_secs(300);

/// Default jitter band around each backoff interval
pub const DEFAULT_RANDOMIZATION_FACTOR: f64 = 0.5;

/// Default backoff growth factor
pub const DEFAULT_MULTIPLIER: f64 = 1.5;

/// Default queue capacity
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// Default number of queue workers
pub const DEFAULT_NUM_WORKERS: usize = 10;

/// Per-attempt deadline configuration
///
/// A zero timeout disables the deadline entirely.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutConfig {
    /// Deadline applied to each transport attempt
    pub timeout: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl TimeoutConfig {
    /// Config with the given per-attempt deadline
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Config with the deadline disabled
    pub fn disabled() -> Self {
        Self {
            timeout: Duration::ZERO,
        }
    }
}

/// Backoff policy for the retry stage
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Whether transient failures are retried at all
    pub enabled: bool,

    /// First backoff interval
    pub initial_interval: Duration,

    /// Jitter band: each sleep is uniform in `[d*(1-r), d*(1+r)]`
    pub randomization_factor: f64,

    /// Growth factor applied to the interval after each attempt
    pub multiplier: f64,

    /// Upper bound on a single backoff interval
    pub max_interval: Duration,

    /// Total budget per request; zero means no elapsed bound
    pub max_elapsed: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            initial_interval: DEFAULT_INITIAL_INTERVAL,
            randomization_factor: DEFAULT_RANDOMIZATION_FACTOR,
            multiplier: DEFAULT_MULTIPLIER,
            max_interval: DEFAULT_MAX_INTERVAL,
            max_elapsed: DEFAULT_MAX_ELAPSED,
        }
    }
}

impl RetryConfig {
    /// Default policy with retries switched on
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Default::default()
        }
    }

    /// Set the first backoff interval
    #[must_use]
    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    /// Set the jitter band
    #[must_use]
    pub fn with_randomization_factor(mut self, factor: f64) -> Self {
        self.randomization_factor = factor;
        self
    }

    /// Set the backoff growth factor
    #[must_use]
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Set the backoff cap
    #[must_use]
    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    /// Set the total retry budget per request
    #[must_use]
    pub fn with_max_elapsed(mut self, budget: Duration) -> Self {
        self.max_elapsed = budget;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), BuildError> {
        if !self.enabled {
            return Ok(());
        }
        if self.initial_interval.is_zero() {
            return Err(BuildError::InvalidRetry(
                "initial_interval must be positive".into(),
            ));
        }
        if self.max_interval.is_zero() {
            return Err(BuildError::InvalidRetry(
                "max_interval must be positive".into(),
            ));
        }
        if self.multiplier < 1.0 {
            return Err(BuildError::InvalidRetry(format!(
                "multiplier must be >= 1.0, got {}",
                self.multiplier
            )));
        }
        if !(0.0..1.0).contains(&self.randomization_factor) {
            return Err(BuildError::InvalidRetry(format!(
                "randomization_factor must be in [0, 1), got {}",
                self.randomization_factor
            )));
        }
        Ok(())
    }
}

/// Buffering policy for the sending queue
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Whether requests are buffered at all; disabled means synchronous send
    pub enabled: bool,

    /// Number of worker tasks draining the queue
    pub num_workers: usize,

    /// Maximum number of buffered requests; zero is a rendezvous queue
    pub capacity: usize,

    /// Name of the storage backend for persistence, if any
    pub storage_id: Option<String>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            num_workers: DEFAULT_NUM_WORKERS,
            capacity: DEFAULT_QUEUE_CAPACITY,
            storage_id: None,
        }
    }
}

impl QueueConfig {
    /// Config with buffering switched off (synchronous sends)
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// Set the queue capacity
    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set the number of workers
    #[must_use]
    pub fn with_num_workers(mut self, workers: usize) -> Self {
        self.num_workers = workers;
        self
    }

    /// Persist accepted requests through the named storage backend
    #[must_use]
    pub fn with_storage_id(mut self, id: impl Into<String>) -> Self {
        self.storage_id = Some(id.into());
        self
    }

    pub(crate) fn validate(&self) -> Result<(), BuildError> {
        if let Some(id) = &self.storage_id
            && id.is_empty()
        {
            return Err(BuildError::InvalidQueue("storage_id must not be empty".into()));
        }
        Ok(())
    }
}

/// What the exporter advertises to the upstream producer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// Whether the exporter mutates the batches it is handed
    pub mutates_data: bool,
}

/// The signal type a pipeline carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    Traces,
    Metrics,
    Logs,
}

impl Signal {
    /// Stable lowercase name, used as a metric label
    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Traces => "traces",
            Signal::Metrics => "metrics",
            Signal::Logs => "logs",
        }
    }
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
