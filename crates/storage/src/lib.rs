//! Ferry - Storage
//!
//! Durable key/value extents backing the persistent sending queue.
//!
//! # Architecture
//!
//! The exporter's persistent queue writes every accepted request as a record
//! keyed by a monotonically increasing sequence number, and deletes the
//! record once the downstream send has settled. A store only has to support
//! four operations:
//!
//! ```text
//! [Queue] --set(seq, bytes)--> [Storage] --keys()/get(seq)--> [Recovery]
//!            delete(seq) <----------------------------------- [Settle]
//! ```
//!
//! # Durability
//!
//! `set` returns only after the record is recoverable across a crash. The
//! file-backed store writes to a temporary file, fsyncs it, renames it into
//! place and fsyncs the directory.
//!
//! # Available Stores
//!
//! | Store | Purpose | Durable |
//! |-------|---------|---------|
//! | `memory` | Tests and benchmarks | No |
//! | `file` | One record per file on local disk | Yes |

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;

/// In-memory store for tests and benchmarks
pub mod memory;

/// Durable one-record-per-file store
pub mod file;

pub use file::FileStorage;
pub use memory::MemoryStorage;

/// Errors from storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    /// Underlying I/O failure
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The store has been closed and no longer accepts writes
    #[error("storage is closed")]
    Closed,
}

/// A key/value extent keyed by sequence number
///
/// Records are opaque byte strings. Keys are assigned by the caller and are
/// monotonically increasing, so `keys()` sorted ascending recovers the
/// original produce order.
///
/// # Durability
///
/// `set` must return only after the record would survive a process crash.
/// In-memory implementations relax this for tests.
pub trait Storage: Send + Sync {
    /// Read a record, `None` if the key is unknown
    fn get(&self, id: u64) -> Result<Option<Bytes>, StorageError>;

    /// Write a record durably
    fn set(&self, id: u64, value: &[u8]) -> Result<(), StorageError>;

    /// Remove a record; unknown keys are not an error
    fn delete(&self, id: u64) -> Result<(), StorageError>;

    /// All record keys currently present, in ascending order
    fn keys(&self) -> Result<Vec<u64>, StorageError>;
}

/// Host-provided map of named storage backends
///
/// The exporter resolves a queue's `storage_id` against this registry at
/// construction time. There is no process-wide registry; the host builds one
/// of these and hands it to each exporter builder that needs persistence.
///
/// # Example
///
/// ```ignore
/// let mut registry = StorageRegistry::new();
/// registry.register("file_storage", Arc::new(FileStorage::open(dir)?));
///
/// let exporter = ExporterBuilder::new("otlp", Signal::Traces, transport)
///     .with_storage_registry(registry)
///     .with_queue(QueueConfig::default().with_storage_id("file_storage"))
///     .build()?;
/// ```
#[derive(Clone, Default)]
pub struct StorageRegistry {
    stores: HashMap<String, Arc<dyn Storage>>,
}

impl StorageRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a store under a name, replacing any previous entry
    pub fn register(&mut self, name: impl Into<String>, store: Arc<dyn Storage>) {
        self.stores.insert(name.into(), store);
    }

    /// Resolve a store by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Storage>> {
        self.stores.get(name).map(Arc::clone)
    }

    /// Check if a store is registered
    pub fn contains(&self, name: &str) -> bool {
        self.stores.contains_key(name)
    }

    /// Names of all registered stores
    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.stores.keys()
    }

    /// Number of registered stores
    pub fn len(&self) -> usize {
        self.stores.len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }
}

impl std::fmt::Debug for StorageRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageRegistry")
            .field("stores", &self.stores.keys().collect::<Vec<_>>())
            .finish()
    }
}
