//! In-memory storage - no durability
//!
//! Backs the persistent queue in tests and benchmarks without any I/O.
//! Records survive only as long as the process (and the store) do.

use std::collections::BTreeMap;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::{Storage, StorageError};

/// In-memory record store
///
/// A `BTreeMap` behind a mutex, so `keys()` is naturally sorted. Useful for
/// exercising the persistent queue's accept/ack/recover protocol without
/// touching disk.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    records: Mutex<BTreeMap<u64, Bytes>>,
}

impl MemoryStorage {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records currently held
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Check if the store holds no records
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, id: u64) -> Result<Option<Bytes>, StorageError> {
        Ok(self.records.lock().get(&id).cloned())
    }

    fn set(&self, id: u64, value: &[u8]) -> Result<(), StorageError> {
        self.records
            .lock()
            .insert(id, Bytes::copy_from_slice(value));
        Ok(())
    }

    fn delete(&self, id: u64) -> Result<(), StorageError> {
        self.records.lock().remove(&id);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<u64>, StorageError> {
        Ok(self.records.lock().keys().copied().collect())
    }
}
