//! Abstract ordered KV-store interface.
//!
//! Keys and values are opaque byte strings; keys order lexicographically.
//! Batches are atomic: a reader observes none or all of a committed batch.

use auto_impl::auto_impl;

mod imps;

pub use imps::{MemoryStore, SledStore};

/// Storage failures.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum KvError {
    /// Another process holds the exclusive lock on this store.
    #[error("store is busy: {0}")]
    Busy(String),
    /// Underlying I/O failure.
    #[error("store io error: {0}")]
    Io(String),
}

/// One write inside a [`WriteBatch`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BatchOp {
    /// Insert or overwrite a key.
    Put {
        /// Key to write.
        key: Vec<u8>,
        /// Value to store.
        value: Vec<u8>,
    },
    /// Remove a key; removing an absent key is a no-op.
    Delete {
        /// Key to remove.
        key: Vec<u8>,
    },
}

/// An ordered list of writes applied all-or-nothing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    /// Empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an insert.
    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Put {
            key: key.into(),
            value: value.into(),
        });
    }

    /// Queue a delete.
    pub fn delete(&mut self, key: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Delete { key: key.into() });
    }

    /// Number of queued writes.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// True when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Consume the batch into its ordered operations.
    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }
}

/// Read half of the store.
#[auto_impl(&, Arc)]
pub trait KeyValueStoreGet {
    /// Get the value stored under `key`.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvError>;

    /// All pairs whose key starts with `prefix`, in lexicographic key order,
    /// consistent with the writer at the time the scan begins.
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KvError>;
}

/// Full store interface.
#[auto_impl(&, Arc)]
pub trait KeyValueStore: KeyValueStoreGet {
    /// Insert or overwrite a single key.
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), KvError>;

    /// Remove a single key; absent keys are a no-op.
    fn delete(&self, key: &[u8]) -> Result<(), KvError>;

    /// Apply a batch atomically; partial state is never observable, even
    /// across a crash.
    fn write_batch(&self, batch: WriteBatch) -> Result<(), KvError>;

    /// Flush buffered writes to durable storage.
    fn flush(&self) -> Result<(), KvError>;
}
