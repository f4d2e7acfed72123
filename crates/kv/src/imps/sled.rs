use crate::{BatchOp, KeyValueStore, KeyValueStoreGet, KvError, WriteBatch};
use std::path::Path;

/// Persistent store backed by a [`sled`] database.
///
/// The underlying database takes an exclusive file lock; a second open of
/// the same path fails with [`KvError::Busy`].
#[derive(Clone, Debug)]
pub struct SledStore {
    db: ::sled::Db,
}

impl SledStore {
    /// Open or create the store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, KvError> {
        let db = ::sled::open(path).map_err(from_sled)?;
        Ok(Self { db })
    }

    /// Flush and release the store.
    pub fn close(self) -> Result<(), KvError> {
        self.db.flush().map_err(from_sled)?;
        Ok(())
    }
}

// sled surfaces a held database lock as a plain io error, either as
// `WouldBlock` or as an opaque "could not acquire lock" message
fn from_sled(err: ::sled::Error) -> KvError {
    match err {
        ::sled::Error::Io(ref io)
            if io.kind() == std::io::ErrorKind::WouldBlock
                || io.to_string().contains("lock") =>
        {
            KvError::Busy(err.to_string())
        }
        other => KvError::Io(other.to_string()),
    }
}

impl KeyValueStoreGet for SledStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvError> {
        Ok(self.db.get(key).map_err(from_sled)?.map(|v| v.to_vec()))
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KvError> {
        self.db
            .scan_prefix(prefix)
            .map(|entry| {
                entry
                    .map(|(k, v)| (k.to_vec(), v.to_vec()))
                    .map_err(from_sled)
            })
            .collect()
    }
}

impl KeyValueStore for SledStore {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), KvError> {
        self.db.insert(key, value).map_err(from_sled)?;
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), KvError> {
        self.db.remove(key).map_err(from_sled)?;
        Ok(())
    }

    fn write_batch(&self, batch: WriteBatch) -> Result<(), KvError> {
        let mut sled_batch = ::sled::Batch::default();
        for op in batch.into_ops() {
            match op {
                BatchOp::Put { key, value } => sled_batch.insert(key, value),
                BatchOp::Delete { key } => sled_batch.remove(key),
            }
        }
        self.db.apply_batch(sled_batch).map_err(from_sled)
    }

    fn flush(&self) -> Result<(), KvError> {
        self.db.flush().map_err(from_sled)?;
        Ok(())
    }
}
