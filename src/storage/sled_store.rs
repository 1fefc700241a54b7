//! Persistent backend using Sled
//!
//! Single-key writes and batches are flushed before returning, so a
//! successful call survives a crash.

use sled::Db;
use std::path::Path;
use std::sync::{RwLock, RwLockReadGuard};

use super::{BatchOp, KvStore, StoreError, WriteBatch};

#[derive(Debug)]
pub struct SledStore {
    db: RwLock<Option<Db>>,
}

impl SledStore {
    /// Open or create the database at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        Ok(Self {
            db: RwLock::new(Some(db)),
        })
    }

    /// Database that is deleted when dropped
    pub fn temporary() -> Result<Self, StoreError> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self {
            db: RwLock::new(Some(db)),
        })
    }

    /// Flush and release the database; later calls fail with `NotOpen`
    pub fn close(&self) -> Result<(), StoreError> {
        let mut slot = self.db.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(db) = slot.take() {
            db.flush()?;
        }
        Ok(())
    }

    fn db(&self) -> RwLockReadGuard<'_, Option<Db>> {
        self.db.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl KvStore for SledStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let guard = self.db();
        let db = guard.as_ref().ok_or(StoreError::NotOpen)?;
        Ok(db.get(key)?.map(|value| value.to_vec()))
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        let guard = self.db();
        let db = guard.as_ref().ok_or(StoreError::NotOpen)?;
        db.insert(key, value)?;
        db.flush()?;
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        let guard = self.db();
        let db = guard.as_ref().ok_or(StoreError::NotOpen)?;
        db.remove(key)?;
        db.flush()?;
        Ok(())
    }

    fn batch_write(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let guard = self.db();
        let db = guard.as_ref().ok_or(StoreError::NotOpen)?;
        let mut sled_batch = sled::Batch::default();
        for op in batch.into_ops() {
            match op {
                BatchOp::Put(key, value) => sled_batch.insert(key, value),
                BatchOp::Delete(key) => sled_batch.remove(key),
            }
        }
        db.apply_batch(sled_batch)?;
        db.flush()?;
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>, StoreError> {
        let guard = self.db();
        let db = guard.as_ref().ok_or(StoreError::NotOpen)?;
        let mut keys = Vec::new();
        for item in db.scan_prefix(prefix) {
            let (key, _) = item?;
            keys.push(key.to_vec());
        }
        Ok(keys)
    }
}
