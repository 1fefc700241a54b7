//! In-memory backend, used by tests and ephemeral nodes

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{BatchOp, KvStore, StoreError, WriteBatch};

type Map = BTreeMap<Vec<u8>, Vec<u8>>;

#[derive(Debug)]
pub struct MemoryStore {
    inner: RwLock<Option<Map>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// An open, empty store
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Some(Map::new())),
        }
    }

    /// A store that rejects every call until `open` is called
    pub fn closed() -> Self {
        Self {
            inner: RwLock::new(None),
        }
    }

    pub fn open(&self) {
        let mut inner = self.write();
        if inner.is_none() {
            *inner = Some(Map::new());
        }
    }

    /// Close the store and drop its contents
    pub fn close(&self) {
        *self.write() = None;
    }

    fn read(&self) -> RwLockReadGuard<'_, Option<Map>> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Option<Map>> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let inner = self.read();
        let map = inner.as_ref().ok_or(StoreError::NotOpen)?;
        Ok(map.get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        let mut inner = self.write();
        let map = inner.as_mut().ok_or(StoreError::NotOpen)?;
        map.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        let mut inner = self.write();
        let map = inner.as_mut().ok_or(StoreError::NotOpen)?;
        map.remove(key);
        Ok(())
    }

    fn batch_write(&self, batch: WriteBatch) -> Result<(), StoreError> {
        // the write lock is held for the whole batch, so readers see all or nothing
        let mut inner = self.write();
        let map = inner.as_mut().ok_or(StoreError::NotOpen)?;
        for op in batch.into_ops() {
            match op {
                BatchOp::Put(key, value) => {
                    map.insert(key, value);
                }
                BatchOp::Delete(key) => {
                    map.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>, StoreError> {
        let inner = self.read();
        let map = inner.as_ref().ok_or(StoreError::NotOpen)?;
        Ok(map
            .range(prefix.to_vec()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_store_rejects_calls() {
        let store = MemoryStore::closed();
        assert_eq!(store.get(b"k"), Err(StoreError::NotOpen));
        assert_eq!(store.put(b"k", b"v"), Err(StoreError::NotOpen));
        assert_eq!(store.batch_write(WriteBatch::new()), Err(StoreError::NotOpen));
        assert_eq!(store.scan_prefix(b""), Err(StoreError::NotOpen));

        store.open();
        assert_eq!(store.get(b"k"), Ok(None));
    }

    #[test]
    fn test_batch_applies_in_order() {
        let store = MemoryStore::new();
        store.put(b"a", b"1").unwrap();

        let mut batch = WriteBatch::new();
        batch.delete(b"a".to_vec());
        batch.put(b"b".to_vec(), b"2".to_vec());
        batch.put(b"a".to_vec(), b"3".to_vec());
        store.batch_write(batch).unwrap();

        assert_eq!(store.get(b"a").unwrap(), Some(b"3".to_vec()));
        assert_eq!(store.get(b"b").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn test_scan_prefix_is_bounded() {
        let store = MemoryStore::new();
        for key in [&b"ab1"[..], b"ab2", b"ac", b"a", b"b"] {
            store.put(key, b"").unwrap();
        }
        let keys = store.scan_prefix(b"ab").unwrap();
        assert_eq!(keys, vec![b"ab1".to_vec(), b"ab2".to_vec()]);
    }
}
