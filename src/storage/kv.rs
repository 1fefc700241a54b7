//! Ordered byte-key / byte-value store abstraction

use thiserror::Error;

use crate::codec::CodecError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("store is not open")]
    NotOpen,
    #[error("storage I/O error: {0}")]
    Io(String),
    #[error("corrupt record: {0}")]
    Codec(#[from] CodecError),
}

impl From<sled::Error> for StoreError {
    fn from(err: sled::Error) -> Self {
        StoreError::Io(err.to_string())
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

/// Writes applied all-or-nothing, in insertion order
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.ops.push(BatchOp::Put(key, value));
    }

    pub fn delete(&mut self, key: Vec<u8>) {
        self.ops.push(BatchOp::Delete(key));
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }
}

/// Backend contract shared by every store implementation.
///
/// Every call on a store that is not open fails with [`StoreError::NotOpen`].
pub trait KvStore: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    /// Durable single write
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError>;

    fn delete(&self, key: &[u8]) -> Result<(), StoreError>;

    /// Atomic multi-write: either every op lands or none does
    fn batch_write(&self, batch: WriteBatch) -> Result<(), StoreError>;

    /// Keys starting with `prefix`, in ascending byte order
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>, StoreError>;
}
