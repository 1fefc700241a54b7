use async_trait::async_trait;
use thiserror::Error;

use crate::crypto::{hash_concat, Hash, PublicKey, SchnorrSignature};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DhtError {
    #[error("DHT transport is not started")]
    NotStarted,
    #[error("item not found")]
    NotFound,
    #[error("sequence {offered} is not newer than stored {current}")]
    StaleSequence { current: u64, offered: u64 },
    #[error("mutable item signature does not verify")]
    BadSignature,
    #[error("DHT transport failure: {0}")]
    Transport(String),
}

impl DhtError {
    /// Lookup misses and transport hiccups are worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, DhtError::NotFound | DhtError::Transport(_))
    }
}

/// Latest value published under a (public key, salt) pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutableItem {
    pub value: Vec<u8>,
    pub sequence: u64,
    pub signature: SchnorrSignature,
}

/// Digest a mutable item's signature covers
pub fn mutable_item_digest(salt: &[u8], sequence: u64, value: &[u8]) -> Hash {
    hash_concat(&[salt, &sequence.to_be_bytes(), value])
}

#[async_trait]
pub trait DhtTransport: Send + Sync {
    async fn start(&self) -> Result<(), DhtError>;

    async fn stop(&self) -> Result<(), DhtError>;

    /// Store `value` under its content hash and return the key
    async fn put_immutable_item(&self, value: Vec<u8>) -> Result<Hash, DhtError>;

    async fn get_immutable_item(&self, key: &Hash) -> Result<Option<Vec<u8>>, DhtError>;

    async fn put_mutable_item(
        &self,
        public_key: &PublicKey,
        salt: &[u8],
        sequence: u64,
        value: Vec<u8>,
        signature: SchnorrSignature,
    ) -> Result<(), DhtError>;

    async fn get_mutable_item(&self, public_key: &PublicKey, salt: &[u8]) -> Result<Option<MutableItem>, DhtError>;
}
