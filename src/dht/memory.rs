//! In-process DHT
//!
//! Handles created with [`MemoryDht::peer`] share one item space, so several
//! nodes in one process see each other's publications. Each handle has its
//! own started flag.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use crate::crypto::{hash_bytes, Hash, PublicKey, SchnorrSignature};

use super::{mutable_item_digest, DhtError, DhtTransport, MutableItem};

#[derive(Debug, Default)]
struct Items {
    immutable: HashMap<Hash, Vec<u8>>,
    mutable: HashMap<(PublicKey, Vec<u8>), MutableItem>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryDht {
    items: Arc<RwLock<Items>>,
    started: Arc<AtomicBool>,
    fail_start: bool,
}

impl MemoryDht {
    pub fn new() -> Self {
        Self::default()
    }

    /// Another node's handle onto the same item space
    pub fn peer(&self) -> Self {
        Self {
            items: Arc::clone(&self.items),
            started: Arc::new(AtomicBool::new(false)),
            fail_start: false,
        }
    }

    /// A handle whose `start` always fails, for exercising startup failures
    pub fn unreachable() -> Self {
        Self {
            fail_start: true,
            ..Self::default()
        }
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    fn ensure_started(&self) -> Result<(), DhtError> {
        if self.is_started() {
            Ok(())
        } else {
            Err(DhtError::NotStarted)
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Items> {
        self.items.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Items> {
        self.items.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl DhtTransport for MemoryDht {
    async fn start(&self) -> Result<(), DhtError> {
        if self.fail_start {
            return Err(DhtError::Transport("no bootstrap nodes reachable".to_string()));
        }
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<(), DhtError> {
        self.started.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn put_immutable_item(&self, value: Vec<u8>) -> Result<Hash, DhtError> {
        self.ensure_started()?;
        let key = hash_bytes(&value);
        self.write().immutable.insert(key, value);
        Ok(key)
    }

    async fn get_immutable_item(&self, key: &Hash) -> Result<Option<Vec<u8>>, DhtError> {
        self.ensure_started()?;
        Ok(self.read().immutable.get(key).cloned())
    }

    async fn put_mutable_item(
        &self,
        public_key: &PublicKey,
        salt: &[u8],
        sequence: u64,
        value: Vec<u8>,
        signature: SchnorrSignature,
    ) -> Result<(), DhtError> {
        self.ensure_started()?;
        if !public_key.verify(&mutable_item_digest(salt, sequence, &value), &signature) {
            return Err(DhtError::BadSignature);
        }
        let mut items = self.write();
        let slot = (*public_key, salt.to_vec());
        if let Some(current) = items.mutable.get(&slot) {
            if current.sequence >= sequence {
                return Err(DhtError::StaleSequence {
                    current: current.sequence,
                    offered: sequence,
                });
            }
        }
        items.mutable.insert(
            slot,
            MutableItem {
                value,
                sequence,
                signature,
            },
        );
        Ok(())
    }

    async fn get_mutable_item(&self, public_key: &PublicKey, salt: &[u8]) -> Result<Option<MutableItem>, DhtError> {
        self.ensure_started()?;
        Ok(self.read().mutable.get(&(*public_key, salt.to_vec())).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::PrivateKey;

    #[tokio::test]
    async fn test_requires_start() {
        let dht = MemoryDht::new();
        assert_eq!(dht.put_immutable_item(vec![1]).await, Err(DhtError::NotStarted));
        dht.start().await.unwrap();
        let key = dht.put_immutable_item(vec![1, 2]).await.unwrap();
        assert_eq!(key, hash_bytes(&[1, 2]));
    }

    #[tokio::test]
    async fn test_peers_share_items() {
        let a = MemoryDht::new();
        let b = a.peer();
        a.start().await.unwrap();
        b.start().await.unwrap();

        let key = a.put_immutable_item(b"block".to_vec()).await.unwrap();
        assert_eq!(b.get_immutable_item(&key).await.unwrap(), Some(b"block".to_vec()));
    }

    #[tokio::test]
    async fn test_mutable_items_are_signed_and_sequenced() {
        let dht = MemoryDht::new();
        dht.start().await.unwrap();
        let key = PrivateKey::generate();
        let pk = key.public_key();
        let sign = |seq: u64, value: &[u8]| key.sign(&mutable_item_digest(b"chain", seq, value));

        dht.put_mutable_item(&pk, b"chain", 2, b"head".to_vec(), sign(2, b"head"))
            .await
            .unwrap();
        assert_eq!(
            dht.put_mutable_item(&pk, b"chain", 1, b"old".to_vec(), sign(1, b"old")).await,
            Err(DhtError::StaleSequence { current: 2, offered: 1 })
        );
        assert_eq!(
            dht.put_mutable_item(&pk, b"chain", 3, b"x".to_vec(), sign(3, b"y")).await,
            Err(DhtError::BadSignature)
        );

        let item = dht.get_mutable_item(&pk, b"chain").await.unwrap().unwrap();
        assert_eq!((item.sequence, item.value), (2, b"head".to_vec()));
        assert!(dht.get_mutable_item(&pk, b"other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unreachable_fails_to_start() {
        assert!(MemoryDht::unreachable().start().await.is_err());
    }
}
