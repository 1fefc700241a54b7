//! Height-windowed transaction pool
//!
//! Entries are keyed by transaction hash and tagged with the chain height at
//! which they entered the pool or were confirmed. Confirmed entries stay
//! around so a reorg inside the mutable range can put them back to pending;
//! `slim_down` forgets everything older than the warning range.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use crate::consensus::{check_transaction, ValidationError};
use crate::crypto::{Hash, PublicKey};
use crate::types::{ChainConfig, ChainId, Transaction};

/// One pooled transaction; persisted as-is by the block store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolEntry {
    pub tx: Transaction,
    /// Head height when the entry was added, or the confirming block's height
    pub origin_height: u64,
    pub confirmed: bool,
}

#[derive(Debug)]
pub struct TransactionPool {
    chain_id: ChainId,
    mutable_range: u64,
    warning_range: u64,
    entries: HashMap<Hash, PoolEntry>,
    /// Highest nonce accepted per sender
    last_nonce: HashMap<PublicKey, u64>,
}

impl TransactionPool {
    pub fn new(config: &ChainConfig) -> Self {
        Self::with_ranges(config.chain_id(), config.mutable_range(), config.warning_range())
    }

    pub fn with_ranges(chain_id: ChainId, mutable_range: u64, warning_range: u64) -> Self {
        Self {
            chain_id,
            mutable_range,
            warning_range: warning_range.max(mutable_range),
            entries: HashMap::new(),
            last_nonce: HashMap::new(),
        }
    }

    /// Rebuild from persisted entries
    pub fn restore(&mut self, entries: impl IntoIterator<Item = PoolEntry>) {
        for entry in entries {
            self.note_nonce(&entry.tx);
            self.entries.insert(entry.tx.hash(), entry);
        }
    }

    pub fn mutable_range(&self) -> u64 {
        self.mutable_range
    }

    pub fn warning_range(&self) -> u64 {
        self.warning_range
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.entries.contains_key(hash)
    }

    pub fn get(&self, hash: &Hash) -> Option<&PoolEntry> {
        self.entries.get(hash)
    }

    fn note_nonce(&mut self, tx: &Transaction) {
        let last = self.last_nonce.entry(tx.sender).or_insert(0);
        *last = (*last).max(tx.nonce);
    }

    /// Accept a new pending transaction.
    ///
    /// `account_nonce` is the sender's nonce in the head state; the new nonce
    /// must exceed both it and every nonce already accepted from the sender.
    pub fn add(&mut self, tx: Transaction, account_nonce: u64, height: u64) -> Result<PoolEntry, ValidationError> {
        check_transaction(&tx, &self.chain_id)?;
        let hash = tx.hash();
        if self.entries.contains_key(&hash) {
            return Err(ValidationError::DuplicateTransaction);
        }
        let last = self
            .last_nonce
            .get(&tx.sender)
            .copied()
            .unwrap_or(0)
            .max(account_nonce);
        if tx.nonce <= last {
            return Err(ValidationError::StaleNonce { last, found: tx.nonce });
        }

        self.note_nonce(&tx);
        let entry = PoolEntry {
            tx,
            origin_height: height,
            confirmed: false,
        };
        self.entries.insert(hash, entry.clone());
        debug!(chain = %self.chain_id, tx = %hash, "pooled transaction");
        Ok(entry)
    }

    /// Mark a transaction as included in a canonical block at `height`,
    /// recording it when it arrived only inside that block
    pub fn confirm(&mut self, tx: &Transaction, height: u64) -> PoolEntry {
        self.note_nonce(tx);
        let entry = self
            .entries
            .entry(tx.hash())
            .or_insert_with(|| PoolEntry {
                tx: tx.clone(),
                origin_height: height,
                confirmed: true,
            });
        entry.confirmed = true;
        entry.origin_height = height;
        entry.clone()
    }

    /// Return a transaction of a rolled-back block to pending
    pub fn unconfirm(&mut self, tx: &Transaction, height: u64) -> PoolEntry {
        let entry = self
            .entries
            .entry(tx.hash())
            .or_insert_with(|| PoolEntry {
                tx: tx.clone(),
                origin_height: height,
                confirmed: false,
            });
        entry.confirmed = false;
        entry.clone()
    }

    pub fn remove(&mut self, hash: &Hash) -> Option<PoolEntry> {
        self.entries.remove(hash)
    }

    /// Pending transactions, highest fee first, ties by hash
    pub fn pending(&self) -> Vec<&Transaction> {
        let mut pending: Vec<(&Hash, &Transaction)> = self
            .entries
            .iter()
            .filter(|(_, entry)| !entry.confirmed)
            .map(|(hash, entry)| (hash, &entry.tx))
            .collect();
        pending.sort_by(|(ha, a), (hb, b)| b.fee.cmp(&a.fee).then_with(|| ha.cmp(hb)));
        pending.into_iter().map(|(_, tx)| tx).collect()
    }

    /// Best pending transaction whose nonce is exactly the sender's next one
    pub fn best_pending(&self, mut account_nonce: impl FnMut(&PublicKey) -> u64) -> Option<&Transaction> {
        self.pending()
            .into_iter()
            .find(|tx| tx.nonce == account_nonce(&tx.sender).saturating_add(1))
    }

    /// Evict entries that originated before `current_height - warning_range`.
    /// Returns the evicted hashes.
    pub fn slim_down(&mut self, current_height: u64) -> Vec<Hash> {
        let cutoff = current_height.saturating_sub(self.warning_range);
        let evicted: Vec<Hash> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.origin_height < cutoff)
            .map(|(hash, _)| *hash)
            .collect();
        for hash in &evicted {
            self.entries.remove(hash);
        }

        let live: std::collections::HashSet<PublicKey> = self.entries.values().map(|e| e.tx.sender).collect();
        self.last_nonce.retain(|sender, _| live.contains(sender));

        if !evicted.is_empty() {
            debug!(chain = %self.chain_id, evicted = evicted.len(), cutoff, "slimmed down pool");
        }
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::PrivateKey;
    use proptest::prelude::*;

    fn chain() -> ChainId {
        ChainId::derive("pool", 300, &PublicKey([1u8; 32]), 1)
    }

    fn pool() -> TransactionPool {
        TransactionPool::with_ranges(chain(), 10, 30)
    }

    fn tx(key: &PrivateKey, nonce: u64, fee: u64) -> Transaction {
        Transaction::wiring(chain(), nonce, fee, key.public_key(), nonce, PublicKey([2u8; 32]), 1).sign(key)
    }

    #[test]
    fn test_add_rejects_stale_and_duplicate() {
        let key = PrivateKey::generate();
        let mut pool = pool();
        pool.add(tx(&key, 2, 1), 0, 0).unwrap();

        assert_eq!(
            pool.add(tx(&key, 2, 1), 0, 0),
            Err(ValidationError::DuplicateTransaction)
        );
        assert_eq!(
            pool.add(tx(&key, 1, 1), 0, 0),
            Err(ValidationError::StaleNonce { last: 2, found: 1 })
        );
        assert_eq!(
            pool.add(tx(&key, 3, 1), 5, 0),
            Err(ValidationError::StaleNonce { last: 5, found: 3 })
        );
    }

    #[test]
    fn test_add_rejects_bad_signature() {
        let key = PrivateKey::generate();
        let unsigned = Transaction::wiring(chain(), 1, 1, key.public_key(), 1, PublicKey([2u8; 32]), 1);
        assert_eq!(
            pool().add(unsigned, 0, 0),
            Err(ValidationError::BadTransactionSignature)
        );
    }

    #[test]
    fn test_best_pending_follows_nonce_then_fee() {
        let (a, b) = (PrivateKey::generate(), PrivateKey::generate());
        let mut pool = pool();
        pool.add(tx(&a, 1, 5), 0, 0).unwrap();
        pool.add(tx(&a, 2, 50), 0, 0).unwrap();
        pool.add(tx(&b, 1, 7), 0, 0).unwrap();

        let best = pool.best_pending(|_| 0).unwrap();
        assert_eq!((best.sender, best.fee), (b.public_key(), 7));

        let confirmed = tx(&b, 1, 7);
        pool.confirm(&confirmed, 1);
        let best = pool.best_pending(|_| 0).unwrap();
        assert_eq!(best.fee, 5);

        pool.unconfirm(&confirmed, 1);
        assert_eq!(pool.best_pending(|_| 0).unwrap().fee, 7);
    }

    #[test]
    fn test_slim_down_respects_windows() {
        let key = PrivateKey::generate();
        let mut pool = pool();
        let old = pool.add(tx(&key, 1, 1), 0, 5).unwrap();
        let recent = pool.add(tx(&key, 2, 1), 0, 40).unwrap();

        let evicted = pool.slim_down(45);
        assert_eq!(evicted, vec![old.tx.hash()]);
        assert!(pool.contains(&recent.tx.hash()));

        // nothing inside the mutable range ever goes
        assert!(pool.slim_down(40 + pool.mutable_range()).is_empty());
        assert!(pool.contains(&recent.tx.hash()));
    }

    proptest! {
        #[test]
        fn prop_accepted_nonces_strictly_increase(nonces in prop::collection::vec(1u64..20, 1..24)) {
            let key = PrivateKey::generate();
            let mut pool = pool();
            let mut last = 0u64;
            for nonce in nonces {
                let accepted = pool.add(tx(&key, nonce, 1), 0, 0).is_ok();
                prop_assert_eq!(accepted, nonce > last);
                if accepted {
                    last = nonce;
                }
            }
        }
    }
}
