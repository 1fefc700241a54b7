//! Block, fork-membership and account state persistence for every chain
//!
//! One `BlockStore` is shared by all chains of a node; each call is scoped
//! by chain id. Multi-record state transitions are staged into a
//! [`WriteBatch`] and committed in one atomic write.

use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use crate::codec;
use crate::consensus::InvariantError;
use crate::consensus::ValidationError;
use crate::crypto::{Hash, PublicKey};
use crate::error::Result;
use crate::pool::PoolEntry;
use crate::types::{AccountState, Block, BlockInfo, ChainConfig, ChainId, StateDelta};

use super::keys::*;
use super::{KvStore, StoreError, WriteBatch};

#[derive(Clone)]
pub struct BlockStore {
    kv: Arc<dyn KvStore>,
}

impl std::fmt::Debug for BlockStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockStore").finish_non_exhaustive()
    }
}

impl BlockStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    pub fn commit(&self, batch: WriteBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        self.kv.batch_write(batch)?;
        Ok(())
    }

    fn get_record<T: DeserializeOwned>(&self, key: &[u8]) -> std::result::Result<Option<T>, StoreError> {
        match self.kv.get(key)? {
            Some(bytes) => Ok(Some(codec::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    // ---- blocks ----------------------------------------------------------

    /// Index a block by hash (and by height when canonical) and upsert its info
    pub fn save_block(&self, chain_id: &ChainId, block: &Block, is_main_chain: bool) -> Result<()> {
        let mut batch = WriteBatch::new();
        self.stage_block(&mut batch, chain_id, block, is_main_chain);
        self.commit(batch)
    }

    pub fn stage_block(&self, batch: &mut WriteBatch, chain_id: &ChainId, block: &Block, is_main_chain: bool) {
        let hash = block.hash();
        batch.put(block_key(chain_id, &hash), block.encoded().to_vec());
        batch.put(block_at_height_key(chain_id, block.height(), &hash), Vec::new());
        self.stage_block_info(batch, chain_id, &hash, is_main_chain);
        if is_main_chain {
            batch.put(height_key(chain_id, block.height()), hash.0.to_vec());
        }
    }

    pub fn stage_block_info(&self, batch: &mut WriteBatch, chain_id: &ChainId, hash: &Hash, is_main_chain: bool) {
        let info = BlockInfo {
            hash: *hash,
            is_main_chain,
        };
        batch.put(block_info_key(chain_id, hash), codec::encode(&info));
    }

    pub fn get_block(&self, chain_id: &ChainId, hash: &Hash) -> Result<Option<Block>> {
        match self.kv.get(&block_key(chain_id, hash))? {
            Some(bytes) => Ok(Some(Block::decode(&bytes).map_err(StoreError::from)?)),
            None => Ok(None),
        }
    }

    pub fn contains_block(&self, chain_id: &ChainId, hash: &Hash) -> Result<bool> {
        Ok(self.kv.get(&block_key(chain_id, hash))?.is_some())
    }

    /// Canonical block at `height`
    pub fn get_block_by_height(&self, chain_id: &ChainId, height: u64) -> Result<Option<Block>> {
        let Some(bytes) = self.kv.get(&height_key(chain_id, height))? else {
            return Ok(None);
        };
        let hash = Hash::from_slice(&bytes)
            .ok_or_else(|| StoreError::Io(format!("corrupt height index at {height}")))?;
        self.get_block(chain_id, &hash)
    }

    pub fn get_block_info(&self, chain_id: &ChainId, hash: &Hash) -> Result<Option<BlockInfo>> {
        Ok(self.get_record(&block_info_key(chain_id, hash))?)
    }

    pub fn is_main_chain(&self, chain_id: &ChainId, hash: &Hash) -> Result<bool> {
        Ok(self
            .get_block_info(chain_id, hash)?
            .map(|info| info.is_main_chain)
            .unwrap_or(false))
    }

    fn require_block(&self, chain_id: &ChainId, hash: &Hash) -> Result<Block> {
        self.get_block(chain_id, hash)?
            .ok_or_else(|| InvariantError::MissingAncestor(*hash).into())
    }

    /// Nearest ancestor of `candidate` (the candidate itself included) that is
    /// on the canonical chain. Walking more than `max_depth` links without
    /// reaching the canonical chain means the branch is detached.
    pub fn get_fork_point_block(&self, chain_id: &ChainId, candidate: &Block, max_depth: u64) -> Result<Block> {
        let mut current = candidate.clone();
        let mut depth = 0u64;
        loop {
            if self.is_main_chain(chain_id, &current.hash())? {
                return Ok(current);
            }
            if current.is_genesis() || depth >= max_depth {
                return Err(ValidationError::DetachedBranch.into());
            }
            // The walk only passes side blocks; a missing link means their
            // branch root was pruned below the immutable point.
            current = self
                .get_block(chain_id, current.previous_hash())?
                .ok_or(ValidationError::DetachedBranch)?;
            depth += 1;
        }
    }

    /// Blocks on the path `(from_hash, to_hash]`, lowest first
    pub fn branch(&self, chain_id: &ChainId, from_hash: &Hash, to_hash: &Hash) -> Result<Vec<Block>> {
        let floor = self.require_block(chain_id, from_hash)?.height();
        let mut blocks = Vec::new();
        let mut cursor = *to_hash;
        while cursor != *from_hash {
            let block = self.require_block(chain_id, &cursor)?;
            if block.height() <= floor {
                return Err(InvariantError::BrokenBranch {
                    from: *from_hash,
                    to: *to_hash,
                }
                .into());
            }
            cursor = *block.previous_hash();
            blocks.push(block);
        }
        blocks.reverse();
        Ok(blocks)
    }

    /// Flip canonicality of every block in `(from_hash, to_hash]`, keeping the
    /// height index in step. Returns the affected blocks, lowest first.
    pub fn stage_mark_range(
        &self,
        batch: &mut WriteBatch,
        chain_id: &ChainId,
        from_hash: &Hash,
        to_hash: &Hash,
        is_main_chain: bool,
    ) -> Result<Vec<Block>> {
        let blocks = self.branch(chain_id, from_hash, to_hash)?;
        for block in &blocks {
            let hash = block.hash();
            self.stage_block_info(batch, chain_id, &hash, is_main_chain);
            if is_main_chain {
                batch.put(height_key(chain_id, block.height()), hash.0.to_vec());
            } else {
                batch.delete(height_key(chain_id, block.height()));
            }
        }
        Ok(blocks)
    }

    pub fn mark_range(&self, chain_id: &ChainId, from_hash: &Hash, to_hash: &Hash, is_main_chain: bool) -> Result<Vec<Block>> {
        let mut batch = WriteBatch::new();
        let blocks = self.stage_mark_range(&mut batch, chain_id, from_hash, to_hash, is_main_chain)?;
        self.commit(batch)?;
        Ok(blocks)
    }

    // ---- chain head --------------------------------------------------------

    pub fn head(&self, chain_id: &ChainId) -> Result<Option<Hash>> {
        Ok(self.kv.get(&head_key(chain_id))?.and_then(|bytes| Hash::from_slice(&bytes)))
    }

    pub fn stage_head(&self, batch: &mut WriteBatch, chain_id: &ChainId, hash: &Hash) {
        batch.put(head_key(chain_id), hash.0.to_vec());
    }

    // ---- account state -----------------------------------------------------

    /// Canonical state of an account; unknown accounts are all-zero
    pub fn account(&self, chain_id: &ChainId, account: &PublicKey) -> Result<AccountState> {
        Ok(self
            .get_record(&account_key(chain_id, account))?
            .unwrap_or_default())
    }

    pub fn stage_account(&self, batch: &mut WriteBatch, chain_id: &ChainId, account: &PublicKey, state: &AccountState) {
        batch.put(account_key(chain_id, account), codec::encode(state));
    }

    pub fn state_delta(&self, chain_id: &ChainId, hash: &Hash) -> Result<StateDelta> {
        self.get_record(&state_delta_key(chain_id, hash))?
            .ok_or_else(|| InvariantError::MissingStateDelta(*hash).into())
    }

    pub fn stage_state_delta(&self, batch: &mut WriteBatch, chain_id: &ChainId, hash: &Hash, delta: &StateDelta) {
        batch.put(state_delta_key(chain_id, hash), codec::encode(delta));
    }

    // ---- transaction pool ----------------------------------------------------

    pub fn save_pool_entry(&self, chain_id: &ChainId, entry: &PoolEntry) -> Result<()> {
        let mut batch = WriteBatch::new();
        self.stage_pool_entry(&mut batch, chain_id, entry);
        self.commit(batch)
    }

    pub fn stage_pool_entry(&self, batch: &mut WriteBatch, chain_id: &ChainId, entry: &PoolEntry) {
        batch.put(pool_entry_key(chain_id, &entry.tx.hash()), codec::encode(entry));
    }

    pub fn delete_pool_entries(&self, chain_id: &ChainId, hashes: &[Hash]) -> Result<()> {
        let mut batch = WriteBatch::new();
        self.stage_pool_removals(&mut batch, chain_id, hashes);
        self.commit(batch)
    }

    pub fn stage_pool_removals(&self, batch: &mut WriteBatch, chain_id: &ChainId, hashes: &[Hash]) {
        for hash in hashes {
            batch.delete(pool_entry_key(chain_id, hash));
        }
    }

    pub fn pool_entries(&self, chain_id: &ChainId) -> Result<Vec<PoolEntry>> {
        let mut entries = Vec::new();
        for key in self.kv.scan_prefix(&kind_prefix(chain_id, RecordKind::TxPoolEntry))? {
            if let Some(entry) = self.get_record(&key)? {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    // ---- followed chains ---------------------------------------------------------

    pub fn save_followed_chain(&self, config: &ChainConfig) -> Result<()> {
        self.kv
            .put(&followed_chain_key(&config.chain_id()), &codec::encode(config))?;
        Ok(())
    }

    pub fn remove_followed_chain(&self, chain_id: &ChainId) -> Result<()> {
        self.kv.delete(&followed_chain_key(chain_id))?;
        Ok(())
    }

    pub fn followed_chains(&self) -> Result<Vec<ChainConfig>> {
        let mut configs = Vec::new();
        for key in self.kv.scan_prefix(&followed_chains_prefix())? {
            if let Some(config) = self.get_record(&key)? {
                configs.push(config);
            }
        }
        Ok(configs)
    }

    // ---- maintenance ---------------------------------------------------------------

    /// Delete every record of a chain
    pub fn clear_chain(&self, chain_id: &ChainId) -> Result<usize> {
        let keys = self.kv.scan_prefix(&chain_prefix(chain_id))?;
        let removed = keys.len();
        let mut batch = WriteBatch::new();
        for key in keys {
            batch.delete(key);
        }
        self.commit(batch)?;
        debug!(chain = %chain_id, removed, "cleared chain records");
        Ok(removed)
    }

    /// Height below which `prune_below` has already run
    pub fn pruned_height(&self, chain_id: &ChainId) -> Result<u64> {
        let Some(bytes) = self.kv.get(&pruned_height_key(chain_id))? else {
            return Ok(0);
        };
        let raw: [u8; 8] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| StoreError::Io("corrupt pruned height".into()))?;
        Ok(u64::from_be_bytes(raw))
    }

    fn hashes_at_height(&self, chain_id: &ChainId, height: u64) -> Result<Vec<Hash>> {
        let prefix = blocks_at_height_prefix(chain_id, height);
        Ok(self
            .kv
            .scan_prefix(&prefix)?
            .iter()
            .filter_map(|key| Hash::from_slice(&key[prefix.len()..]))
            .collect())
    }

    fn stage_block_removal(&self, batch: &mut WriteBatch, chain_id: &ChainId, hash: &Hash, height: u64) {
        batch.delete(block_key(chain_id, hash));
        batch.delete(block_at_height_key(chain_id, height, hash));
        batch.delete(block_info_key(chain_id, hash));
        batch.delete(state_delta_key(chain_id, hash));
    }

    /// Compact history below `immutable_height`: side-branch blocks there are
    /// deleted outright together with every stored descendant, canonical
    /// blocks keep their data but lose their state deltas since they can no
    /// longer be rolled back. Only heights between the previous cutoff and
    /// this one are visited. Returns the number of side blocks deleted.
    pub fn prune_below(&self, chain_id: &ChainId, immutable_height: u64) -> Result<usize> {
        let mut height = self.pruned_height(chain_id)?;
        if immutable_height <= height {
            return Ok(0);
        }
        let mut batch = WriteBatch::new();
        let mut pruned = 0usize;
        // side blocks deleted at the previous height; their children go next
        let mut doomed: HashSet<Hash> = HashSet::new();
        loop {
            let below = height < immutable_height;
            if !below && doomed.is_empty() {
                break;
            }
            let mut next = HashSet::new();
            for hash in self.hashes_at_height(chain_id, height)? {
                let Some(info) = self.get_block_info(chain_id, &hash)? else {
                    continue;
                };
                if info.is_main_chain {
                    if below {
                        batch.delete(state_delta_key(chain_id, &hash));
                    }
                    continue;
                }
                if !below {
                    let Some(block) = self.get_block(chain_id, &hash)? else {
                        continue;
                    };
                    if !doomed.contains(block.previous_hash()) {
                        continue;
                    }
                }
                self.stage_block_removal(&mut batch, chain_id, &hash, height);
                next.insert(hash);
                pruned += 1;
            }
            doomed = next;
            height += 1;
        }
        batch.put(pruned_height_key(chain_id), immutable_height.to_be_bytes().to_vec());
        self.commit(batch)?;
        debug!(chain = %chain_id, immutable_height, pruned, "pruned history");
        Ok(pruned)
    }
}
