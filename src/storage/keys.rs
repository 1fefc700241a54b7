//! Binary key layout
//!
//! Chain-scoped keys are `[0x00][u16 BE id length][chain id][kind][suffix]`.
//! The length prefix keeps one chain's prefix from matching another chain
//! whose id merely starts with the same bytes. Node-global keys live under
//! `0x01`.

use crate::crypto::{Hash, PublicKey};
use crate::types::ChainId;

const CHAIN_NAMESPACE: u8 = 0x00;
const GLOBAL_NAMESPACE: u8 = 0x01;

const FOLLOWED_CHAINS: &[u8] = b"followed-chains/";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordKind {
    BlockByHash = 1,
    BlockByHeight = 2,
    BlockInfo = 3,
    AccountState = 4,
    TxPoolEntry = 5,
    StateDelta = 6,
    ChainMeta = 7,
    /// Every stored block, canonical or not, keyed by height then hash
    BlockAtHeight = 8,
}

pub fn chain_prefix(chain_id: &ChainId) -> Vec<u8> {
    let id = chain_id.as_bytes();
    let mut key = Vec::with_capacity(3 + id.len());
    key.push(CHAIN_NAMESPACE);
    key.extend_from_slice(&(id.len() as u16).to_be_bytes());
    key.extend_from_slice(id);
    key
}

pub fn kind_prefix(chain_id: &ChainId, kind: RecordKind) -> Vec<u8> {
    let mut key = chain_prefix(chain_id);
    key.push(kind as u8);
    key
}

pub fn record_key(chain_id: &ChainId, kind: RecordKind, suffix: &[u8]) -> Vec<u8> {
    let mut key = kind_prefix(chain_id, kind);
    key.extend_from_slice(suffix);
    key
}

pub fn block_key(chain_id: &ChainId, hash: &Hash) -> Vec<u8> {
    record_key(chain_id, RecordKind::BlockByHash, &hash.0)
}

/// Heights are big-endian so byte order is numeric order
pub fn height_key(chain_id: &ChainId, height: u64) -> Vec<u8> {
    record_key(chain_id, RecordKind::BlockByHeight, &height.to_be_bytes())
}

pub fn blocks_at_height_prefix(chain_id: &ChainId, height: u64) -> Vec<u8> {
    record_key(chain_id, RecordKind::BlockAtHeight, &height.to_be_bytes())
}

pub fn block_at_height_key(chain_id: &ChainId, height: u64, hash: &Hash) -> Vec<u8> {
    let mut key = blocks_at_height_prefix(chain_id, height);
    key.extend_from_slice(&hash.0);
    key
}

pub fn block_info_key(chain_id: &ChainId, hash: &Hash) -> Vec<u8> {
    record_key(chain_id, RecordKind::BlockInfo, &hash.0)
}

pub fn account_key(chain_id: &ChainId, account: &PublicKey) -> Vec<u8> {
    record_key(chain_id, RecordKind::AccountState, &account.0)
}

pub fn pool_entry_key(chain_id: &ChainId, tx_hash: &Hash) -> Vec<u8> {
    record_key(chain_id, RecordKind::TxPoolEntry, &tx_hash.0)
}

pub fn state_delta_key(chain_id: &ChainId, hash: &Hash) -> Vec<u8> {
    record_key(chain_id, RecordKind::StateDelta, &hash.0)
}

pub fn head_key(chain_id: &ChainId) -> Vec<u8> {
    record_key(chain_id, RecordKind::ChainMeta, b"head")
}

/// Height below which history has already been pruned
pub fn pruned_height_key(chain_id: &ChainId) -> Vec<u8> {
    record_key(chain_id, RecordKind::ChainMeta, b"pruned")
}

pub fn followed_chains_prefix() -> Vec<u8> {
    let mut key = vec![GLOBAL_NAMESPACE];
    key.extend_from_slice(FOLLOWED_CHAINS);
    key
}

pub fn followed_chain_key(chain_id: &ChainId) -> Vec<u8> {
    let mut key = followed_chains_prefix();
    key.extend_from_slice(chain_id.as_bytes());
    key
}
