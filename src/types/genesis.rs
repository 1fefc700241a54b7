//! Genesis descriptor of a community chain
//!
//! Everything a node needs to rebuild block 0 byte-for-byte. The genesis
//! block is never mined or signed: it is derived from this descriptor, so
//! every follower computes the same genesis hash.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::ConfigError;
use crate::consensus::initial_base_target;
use crate::constants::{CHAIN_CONFIG_VERSION, MUTABLE_RANGE_SECONDS, WARNING_RANGE_FACTOR};
use crate::crypto::{hash_bytes, Hash, PublicKey, SchnorrSignature};

use super::{AccountState, Block, BlockContent, ChainId, GenesisAccount, Transaction, TxPayload, BLOCK_VERSION};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    pub version: u32,
    pub community_name: String,
    /// Target seconds between blocks
    pub block_time_interval: u64,
    pub genesis_miner: PublicKey,
    pub genesis_timestamp: u64,
    pub genesis_generation_signature: Hash,
    pub initial_base_target: u64,
    pub genesis_accounts: Vec<GenesisAccount>,
}

impl ChainConfig {
    pub fn new(
        community_name: &str,
        block_time_interval: u64,
        genesis_miner: PublicKey,
        genesis_timestamp: u64,
        genesis_accounts: Vec<GenesisAccount>,
    ) -> Result<Self, ConfigError> {
        if community_name.is_empty() || community_name.contains(super::CHAIN_ID_SEPARATOR) {
            return Err(ConfigError::InvalidChainConfig(format!(
                "community name {community_name:?} must be non-empty and free of '#'"
            )));
        }
        if block_time_interval == 0 {
            return Err(ConfigError::InvalidChainConfig(
                "block time interval must be positive".to_string(),
            ));
        }
        let total_power: u64 = genesis_accounts
            .iter()
            .fold(0u64, |acc, a| acc.saturating_add(a.power));

        Ok(Self {
            version: CHAIN_CONFIG_VERSION,
            community_name: community_name.to_string(),
            block_time_interval,
            genesis_miner,
            genesis_timestamp,
            genesis_generation_signature: hash_bytes(&genesis_miner.0),
            initial_base_target: initial_base_target(block_time_interval, total_power),
            genesis_accounts,
        })
    }

    pub fn chain_id(&self) -> ChainId {
        ChainId::derive(
            &self.community_name,
            self.block_time_interval,
            &self.genesis_miner,
            self.genesis_timestamp,
        )
    }

    /// Depth past which a reorg is treated as implausible
    pub fn mutable_range(&self) -> u64 {
        (MUTABLE_RANGE_SECONDS / self.block_time_interval).max(1)
    }

    /// Pool retention window
    pub fn warning_range(&self) -> u64 {
        self.mutable_range() * WARNING_RANGE_FACTOR
    }

    /// Account states after the genesis distribution; duplicate entries add up
    pub fn genesis_state(&self) -> BTreeMap<PublicKey, AccountState> {
        let mut state: BTreeMap<PublicKey, AccountState> = BTreeMap::new();
        for entry in &self.genesis_accounts {
            let account = state.entry(entry.account).or_default();
            account.balance = account.balance.saturating_add(entry.balance);
            account.power = account.power.saturating_add(entry.power);
        }
        state
    }

    pub fn genesis_block(&self) -> Block {
        let chain_id = self.chain_id();
        let transaction = Transaction::new(
            chain_id.clone(),
            self.genesis_timestamp,
            0,
            self.genesis_miner,
            0,
            TxPayload::Genesis {
                accounts: self.genesis_accounts.clone(),
            },
        );
        let miner_balance = self
            .genesis_state()
            .get(&self.genesis_miner)
            .map(|a| a.balance)
            .unwrap_or_default();

        let content = BlockContent {
            version: BLOCK_VERSION,
            chain_id,
            timestamp: self.genesis_timestamp,
            height: 0,
            previous_hash: Hash::zero(),
            immutable_hash: Hash::zero(),
            base_target: self.initial_base_target,
            cumulative_difficulty: 0,
            generation_signature: self.genesis_generation_signature,
            transaction: Some(transaction),
            miner_balance,
            sender_balance: miner_balance,
            receiver_balance: 0,
            sender_nonce: 0,
            miner: self.genesis_miner,
        };
        Block::from_parts(content, SchnorrSignature::empty())
    }
}
