use serde::{Deserialize, Serialize};

use crate::crypto::Hash;

/// Balance, nonce and mining power of one public key on one chain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountState {
    pub balance: u64,
    /// Nonce of the last transaction applied from this account
    pub nonce: u64,
    /// Stake weight used in the mining eligibility check
    pub power: u64,
}

impl AccountState {
    pub fn new(balance: u64, nonce: u64, power: u64) -> Self {
        Self {
            balance,
            nonce,
            power,
        }
    }
}

/// Fork membership of one stored block hash
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInfo {
    pub hash: Hash,
    pub is_main_chain: bool,
}

/// One account touched by a block: value before and after applying it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountChange {
    pub account: crate::crypto::PublicKey,
    pub before: AccountState,
    pub after: AccountState,
}

/// Everything a block changed in account state; replayed forward to connect
/// the block and backward to disconnect it
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateDelta {
    pub changes: Vec<AccountChange>,
}
