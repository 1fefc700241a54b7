//! Community chain identifier
//!
//! `communityName#blockTimeInterval#fingerprint`, where the fingerprint is the
//! hex of the first 8 bytes of hash(genesis miner key ‖ genesis timestamp).

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::crypto::{hash_concat, PublicKey};

pub const CHAIN_ID_SEPARATOR: char = '#';

#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChainId(String);

impl ChainId {
    pub fn derive(
        community_name: &str,
        block_time_interval: u64,
        genesis_miner: &PublicKey,
        genesis_timestamp: u64,
    ) -> Self {
        let digest = hash_concat(&[&genesis_miner.0, &genesis_timestamp.to_le_bytes()]);
        let fingerprint = hex::encode(&digest.0[..8]);
        ChainId(format!(
            "{community_name}{CHAIN_ID_SEPARATOR}{block_time_interval}{CHAIN_ID_SEPARATOR}{fingerprint}"
        ))
    }

    /// Parse a chain id string, checking it has the three-part shape
    pub fn parse(raw: &str) -> Option<Self> {
        let mut parts = raw.split(CHAIN_ID_SEPARATOR);
        let name = parts.next()?;
        let interval = parts.next()?.parse::<u64>().ok()?;
        let fingerprint = parts.next()?;
        if name.is_empty() || interval == 0 || fingerprint.len() != 16 || parts.next().is_some() {
            return None;
        }
        Some(ChainId(raw.to_string()))
    }

    pub fn community_name(&self) -> &str {
        self.0.split(CHAIN_ID_SEPARATOR).next().unwrap_or_default()
    }

    pub fn block_time_interval(&self) -> Option<u64> {
        self.0.split(CHAIN_ID_SEPARATOR).nth(1)?.parse().ok()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Debug for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChainId({})", self.0)
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
