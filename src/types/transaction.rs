//! Transactions
//!
//! One signed transaction with a typed payload. The signature covers the
//! canonical encoding of every other field; the transaction hash covers the
//! full encoding, signature included.

use serde::{Deserialize, Serialize};

use crate::codec::{self, Cached};
use crate::crypto::{hash_bytes, Hash, KeyHolder, PrivateKey, PublicKey, SchnorrSignature, SignatureError};

use super::ChainId;

pub const TRANSACTION_VERSION: u32 = 1;

/// Initial allocation of one account in the genesis transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisAccount {
    pub account: PublicKey,
    pub balance: u64,
    pub power: u64,
}

/// Type-specific transaction payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxPayload {
    /// Initial balance and power distribution; only valid in block 0
    Genesis { accounts: Vec<GenesisAccount> },
    /// Value transfer
    Wiring {
        receiver: PublicKey,
        amount: u64,
        memo: String,
    },
    /// Forum post
    Note { content: Vec<u8> },
    /// Advertises a community to others
    CommunityAnnouncement {
        chain_id: ChainId,
        peers: Vec<PublicKey>,
        description: String,
    },
    Identity { nickname: String, profile: Vec<u8> },
    /// DHT bootstrap node addresses (`host:port`)
    BootstrapNodes { nodes: Vec<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxType {
    Genesis,
    Wiring,
    Note,
    CommunityAnnouncement,
    Identity,
    BootstrapNodes,
}

impl TxPayload {
    pub fn tx_type(&self) -> TxType {
        match self {
            TxPayload::Genesis { .. } => TxType::Genesis,
            TxPayload::Wiring { .. } => TxType::Wiring,
            TxPayload::Note { .. } => TxType::Note,
            TxPayload::CommunityAnnouncement { .. } => TxType::CommunityAnnouncement,
            TxPayload::Identity { .. } => TxType::Identity,
            TxPayload::BootstrapNodes { .. } => TxType::BootstrapNodes,
        }
    }
}

/// Fields are public for reading and for building test fixtures. Encoding
/// and hash are cached on first use, so a transaction must not be mutated
/// after it has been hashed; `sign` and `sign_with` start fresh caches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub version: u32,
    pub chain_id: ChainId,
    /// Seconds since Unix epoch
    pub timestamp: u64,
    pub fee: u64,
    pub sender: PublicKey,
    pub nonce: u64,
    pub payload: TxPayload,
    pub signature: SchnorrSignature,
    #[serde(skip)]
    encoded: Cached<Vec<u8>>,
    #[serde(skip)]
    hash: Cached<Hash>,
}

impl Transaction {
    /// Unsigned transaction; call `sign` or `sign_with` before broadcasting
    pub fn new(
        chain_id: ChainId,
        timestamp: u64,
        fee: u64,
        sender: PublicKey,
        nonce: u64,
        payload: TxPayload,
    ) -> Self {
        Self {
            version: TRANSACTION_VERSION,
            chain_id,
            timestamp,
            fee,
            sender,
            nonce,
            payload,
            signature: SchnorrSignature::empty(),
            encoded: Cached::default(),
            hash: Cached::default(),
        }
    }

    pub fn wiring(
        chain_id: ChainId,
        timestamp: u64,
        fee: u64,
        sender: PublicKey,
        nonce: u64,
        receiver: PublicKey,
        amount: u64,
    ) -> Self {
        let payload = TxPayload::Wiring {
            receiver,
            amount,
            memo: String::new(),
        };
        Self::new(chain_id, timestamp, fee, sender, nonce, payload)
    }

    pub fn tx_type(&self) -> TxType {
        self.payload.tx_type()
    }

    /// Receiver of a wiring transaction
    pub fn receiver(&self) -> Option<&PublicKey> {
        match &self.payload {
            TxPayload::Wiring { receiver, .. } => Some(receiver),
            _ => None,
        }
    }

    pub fn amount(&self) -> u64 {
        match &self.payload {
            TxPayload::Wiring { amount, .. } => *amount,
            _ => 0,
        }
    }

    /// Canonical encoding of everything but the signature
    pub fn signing_bytes(&self) -> Vec<u8> {
        codec::encode(&(
            self.version,
            &self.chain_id,
            self.timestamp,
            self.fee,
            &self.sender,
            self.nonce,
            &self.payload,
        ))
    }

    pub fn signing_hash(&self) -> Hash {
        hash_bytes(&self.signing_bytes())
    }

    pub fn encode(&self) -> Vec<u8> {
        self.encoded().to_vec()
    }

    /// Canonical encoding, computed once
    pub fn encoded(&self) -> &[u8] {
        self.encoded.get_or_init(|| codec::encode(self))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, codec::CodecError> {
        codec::decode(bytes)
    }

    pub fn hash(&self) -> Hash {
        *self.hash.get_or_init(|| hash_bytes(self.encoded()))
    }

    pub fn sign(mut self, key: &PrivateKey) -> Self {
        self.signature = key.sign(&self.signing_hash());
        self.reset_caches();
        self
    }

    pub fn sign_with(mut self, keys: &KeyHolder) -> Result<Self, SignatureError> {
        self.signature = keys.sign(&self.signing_hash())?;
        self.reset_caches();
        Ok(self)
    }

    fn reset_caches(&mut self) {
        self.encoded = Cached::default();
        self.hash = Cached::default();
    }

    pub fn verify_signature(&self) -> bool {
        self.sender.verify(&self.signing_hash(), &self.signature)
    }
}
