//! Block structure
//!
//! A block is `BlockContent` plus the miner's signature over the content's
//! canonical encoding. Encoded bytes, signed bytes and the block hash are
//! derived on first use and cached; none of them are stored redundantly.

use serde::{Deserialize, Serialize};

use crate::codec::{self, Cached, CodecError};
use crate::crypto::{hash_bytes, Hash, KeyHolder, PrivateKey, PublicKey, SchnorrSignature, SignatureError};

use super::{ChainId, Transaction};

pub const BLOCK_VERSION: u32 = 1;

/// Every signed field of a block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockContent {
    pub version: u32,
    pub chain_id: ChainId,
    /// Seconds since Unix epoch
    pub timestamp: u64,
    pub height: u64,
    pub previous_hash: Hash,
    /// Hash of the ancestor `mutable_range` blocks back; history below it is final
    pub immutable_hash: Hash,
    pub base_target: u64,
    /// Work of every block from genesis up to and including this one
    pub cumulative_difficulty: u128,
    pub generation_signature: Hash,
    pub transaction: Option<Transaction>,
    pub miner_balance: u64,
    pub sender_balance: u64,
    pub receiver_balance: u64,
    pub sender_nonce: u64,
    pub miner: PublicKey,
}

impl BlockContent {
    pub fn signing_bytes(&self) -> Vec<u8> {
        codec::encode(self)
    }

    pub fn sign(self, key: &PrivateKey) -> Block {
        let signature = key.sign(&hash_bytes(&self.signing_bytes()));
        Block::from_parts(self, signature)
    }

    pub fn sign_with(self, keys: &KeyHolder) -> Result<Block, SignatureError> {
        let signature = keys.sign(&hash_bytes(&self.signing_bytes()))?;
        Ok(Block::from_parts(self, signature))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    content: BlockContent,
    signature: SchnorrSignature,
    #[serde(skip)]
    encoded: Cached<Vec<u8>>,
    #[serde(skip)]
    signed: Cached<Vec<u8>>,
    #[serde(skip)]
    hash: Cached<Hash>,
}

impl Block {
    pub fn from_parts(content: BlockContent, signature: SchnorrSignature) -> Self {
        Self {
            content,
            signature,
            encoded: Cached::default(),
            signed: Cached::default(),
            hash: Cached::default(),
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let block: Block = codec::decode(bytes)?;
        block.encoded.get_or_init(|| bytes.to_vec());
        Ok(block)
    }

    /// Canonical encoding, signature appended after the content
    pub fn encoded(&self) -> &[u8] {
        self.encoded.get_or_init(|| codec::encode(self))
    }

    /// Bytes covered by the signature
    pub fn signed_bytes(&self) -> &[u8] {
        self.signed.get_or_init(|| self.content.signing_bytes())
    }

    pub fn hash(&self) -> Hash {
        *self.hash.get_or_init(|| hash_bytes(self.encoded()))
    }

    pub fn verify_signature(&self) -> bool {
        self.content
            .miner
            .verify(&hash_bytes(self.signed_bytes()), &self.signature)
    }

    pub fn content(&self) -> &BlockContent {
        &self.content
    }

    pub fn into_content(self) -> BlockContent {
        self.content
    }

    pub fn signature(&self) -> &SchnorrSignature {
        &self.signature
    }

    pub fn chain_id(&self) -> &ChainId {
        &self.content.chain_id
    }

    pub fn height(&self) -> u64 {
        self.content.height
    }

    pub fn timestamp(&self) -> u64 {
        self.content.timestamp
    }

    pub fn previous_hash(&self) -> &Hash {
        &self.content.previous_hash
    }

    pub fn immutable_hash(&self) -> &Hash {
        &self.content.immutable_hash
    }

    pub fn base_target(&self) -> u64 {
        self.content.base_target
    }

    pub fn cumulative_difficulty(&self) -> u128 {
        self.content.cumulative_difficulty
    }

    pub fn generation_signature(&self) -> &Hash {
        &self.content.generation_signature
    }

    pub fn transaction(&self) -> Option<&Transaction> {
        self.content.transaction.as_ref()
    }

    pub fn miner(&self) -> &PublicKey {
        &self.content.miner
    }

    pub fn is_genesis(&self) -> bool {
        self.content.height == 0 && self.content.previous_hash.is_zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TxPayload;

    fn content(miner: PublicKey) -> BlockContent {
        let chain_id = ChainId::derive("t", 300, &miner, 1);
        BlockContent {
            version: BLOCK_VERSION,
            chain_id: chain_id.clone(),
            timestamp: 1_000,
            height: 1,
            previous_hash: hash_bytes(b"parent"),
            immutable_hash: hash_bytes(b"genesis"),
            base_target: 12345,
            cumulative_difficulty: 99,
            generation_signature: hash_bytes(b"gen"),
            transaction: Some(Transaction::new(
                chain_id,
                999,
                1,
                miner,
                1,
                TxPayload::Note { content: b"hello".to_vec() },
            )),
            miner_balance: 1,
            sender_balance: 2,
            receiver_balance: 0,
            sender_nonce: 1,
            miner,
        }
    }

    #[test]
    fn test_signed_bytes_are_prefix_of_encoding() {
        let key = PrivateKey::generate();
        let block = content(key.public_key()).sign(&key);

        let encoded = block.encoded();
        assert!(encoded.starts_with(block.signed_bytes()));
        assert_eq!(encoded.len(), block.signed_bytes().len() + 8 + 64);
        assert!(block.verify_signature());
    }

    #[test]
    fn test_decode_roundtrip_preserves_hash() {
        let key = PrivateKey::generate();
        let block = content(key.public_key()).sign(&key);
        let decoded = Block::decode(block.encoded()).unwrap();

        assert_eq!(decoded, block);
        assert_eq!(decoded.hash(), block.hash());
    }

    #[test]
    fn test_tampered_content_fails_verification() {
        let key = PrivateKey::generate();
        let block = content(key.public_key()).sign(&key);

        let mut tampered = block.clone().into_content();
        tampered.base_target += 1;
        let forged = Block::from_parts(tampered, *block.signature());

        assert!(!forged.verify_signature());
        assert_ne!(forged.hash(), block.hash());
    }

    #[test]
    fn test_truncated_block_rejected() {
        let key = PrivateKey::generate();
        let block = content(key.public_key()).sign(&key);
        let bytes = block.encoded();
        assert_eq!(Block::decode(&bytes[..bytes.len() - 1]), Err(CodecError::Truncated));
    }
}
