//! Property-based and adversarial tests for the TAU chain core
//!
//! These tests verify invariants hold under random inputs and arrival orders.

use proptest::prelude::*;
use std::sync::Arc;
use tau_core::codec::CodecError;
use tau_core::consensus::{
    block_work, initial_base_target, is_eligible, mining_delay, next_base_target, ConsensusEngine, ImportOutcome,
};
use tau_core::constants::MAX_BASE_TARGET;
use tau_core::crypto::{hash_bytes, KeyHolder, PrivateKey, PublicKey};
use tau_core::pool::TransactionPool;
use tau_core::storage::{BlockStore, MemoryStore};
use tau_core::types::{Block, ChainConfig, ChainId, GenesisAccount, Transaction, TxPayload};

fn chain() -> ChainId {
    ChainId::derive("props", 300, &PublicKey([3u8; 32]), 1_700_000_000)
}

fn public_key() -> impl Strategy<Value = PublicKey> {
    any::<[u8; 32]>().prop_map(PublicKey)
}

fn payload() -> impl Strategy<Value = TxPayload> {
    prop_oneof![
        (public_key(), any::<u64>(), ".{0,16}").prop_map(|(receiver, amount, memo)| TxPayload::Wiring {
            receiver,
            amount,
            memo
        }),
        prop::collection::vec(any::<u8>(), 0..64).prop_map(|content| TxPayload::Note { content }),
        (prop::collection::vec(public_key(), 0..4), ".{0,16}").prop_map(|(peers, description)| {
            TxPayload::CommunityAnnouncement {
                chain_id: chain(),
                peers,
                description,
            }
        }),
        (".{0,12}", prop::collection::vec(any::<u8>(), 0..32))
            .prop_map(|(nickname, profile)| TxPayload::Identity { nickname, profile }),
        prop::collection::vec("[a-z0-9.]{1,12}:[0-9]{1,5}", 0..4).prop_map(|nodes| TxPayload::BootstrapNodes { nodes }),
        prop::collection::vec((public_key(), any::<u64>(), any::<u64>()), 0..4).prop_map(|accounts| {
            TxPayload::Genesis {
                accounts: accounts
                    .into_iter()
                    .map(|(account, balance, power)| GenesisAccount { account, balance, power })
                    .collect(),
            }
        }),
    ]
}

// ============================================================================
// CODEC
// ============================================================================

proptest! {
    /// decode(encode(tx)) == tx for every payload variant
    #[test]
    fn prop_transaction_roundtrip(
        payload in payload(),
        timestamp in any::<u64>(),
        fee in any::<u64>(),
        nonce in any::<u64>(),
    ) {
        let key = PrivateKey::from_bytes(&[9u8; 32]).unwrap();
        let tx = Transaction::new(chain(), timestamp, fee, key.public_key(), nonce, payload).sign(&key);

        let decoded = Transaction::decode(&tx.encode()).unwrap();
        prop_assert_eq!(&decoded, &tx);
        prop_assert!(decoded.verify_signature());
    }

    /// Any strict prefix of a block encoding is rejected with a typed error
    #[test]
    fn prop_truncated_block_is_rejected(cut in 0usize..200) {
        let block = genesis_config().genesis_block();
        let bytes = block.encoded();
        let cut = cut.min(bytes.len() - 1);

        let err = Block::decode(&bytes[..cut]).unwrap_err();
        prop_assert!(matches!(err, CodecError::Truncated | CodecError::Malformed(_)));
    }
}

#[test]
fn test_block_roundtrip_and_trailing_bytes() {
    let block = genesis_config().genesis_block();
    let decoded = Block::decode(block.encoded()).unwrap();
    assert_eq!(decoded, block);
    assert_eq!(decoded.hash(), block.hash());

    let mut padded = block.encoded().to_vec();
    padded.push(0);
    assert_eq!(Block::decode(&padded).unwrap_err(), CodecError::TrailingBytes);
}

// ============================================================================
// DIFFICULTY
// ============================================================================

proptest! {
    /// INVARIANT: the base target always stays within [1, MAX_BASE_TARGET]
    #[test]
    fn prop_base_target_is_clipped(
        previous in 1u64..=MAX_BASE_TARGET,
        average in 0u64..100_000,
        interval in 1u64..10_000,
    ) {
        let next = next_base_target(previous, average, interval);
        prop_assert!((1..=MAX_BASE_TARGET).contains(&next));
    }

    /// Faster blocks never make the next block easier, slower never harder
    #[test]
    fn prop_adjustment_direction(previous in 1_000u64..1 << 40, average in 0u64..600) {
        let next = next_base_target(previous, average, 300);
        if average < 300 {
            prop_assert!(next <= previous);
        } else {
            prop_assert!(next >= previous);
        }
    }

    /// The computed delay is exactly the first eligible second
    #[test]
    fn prop_mining_delay_is_tight(hit in any::<u64>(), power in 1u64..1_000) {
        let base_target = initial_base_target(300, 1_000);
        let delay = mining_delay(hit, base_target, power).unwrap();
        prop_assert!(is_eligible(hit, base_target, power, delay));
        prop_assert!(!is_eligible(hit, base_target, power, delay - 1));
    }
}

#[test]
fn test_harder_target_means_more_work() {
    assert!(block_work(1) > block_work(2));
    assert_eq!(block_work(1 << 32), 1 << 32);
}

// ============================================================================
// FORK CHOICE
// ============================================================================

fn seed(n: u8) -> [u8; 32] {
    [n + 40; 32]
}

fn genesis_config() -> ChainConfig {
    let accounts = (0..3)
        .map(|n| GenesisAccount {
            account: KeyHolder::from_seed(&seed(n)).unwrap().public_key().unwrap(),
            balance: 10_000,
            power: 5,
        })
        .collect();
    let creator = KeyHolder::from_seed(&seed(0)).unwrap().public_key().unwrap();
    ChainConfig::new("forks", 300, creator, 1_700_000_000, accounts).unwrap()
}

fn fresh_engine() -> ConsensusEngine {
    ConsensusEngine::open(BlockStore::new(Arc::new(MemoryStore::new())), genesis_config(), 300).unwrap()
}

/// A private branch of `length` blocks mined by miner `n` from genesis
fn branch(n: u8, length: usize) -> Vec<Block> {
    let keys = KeyHolder::from_seed(&seed(n)).unwrap();
    let miner = keys.public_key().unwrap();
    let mut engine = fresh_engine();
    (0..length)
        .map(|_| {
            let at = engine.next_mining_time(&miner).unwrap().unwrap();
            let block = engine.produce_block(&keys, None, at).unwrap();
            engine.import_block(&block, at).unwrap();
            block
        })
        .collect()
}

fn import_all(engine: &mut ConsensusEngine, blocks: &[Block]) {
    for block in blocks {
        engine.import_block(block, u64::MAX / 2).unwrap();
    }
}

#[test]
fn test_convergence_regardless_of_arrival_order() {
    let a = branch(1, 2);
    let b = branch(2, 3);

    let mut a_first = fresh_engine();
    import_all(&mut a_first, &a);
    import_all(&mut a_first, &b);

    let mut b_first = fresh_engine();
    import_all(&mut b_first, &b);
    import_all(&mut b_first, &a);

    assert_eq!(a_first.head().hash(), b_first.head().hash());
    let winner = if a.last().unwrap().cumulative_difficulty() > b.last().unwrap().cumulative_difficulty() {
        a.last().unwrap()
    } else {
        b.last().unwrap()
    };
    assert_eq!(a_first.head(), winner);
}

#[test]
fn test_equal_difficulty_tie_breaks_on_lower_hash() {
    let a = branch(1, 1).remove(0);
    let b = branch(2, 1).remove(0);
    assert_eq!(a.cumulative_difficulty(), b.cumulative_difficulty());
    let lower = if a.hash() < b.hash() { &a } else { &b };

    for order in [[&a, &b], [&b, &a]] {
        let mut engine = fresh_engine();
        for block in order {
            engine.import_block(block, u64::MAX / 2).unwrap();
        }
        assert_eq!(engine.head(), lower);
    }
}

#[test]
fn test_reorg_reports_rollbacks_highest_first() {
    let a = branch(1, 2);
    let b = branch(2, 4);
    let mut engine = fresh_engine();
    import_all(&mut engine, &a);

    let mut rolled_back = Vec::new();
    for block in &b {
        if let ImportOutcome::Reorganized { rolled_back: old, connected } = engine.import_block(block, u64::MAX / 2).unwrap() {
            assert!(connected.windows(2).all(|w| w[0].height() < w[1].height()));
            rolled_back.extend(old);
        }
    }
    let heights: Vec<u64> = rolled_back.iter().map(Block::height).collect();
    assert_eq!(heights, vec![2, 1]);
    assert_eq!(engine.head(), b.last().unwrap());
}

// ============================================================================
// TRANSACTION POOL
// ============================================================================

proptest! {
    /// Entries older than the warning range are gone after slim_down, entries
    /// inside the mutable range survive
    #[test]
    fn prop_slim_down_windows(origins in prop::collection::vec(0u64..400, 1..30), head in 0u64..500) {
        let key = PrivateKey::from_bytes(&[5u8; 32]).unwrap();
        let mut pool = TransactionPool::with_ranges(chain(), 10, 30);
        let mut hashes = Vec::new();
        for (i, origin) in origins.iter().enumerate() {
            let nonce = i as u64 + 1;
            let tx = Transaction::wiring(chain(), nonce, 1, key.public_key(), nonce, PublicKey([1u8; 32]), 1).sign(&key);
            hashes.push((pool.add(tx, 0, *origin).unwrap().tx.hash(), *origin));
        }

        pool.slim_down(head);
        for (hash, origin) in hashes {
            if origin + 30 < head {
                prop_assert!(!pool.contains(&hash));
            }
            if origin + 10 >= head {
                prop_assert!(pool.contains(&hash));
            }
        }
    }
}

#[test]
fn test_hash_is_content_address() {
    let block = genesis_config().genesis_block();
    assert_eq!(block.hash(), hash_bytes(block.encoded()));
}
