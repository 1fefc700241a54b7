//! Block rejection reasons and the account state transition
//!
//! The transition is a pure function of the parent state: it takes an
//! [`AccountView`] and returns the [`StateDelta`] the block would apply,
//! together with the balances the block must embed.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::crypto::{Hash, PublicKey};
use crate::types::{AccountChange, AccountState, Block, ChainId, StateDelta, Transaction, TxPayload};

/// Reasons to reject a block or transaction
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("encoded size {size} exceeds {max} bytes")]
    BlockTooLarge { size: usize, max: usize },
    #[error("belongs to chain {found}, expected {expected}")]
    WrongChain { expected: ChainId, found: ChainId },
    #[error("timestamp {timestamp} is too far ahead of local time {now}")]
    TimestampDrift { timestamp: u64, now: u64 },
    #[error("timestamp {timestamp} is not after parent timestamp {parent}")]
    TimestampNotAfterParent { timestamp: u64, parent: u64 },
    #[error("invalid block signature")]
    BadBlockSignature,
    #[error("height {found}, expected {expected}")]
    HeightMismatch { expected: u64, found: u64 },
    #[error("base target {found}, expected {expected}")]
    BadBaseTarget { expected: u64, found: u64 },
    #[error("generation signature does not derive from parent")]
    BadGenerationSignature,
    #[error("cumulative difficulty {found}, expected {expected}")]
    BadCumulativeDifficulty { expected: u128, found: u128 },
    #[error("immutable point {found}, expected {expected}")]
    BadImmutablePoint { expected: Hash, found: Hash },
    #[error("miner {0} has no mining power")]
    NoMiningPower(PublicKey),
    #[error("miner is not eligible {elapsed}s after parent")]
    NotEligible { elapsed: u64 },
    #[error("invalid transaction signature")]
    BadTransactionSignature,
    #[error("nonce {found} already used, last applied is {last}")]
    StaleNonce { last: u64, found: u64 },
    #[error("nonce {found} skips ahead, expected {expected}")]
    NonceGap { expected: u64, found: u64 },
    #[error("balance {available} cannot cover {required}")]
    InsufficientBalance { required: u64, available: u64 },
    #[error("genesis payload outside the genesis block")]
    UnexpectedGenesis,
    #[error("embedded {field} is {found}, state says {expected}")]
    BalanceMismatch {
        field: &'static str,
        expected: u64,
        found: u64,
    },
    #[error("branch does not join the canonical chain within the mutable range")]
    DetachedBranch,
    #[error("transaction already known")]
    DuplicateTransaction,
}

/// Read access to the account state a block is applied on top of
pub trait AccountView {
    fn account_state(&self, account: &PublicKey) -> crate::error::Result<AccountState>;
}

impl AccountView for BTreeMap<PublicKey, AccountState> {
    fn account_state(&self, account: &PublicKey) -> crate::error::Result<AccountState> {
        Ok(self.get(account).copied().unwrap_or_default())
    }
}

/// Result of applying a block's payload on its parent state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub delta: StateDelta,
    pub miner_balance: u64,
    pub sender_balance: u64,
    pub receiver_balance: u64,
    pub sender_nonce: u64,
}

struct Touched<'a, V: AccountView> {
    view: &'a V,
    accounts: BTreeMap<PublicKey, (AccountState, AccountState)>,
}

impl<'a, V: AccountView> Touched<'a, V> {
    fn get(&mut self, account: &PublicKey) -> crate::error::Result<&mut AccountState> {
        match self.accounts.entry(*account) {
            Entry::Occupied(entry) => Ok(&mut entry.into_mut().1),
            Entry::Vacant(entry) => {
                let state = self.view.account_state(account)?;
                Ok(&mut entry.insert((state, state)).1)
            }
        }
    }

    fn into_delta(self) -> StateDelta {
        let changes = self
            .accounts
            .into_iter()
            .filter(|(_, (before, after))| before != after)
            .map(|(account, (before, after))| AccountChange { account, before, after })
            .collect();
        StateDelta { changes }
    }
}

/// Apply the optional transaction of a non-genesis block mined by `miner`.
///
/// Wiring moves `amount` from sender to receiver; every transaction costs
/// the sender `fee`, which goes to the miner, bumps the sender nonce and
/// adds one unit of mining power to the sender.
pub fn apply_transaction<V: AccountView>(
    view: &V,
    chain_id: &ChainId,
    miner: &PublicKey,
    transaction: Option<&Transaction>,
) -> crate::error::Result<Transition> {
    let mut touched = Touched {
        view,
        accounts: BTreeMap::new(),
    };
    touched.get(miner)?;

    let Some(tx) = transaction else {
        let miner_balance = touched.get(miner)?.balance;
        return Ok(Transition {
            delta: touched.into_delta(),
            miner_balance,
            sender_balance: 0,
            receiver_balance: 0,
            sender_nonce: 0,
        });
    };

    check_transaction(tx, chain_id)?;

    let sender = touched.get(&tx.sender)?;
    check_nonce(sender.nonce, tx.nonce)?;
    let required = tx
        .fee
        .checked_add(tx.amount())
        .ok_or(ValidationError::InsufficientBalance {
            required: u64::MAX,
            available: sender.balance,
        })?;
    if sender.balance < required {
        return Err(ValidationError::InsufficientBalance {
            required,
            available: sender.balance,
        }
        .into());
    }
    sender.balance -= required;
    sender.nonce = tx.nonce;
    sender.power = sender.power.saturating_add(1);

    if let Some(receiver) = tx.receiver() {
        let receiver = touched.get(receiver)?;
        receiver.balance = receiver.balance.saturating_add(tx.amount());
    }
    let miner_state = touched.get(miner)?;
    miner_state.balance = miner_state.balance.saturating_add(tx.fee);

    let miner_balance = touched.get(miner)?.balance;
    let sender_state = *touched.get(&tx.sender)?;
    let receiver_balance = match tx.receiver() {
        Some(receiver) => touched.get(receiver)?.balance,
        None => 0,
    };

    Ok(Transition {
        delta: touched.into_delta(),
        miner_balance,
        sender_balance: sender_state.balance,
        receiver_balance,
        sender_nonce: sender_state.nonce,
    })
}

/// Stateless checks shared by block import and the transaction pool
pub fn check_transaction(tx: &Transaction, chain_id: &ChainId) -> Result<(), ValidationError> {
    if &tx.chain_id != chain_id {
        return Err(ValidationError::WrongChain {
            expected: chain_id.clone(),
            found: tx.chain_id.clone(),
        });
    }
    if matches!(tx.payload, TxPayload::Genesis { .. }) {
        return Err(ValidationError::UnexpectedGenesis);
    }
    if !tx.verify_signature() {
        return Err(ValidationError::BadTransactionSignature);
    }
    Ok(())
}

/// A transaction must carry exactly the sender's next nonce
pub fn check_nonce(last: u64, found: u64) -> Result<(), ValidationError> {
    let expected = last.saturating_add(1);
    if found == expected {
        Ok(())
    } else if found <= last {
        Err(ValidationError::StaleNonce { last, found })
    } else {
        Err(ValidationError::NonceGap { expected, found })
    }
}

/// Compare the balances a block embeds against the computed transition
pub fn check_embedded_state(block: &Block, transition: &Transition) -> Result<(), ValidationError> {
    let content = block.content();
    let fields = [
        ("miner balance", transition.miner_balance, content.miner_balance),
        ("sender balance", transition.sender_balance, content.sender_balance),
        ("receiver balance", transition.receiver_balance, content.receiver_balance),
        ("sender nonce", transition.sender_nonce, content.sender_nonce),
    ];
    for (field, expected, found) in fields {
        if expected != found {
            return Err(ValidationError::BalanceMismatch { field, expected, found });
        }
    }
    Ok(())
}
