//! Per-chain consensus engine
//!
//! Owns the canonical head of one chain and decides, for every incoming
//! block, whether it is rejected, parked on a side branch, extends the head
//! or triggers a reorganization. All state changes of one import are
//! committed in a single write batch.

use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, info};

use crate::constants::{BASE_TARGET_WINDOW, MAX_BLOCK_SIZE};
use crate::crypto::{Hash, KeyHolder, PublicKey, SignatureError};
use crate::error::Result;
use crate::storage::{BlockStore, WriteBatch};
use crate::types::{
    AccountChange, AccountState, Block, BlockContent, ChainConfig, ChainId, StateDelta, Transaction, BLOCK_VERSION,
};

use super::difficulty::{
    generation_signature, hit, is_eligible, mining_delay, next_base_target, next_cumulative_difficulty,
};
use super::validation::{apply_transaction, check_embedded_state, AccountView, Transition, ValidationError};

/// Storage found in a state the engine never produces
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantError {
    #[error("ancestor {0} missing from the block store")]
    MissingAncestor(Hash),
    #[error("state delta of {0} missing")]
    MissingStateDelta(Hash),
    #[error("no path from {from} to {to}")]
    BrokenBranch { from: Hash, to: Hash },
    #[error("head {0} is recorded but the block is missing")]
    HeadMissing(Hash),
}

/// What importing one block did to the chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportOutcome {
    /// Already stored
    Duplicate,
    /// Parent unknown; the caller should fetch it and retry
    MissingParent(Hash),
    /// Valid but lighter than the head; stored off the main chain
    SideBranch,
    /// Became the new head on top of the old one
    Extended(Block),
    /// Heavier branch replaced part of the main chain
    Reorganized {
        /// Highest first
        rolled_back: Vec<Block>,
        /// Lowest first, the imported block last
        connected: Vec<Block>,
    },
}

impl ImportOutcome {
    pub fn head_changed(&self) -> bool {
        matches!(self, ImportOutcome::Extended(_) | ImportOutcome::Reorganized { .. })
    }
}

/// Canonical account state with per-account overrides on top, used to
/// evaluate blocks whose parent is not the current head
struct StateOverlay<'a> {
    store: &'a BlockStore,
    chain_id: &'a ChainId,
    overrides: HashMap<PublicKey, AccountState>,
}

impl AccountView for StateOverlay<'_> {
    fn account_state(&self, account: &PublicKey) -> Result<AccountState> {
        match self.overrides.get(account) {
            Some(state) => Ok(*state),
            None => self.store.account(self.chain_id, account),
        }
    }
}

pub struct ConsensusEngine {
    config: ChainConfig,
    chain_id: ChainId,
    store: BlockStore,
    head: Block,
    max_timestamp_drift: u64,
}

impl std::fmt::Debug for ConsensusEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsensusEngine")
            .field("chain_id", &self.chain_id)
            .field("height", &self.head.height())
            .finish_non_exhaustive()
    }
}

impl ConsensusEngine {
    /// Load the stored head, or write the genesis block of `config` when the
    /// chain has never been seen
    pub fn open(store: BlockStore, config: ChainConfig, max_timestamp_drift: u64) -> Result<Self> {
        let chain_id = config.chain_id();
        let head = match store.head(&chain_id)? {
            Some(hash) => store
                .get_block(&chain_id, &hash)?
                .ok_or(InvariantError::HeadMissing(hash))?,
            None => {
                let genesis = config.genesis_block();
                let delta = StateDelta {
                    changes: config
                        .genesis_state()
                        .into_iter()
                        .map(|(account, after)| AccountChange {
                            account,
                            before: AccountState::default(),
                            after,
                        })
                        .collect(),
                };
                let mut batch = WriteBatch::new();
                store.stage_block(&mut batch, &chain_id, &genesis, true);
                store.stage_state_delta(&mut batch, &chain_id, &genesis.hash(), &delta);
                for change in &delta.changes {
                    store.stage_account(&mut batch, &chain_id, &change.account, &change.after);
                }
                store.stage_head(&mut batch, &chain_id, &genesis.hash());
                store.commit(batch)?;
                info!(chain = %chain_id, genesis = %genesis.hash(), "initialized chain");
                genesis
            }
        };

        Ok(Self {
            config,
            chain_id,
            store,
            head,
            max_timestamp_drift,
        })
    }

    pub fn chain_id(&self) -> &ChainId {
        &self.chain_id
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    pub fn store(&self) -> &BlockStore {
        &self.store
    }

    pub fn head(&self) -> &Block {
        &self.head
    }

    pub fn mutable_range(&self) -> u64 {
        self.config.mutable_range()
    }

    /// Canonical account state at the head
    pub fn account(&self, account: &PublicKey) -> Result<AccountState> {
        self.store.account(&self.chain_id, account)
    }

    /// Deepest block that can no longer be reorganized away
    pub fn immutable_block(&self) -> Result<Block> {
        let height = self.head.height().saturating_sub(self.mutable_range());
        self.ancestor_at(&self.head, height)
    }

    /// Ancestor of `from` at `height`; once the walk reaches the main chain the
    /// height index answers directly
    fn ancestor_at(&self, from: &Block, height: u64) -> Result<Block> {
        let mut current = from.clone();
        loop {
            if current.height() == height {
                return Ok(current);
            }
            if current.height() < height {
                return Err(InvariantError::BrokenBranch {
                    from: from.hash(),
                    to: current.hash(),
                }
                .into());
            }
            if self.store.is_main_chain(&self.chain_id, &current.hash())? {
                return self
                    .store
                    .get_block_by_height(&self.chain_id, height)?
                    .ok_or_else(|| InvariantError::MissingAncestor(current.hash()).into());
            }
            // Still on a side branch whose root was pruned away
            current = self
                .store
                .get_block(&self.chain_id, current.previous_hash())?
                .ok_or(ValidationError::DetachedBranch)?;
        }
    }

    /// Base target a child of `parent` must carry
    pub fn required_base_target(&self, parent: &Block) -> Result<u64> {
        if parent.height() < BASE_TARGET_WINDOW {
            return Ok(parent.base_target());
        }
        let anchor = self.ancestor_at(parent, parent.height() - BASE_TARGET_WINDOW)?;
        let average = parent.timestamp().saturating_sub(anchor.timestamp()) / BASE_TARGET_WINDOW;
        Ok(next_base_target(
            parent.base_target(),
            average,
            self.config.block_time_interval,
        ))
    }

    /// Immutable point a child of `parent` must reference
    pub fn required_immutable_hash(&self, parent: &Block) -> Result<Hash> {
        let height = (parent.height() + 1).saturating_sub(self.mutable_range());
        Ok(self.ancestor_at(parent, height)?.hash())
    }

    /// Account state as of `parent`, which may sit on a side branch
    fn state_at<'a>(&'a self, parent: &Block) -> Result<StateOverlay<'a>> {
        let mut overlay = StateOverlay {
            store: &self.store,
            chain_id: &self.chain_id,
            overrides: HashMap::new(),
        };
        let parent_hash = parent.hash();
        if parent_hash == self.head.hash() {
            return Ok(overlay);
        }

        let fork = self
            .store
            .get_fork_point_block(&self.chain_id, parent, self.mutable_range())?;
        // undo data below the pruned height is gone
        if self.head.height() - fork.height() > self.mutable_range()
            || fork.height() + 1 < self.store.pruned_height(&self.chain_id)?
        {
            return Err(ValidationError::DetachedBranch.into());
        }
        let fork_hash = fork.hash();

        // undo the main chain down to the fork point, highest block first
        for block in self.store.branch(&self.chain_id, &fork_hash, &self.head.hash())?.iter().rev() {
            for change in self.store.state_delta(&self.chain_id, &block.hash())?.changes {
                overlay.overrides.insert(change.account, change.before);
            }
        }
        // then replay the side branch up to the parent
        for block in self.store.branch(&self.chain_id, &fork_hash, &parent_hash)? {
            for change in self.store.state_delta(&self.chain_id, &block.hash())?.changes {
                overlay.overrides.insert(change.account, change.after);
            }
        }
        Ok(overlay)
    }

    /// Full validation of `block` against its stored parent
    fn validate(&self, block: &Block, parent: &Block, now: u64) -> Result<Transition> {
        let content = block.content();

        let size = block.encoded().len();
        if size > MAX_BLOCK_SIZE {
            return Err(ValidationError::BlockTooLarge {
                size,
                max: MAX_BLOCK_SIZE,
            }
            .into());
        }
        if content.timestamp > now.saturating_add(self.max_timestamp_drift) {
            return Err(ValidationError::TimestampDrift {
                timestamp: content.timestamp,
                now,
            }
            .into());
        }
        if !block.verify_signature() {
            return Err(ValidationError::BadBlockSignature.into());
        }
        if content.height != parent.height() + 1 {
            return Err(ValidationError::HeightMismatch {
                expected: parent.height() + 1,
                found: content.height,
            }
            .into());
        }
        if content.timestamp <= parent.timestamp() {
            return Err(ValidationError::TimestampNotAfterParent {
                timestamp: content.timestamp,
                parent: parent.timestamp(),
            }
            .into());
        }

        let base_target = self.required_base_target(parent)?;
        if content.base_target != base_target {
            return Err(ValidationError::BadBaseTarget {
                expected: base_target,
                found: content.base_target,
            }
            .into());
        }
        let generation = generation_signature(parent.generation_signature(), &content.miner);
        if content.generation_signature != generation {
            return Err(ValidationError::BadGenerationSignature.into());
        }
        let cumulative = next_cumulative_difficulty(parent.cumulative_difficulty(), base_target);
        if content.cumulative_difficulty != cumulative {
            return Err(ValidationError::BadCumulativeDifficulty {
                expected: cumulative,
                found: content.cumulative_difficulty,
            }
            .into());
        }
        let immutable = self.required_immutable_hash(parent)?;
        if content.immutable_hash != immutable {
            return Err(ValidationError::BadImmutablePoint {
                expected: immutable,
                found: content.immutable_hash,
            }
            .into());
        }

        let state = self.state_at(parent)?;
        let power = state.account_state(&content.miner)?.power;
        if power == 0 {
            return Err(ValidationError::NoMiningPower(content.miner).into());
        }
        let elapsed = content.timestamp - parent.timestamp();
        if !is_eligible(hit(&generation), base_target, power, elapsed) {
            return Err(ValidationError::NotEligible { elapsed }.into());
        }

        let transition = apply_transaction(&state, &self.chain_id, &content.miner, content.transaction.as_ref())?;
        check_embedded_state(block, &transition)?;
        Ok(transition)
    }

    /// Validate and store `block`, moving the head when it wins fork choice.
    ///
    /// Fork choice: higher cumulative difficulty wins, ties go to the lower
    /// block hash. A rejected block leaves the store untouched.
    pub fn import_block(&mut self, block: &Block, now: u64) -> Result<ImportOutcome> {
        if block.chain_id() != &self.chain_id {
            return Err(ValidationError::WrongChain {
                expected: self.chain_id.clone(),
                found: block.chain_id().clone(),
            }
            .into());
        }
        let hash = block.hash();
        if self.store.contains_block(&self.chain_id, &hash)? {
            return Ok(ImportOutcome::Duplicate);
        }
        if block.is_genesis() {
            return Err(ValidationError::HeightMismatch {
                expected: 1,
                found: 0,
            }
            .into());
        }
        let Some(parent) = self.store.get_block(&self.chain_id, block.previous_hash())? else {
            return Ok(ImportOutcome::MissingParent(*block.previous_hash()));
        };

        let transition = self.validate(block, &parent, now)?;

        let head_hash = self.head.hash();
        let heavier = block.cumulative_difficulty() > self.head.cumulative_difficulty()
            || (block.cumulative_difficulty() == self.head.cumulative_difficulty() && hash < head_hash);

        let mut batch = WriteBatch::new();
        self.store
            .stage_state_delta(&mut batch, &self.chain_id, &hash, &transition.delta);

        if !heavier {
            self.store.stage_block(&mut batch, &self.chain_id, block, false);
            self.store.commit(batch)?;
            debug!(chain = %self.chain_id, block = %hash, height = block.height(), "stored side-branch block");
            return Ok(ImportOutcome::SideBranch);
        }

        if parent.hash() == head_hash {
            self.store.stage_block(&mut batch, &self.chain_id, block, true);
            for change in &transition.delta.changes {
                self.store
                    .stage_account(&mut batch, &self.chain_id, &change.account, &change.after);
            }
            self.store.stage_head(&mut batch, &self.chain_id, &hash);
            self.store.commit(batch)?;
            self.head = block.clone();
            debug!(chain = %self.chain_id, block = %hash, height = block.height(), "extended main chain");
            return Ok(ImportOutcome::Extended(block.clone()));
        }

        let fork = self
            .store
            .get_fork_point_block(&self.chain_id, &parent, self.mutable_range())?;
        let fork_hash = fork.hash();

        let mut rolled_back = self
            .store
            .stage_mark_range(&mut batch, &self.chain_id, &fork_hash, &head_hash, false)?;
        rolled_back.reverse();
        for old in &rolled_back {
            for change in self.store.state_delta(&self.chain_id, &old.hash())?.changes {
                self.store
                    .stage_account(&mut batch, &self.chain_id, &change.account, &change.before);
            }
        }

        let mut connected = self
            .store
            .stage_mark_range(&mut batch, &self.chain_id, &fork_hash, &parent.hash(), true)?;
        for new in &connected {
            for change in self.store.state_delta(&self.chain_id, &new.hash())?.changes {
                self.store
                    .stage_account(&mut batch, &self.chain_id, &change.account, &change.after);
            }
        }
        self.store.stage_block(&mut batch, &self.chain_id, block, true);
        for change in &transition.delta.changes {
            self.store
                .stage_account(&mut batch, &self.chain_id, &change.account, &change.after);
        }
        self.store.stage_head(&mut batch, &self.chain_id, &hash);
        self.store.commit(batch)?;

        connected.push(block.clone());
        self.head = block.clone();
        info!(
            chain = %self.chain_id,
            fork = %fork_hash,
            rolled_back = rolled_back.len(),
            connected = connected.len(),
            head = %hash,
            "reorganized main chain"
        );
        Ok(ImportOutcome::Reorganized {
            rolled_back,
            connected,
        })
    }

    /// Earliest timestamp at which `miner` may build on the current head, or
    /// `None` without mining power
    pub fn next_mining_time(&self, miner: &PublicKey) -> Result<Option<u64>> {
        let power = self.account(miner)?.power;
        let base_target = self.required_base_target(&self.head)?;
        let generation = generation_signature(self.head.generation_signature(), miner);
        Ok(mining_delay(hit(&generation), base_target, power).map(|delay| self.head.timestamp().saturating_add(delay)))
    }

    /// Build and sign a child of the head at `timestamp`, optionally carrying
    /// `transaction`. The result passes `import_block` on this engine.
    pub fn produce_block(&self, keys: &KeyHolder, transaction: Option<Transaction>, timestamp: u64) -> Result<Block> {
        let miner = keys.public_key().ok_or(SignatureError::NoKey)?;
        let parent = &self.head;
        let base_target = self.required_base_target(parent)?;
        let generation = generation_signature(parent.generation_signature(), &miner);

        let power = self.account(&miner)?.power;
        if power == 0 {
            return Err(ValidationError::NoMiningPower(miner).into());
        }
        let elapsed = timestamp.saturating_sub(parent.timestamp());
        if !is_eligible(hit(&generation), base_target, power, elapsed) {
            return Err(ValidationError::NotEligible { elapsed }.into());
        }

        let state = self.state_at(parent)?;
        let transition = apply_transaction(&state, &self.chain_id, &miner, transaction.as_ref())?;

        let content = BlockContent {
            version: BLOCK_VERSION,
            chain_id: self.chain_id.clone(),
            timestamp,
            height: parent.height() + 1,
            previous_hash: parent.hash(),
            immutable_hash: self.required_immutable_hash(parent)?,
            base_target,
            cumulative_difficulty: next_cumulative_difficulty(parent.cumulative_difficulty(), base_target),
            generation_signature: generation,
            transaction,
            miner_balance: transition.miner_balance,
            sender_balance: transition.sender_balance,
            receiver_balance: transition.receiver_balance,
            sender_nonce: transition.sender_nonce,
            miner,
        };
        let block = content.sign_with(keys)?;
        let size = block.encoded().len();
        if size > MAX_BLOCK_SIZE {
            return Err(ValidationError::BlockTooLarge {
                size,
                max: MAX_BLOCK_SIZE,
            }
            .into());
        }
        Ok(block)
    }

    /// Drop side branches and undo data below the immutable point
    pub fn prune(&self) -> Result<usize> {
        let immutable_height = self.head.height().saturating_sub(self.mutable_range());
        self.store.prune_below(&self.chain_id, immutable_height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::storage::MemoryStore;
    use crate::types::GenesisAccount;
    use std::sync::Arc;

    const SEED_A: [u8; 32] = [11u8; 32];
    const SEED_B: [u8; 32] = [22u8; 32];

    fn keys(seed: &[u8; 32]) -> KeyHolder {
        KeyHolder::from_seed(seed).unwrap()
    }

    fn config() -> ChainConfig {
        config_with_interval(300)
    }

    fn config_with_interval(interval: u64) -> ChainConfig {
        let a = keys(&SEED_A).public_key().unwrap();
        let b = keys(&SEED_B).public_key().unwrap();
        ChainConfig::new(
            "engine",
            interval,
            a,
            1_700_000_000,
            vec![
                GenesisAccount { account: a, balance: 1_000, power: 10 },
                GenesisAccount { account: b, balance: 1_000, power: 10 },
            ],
        )
        .unwrap()
    }

    fn engine() -> ConsensusEngine {
        let store = BlockStore::new(Arc::new(MemoryStore::new()));
        ConsensusEngine::open(store, config(), 300).unwrap()
    }

    /// Four blocks of mutable history
    fn short_range_engine() -> ConsensusEngine {
        let store = BlockStore::new(Arc::new(MemoryStore::new()));
        let engine = ConsensusEngine::open(store, config_with_interval(64_800), 300).unwrap();
        assert_eq!(engine.mutable_range(), 4);
        engine
    }

    fn mine(engine: &mut ConsensusEngine, keys: &KeyHolder, tx: Option<Transaction>) -> Block {
        let miner = keys.public_key().unwrap();
        let at = engine.next_mining_time(&miner).unwrap().unwrap();
        let block = engine.produce_block(keys, tx, at).unwrap();
        assert!(engine.import_block(&block, at).unwrap().head_changed());
        block
    }

    #[test]
    fn test_open_writes_genesis_once() {
        let store = BlockStore::new(Arc::new(MemoryStore::new()));
        let first = ConsensusEngine::open(store.clone(), config(), 300).unwrap();
        let a = keys(&SEED_A).public_key().unwrap();
        assert_eq!(first.account(&a).unwrap(), AccountState::new(1_000, 0, 10));

        let mut first = first;
        let block = mine(&mut first, &keys(&SEED_A), None);
        let reopened = ConsensusEngine::open(store, config(), 300).unwrap();
        assert_eq!(reopened.head(), &block);
    }

    #[test]
    fn test_extend_and_duplicate() {
        let mut engine = engine();
        let block = mine(&mut engine, &keys(&SEED_A), None);
        assert_eq!(engine.head().height(), 1);
        assert_eq!(engine.import_block(&block, u64::MAX / 2).unwrap(), ImportOutcome::Duplicate);
    }

    #[test]
    fn test_unknown_parent_is_reported() {
        let mut source = engine();
        mine(&mut source, &keys(&SEED_A), None);
        let second = mine(&mut source, &keys(&SEED_A), None);

        let mut target = engine();
        assert_eq!(
            target.import_block(&second, u64::MAX / 2).unwrap(),
            ImportOutcome::MissingParent(*second.previous_hash())
        );
    }

    #[test]
    fn test_transaction_block_updates_state() {
        let mut engine = engine();
        let a = keys(&SEED_A);
        let b = keys(&SEED_B).public_key().unwrap();
        let sender = a.public_key().unwrap();
        let tx = Transaction::wiring(engine.chain_id().clone(), 1, 5, sender, 1, b, 100)
            .sign_with(&a)
            .unwrap();

        mine(&mut engine, &keys(&SEED_B), Some(tx));

        assert_eq!(engine.account(&sender).unwrap(), AccountState::new(895, 1, 11));
        assert_eq!(engine.account(&b).unwrap().balance, 1_105);
    }

    #[test]
    fn test_tampered_block_is_rejected_without_side_effects() {
        let mut source = engine();
        let block = mine(&mut source, &keys(&SEED_A), None);

        let mut content = block.clone().into_content();
        content.miner_balance += 1;
        let forged = content.sign_with(&keys(&SEED_A)).unwrap();

        let mut target = engine();
        let err = target.import_block(&forged, u64::MAX / 2).unwrap_err();
        assert!(matches!(err, Error::Validation(ValidationError::BalanceMismatch { .. })));
        assert!(!target.store().contains_block(target.chain_id(), &forged.hash()).unwrap());

        let mut content = block.into_content();
        content.timestamp += 1;
        let resigned = Block::from_parts(content, forged.signature().clone());
        let err = target.import_block(&resigned, u64::MAX / 2).unwrap_err();
        assert!(matches!(err, Error::Validation(ValidationError::BadBlockSignature)));
    }

    #[test]
    fn test_future_block_is_rejected() {
        let mut engine = engine();
        let a = keys(&SEED_A);
        let at = engine.next_mining_time(&a.public_key().unwrap()).unwrap().unwrap();
        let block = engine.produce_block(&a, None, at).unwrap();
        let err = engine.import_block(&block, at - 301).unwrap_err();
        assert!(matches!(err, Error::Validation(ValidationError::TimestampDrift { .. })));
    }

    #[test]
    fn test_heavier_branch_reorganizes_and_restores_state() {
        let (a, b) = (keys(&SEED_A), keys(&SEED_B));
        let mut left = engine();
        let mut right = engine();

        let sender = a.public_key().unwrap();
        let tx = Transaction::wiring(left.chain_id().clone(), 1, 1, sender, 1, b.public_key().unwrap(), 10)
            .sign_with(&a)
            .unwrap();
        let left_blocks = vec![mine(&mut left, &a, Some(tx))];
        let right_blocks = vec![mine(&mut right, &b, None), mine(&mut right, &b, None)];

        for block in &right_blocks {
            left.import_block(block, u64::MAX / 2).unwrap();
        }
        for block in &left_blocks {
            right.import_block(block, u64::MAX / 2).unwrap();
        }

        assert_eq!(left.head().hash(), right.head().hash());
        assert_eq!(left.head(), &right_blocks[1]);
        assert_eq!(left.account(&sender).unwrap(), AccountState::new(1_000, 0, 10));
        assert!(!left
            .store()
            .is_main_chain(left.chain_id(), &left_blocks[0].hash())
            .unwrap());
        assert_eq!(
            left.store().get_block_by_height(left.chain_id(), 1).unwrap().unwrap(),
            right_blocks[0]
        );
    }

    #[test]
    fn test_side_branch_across_prune_cutoff_is_detached() {
        let (a, b) = (keys(&SEED_A), keys(&SEED_B));
        let mut left = short_range_engine();
        let mut right = short_range_engine();

        for _ in 0..3 {
            mine(&mut left, &a, None);
        }
        let side: Vec<Block> = (0..2).map(|_| mine(&mut right, &b, None)).collect();
        for block in &side {
            assert_eq!(left.import_block(block, u64::MAX / 2).unwrap(), ImportOutcome::SideBranch);
        }
        for _ in 0..3 {
            mine(&mut left, &a, None);
        }
        assert_eq!(left.head().height(), 6);

        // s1 lies below the cutoff at 2 and takes its child s2 with it
        assert_eq!(left.prune().unwrap(), 2);
        for block in &side {
            assert!(!left.store().contains_block(left.chain_id(), &block.hash()).unwrap());
        }

        let s3 = mine(&mut right, &b, None);
        assert_eq!(
            left.import_block(&s3, u64::MAX / 2).unwrap(),
            ImportOutcome::MissingParent(side[1].hash())
        );
        // refetching the branch root is rejected, not a broken store
        let err = left.import_block(&side[0], u64::MAX / 2).unwrap_err();
        assert!(matches!(err, Error::Validation(ValidationError::DetachedBranch)));

        let head = left.head().clone();
        let next = mine(&mut left, &a, None);
        assert_eq!(next.previous_hash(), &head.hash());
        assert_eq!(left.prune().unwrap(), 0);
    }

    #[test]
    fn test_fork_below_pruned_height_is_detached() {
        let (a, b) = (keys(&SEED_A), keys(&SEED_B));
        let mut left = short_range_engine();
        let mut right = short_range_engine();

        for _ in 0..4 {
            mine(&mut left, &a, None);
        }
        left.prune().unwrap();
        assert_eq!(left.store().pruned_height(left.chain_id()).unwrap(), 0);
        mine(&mut left, &a, None);
        mine(&mut left, &a, None);
        left.prune().unwrap();
        assert_eq!(left.store().pruned_height(left.chain_id()).unwrap(), 2);

        // forks off genesis, whose successors no longer carry undo data
        let fork = mine(&mut right, &b, None);
        let err = left.import_block(&fork, u64::MAX / 2).unwrap_err();
        assert!(matches!(err, Error::Validation(ValidationError::DetachedBranch)));
    }

    #[test]
    fn test_genesis_cannot_be_imported() {
        let mut engine = engine();
        let mut content = engine.head().clone().into_content();
        content.timestamp += 1;
        let other = content.sign_with(&keys(&SEED_A)).unwrap();
        assert!(engine.import_block(&other, u64::MAX / 2).is_err());
    }
}
