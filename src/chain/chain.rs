//! One followed community chain
//!
//! A `Chain` is a cheap handle onto shared per-chain state. Block ingestion
//! and the mining loop both go through [`Chain::import_block`], which holds
//! the chain's consensus lock for the whole validate-and-apply step; DHT
//! round trips happen outside the lock in spawned tasks.

use std::collections::{BTreeSet, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::consensus::{ConsensusEngine, ImportOutcome, ValidationError};
use crate::crypto::{Hash, PublicKey};
use crate::dht::{mutable_item_digest, with_backoff, DhtError};
use crate::error::{Error, Result};
use crate::pool::TransactionPool;
use crate::storage::WriteBatch;
use crate::types::{AccountState, Block, ChainConfig, ChainId, Transaction};

use super::{NodeContext, OrphanPool};

/// Canonical blocks between two pruning passes
const PRUNE_EVERY: u64 = 64;

/// Derived view of what a chain is doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainStatus {
    /// Not running
    Idle,
    /// Running, ancestor fetches in flight
    Syncing,
    /// Running and producing blocks with the local key
    Mining,
    /// Running, validating what peers publish
    Following,
}

/// Where a block came from; decides which event announces it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockSource {
    /// Mined by this node
    Local,
    /// Delivered by the DHT layer
    Remote,
    /// Fetched while catching up with a peer's head
    Sync,
}

struct ChainCore {
    engine: ConsensusEngine,
    pool: TransactionPool,
    orphans: OrphanPool,
}

struct ChainInner {
    chain_id: ChainId,
    ctx: NodeContext,
    core: tokio::sync::Mutex<ChainCore>,
    running: AtomicBool,
    mining: AtomicBool,
    /// Woken on head changes, new transactions and mining toggles
    wake_miner: Notify,
    fetching: Mutex<HashSet<Hash>>,
    peers: Mutex<BTreeSet<PublicKey>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct Chain {
    inner: Arc<ChainInner>,
}

impl std::fmt::Debug for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chain")
            .field("chain_id", &self.inner.chain_id)
            .field("status", &self.status())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

impl Chain {
    /// Load (or initialize) the chain's state from the shared store
    pub fn open(ctx: NodeContext, config: ChainConfig) -> Result<Self> {
        let chain_id = config.chain_id();
        let engine = ConsensusEngine::open(ctx.store.clone(), config.clone(), ctx.config.max_timestamp_drift)?;
        let mut pool = TransactionPool::new(&config);
        pool.restore(ctx.store.pool_entries(&chain_id)?);
        let orphans = OrphanPool::new(ctx.config.max_orphans);

        debug!(chain = %chain_id, height = engine.head().height(), pooled = pool.len(), "opened chain");
        Ok(Self {
            inner: Arc::new(ChainInner {
                chain_id,
                ctx,
                core: tokio::sync::Mutex::new(ChainCore { engine, pool, orphans }),
                running: AtomicBool::new(false),
                mining: AtomicBool::new(false),
                wake_miner: Notify::new(),
                fetching: Mutex::new(HashSet::new()),
                peers: Mutex::new(BTreeSet::new()),
                tasks: Mutex::new(Vec::new()),
            }),
        })
    }

    pub fn chain_id(&self) -> &ChainId {
        &self.inner.chain_id
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    pub fn is_mining(&self) -> bool {
        self.inner.mining.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> ChainStatus {
        if !self.is_running() {
            ChainStatus::Idle
        } else if !lock(&self.inner.fetching).is_empty() {
            ChainStatus::Syncing
        } else if self.is_mining() {
            ChainStatus::Mining
        } else {
            ChainStatus::Following
        }
    }

    // ---- lifecycle ---------------------------------------------------------

    /// Spawn the mining and peer-sync loops. Idempotent.
    pub fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return;
        }
        self.spawn(self.clone().mining_loop());
        self.spawn(self.clone().sync_loop());
        info!(chain = %self.inner.chain_id, "chain started");
    }

    /// Cancel every task of this chain (loops and in-flight fetches) and
    /// wait until they are gone
    pub async fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        let tasks = std::mem::take(&mut *lock(&self.inner.tasks));
        for task in &tasks {
            task.abort();
        }
        for task in tasks {
            let _ = task.await;
        }
        lock(&self.inner.fetching).clear();
        self.inner.core.lock().await.orphans.clear();
        info!(chain = %self.inner.chain_id, "chain stopped");
    }

    pub fn start_mining(&self) {
        if !self.inner.mining.swap(true, Ordering::SeqCst) {
            info!(chain = %self.inner.chain_id, "mining enabled");
        }
        self.inner.wake_miner.notify_one();
    }

    pub fn stop_mining(&self) {
        if self.inner.mining.swap(false, Ordering::SeqCst) {
            info!(chain = %self.inner.chain_id, "mining disabled");
        }
        self.inner.wake_miner.notify_one();
    }

    /// Re-evaluate mining eligibility, e.g. after the account key changed
    pub fn wake(&self) {
        self.inner.wake_miner.notify_one();
    }

    fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = lock(&self.inner.tasks);
        tasks.retain(|handle| !handle.is_finished());
        tasks.push(tokio::spawn(task));
    }

    /// Stop ingesting after the store failed or was found inconsistent.
    /// `start` resumes the chain.
    fn halt(&self, err: &Error) {
        self.inner.running.store(false, Ordering::SeqCst);
        error!(chain = %self.inner.chain_id, %err, "halting chain");
        self.inner
            .ctx
            .listener
            .on_tau_error(&format!("chain {} halted: {err}", self.inner.chain_id));
    }

    // ---- peers ---------------------------------------------------------------

    pub fn add_peers(&self, peers: impl IntoIterator<Item = PublicKey>) {
        let own = self.inner.ctx.keys.public_key();
        let mut known = lock(&self.inner.peers);
        for peer in peers {
            if Some(peer) != own {
                known.insert(peer);
            }
        }
    }

    pub fn peers(&self) -> Vec<PublicKey> {
        lock(&self.inner.peers).iter().copied().collect()
    }

    // ---- queries ---------------------------------------------------------------

    pub async fn head(&self) -> Block {
        self.inner.core.lock().await.engine.head().clone()
    }

    pub async fn config(&self) -> ChainConfig {
        self.inner.core.lock().await.engine.config().clone()
    }

    pub async fn account_state(&self, account: &PublicKey) -> Result<AccountState> {
        self.inner.core.lock().await.engine.account(account)
    }

    pub fn get_block(&self, hash: &Hash) -> Result<Option<Block>> {
        self.inner.ctx.store.get_block(&self.inner.chain_id, hash)
    }

    pub fn get_block_by_height(&self, height: u64) -> Result<Option<Block>> {
        self.inner.ctx.store.get_block_by_height(&self.inner.chain_id, height)
    }

    pub async fn pending_transactions(&self) -> Vec<Transaction> {
        self.inner
            .core
            .lock()
            .await
            .pool
            .pending()
            .into_iter()
            .cloned()
            .collect()
    }

    // ---- transactions -----------------------------------------------------------

    /// Validate a locally submitted transaction against the head state and
    /// pool it for mining
    pub async fn submit_transaction(&self, tx: Transaction) -> Result<Hash> {
        let mut core = self.inner.core.lock().await;
        let state = core.engine.account(&tx.sender)?;
        let required = tx.fee.saturating_add(tx.amount());
        if state.balance < required {
            return Err(ValidationError::InsufficientBalance {
                required,
                available: state.balance,
            }
            .into());
        }
        let height = core.engine.head().height();
        let entry = core.pool.add(tx, state.nonce, height)?;
        self.inner.ctx.store.save_pool_entry(&self.inner.chain_id, &entry)?;
        drop(core);

        self.inner.wake_miner.notify_one();
        Ok(entry.tx.hash())
    }

    // ---- blocks -------------------------------------------------------------------

    /// Run a block through validation and fork choice. Orphans waiting on it
    /// are connected in the same step; a missing parent is fetched in the
    /// background.
    pub async fn import_block(&self, block: Block, source: BlockSource) -> Result<ImportOutcome> {
        if !self.is_running() {
            return Err(Error::ChainStopped(self.inner.chain_id.clone()));
        }

        let mut head_changed = false;
        let mut fetch = None;
        let outcome = {
            let mut core = self.inner.core.lock().await;
            let outcome = self.import_locked(&mut core, &block, source)?;
            head_changed |= outcome.head_changed();

            match &outcome {
                ImportOutcome::MissingParent(parent) => {
                    if !core.orphans.contains(parent) {
                        fetch = Some(*parent);
                    }
                    core.orphans.insert(block.clone());
                }
                _ => {
                    let mut ready = vec![block.hash()];
                    while let Some(parent) = ready.pop() {
                        for child in core.orphans.take_children(&parent) {
                            match self.import_locked(&mut core, &child, BlockSource::Sync) {
                                Ok(connected) => {
                                    head_changed |= connected.head_changed();
                                    ready.push(child.hash());
                                }
                                Err(err) if err.is_fatal() => return Err(err),
                                Err(err) => debug!(chain = %self.inner.chain_id, %err, "dropped orphan"),
                            }
                        }
                    }
                }
            }
            outcome
        };

        if let Some(parent) = fetch {
            self.spawn_fetch(parent);
        }
        if head_changed {
            self.inner.wake_miner.notify_one();
            if source == BlockSource::Local {
                self.publish_block(&block).await;
            }
            self.publish_head().await;
        }
        Ok(outcome)
    }

    fn import_locked(&self, core: &mut ChainCore, block: &Block, source: BlockSource) -> Result<ImportOutcome> {
        let chain_id = &self.inner.chain_id;
        let listener = &self.inner.ctx.listener;

        let outcome = match core.engine.import_block(block, unix_now()) {
            Ok(outcome) => outcome,
            Err(err) => {
                if err.is_fatal() {
                    self.halt(&err);
                } else {
                    warn!(chain = %chain_id, block = %block.hash(), %err, "rejected block");
                }
                return Err(err);
            }
        };

        // The engine has committed; every event goes out before the pool
        // and pruning writes below can fail.
        let mut pool_writes = WriteBatch::new();
        let announce = |block: &Block| match source {
            BlockSource::Sync => listener.on_sync_block(chain_id, block),
            BlockSource::Local | BlockSource::Remote => listener.on_new_block(chain_id, block),
        };
        match &outcome {
            ImportOutcome::Extended(block) => {
                self.confirm(core, block, &mut pool_writes);
                announce(block);
            }
            ImportOutcome::Reorganized { rolled_back, connected } => {
                for old in rolled_back {
                    if let Some(tx) = old.transaction() {
                        let entry = core.pool.unconfirm(tx, old.height());
                        self.inner.ctx.store.stage_pool_entry(&mut pool_writes, chain_id, &entry);
                    }
                    listener.on_roll_back(chain_id, old);
                }
                for new in connected {
                    self.confirm(core, new, &mut pool_writes);
                    announce(new);
                }
            }
            ImportOutcome::SideBranch | ImportOutcome::Duplicate | ImportOutcome::MissingParent(_) => {}
        }

        if !matches!(outcome, ImportOutcome::Duplicate | ImportOutcome::MissingParent(_)) {
            self.add_peers([*block.miner()]);
        }
        let mut prune_at = None;
        if outcome.head_changed() {
            let height = core.engine.head().height();
            let evicted = core.pool.slim_down(height);
            self.inner.ctx.store.stage_pool_removals(&mut pool_writes, chain_id, &evicted);
            if height % PRUNE_EVERY == 0 {
                prune_at = Some(height);
            }
        }

        let persisted = self.inner.ctx.store.commit(pool_writes).and_then(|()| {
            if let Some(height) = prune_at {
                let pruned = core.engine.prune()?;
                debug!(chain = %chain_id, height, pruned, "pruned history");
            }
            Ok(())
        });
        if let Err(err) = persisted {
            self.halt(&err);
            return Err(err);
        }
        Ok(outcome)
    }

    fn confirm(&self, core: &mut ChainCore, block: &Block, pool_writes: &mut WriteBatch) {
        if let Some(tx) = block.transaction() {
            let entry = core.pool.confirm(tx, block.height());
            self.inner
                .ctx
                .store
                .stage_pool_entry(pool_writes, &self.inner.chain_id, &entry);
        }
    }

    // ---- DHT --------------------------------------------------------------------------

    async fn publish_block(&self, block: &Block) {
        if let Err(err) = self.inner.ctx.dht.put_immutable_item(block.encoded().to_vec()).await {
            warn!(chain = %self.inner.chain_id, block = %block.hash(), %err, "failed to publish block");
        }
    }

    /// Announce our head under (account key, chain id). The sequence is the
    /// head's cumulative difficulty, so a lighter head never replaces a
    /// heavier announcement.
    async fn publish_head(&self) {
        let keys = &self.inner.ctx.keys;
        let Some(public_key) = keys.public_key() else {
            return;
        };
        let head = self.head().await;
        let salt = self.inner.chain_id.as_bytes();
        let sequence = u64::try_from(head.cumulative_difficulty()).unwrap_or(u64::MAX);
        let value = head.hash().0.to_vec();
        let signature = match keys.sign(&mutable_item_digest(salt, sequence, &value)) {
            Ok(signature) => signature,
            Err(err) => {
                debug!(chain = %self.inner.chain_id, %err, "cannot sign head announcement");
                return;
            }
        };
        match self
            .inner
            .ctx
            .dht
            .put_mutable_item(&public_key, salt, sequence, value, signature)
            .await
        {
            Ok(()) | Err(DhtError::StaleSequence { .. }) => {}
            Err(err) => warn!(chain = %self.inner.chain_id, %err, "failed to publish head"),
        }
    }

    /// Fetch a missing block in the background, at most `max_orphans`
    /// fetches at a time. A refused hash is asked for again by the next
    /// sync pass.
    fn spawn_fetch(&self, hash: Hash) {
        if !self.is_running() {
            return;
        }
        {
            let mut fetching = lock(&self.inner.fetching);
            if fetching.contains(&hash) {
                return;
            }
            if fetching.len() >= self.inner.ctx.config.max_orphans {
                debug!(chain = %self.inner.chain_id, block = %hash, in_flight = fetching.len(), "fetch limit reached");
                return;
            }
            fetching.insert(hash);
        }
        self.spawn(self.clone().fetch_block(hash));
    }

    // boxed: the fetch imports, and an import may spawn further fetches
    fn fetch_block(self, hash: Hash) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(async move {
            let dht = Arc::clone(&self.inner.ctx.dht);
            let result = with_backoff(&self.inner.ctx.config.fetch_retry, || {
                let dht = Arc::clone(&dht);
                async move { dht.get_immutable_item(&hash).await }
            })
            .await;
            lock(&self.inner.fetching).remove(&hash);

            let bytes = match result {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!(chain = %self.inner.chain_id, block = %hash, %err, "gave up fetching block");
                    return;
                }
            };
            match Block::decode(&bytes) {
                Ok(block) if block.hash() == hash => {
                    if let Err(err) = self.import_block(block, BlockSource::Sync).await {
                        debug!(chain = %self.inner.chain_id, block = %hash, %err, "fetched block not imported");
                    }
                }
                Ok(_) => warn!(chain = %self.inner.chain_id, block = %hash, "DHT returned a different block"),
                Err(err) => warn!(chain = %self.inner.chain_id, block = %hash, %err, "undecodable block"),
            }
        })
    }

    /// Look up every peer's announced head once and fetch the unknown ones
    pub async fn sync_once(&self) -> Result<()> {
        let salt = self.inner.chain_id.as_bytes().to_vec();
        for peer in self.peers() {
            let item = match self.inner.ctx.dht.get_mutable_item(&peer, &salt).await {
                Ok(Some(item)) => item,
                Ok(None) => continue,
                Err(err) => {
                    debug!(chain = %self.inner.chain_id, %peer, %err, "head lookup failed");
                    continue;
                }
            };
            let Some(hash) = Hash::from_slice(&item.value) else {
                continue;
            };
            let known = {
                let core = self.inner.core.lock().await;
                core.orphans.contains(&hash)
            } || self.inner.ctx.store.contains_block(&self.inner.chain_id, &hash)?;
            if !known {
                self.spawn_fetch(hash);
            }
        }
        Ok(())
    }

    async fn sync_loop(self) {
        let mut ticker = tokio::time::interval(self.inner.ctx.config.sync_interval());
        while self.is_running() {
            ticker.tick().await;
            if let Err(err) = self.sync_once().await {
                warn!(chain = %self.inner.chain_id, %err, "peer sync failed");
            }
        }
    }

    // ---- mining ---------------------------------------------------------------------------

    async fn mining_loop(self) {
        let idle = self.inner.ctx.config.sync_interval();
        while self.is_running() {
            let wait = if self.is_mining() {
                match self.try_mine().await {
                    Ok(wait) => wait,
                    Err(err) if err.is_fatal() => {
                        if self.is_running() {
                            self.halt(&err);
                        }
                        break;
                    }
                    Err(err) => {
                        warn!(chain = %self.inner.chain_id, %err, "mining attempt failed");
                        Some(idle)
                    }
                }
            } else {
                None
            };
            match wait {
                Some(delay) => {
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.inner.wake_miner.notified() => {}
                    }
                }
                None => self.inner.wake_miner.notified().await,
            }
        }
    }

    /// Mine on the head if the local key is eligible now. Otherwise return how
    /// long to wait before trying again.
    async fn try_mine(&self) -> Result<Option<Duration>> {
        let keys = &self.inner.ctx.keys;
        let idle = Some(self.inner.ctx.config.sync_interval());
        let Some(miner) = keys.public_key() else {
            return Ok(idle);
        };

        let block = {
            let mut core = self.inner.core.lock().await;
            let Some(eligible_at) = core.engine.next_mining_time(&miner)? else {
                return Ok(idle);
            };
            let now = unix_now();
            if eligible_at > now {
                return Ok(Some(Duration::from_secs(eligible_at - now)));
            }

            let candidate = {
                let engine = &core.engine;
                core.pool
                    .best_pending(|sender| engine.account(sender).map(|s| s.nonce).unwrap_or(u64::MAX))
                    .cloned()
            };
            match candidate {
                Some(tx) => match core.engine.produce_block(keys, Some(tx.clone()), now) {
                    Ok(block) => block,
                    Err(err) if err.is_rejection() => {
                        warn!(chain = %self.inner.chain_id, tx = %tx.hash(), %err, "dropping unmineable transaction");
                        let hash = tx.hash();
                        core.pool.remove(&hash);
                        self.inner.ctx.store.delete_pool_entries(&self.inner.chain_id, &[hash])?;
                        core.engine.produce_block(keys, None, now)?
                    }
                    Err(err) => return Err(err),
                },
                None => core.engine.produce_block(keys, None, now)?,
            }
        };

        info!(chain = %self.inner.chain_id, height = block.height(), block = %block.hash(), "mined block");
        self.import_block(block, BlockSource::Local).await?;
        Ok(Some(Duration::ZERO))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeConfig;
    use crate::crypto::{KeyHolder, SchnorrSignature};
    use crate::dht::{DhtTransport, MemoryDht, MutableItem};
    use crate::listener::TauListener;
    use crate::storage::{state_delta_key, BlockStore, KvStore, MemoryStore, StoreError};
    use crate::types::GenesisAccount;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    const SEED_A: [u8; 32] = [31u8; 32];
    const SEED_B: [u8; 32] = [32u8; 32];

    #[derive(Default)]
    struct Events(Mutex<Vec<String>>);

    impl Events {
        fn count(&self, prefix: &str) -> usize {
            lock(&self.0).iter().filter(|e| e.starts_with(prefix)).count()
        }
    }

    impl TauListener for Events {
        fn on_tau_error(&self, error: &str) {
            lock(&self.0).push(format!("error {error}"));
        }

        fn on_new_block(&self, _chain_id: &ChainId, block: &Block) {
            lock(&self.0).push(format!("block {}", block.height()));
        }
    }

    /// Lets `allowed` batch writes through, then fails every later one
    struct FailingBatches {
        inner: MemoryStore,
        allowed: AtomicUsize,
    }

    impl FailingBatches {
        fn new() -> Self {
            Self {
                inner: MemoryStore::new(),
                allowed: AtomicUsize::new(usize::MAX),
            }
        }
    }

    impl KvStore for FailingBatches {
        fn get(&self, key: &[u8]) -> std::result::Result<Option<Vec<u8>>, StoreError> {
            self.inner.get(key)
        }

        fn put(&self, key: &[u8], value: &[u8]) -> std::result::Result<(), StoreError> {
            self.inner.put(key, value)
        }

        fn delete(&self, key: &[u8]) -> std::result::Result<(), StoreError> {
            self.inner.delete(key)
        }

        fn batch_write(&self, batch: WriteBatch) -> std::result::Result<(), StoreError> {
            let left = self.allowed.load(Ordering::SeqCst);
            if left == 0 {
                return Err(StoreError::Io("disk full".into()));
            }
            self.allowed.store(left - 1, Ordering::SeqCst);
            self.inner.batch_write(batch)
        }

        fn scan_prefix(&self, prefix: &[u8]) -> std::result::Result<Vec<Vec<u8>>, StoreError> {
            self.inner.scan_prefix(prefix)
        }
    }

    /// A DHT that never answers block lookups
    struct StallingDht;

    #[async_trait]
    impl DhtTransport for StallingDht {
        async fn start(&self) -> std::result::Result<(), DhtError> {
            Ok(())
        }

        async fn stop(&self) -> std::result::Result<(), DhtError> {
            Ok(())
        }

        async fn put_immutable_item(&self, value: Vec<u8>) -> std::result::Result<Hash, DhtError> {
            Ok(crate::crypto::hash_bytes(&value))
        }

        async fn get_immutable_item(&self, _key: &Hash) -> std::result::Result<Option<Vec<u8>>, DhtError> {
            std::future::pending().await
        }

        async fn put_mutable_item(
            &self,
            _public_key: &PublicKey,
            _salt: &[u8],
            _sequence: u64,
            _value: Vec<u8>,
            _signature: SchnorrSignature,
        ) -> std::result::Result<(), DhtError> {
            Ok(())
        }

        async fn get_mutable_item(
            &self,
            _public_key: &PublicKey,
            _salt: &[u8],
        ) -> std::result::Result<Option<MutableItem>, DhtError> {
            Ok(None)
        }
    }

    fn keys(seed: &[u8; 32]) -> KeyHolder {
        KeyHolder::from_seed(seed).unwrap()
    }

    fn chain_config(name: &str, interval: u64) -> ChainConfig {
        let a = keys(&SEED_A).public_key().unwrap();
        let b = keys(&SEED_B).public_key().unwrap();
        ChainConfig::new(
            name,
            interval,
            a,
            1_000_000,
            vec![
                GenesisAccount { account: a, balance: 1_000, power: 10 },
                GenesisAccount { account: b, balance: 1_000, power: 10 },
            ],
        )
        .unwrap()
    }

    fn context(kv: Arc<dyn KvStore>, dht: Arc<dyn DhtTransport>, events: Arc<Events>, config: NodeConfig) -> NodeContext {
        NodeContext {
            store: BlockStore::new(kv),
            dht,
            keys: Arc::new(KeyHolder::empty()),
            listener: events,
            config: Arc::new(config),
        }
    }

    /// Engine on its own store, producing blocks for `config`
    fn producer(config: &ChainConfig) -> ConsensusEngine {
        let store = BlockStore::new(Arc::new(MemoryStore::new()));
        ConsensusEngine::open(store, config.clone(), 300).unwrap()
    }

    fn mine(engine: &mut ConsensusEngine, keys: &KeyHolder, tx: Option<Transaction>) -> Block {
        let miner = keys.public_key().unwrap();
        let at = engine.next_mining_time(&miner).unwrap().unwrap();
        let block = engine.produce_block(keys, tx, at).unwrap();
        engine.import_block(&block, at).unwrap();
        block
    }

    #[tokio::test]
    async fn test_invariant_error_halts_only_that_chain() {
        let kv = Arc::new(MemoryStore::new());
        let events = Arc::new(Events::default());
        let ctx = context(kv.clone(), Arc::new(MemoryDht::new()), events.clone(), NodeConfig::ephemeral());
        let (a, b) = (keys(&SEED_A), keys(&SEED_B));

        let broken_config = chain_config("broken", 300);
        let healthy_config = chain_config("healthy", 300);
        let broken = Chain::open(ctx.clone(), broken_config.clone()).unwrap();
        let healthy = Chain::open(ctx, healthy_config.clone()).unwrap();
        broken.start();
        healthy.start();

        let mut left = producer(&broken_config);
        let mut right = producer(&broken_config);
        let head = mine(&mut left, &a, None);
        let side = mine(&mut right, &b, None);
        broken.import_block(head.clone(), BlockSource::Remote).await.unwrap();

        // the side block forks at genesis, so validating it needs the head's undo data
        kv.delete(&state_delta_key(broken.chain_id(), &head.hash())).unwrap();
        let err = broken.import_block(side, BlockSource::Remote).await.unwrap_err();
        assert!(matches!(err, Error::Invariant(_)));
        assert!(!broken.is_running());
        assert_eq!(broken.status(), ChainStatus::Idle);
        assert_eq!(events.count("error"), 1);

        let late = mine(&mut left, &a, None);
        let err = broken.import_block(late, BlockSource::Remote).await.unwrap_err();
        assert!(matches!(err, Error::ChainStopped(_)));

        let mut other = producer(&healthy_config);
        let block = mine(&mut other, &b, None);
        let outcome = healthy.import_block(block, BlockSource::Remote).await.unwrap();
        assert!(outcome.head_changed());
        assert!(healthy.is_running());
        assert_eq!(events.count("error"), 1);
    }

    #[tokio::test]
    async fn test_store_failure_halts_chain() {
        let kv = Arc::new(MemoryStore::new());
        let events = Arc::new(Events::default());
        let ctx = context(kv.clone(), Arc::new(MemoryDht::new()), events.clone(), NodeConfig::ephemeral());
        let config = chain_config("store", 300);
        let chain = Chain::open(ctx, config.clone()).unwrap();
        chain.start();

        let block = mine(&mut producer(&config), &keys(&SEED_A), None);
        kv.close();
        let err = chain.import_block(block, BlockSource::Remote).await.unwrap_err();

        assert!(matches!(err, Error::Store(_)));
        assert!(!chain.is_running());
        assert_eq!(events.count("error"), 1);
        assert_eq!(events.count("block"), 0);
    }

    #[tokio::test]
    async fn test_pool_write_failure_after_commit_still_announces() {
        let kv = Arc::new(FailingBatches::new());
        let events = Arc::new(Events::default());
        let ctx = context(kv.clone(), Arc::new(MemoryDht::new()), events.clone(), NodeConfig::ephemeral());
        let config = chain_config("pool", 300);
        let chain = Chain::open(ctx, config.clone()).unwrap();
        chain.start();

        let (a, b) = (keys(&SEED_A), keys(&SEED_B));
        let sender = a.public_key().unwrap();
        let tx = Transaction::wiring(config.chain_id(), 1, 1, sender, 1, b.public_key().unwrap(), 10)
            .sign_with(&a)
            .unwrap();
        let block = mine(&mut producer(&config), &b, Some(tx));

        // the engine commit goes through, the pool entry write does not
        kv.allowed.store(1, Ordering::SeqCst);
        let err = chain.import_block(block.clone(), BlockSource::Remote).await.unwrap_err();

        assert!(matches!(err, Error::Store(_)));
        assert_eq!(events.count("block 1"), 1);
        assert_eq!(events.count("error"), 1);
        assert!(!chain.is_running());
        assert_eq!(chain.get_block_by_height(1).unwrap(), Some(block));
    }

    #[tokio::test]
    async fn test_pruning_pass_drops_stale_side_block() {
        let kv = Arc::new(MemoryStore::new());
        let store = BlockStore::new(kv.clone());
        let events = Arc::new(Events::default());
        let ctx = context(kv, Arc::new(MemoryDht::new()), events.clone(), NodeConfig::ephemeral());
        // one block of mutable history
        let config = chain_config("prune", 259_200);
        let chain = Chain::open(ctx, config.clone()).unwrap();
        chain.start();

        let (a, b) = (keys(&SEED_A), keys(&SEED_B));
        let mut left = producer(&config);
        let mut right = producer(&config);
        let first = mine(&mut left, &a, None);
        let rival = mine(&mut right, &b, None);
        left.import_block(&rival, u64::MAX / 2).unwrap();
        chain.import_block(first.clone(), BlockSource::Remote).await.unwrap();
        chain.import_block(rival.clone(), BlockSource::Remote).await.unwrap();

        while left.head().height() < PRUNE_EVERY {
            let block = mine(&mut left, &a, None);
            chain.import_block(block, BlockSource::Remote).await.unwrap();
        }

        assert!(chain.is_running());
        assert_eq!(chain.head().await.height(), PRUNE_EVERY);
        assert_eq!(store.pruned_height(chain.chain_id()).unwrap(), PRUNE_EVERY - 1);
        let kept = [&first, &rival]
            .iter()
            .filter(|block| chain.get_block(&block.hash()).unwrap().is_some())
            .count();
        assert_eq!(kept, 1);
        assert_eq!(events.count("error"), 0);
    }

    #[tokio::test]
    async fn test_ancestor_fetches_are_capped() {
        let events = Arc::new(Events::default());
        let config = NodeConfig {
            max_orphans: 1,
            ..NodeConfig::ephemeral()
        };
        let ctx = context(Arc::new(MemoryStore::new()), Arc::new(StallingDht), events, config);
        let chain = Chain::open(ctx, chain_config("fetch", 300)).unwrap();
        chain.start();

        chain.spawn_fetch(Hash([1u8; 32]));
        chain.spawn_fetch(Hash([2u8; 32]));
        chain.spawn_fetch(Hash([1u8; 32]));

        {
            let fetching = lock(&chain.inner.fetching);
            assert_eq!(fetching.len(), 1);
            assert!(fetching.contains(&Hash([1u8; 32])));
        }
        assert_eq!(chain.status(), ChainStatus::Syncing);

        chain.stop().await;
        assert!(lock(&chain.inner.fetching).is_empty());
    }
}
