//! Top-level orchestrator
//!
//! Starts and stops the DHT transport and the chain manager behind a
//! two-phase barrier, fans events out to registered listeners and forwards
//! commands to the chain manager.

mod barrier;

pub use barrier::*;

use std::sync::Arc;
use tracing::{info, warn};

use crate::chain::{unix_now, Chain, ChainManager, ChainStatus, NodeContext};
use crate::config::NodeConfig;
use crate::crypto::{Hash, KeyHolder, PublicKey, SignatureError};
use crate::dht::DhtTransport;
use crate::error::{Error, Result};
use crate::listener::{CompositeListener, ListenerId, TauListener};
use crate::storage::{BlockStore, KvStore, MemoryStore, SledStore};
use crate::types::{AccountState, Block, ChainConfig, ChainId, GenesisAccount, Transaction};

pub struct Controller {
    config: Arc<NodeConfig>,
    keys: Arc<KeyHolder>,
    dht: Arc<dyn DhtTransport>,
    listeners: Arc<CompositeListener>,
    manager: Arc<ChainManager>,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("config", &self.config)
            .field("listeners", &self.listeners)
            .finish_non_exhaustive()
    }
}

impl Controller {
    /// The controller shares `keys` with nothing else; it is the node's only
    /// key holder
    pub fn new(config: NodeConfig, kv: Arc<dyn KvStore>, dht: Arc<dyn DhtTransport>, keys: Arc<KeyHolder>) -> Self {
        let config = Arc::new(config);
        let listeners = Arc::new(CompositeListener::new());
        let ctx = NodeContext {
            store: BlockStore::new(kv),
            dht: Arc::clone(&dht),
            keys: Arc::clone(&keys),
            listener: Arc::clone(&listeners) as Arc<dyn TauListener>,
            config: Arc::clone(&config),
        };
        Self {
            config,
            keys,
            dht,
            listeners,
            manager: Arc::new(ChainManager::new(ctx)),
        }
    }

    /// Open the storage backend `config` asks for
    pub fn open(config: NodeConfig, dht: Arc<dyn DhtTransport>, keys: Arc<KeyHolder>) -> Result<Self> {
        config.validate()?;
        let kv: Arc<dyn KvStore> = if config.in_memory {
            Arc::new(MemoryStore::new())
        } else {
            Arc::new(SledStore::open(&config.data_dir)?)
        };
        Ok(Self::new(config, kv, dht, keys))
    }

    pub fn register_listener(&self, listener: Arc<dyn TauListener>) -> ListenerId {
        self.listeners.register(listener)
    }

    pub fn unregister_listener(&self, id: ListenerId) -> bool {
        self.listeners.unregister(id)
    }

    pub fn manager(&self) -> &ChainManager {
        &self.manager
    }

    pub fn public_key(&self) -> Option<PublicKey> {
        self.keys.public_key()
    }

    /// Replace the node key and let every chain re-check mining eligibility
    pub async fn update_account_key(&self, seed: &[u8; 32]) -> Result<PublicKey> {
        let public_key = self.keys.update(seed)?;
        info!(account = %public_key, "account key updated");
        self.manager.wake_all().await;
        Ok(public_key)
    }

    // ---- lifecycle -----------------------------------------------------------

    /// Start the DHT and the chain manager concurrently. Fires
    /// `on_tau_started` exactly once, after both reported or the barrier
    /// timed out, and returns the same success flag.
    pub async fn start(&self) -> bool {
        let (barrier, done) = Barrier::new(Phase::Startup);
        let barrier_id = self.listeners.register(Arc::clone(&barrier) as Arc<dyn TauListener>);

        let listeners = Arc::clone(&self.listeners);
        let dht = Arc::clone(&self.dht);
        tokio::spawn(async move {
            match dht.start().await {
                Ok(()) => listeners.on_dht_started(true, None),
                Err(err) => listeners.on_dht_started(false, Some(&err.to_string())),
            }
        });

        let listeners = Arc::clone(&self.listeners);
        let manager = Arc::clone(&self.manager);
        tokio::spawn(async move {
            match manager.start().await {
                Ok(_) => listeners.on_chain_manager_started(true, None),
                Err(err) => listeners.on_chain_manager_started(false, Some(&err.to_string())),
            }
        });

        let timeout = self.config.barrier_timeout();
        let _ = tokio::time::timeout(timeout, done).await;
        self.listeners.unregister(barrier_id);

        let outcome = barrier.outcome(timeout);
        match &outcome.error {
            None => info!("node started"),
            Some(error) => warn!(%error, "node started with failures"),
        }
        self.listeners.on_tau_started(outcome.success, outcome.error.as_deref());
        outcome.success
    }

    /// Stop the chain manager and the DHT, then fire `on_tau_stopped` once
    pub async fn stop(&self) {
        let (barrier, done) = Barrier::new(Phase::Shutdown);
        let barrier_id = self.listeners.register(Arc::clone(&barrier) as Arc<dyn TauListener>);

        let listeners = Arc::clone(&self.listeners);
        let manager = Arc::clone(&self.manager);
        let dht = Arc::clone(&self.dht);
        tokio::spawn(async move {
            manager.stop().await;
            listeners.on_chain_manager_stopped();
            if let Err(err) = dht.stop().await {
                warn!(%err, "DHT did not stop cleanly");
            }
            listeners.on_dht_stopped();
        });

        let timeout = self.config.barrier_timeout();
        let _ = tokio::time::timeout(timeout, done).await;
        self.listeners.unregister(barrier_id);

        if let Some(error) = barrier.outcome(timeout).error {
            warn!(%error, "shutdown incomplete");
            self.listeners.on_tau_error(&error);
        }
        info!("node stopped");
        self.listeners.on_tau_stopped();
    }

    // ---- commands --------------------------------------------------------------

    /// Create a new community mined by the local key and follow it. The
    /// creator gets one unit of power when `accounts` gives it none.
    pub async fn create_community(
        &self,
        name: &str,
        block_time_interval: u64,
        mut accounts: Vec<GenesisAccount>,
        peers: Vec<PublicKey>,
    ) -> Result<ChainId> {
        let creator = self.keys.public_key().ok_or(SignatureError::NoKey)?;
        let has_power = accounts.iter().any(|a| a.account == creator && a.power > 0);
        if !has_power {
            accounts.insert(
                0,
                GenesisAccount {
                    account: creator,
                    balance: 0,
                    power: 1,
                },
            );
        }
        let config = ChainConfig::new(name, block_time_interval, creator, unix_now(), accounts)?;
        let chain = self.manager.follow_chain(config, peers).await?;
        Ok(chain.chain_id().clone())
    }

    pub async fn follow_chain(&self, config: ChainConfig, peers: Vec<PublicKey>) -> Result<Chain> {
        self.manager.follow_chain(config, peers).await
    }

    pub async fn unfollow_chain(&self, chain_id: &ChainId) -> Result<bool> {
        self.manager.unfollow_chain(chain_id).await
    }

    pub async fn start_mining(&self, chain_id: &ChainId) -> Result<()> {
        self.manager.start_mining(chain_id).await
    }

    pub async fn stop_mining(&self, chain_id: &ChainId) -> Result<()> {
        self.manager.stop_mining(chain_id).await
    }

    pub async fn submit_transaction(&self, tx: Transaction) -> Result<Hash> {
        self.manager.submit_transaction(tx).await
    }

    // ---- queries ----------------------------------------------------------------

    pub async fn account_state(&self, chain_id: &ChainId, account: &PublicKey) -> Result<AccountState> {
        self.chain(chain_id).await?.account_state(account).await
    }

    pub async fn head_block(&self, chain_id: &ChainId) -> Result<Block> {
        Ok(self.chain(chain_id).await?.head().await)
    }

    pub async fn chain_status(&self, chain_id: &ChainId) -> ChainStatus {
        match self.manager.chain(chain_id).await {
            Some(chain) => chain.status(),
            None => ChainStatus::Idle,
        }
    }

    async fn chain(&self, chain_id: &ChainId) -> Result<Chain> {
        self.manager
            .chain(chain_id)
            .await
            .ok_or_else(|| Error::UnknownChain(chain_id.clone()))
    }
}
