//! Owner of every followed chain
//!
//! Commands are idempotent per chain id: following a followed chain or
//! mining on a mining chain changes nothing. Followed chains are recorded in
//! the store and resumed by the next `start`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::crypto::{Hash, PublicKey};
use crate::error::{Error, Result};
use crate::types::{Block, ChainConfig, ChainId, Transaction};

use super::{BlockSource, Chain, NodeContext};

#[derive(Debug)]
pub struct ChainManager {
    ctx: NodeContext,
    chains: RwLock<HashMap<ChainId, Chain>>,
    started: AtomicBool,
}

impl ChainManager {
    pub fn new(ctx: NodeContext) -> Self {
        Self {
            ctx,
            chains: RwLock::new(HashMap::new()),
            started: AtomicBool::new(false),
        }
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Open and start every persisted chain concurrently. Chains that fail to
    /// open are reported together in one error; the others keep running.
    pub async fn start(&self) -> Result<usize> {
        self.started.store(true, Ordering::SeqCst);

        let mut opening = JoinSet::new();
        for config in self.ctx.store.followed_chains()? {
            let chain_id = config.chain_id();
            if self.chains.read().await.contains_key(&chain_id) {
                continue;
            }
            let ctx = self.ctx.clone();
            opening.spawn_blocking(move || (chain_id, Chain::open(ctx, config)));
        }

        let mut failures = Vec::new();
        while let Some(joined) = opening.join_next().await {
            match joined {
                Ok((chain_id, Ok(chain))) => {
                    self.chains.write().await.entry(chain_id).or_insert(chain);
                }
                Ok((chain_id, Err(err))) => failures.push(format!("{chain_id}: {err}")),
                Err(err) => failures.push(err.to_string()),
            }
        }

        let chains = self.chains.read().await;
        for chain in chains.values() {
            chain.start();
        }
        info!(chains = chains.len(), failed = failures.len(), "chain manager started");
        if failures.is_empty() {
            Ok(chains.len())
        } else {
            Err(Error::Startup(failures.join("; ")))
        }
    }

    /// Stop every chain; returns once all of them have stopped
    pub async fn stop(&self) {
        self.started.store(false, Ordering::SeqCst);
        let chains: Vec<Chain> = self.chains.read().await.values().cloned().collect();
        let mut stopping = JoinSet::new();
        for chain in chains {
            stopping.spawn(async move { chain.stop().await });
        }
        while stopping.join_next().await.is_some() {}
        info!("chain manager stopped");
    }

    /// Follow a community. Peers seed the head sync; following an already
    /// followed chain only adds the peers.
    pub async fn follow_chain(&self, config: ChainConfig, peers: Vec<PublicKey>) -> Result<Chain> {
        let chain_id = config.chain_id();
        let mut chains = self.chains.write().await;
        if let Some(chain) = chains.get(&chain_id) {
            chain.add_peers(peers);
            return Ok(chain.clone());
        }

        let chain = Chain::open(self.ctx.clone(), config.clone())?;
        self.ctx.store.save_followed_chain(&config)?;
        chain.add_peers(peers);
        if self.is_started() {
            chain.start();
        }
        chains.insert(chain_id.clone(), chain.clone());
        info!(chain = %chain_id, "following chain");
        Ok(chain)
    }

    /// Stop following and purge every record of the chain. Returns false if
    /// the chain was not followed.
    pub async fn unfollow_chain(&self, chain_id: &ChainId) -> Result<bool> {
        let Some(chain) = self.chains.write().await.remove(chain_id) else {
            return Ok(false);
        };
        chain.stop().await;
        self.ctx.store.remove_followed_chain(chain_id)?;
        let removed = self.ctx.store.clear_chain(chain_id)?;
        self.ctx.listener.on_clear_chain_all_state(chain_id);
        info!(chain = %chain_id, removed, "unfollowed chain");
        Ok(true)
    }

    pub async fn start_mining(&self, chain_id: &ChainId) -> Result<()> {
        self.require(chain_id).await?.start_mining();
        Ok(())
    }

    pub async fn stop_mining(&self, chain_id: &ChainId) -> Result<()> {
        self.require(chain_id).await?.stop_mining();
        Ok(())
    }

    pub async fn chain(&self, chain_id: &ChainId) -> Option<Chain> {
        self.chains.read().await.get(chain_id).cloned()
    }

    pub async fn chain_ids(&self) -> Vec<ChainId> {
        let mut ids: Vec<ChainId> = self.chains.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    async fn require(&self, chain_id: &ChainId) -> Result<Chain> {
        self.chain(chain_id)
            .await
            .ok_or_else(|| Error::UnknownChain(chain_id.clone()))
    }

    /// Hand a block delivered by the DHT layer to its chain
    pub async fn deliver_block(&self, block: Block) -> Result<()> {
        let chain = self.require(block.chain_id()).await?;
        chain.import_block(block, BlockSource::Remote).await?;
        Ok(())
    }

    pub async fn submit_transaction(&self, tx: Transaction) -> Result<Hash> {
        self.require(&tx.chain_id).await?.submit_transaction(tx).await
    }

    /// Let every chain re-check eligibility, e.g. after a key change
    pub async fn wake_all(&self) {
        for chain in self.chains.read().await.values() {
            chain.wake();
        }
    }

    pub async fn sync_all(&self) {
        for chain in self.chains.read().await.values() {
            if let Err(err) = chain.sync_once().await {
                warn!(chain = %chain.chain_id(), %err, "peer sync failed");
            }
        }
    }
}
