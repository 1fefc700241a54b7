//! TAU node
//!
//! Runs the chain core against the in-process DHT. Usage:
//! `tau-node [config.json]`; log verbosity follows `RUST_LOG`.

use std::path::PathBuf;
use std::sync::Arc;
use tau_core::config::NodeConfig;
use tau_core::constants::DEFAULT_BLOCK_TIME_INTERVAL;
use tau_core::controller::Controller;
use tau_core::crypto::KeyHolder;
use tau_core::dht::MemoryDht;
use tau_core::listener::TauListener;
use tau_core::types::{Block, ChainId, GenesisAccount};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Mirrors node events into the log
struct LogListener;

impl TauListener for LogListener {
    fn on_tau_started(&self, success: bool, error: Option<&str>) {
        if success {
            info!("TAU core started");
        } else {
            error!(error = error.unwrap_or_default(), "TAU core failed to start");
        }
    }

    fn on_tau_error(&self, error: &str) {
        error!(error, "TAU core error");
    }

    fn on_new_block(&self, chain_id: &ChainId, block: &Block) {
        info!(chain = %chain_id, height = block.height(), block = %block.hash(), miner = %block.miner(), "new block");
    }

    fn on_roll_back(&self, chain_id: &ChainId, block: &Block) {
        warn!(chain = %chain_id, height = block.height(), block = %block.hash(), "rolled back");
    }

    fn on_sync_block(&self, chain_id: &ChainId, block: &Block) {
        info!(chain = %chain_id, height = block.height(), "synced block");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match std::env::args().nth(1).map(PathBuf::from) {
        Some(path) => NodeConfig::load(&path)?,
        None => NodeConfig::default(),
    };

    let keys = Arc::new(match config.account_seed_bytes()? {
        Some(seed) => KeyHolder::from_seed(&seed)?,
        None => KeyHolder::generate(),
    });
    let account = keys.public_key().ok_or("no account key")?;
    info!(%account, data_dir = %config.data_dir.display(), in_memory = config.in_memory, "starting TAU node");

    let controller = Controller::open(config, Arc::new(MemoryDht::new()), keys)?;
    controller.register_listener(Arc::new(LogListener));

    if !controller.start().await {
        controller.stop().await;
        return Err("startup failed".into());
    }

    let mut chains = controller.manager().chain_ids().await;
    if chains.is_empty() {
        let accounts = vec![GenesisAccount {
            account,
            balance: 1_000_000,
            power: 1,
        }];
        let chain_id = controller
            .create_community("tau-demo", DEFAULT_BLOCK_TIME_INTERVAL, accounts, vec![])
            .await?;
        info!(chain = %chain_id, "created demo community");
        chains.push(chain_id);
    }
    for chain_id in &chains {
        controller.start_mining(chain_id).await?;
    }

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    controller.stop().await;
    Ok(())
}
