//! Chains - per-community state machines and the manager that owns them

mod chain;
mod manager;
mod orphans;

pub use chain::*;
pub use manager::*;
pub use orphans::*;

use std::sync::Arc;

use crate::config::NodeConfig;
use crate::crypto::KeyHolder;
use crate::dht::DhtTransport;
use crate::listener::TauListener;
use crate::storage::BlockStore;

/// Collaborators shared by every chain of a node
#[derive(Clone)]
pub struct NodeContext {
    pub store: BlockStore,
    pub dht: Arc<dyn DhtTransport>,
    pub keys: Arc<KeyHolder>,
    pub listener: Arc<dyn TauListener>,
    pub config: Arc<NodeConfig>,
}

impl std::fmt::Debug for NodeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeContext")
            .field("store", &self.store)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
