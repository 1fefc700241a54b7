//! Event sink interface
//!
//! The core pushes lifecycle and per-chain content events to every
//! registered [`TauListener`], synchronously and in registration order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::types::{Block, ChainId};

/// Observer of node events; every method defaults to a no-op
#[allow(unused_variables)]
pub trait TauListener: Send + Sync {
    fn on_dht_started(&self, success: bool, error: Option<&str>) {}
    fn on_dht_stopped(&self) {}
    fn on_chain_manager_started(&self, success: bool, error: Option<&str>) {}
    fn on_chain_manager_stopped(&self) {}

    /// Fired once per start cycle after both the DHT and the chain manager reported
    fn on_tau_started(&self, success: bool, error: Option<&str>) {}
    fn on_tau_stopped(&self) {}
    fn on_tau_error(&self, error: &str) {}

    /// Block became canonical
    fn on_new_block(&self, chain_id: &ChainId, block: &Block) {}
    /// Block left the canonical chain during a reorg
    fn on_roll_back(&self, chain_id: &ChainId, block: &Block) {}
    /// Historical block stored while catching up
    fn on_sync_block(&self, chain_id: &ChainId, block: &Block) {}
    fn on_clear_chain_all_state(&self, chain_id: &ChainId) {}
}

/// Handle returned by [`CompositeListener::register`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Ordered set of listeners that is itself a listener
#[derive(Default)]
pub struct CompositeListener {
    next_id: AtomicU64,
    listeners: RwLock<Vec<(ListenerId, Arc<dyn TauListener>)>>,
}

impl std::fmt::Debug for CompositeListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeListener")
            .field("listeners", &self.len())
            .finish()
    }
}

impl CompositeListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, listener: Arc<dyn TauListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((id, listener));
        id
    }

    /// Returns false when `id` was not registered
    pub fn unregister(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = listeners.len();
        listeners.retain(|(registered, _)| *registered != id);
        listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Callbacks run on a copy so a listener may unregister itself mid-dispatch
    fn snapshot(&self) -> Vec<Arc<dyn TauListener>> {
        self.listeners
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect()
    }

    fn each(&self, f: impl Fn(&dyn TauListener)) {
        for listener in self.snapshot() {
            f(listener.as_ref());
        }
    }
}

impl TauListener for CompositeListener {
    fn on_dht_started(&self, success: bool, error: Option<&str>) {
        self.each(|l| l.on_dht_started(success, error));
    }

    fn on_dht_stopped(&self) {
        self.each(|l| l.on_dht_stopped());
    }

    fn on_chain_manager_started(&self, success: bool, error: Option<&str>) {
        self.each(|l| l.on_chain_manager_started(success, error));
    }

    fn on_chain_manager_stopped(&self) {
        self.each(|l| l.on_chain_manager_stopped());
    }

    fn on_tau_started(&self, success: bool, error: Option<&str>) {
        self.each(|l| l.on_tau_started(success, error));
    }

    fn on_tau_stopped(&self) {
        self.each(|l| l.on_tau_stopped());
    }

    fn on_tau_error(&self, error: &str) {
        self.each(|l| l.on_tau_error(error));
    }

    fn on_new_block(&self, chain_id: &ChainId, block: &Block) {
        self.each(|l| l.on_new_block(chain_id, block));
    }

    fn on_roll_back(&self, chain_id: &ChainId, block: &Block) {
        self.each(|l| l.on_roll_back(chain_id, block));
    }

    fn on_sync_block(&self, chain_id: &ChainId, block: &Block) {
        self.each(|l| l.on_sync_block(chain_id, block));
    }

    fn on_clear_chain_all_state(&self, chain_id: &ChainId) {
        self.each(|l| l.on_clear_chain_all_state(chain_id));
    }
}
