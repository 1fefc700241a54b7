//! Storage module - key-value backends and the per-chain block store

mod block_store;
mod keys;
mod kv;
mod memory;
mod sled_store;

pub use block_store::*;
pub use keys::*;
pub use kv::*;
pub use memory::*;
pub use sled_store::*;
