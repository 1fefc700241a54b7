//! TAU chain core library
//!
//! Community blockchains gossiped over a DHT: every community is its own
//! chain, mined by stake-weighted leader election and synchronized by
//! publishing blocks as immutable DHT items and chain heads as mutable ones.

pub mod chain;
pub mod codec;
pub mod config;
pub mod consensus;
pub mod controller;
pub mod crypto;
pub mod dht;
pub mod error;
pub mod listener;
pub mod pool;
pub mod storage;
pub mod types;

pub use error::{Error, Result};

/// Protocol constants - HARD-CODED, NEVER CONFIGURABLE
pub mod constants {
    /// Version written into every new `ChainConfig`
    pub const CHAIN_CONFIG_VERSION: u32 = 1;

    /// Default target seconds between blocks of a new community
    pub const DEFAULT_BLOCK_TIME_INTERVAL: u64 = 300;

    /// Wall-clock span of the mutable range; divided by the block interval
    /// it gives the reorg depth limit in blocks (864 at 300 s)
    pub const MUTABLE_RANGE_SECONDS: u64 = 259_200;

    /// Pool retention window, in multiples of the mutable range
    pub const WARNING_RANGE_FACTOR: u64 = 3;

    /// Upper bound on a block's canonical encoding
    pub const MAX_BLOCK_SIZE: usize = 2048;

    /// Ceiling for the base target
    pub const MAX_BASE_TARGET: u64 = 1 << 62;

    /// Work of a block is this over its base target
    pub const DIFFICULTY_NUMERATOR: u128 = 1 << 64;

    /// Number of recent intervals averaged by the base target adjustment
    pub const BASE_TARGET_WINDOW: u64 = 3;

    /// Slowest average interval that still counts, in sixtieths of the target
    pub const MAX_INTERVAL_RATIO_SIXTIETHS: u128 = 67;

    /// Fastest average interval that still counts, in sixtieths of the target
    pub const MIN_INTERVAL_RATIO_SIXTIETHS: u128 = 53;

    /// Damping of base target decreases, in percent
    pub const BASE_TARGET_GAMMA_PERCENT: u128 = 64;

    /// Seconds a block may be ahead of local time unless configured otherwise
    pub const DEFAULT_MAX_TIMESTAMP_DRIFT: u64 = 300;
}
