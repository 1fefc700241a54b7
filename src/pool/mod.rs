//! Transaction pool - pending and recently confirmed transactions per chain

mod tx_pool;

pub use tx_pool::*;
