//! Ledger entities: chain identifiers, transactions, blocks, account state
//! and the genesis descriptor of a community chain.

mod account;
mod block;
mod chain_id;
mod genesis;
mod transaction;

pub use account::*;
pub use block::*;
pub use chain_id::*;
pub use genesis::*;
pub use transaction::*;
