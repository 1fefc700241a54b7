//! DHT transport boundary
//!
//! The consensus core only needs immutable items keyed by content hash and
//! mutable items keyed by (public key, salt). Lookups are best effort and
//! eventually consistent; callers retry "not found" with backoff.

mod memory;
mod retry;
mod transport;

pub use memory::*;
pub use retry::*;
pub use transport::*;
