//! Cryptography module - BLAKE3 hashing, Schnorr signatures, node key holder

mod hash;
mod keys;
mod schnorr;

pub use hash::*;
pub use keys::*;
pub use schnorr::*;
