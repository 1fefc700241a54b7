//! Crate-wide error type
//!
//! Each layer keeps its own error enum; this folds them together so callers
//! can propagate with `?` and still match on the layer that failed.

use thiserror::Error;

use crate::codec::CodecError;
use crate::config::ConfigError;
use crate::consensus::{InvariantError, ValidationError};
use crate::crypto::SignatureError;
use crate::dht::DhtError;
use crate::storage::StoreError;
use crate::types::ChainId;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),
    #[error("consensus invariant violated: {0}")]
    Invariant(#[from] InvariantError),
    #[error(transparent)]
    Dht(#[from] DhtError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Signature(#[from] SignatureError),
    #[error("chain {0} is not followed")]
    UnknownChain(ChainId),
    #[error("chain {0} is not running")]
    ChainStopped(ChainId),
    #[error("startup failed: {0}")]
    Startup(String),
}

impl Error {
    /// Errors that mean the offending input should be dropped, not retried
    pub fn is_rejection(&self) -> bool {
        matches!(self, Error::Validation(_) | Error::Codec(_))
    }

    /// Errors after which a chain must stop ingesting blocks
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Invariant(_) | Error::Store(_))
    }
}
