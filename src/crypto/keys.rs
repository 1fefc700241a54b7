//! Node account key holder
//!
//! The one place the node's private key lives. Everything else asks the
//! holder for the public key or for a signature at the moment it needs one.

use std::sync::RwLock;

use super::{Hash, PrivateKey, PublicKey, SchnorrSignature, SignatureError};

#[derive(Debug, Default)]
pub struct KeyHolder {
    key: RwLock<Option<PrivateKey>>,
}

impl KeyHolder {
    /// Holder with no key loaded; mining and signing fail until `update` is called
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_seed(seed: &[u8; 32]) -> Result<Self, SignatureError> {
        let holder = Self::empty();
        holder.update(seed)?;
        Ok(holder)
    }

    pub fn generate() -> Self {
        Self {
            key: RwLock::new(Some(PrivateKey::generate())),
        }
    }

    /// Replace the account key. The previous key is dropped here.
    pub fn update(&self, seed: &[u8; 32]) -> Result<PublicKey, SignatureError> {
        let key = PrivateKey::from_bytes(seed)?;
        let public = key.public_key();
        match self.key.write() {
            Ok(mut slot) => *slot = Some(key),
            Err(poisoned) => *poisoned.into_inner() = Some(key),
        }
        Ok(public)
    }

    pub fn public_key(&self) -> Option<PublicKey> {
        self.read(|key| key.public_key())
    }

    pub fn sign(&self, message: &Hash) -> Result<SchnorrSignature, SignatureError> {
        self.read(|key| key.sign(message)).ok_or(SignatureError::NoKey)
    }

    fn read<T>(&self, f: impl FnOnce(&PrivateKey) -> T) -> Option<T> {
        let guard = match self.key.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.as_ref().map(f)
    }
}
