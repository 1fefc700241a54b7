//! Canonical binary codec
//!
//! Every entity is encoded with one fixed bincode configuration: fixed-width
//! little-endian integers, fields in declaration order, no trailing bytes.
//! The same bytes feed hashing, signing, storage and DHT transfer.

use bincode::Options;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::sync::OnceLock;
use thiserror::Error;

/// Largest payload `decode` will accept
pub const MAX_DECODE_SIZE: u64 = 1 << 20;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("input truncated")]
    Truncated,
    #[error("declared length exceeds {MAX_DECODE_SIZE} bytes")]
    TooLarge,
    #[error("trailing bytes after value")]
    TrailingBytes,
    #[error("malformed input: {0}")]
    Malformed(String),
}

impl From<bincode::Error> for CodecError {
    fn from(err: bincode::Error) -> Self {
        match *err {
            bincode::ErrorKind::Io(ref io) if io.kind() == std::io::ErrorKind::UnexpectedEof => {
                CodecError::Truncated
            }
            bincode::ErrorKind::SizeLimit => CodecError::TooLarge,
            bincode::ErrorKind::Custom(ref msg) if msg.contains("bytes remaining") => {
                CodecError::TrailingBytes
            }
            other => CodecError::Malformed(other.to_string()),
        }
    }
}

fn encode_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
}

fn decode_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
        .with_limit(MAX_DECODE_SIZE)
        .reject_trailing_bytes()
}

/// Encode a value into its canonical bytes
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Vec<u8> {
    // every type in this crate has a length-known, infallible Serialize impl
    encode_options().serialize(value).unwrap_or_default()
}

/// Decode canonical bytes, rejecting truncation, bad prefixes and trailing data
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    Ok(decode_options().deserialize(bytes)?)
}

/// Lazily computed value derived from an entity's fields (encoded bytes,
/// hash). Never serialized and ignored by equality.
pub struct Cached<T>(OnceLock<T>);

impl<T> Cached<T> {
    pub fn get_or_init(&self, init: impl FnOnce() -> T) -> &T {
        self.0.get_or_init(init)
    }
}

impl<T> Default for Cached<T> {
    fn default() -> Self {
        Cached(OnceLock::new())
    }
}

impl<T: Clone> Clone for Cached<T> {
    fn clone(&self) -> Self {
        let cell = OnceLock::new();
        if let Some(value) = self.0.get() {
            let _ = cell.set(value.clone());
        }
        Cached(cell)
    }
}

impl<T> PartialEq for Cached<T> {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

impl<T> Eq for Cached<T> {}

impl<T> fmt::Debug for Cached<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("..")
    }
}
