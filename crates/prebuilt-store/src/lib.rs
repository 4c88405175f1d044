//! Object store backends for the prebuilt artifact cache
//!
//! The remote cache tier talks to a bucket through the [`ObjectStore`]
//! trait. Objects are opaque blobs addressed by a path-like key; the only
//! negative result is "not found", every other failure is an error.
//!
//! Backends:
//! - [`GcsObjectStore`]: Google Cloud Storage over HTTPS
//! - [`FsObjectStore`]: a directory acting as a bucket (network shares, CI caches)
//! - [`MemoryObjectStore`]: in-process store with call counters for tests

mod fs;
mod gcs;
mod memory;

pub use fs::FsObjectStore;
pub use gcs::{GcsConfig, GcsObjectStore, TokenSource, DEFAULT_ENDPOINT, DEFAULT_TIMEOUT};
pub use memory::MemoryObjectStore;

use std::io;
use std::path::{Component, Path};

/// Errors from object store operations.
///
/// A missing object is not represented here; `get` and `exists` report it
/// as a normal negative result.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("object store unavailable: {0}")]
    Unavailable(String),

    #[error("object store authentication failed: {0}")]
    Auth(String),

    #[error("invalid object key: {0:?}")]
    InvalidKey(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A bucket of opaque objects addressed by string keys.
pub trait ObjectStore: Send + Sync {
    /// Download the object at `key` into the file `dest`.
    ///
    /// Returns `Ok(None)` when the object does not exist; `dest` is not
    /// created in that case.
    fn get(&self, key: &str, dest: &Path) -> StoreResult<Option<u64>>;

    /// Upload the file `source` as the object `key`, replacing any
    /// existing object. Returns the number of bytes uploaded.
    fn put(&self, key: &str, source: &Path) -> StoreResult<u64>;

    /// Check whether an object exists without downloading it.
    fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Human-readable location, used in logs.
    fn describe(&self) -> String;
}

/// Reject keys that are empty, absolute, or walk out of the bucket.
pub(crate) fn validate_key(key: &str) -> StoreResult<()> {
    if key.is_empty() || key.starts_with('/') {
        return Err(StoreError::InvalidKey(key.to_string()));
    }
    let escapes = Path::new(key)
        .components()
        .any(|c| !matches!(c, Component::Normal(_)));
    if escapes {
        return Err(StoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}
