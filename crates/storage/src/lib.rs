//! Object store for result artifacts.
//!
//! The pipeline only needs put/get by key; keys are derived from job ids so
//! a retried attempt overwrites rather than duplicates.
//!
//! - [`MemoryObjectStore`]: in-process map, used by tests.
//! - [`LocalObjectStore`]: files under a base directory.
//! - [`S3ObjectStore`]: an S3-compatible bucket.

pub mod local;
pub mod memory;
pub mod s3;

use async_trait::async_trait;

pub use local::LocalObjectStore;
pub use memory::MemoryObjectStore;
pub use s3::S3ObjectStore;

/// Maximum key length accepted by every backend.
const MAX_KEY_LEN: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Invalid object key '{0}'")]
    InvalidKey(String),

    /// The backing service could not be reached or rejected the request.
    #[error("Object store transport error: {0}")]
    Transport(String),

    #[error("Object store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `bytes` under `key`, replacing any existing object.
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), StorageError>;

    /// Fetch the object under `key`; `Ok(None)` when it does not exist.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;
}

/// Reject keys that are empty, absolute, or escape their prefix.
pub fn validate_key(key: &str) -> Result<(), StorageError> {
    let invalid = key.is_empty()
        || key.len() > MAX_KEY_LEN
        || key.starts_with('/')
        || key.contains('\\')
        || key.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..");
    if invalid {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}
