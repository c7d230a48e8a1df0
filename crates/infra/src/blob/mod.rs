//! Blob store abstraction: prefix listing, fetch, and create-if-absent puts.
//!
//! The create-if-absent precondition is the only concurrency primitive the
//! event store needs: version-keyed objects make concurrent writers race for
//! one key, and exactly one wins.

use std::collections::BTreeMap;

use async_trait::async_trait;
use thiserror::Error;

mod in_memory;
mod s3;

pub use in_memory::InMemoryBlobStore;
pub use s3::S3BlobStore;

/// Metadata attached to a stored object (lower-cased keys, stringified values).
pub type BlobMetadata = BTreeMap<String, String>;

#[derive(Debug, Error)]
pub enum BlobStoreError {
    /// The target key already exists (create-if-absent lost the race).
    #[error("precondition failed: object already exists at {key}")]
    PreconditionFailed { key: String },

    /// No object at the given key.
    #[error("object not found: {key}")]
    NotFound { key: String },

    /// Any other transport/storage failure, surfaced unchanged.
    #[error("blob store error: {0}")]
    Other(String),
}

/// Append-friendly blob store.
///
/// Implementations must provide read-after-write consistency for `get` on
/// keys whose `put_if_absent` succeeded. Listings may briefly omit a
/// just-written object; callers handle that (the event store retries a gap
/// check once).
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// List all keys under `prefix`, following continuation tokens until the
    /// listing is exhausted. Order is not guaranteed.
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, BlobStoreError>;

    /// Fetch an object's body.
    async fn get(&self, key: &str) -> Result<Vec<u8>, BlobStoreError>;

    /// Store an object only if the key does not exist yet.
    ///
    /// Returns `PreconditionFailed` when another writer created the key
    /// first. The body is always `application/json` in this system.
    async fn put_if_absent(
        &self,
        key: &str,
        body: Vec<u8>,
        metadata: BlobMetadata,
    ) -> Result<(), BlobStoreError>;
}
