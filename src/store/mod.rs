//! Pluggable key-value backends.
//!
//! The cache core only ever interprets [`StoreError::NotFound`]; every other
//! backend failure is opaque, absorbed, and logged by the caller.

use async_trait::async_trait;
use thiserror::Error;

mod disk;
mod memory;

pub use disk::DiskStore;
pub use memory::MemoryStore;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Sentinel for an absent key; the only variant the core interprets.
    #[error("cache key not found")]
    NotFound,
    /// The backend does not implement key listing.
    #[error("key listing not supported by this backend")]
    Unsupported,
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound)
    }
}

/// A flat key-value store. Implementations must be safe for concurrent use;
/// each call is assumed internally atomic, with no cross-call transactional
/// guarantee. Eviction and size accounting are the backend's business.
#[async_trait]
pub trait CacheStore: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError>;

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Lists keys with the given prefix. Optional; backends without an
    /// enumerable keyspace return [`StoreError::Unsupported`].
    async fn keys(&self, _prefix: &str) -> Result<Vec<String>, StoreError> {
        Err(StoreError::Unsupported)
    }
}
