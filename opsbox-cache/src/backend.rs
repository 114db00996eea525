//! Cache storage trait implemented by both tiers.

use async_trait::async_trait;
use thiserror::Error;

use opsbox_core::ContentKind;

use crate::entry::{CacheEntry, CacheKey};

/// Error type for cache tier operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Network interaction error (remote tier unreachable, command failed).
    #[error("cache connection error: {0}")]
    Connection(Box<dyn std::error::Error + Send + Sync>),

    /// Stored payload could not be decoded. Treated as a miss by the hybrid
    /// cache; the offending entry is deleted opportunistically.
    #[error("corrupted cache payload: {0}")]
    Corrupted(String),

    /// Serialization of a value failed before storage.
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

/// Result type for cache tier operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Status of a delete operation.
#[derive(Debug, PartialEq, Eq)]
pub enum DeleteStatus {
    /// The key existed and was removed.
    Deleted,
    /// The key was not present.
    Missing,
}

/// Storage operations shared by the memory and remote tiers.
///
/// Implementations enforce the read invariant themselves: an entry past its
/// TTL is never returned, even if the underlying store has not evicted it
/// yet.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Reads an entry. `Ok(None)` is a miss.
    async fn read(&self, key: &CacheKey) -> CacheResult<Option<CacheEntry>>;

    /// Writes an entry.
    async fn write(&self, key: &CacheKey, entry: CacheEntry) -> CacheResult<()>;

    /// Removes an entry.
    async fn remove(&self, key: &CacheKey) -> CacheResult<DeleteStatus>;

    /// Removes every entry.
    async fn clear(&self) -> CacheResult<()>;

    /// Removes every entry of the given content kind; other kinds are
    /// untouched.
    async fn clear_kind(&self, kind: ContentKind) -> CacheResult<()>;

    /// Tier label for logs and statistics.
    fn label(&self) -> &str;
}
