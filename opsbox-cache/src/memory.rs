//! In-memory cache tier powered by Moka.

use async_trait::async_trait;
use chrono::Utc;
use moka::future::Cache;
use smol_str::SmolStr;
use tracing::trace;

use opsbox_core::ContentKind;

use crate::backend::{CacheBackend, CacheResult, DeleteStatus};
use crate::entry::{CacheEntry, CacheKey};

/// Bounded in-process tier.
///
/// Moka provides lock-free reads and LRU-ish eviction on the entry cap.
/// Expiration is enforced at read time (Moka's own eviction is
/// best-effort) plus an active sweep driven by
/// [`HybridCache`](crate::HybridCache). The memory-bytes estimate for
/// statistics is summed from per-entry estimates.
#[derive(Clone)]
pub struct MemoryBackend {
    cache: Cache<CacheKey, CacheEntry>,
    label: SmolStr,
}

/// Builder for [`MemoryBackend`].
pub struct MemoryBackendBuilder {
    max_entries: u64,
    label: SmolStr,
}

impl MemoryBackendBuilder {
    /// Caps the number of entries held by the tier.
    pub fn max_entries(mut self, max_entries: u64) -> Self {
        self.max_entries = max_entries.max(1);
        self
    }

    /// Sets the tier label used in logs and statistics.
    pub fn label(mut self, label: impl Into<SmolStr>) -> Self {
        self.label = label.into();
        self
    }

    /// Builds the tier.
    pub fn build(self) -> MemoryBackend {
        MemoryBackend {
            cache: Cache::builder().max_capacity(self.max_entries).build(),
            label: self.label,
        }
    }
}

impl MemoryBackend {
    /// Creates a builder with a 10 000 entry default capacity.
    pub fn builder() -> MemoryBackendBuilder {
        MemoryBackendBuilder {
            max_entries: 10_000,
            label: SmolStr::new_static("memory"),
        }
    }

    /// Approximate entry count.
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Estimated bytes held, summed from per-entry estimates.
    pub fn memory_bytes(&self) -> u64 {
        let mut total = 0u64;
        for (_, entry) in self.cache.iter() {
            total += entry.memory_size() as u64;
        }
        total
    }

    /// Drops every expired entry. Returns how many were removed.
    ///
    /// Called periodically by the hybrid cache's sweeper task.
    pub async fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let expired: Vec<CacheKey> = self
            .cache
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| (*key).clone())
            .collect();
        let count = expired.len();
        for key in expired {
            self.cache.invalidate(&key).await;
        }
        if count > 0 {
            trace!(label = %self.label, count, "swept expired entries");
        }
        count
    }

    /// Runs Moka's pending maintenance tasks. Used by tests that assert on
    /// eviction behavior.
    pub async fn run_pending_tasks(&self) {
        self.cache.run_pending_tasks().await;
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn read(&self, key: &CacheKey) -> CacheResult<Option<CacheEntry>> {
        match self.cache.get(key).await {
            Some(entry) if entry.is_expired(Utc::now()) => {
                // Read must reject entries past inserted_at + ttl even when
                // the store has not evicted them yet.
                self.cache.invalidate(key).await;
                Ok(None)
            }
            other => Ok(other),
        }
    }

    async fn write(&self, key: &CacheKey, entry: CacheEntry) -> CacheResult<()> {
        self.cache.insert(key.clone(), entry).await;
        Ok(())
    }

    async fn remove(&self, key: &CacheKey) -> CacheResult<DeleteStatus> {
        match self.cache.remove(key).await {
            Some(_) => Ok(DeleteStatus::Deleted),
            None => Ok(DeleteStatus::Missing),
        }
    }

    async fn clear(&self) -> CacheResult<()> {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
        Ok(())
    }

    async fn clear_kind(&self, kind: ContentKind) -> CacheResult<()> {
        let doomed: Vec<CacheKey> = self
            .cache
            .iter()
            .filter(|(key, _)| key.kind() == kind)
            .map(|(key, _)| (*key).clone())
            .collect();
        for key in doomed {
            self.cache.invalidate(&key).await;
        }
        Ok(())
    }

    fn label(&self) -> &str {
        &self.label
    }
}
