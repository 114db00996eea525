//! Two-tier read-through / write-through cache.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use opsbox_core::ContentKind;
use opsbox_resilience::{BreakerConfig, CircuitBreaker};

use crate::backend::{CacheBackend, CacheError, CacheResult};
use crate::entry::{CacheEntry, CacheKey};
use crate::memory::MemoryBackend;
use crate::policy::TtlPolicy;
use crate::remote::RemoteBackend;
use crate::stats::{CacheStats, CacheStatsSnapshot};

/// Default cap applied to the memory-tier TTL when refilling from the
/// remote tier.
const DEFAULT_REFILL_CAP: Duration = Duration::from_secs(300);

/// The hybrid cache: memory tier in front of an optional remote tier.
///
/// Read path: T1 hit returns immediately; on T1 miss the remote tier is
/// consulted (breaker permitting) and a hit refills T1 with
/// `min(remaining TTL, refill cap)`. Write path: T1 synchronously, T2
/// fire-and-forget. Remote failures never fail a call - they are logged,
/// counted against the remote breaker, and the read proceeds as a miss.
pub struct HybridCache {
    memory: MemoryBackend,
    remote: Option<RemoteBackend>,
    remote_breaker: Arc<CircuitBreaker>,
    policy: TtlPolicy,
    stats: CacheStats,
    refill_cap: Duration,
}

/// Builder for [`HybridCache`].
pub struct HybridCacheBuilder {
    max_entries: u64,
    remote: Option<RemoteBackend>,
    policy: TtlPolicy,
    refill_cap: Duration,
    breaker_config: BreakerConfig,
}

impl HybridCacheBuilder {
    /// Caps the memory tier's entry count.
    pub fn max_entries(mut self, max_entries: u64) -> Self {
        self.max_entries = max_entries;
        self
    }

    /// Attaches a remote tier.
    pub fn remote(mut self, remote: RemoteBackend) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Sets the TTL policy.
    pub fn policy(mut self, policy: TtlPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets the memory-tier TTL cap for remote refills.
    pub fn refill_cap(mut self, cap: Duration) -> Self {
        self.refill_cap = cap;
        self
    }

    /// Configures the breaker guarding the remote tier.
    pub fn breaker_config(mut self, config: BreakerConfig) -> Self {
        self.breaker_config = config;
        self
    }

    /// Builds the cache.
    pub fn build(self) -> HybridCache {
        HybridCache {
            memory: MemoryBackend::builder().max_entries(self.max_entries).build(),
            remote: self.remote,
            remote_breaker: Arc::new(CircuitBreaker::new("cache:remote", self.breaker_config)),
            policy: self.policy,
            stats: CacheStats::default(),
            refill_cap: self.refill_cap,
        }
    }
}

impl HybridCache {
    /// Creates a builder with a 10 000-entry memory tier, no remote tier,
    /// and default TTL policy.
    pub fn builder() -> HybridCacheBuilder {
        HybridCacheBuilder {
            max_entries: 10_000,
            remote: None,
            policy: TtlPolicy::default(),
            refill_cap: DEFAULT_REFILL_CAP,
            breaker_config: BreakerConfig {
                failure_threshold: 3,
                cooloff: Duration::from_secs(30),
                probe_count: 1,
            },
        }
    }

    /// The TTL policy in effect.
    pub fn policy(&self) -> &TtlPolicy {
        &self.policy
    }

    /// Whether a remote tier is configured.
    pub fn remote_configured(&self) -> bool {
        self.remote.is_some()
    }

    /// Whether the remote tier is currently suppressed by its breaker.
    pub fn remote_degraded(&self) -> bool {
        self.remote_breaker.is_open()
    }

    /// Reads an entry, consulting both tiers.
    pub async fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        // T1 reads are infallible.
        if let Ok(Some(entry)) = self.memory.read(key).await {
            self.stats.record_hit(key.kind());
            return Some(entry);
        }

        if let Some(entry) = self.remote_get(key).await {
            self.stats.record_hit(key.kind());
            return Some(entry);
        }

        self.stats.record_miss(key.kind());
        None
    }

    async fn remote_get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let remote = self.remote.as_ref()?;
        if self.remote_breaker.try_call().is_err() {
            debug!(key = %key, "remote tier suppressed by breaker");
            return None;
        }

        match remote.read(key).await {
            Ok(Some(entry)) => {
                self.remote_breaker.record_success();
                if entry.is_expired(Utc::now()) {
                    self.remove_remote_quietly(key);
                    return None;
                }
                // Refill T1 with the remaining lifetime, capped.
                let remaining = entry.remaining_ttl(Utc::now()).unwrap_or(self.refill_cap);
                let refill = CacheEntry::new(entry.payload().clone(), entry.kind(), remaining)
                    .with_ttl_capped(self.refill_cap);
                if let Err(err) = self.memory.write(key, refill).await {
                    warn!(key = %key, error = %err, "memory refill failed");
                }
                Some(entry)
            }
            Ok(None) => {
                self.remote_breaker.record_success();
                None
            }
            Err(CacheError::Corrupted(reason)) => {
                // The tier responded; the payload is the problem. Treat as a
                // miss and drop the entry so the next write replaces it.
                self.remote_breaker.record_success();
                warn!(key = %key, reason, "corrupted remote entry, deleting");
                self.remove_remote_quietly(key);
                None
            }
            Err(err) => {
                self.remote_breaker.record_failure();
                warn!(key = %key, error = %err, "remote tier read failed");
                None
            }
        }
    }

    fn remove_remote_quietly(&self, key: &CacheKey) {
        if let Some(remote) = self.remote.clone() {
            let key = key.clone();
            tokio::spawn(async move {
                if let Err(err) = remote.remove(&key).await {
                    debug!(key = %key, error = %err, "opportunistic remote delete failed");
                }
            });
        }
    }

    /// Writes a payload under the policy TTL for its kind.
    ///
    /// The memory write completes before this returns; the remote write is
    /// fire-and-forget and its failure is logged, not propagated.
    pub async fn put(&self, key: &CacheKey, payload: Bytes) -> CacheResult<()> {
        let ttl = self.policy.ttl_for(key.kind());
        let entry = CacheEntry::new(payload, key.kind(), ttl);
        self.memory.write(key, entry.clone()).await?;

        if let Some(remote) = self.remote.clone() {
            if self.remote_breaker.try_call().is_err() {
                return Ok(());
            }
            let breaker = Arc::clone(&self.remote_breaker);
            let key = key.clone();
            tokio::spawn(async move {
                match remote.write(&key, entry).await {
                    Ok(()) => breaker.record_success(),
                    Err(err) => {
                        breaker.record_failure();
                        warn!(key = %key, error = %err, "remote tier write failed");
                    }
                }
            });
        }
        Ok(())
    }

    /// Deletes a key from both tiers.
    pub async fn delete(&self, key: &CacheKey) -> CacheResult<()> {
        self.memory.remove(key).await?;
        if let Some(remote) = self.remote.as_ref()
            && self.remote_breaker.try_call().is_ok()
        {
            match remote.remove(key).await {
                Ok(_) => self.remote_breaker.record_success(),
                Err(err) => {
                    self.remote_breaker.record_failure();
                    warn!(key = %key, error = %err, "remote tier delete failed");
                }
            }
        }
        Ok(())
    }

    /// Clears every entry in both tiers.
    pub async fn clear_all(&self) -> CacheResult<()> {
        self.memory.clear().await?;
        if let Some(remote) = self.remote.as_ref()
            && self.remote_breaker.try_call().is_ok()
            && let Err(err) = remote.clear().await
        {
            self.remote_breaker.record_failure();
            warn!(error = %err, "remote tier clear failed");
        }
        Ok(())
    }

    /// Clears every entry of one content kind; other kinds are untouched.
    pub async fn clear_kind(&self, kind: ContentKind) -> CacheResult<()> {
        self.memory.clear_kind(kind).await?;
        if let Some(remote) = self.remote.as_ref()
            && self.remote_breaker.try_call().is_ok()
            && let Err(err) = remote.clear_kind(kind).await
        {
            self.remote_breaker.record_failure();
            warn!(kind = %kind, error = %err, "remote tier clear-kind failed");
        }
        Ok(())
    }

    /// Reads and JSON-decodes a cached value.
    ///
    /// A payload that fails to decode is treated as a miss and deleted, the
    /// same discipline applied to corrupted remote payloads.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let entry = self.get(key).await?;
        match serde_json::from_slice(entry.payload()) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(key = %key, error = %err, "cached payload failed to decode, dropping");
                let _ = self.memory.remove(key).await;
                self.remove_remote_quietly(key);
                None
            }
        }
    }

    /// JSON-encodes and writes a value.
    pub async fn put_json<T: Serialize>(&self, key: &CacheKey, value: &T) -> CacheResult<()> {
        let payload = serde_json::to_vec(value)?;
        self.put(key, Bytes::from(payload)).await
    }

    /// Statistics snapshot.
    pub fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot(self.memory.memory_bytes())
    }

    /// Resets statistics counters.
    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    /// Spawns the periodic expiry sweep over the memory tier.
    pub fn start_sweeper(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                cache.memory.sweep_expired().await;
            }
        })
    }

}
