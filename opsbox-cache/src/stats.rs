//! Cache statistics.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

use opsbox_core::ContentKind;

fn kind_index(kind: ContentKind) -> usize {
    ContentKind::ALL
        .iter()
        .position(|k| *k == kind)
        .unwrap_or(ContentKind::ALL.len() - 1)
}

#[derive(Default)]
struct KindCounters {
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Internally synchronized hit/miss counters.
///
/// Counter updates are relaxed; losing an occasional sample under contention
/// is acceptable.
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    per_kind: [KindCounters; 5],
    last_reset: Mutex<DateTime<Utc>>,
}

impl Default for CacheStats {
    fn default() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            per_kind: Default::default(),
            last_reset: Mutex::new(Utc::now()),
        }
    }
}

impl CacheStats {
    /// Records a hit for the given kind.
    pub fn record_hit(&self, kind: ContentKind) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        self.per_kind[kind_index(kind)].hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a miss for the given kind.
    pub fn record_miss(&self, kind: ContentKind) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        self.per_kind[kind_index(kind)].misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Zeroes all counters and stamps the reset time.
    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        for counters in &self.per_kind {
            counters.hits.store(0, Ordering::Relaxed);
            counters.misses.store(0, Ordering::Relaxed);
        }
        if let Ok(mut last_reset) = self.last_reset.lock() {
            *last_reset = Utc::now();
        }
    }

    /// Point-in-time snapshot; `memory_bytes` is supplied by the caller
    /// (the hybrid cache reads it off the memory tier).
    pub fn snapshot(&self, memory_bytes: u64) -> CacheStatsSnapshot {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let by_kind = ContentKind::ALL
            .iter()
            .map(|kind| {
                let counters = &self.per_kind[kind_index(*kind)];
                (
                    *kind,
                    KindStats {
                        hits: counters.hits.load(Ordering::Relaxed),
                        misses: counters.misses.load(Ordering::Relaxed),
                    },
                )
            })
            .collect();
        CacheStatsSnapshot {
            hits,
            misses,
            total_operations: total,
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
            by_kind,
            memory_bytes,
            last_reset: self
                .last_reset
                .lock()
                .map(|t| *t)
                .unwrap_or_else(|_| Utc::now()),
        }
    }
}

/// Per-kind hit/miss counts.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct KindStats {
    /// Hits for this kind.
    pub hits: u64,
    /// Misses for this kind.
    pub misses: u64,
}

/// Serializable statistics snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatsSnapshot {
    /// Total hits since the last reset.
    pub hits: u64,
    /// Total misses since the last reset.
    pub misses: u64,
    /// Hits plus misses.
    pub total_operations: u64,
    /// `hits / total_operations`, 0 when idle.
    pub hit_rate: f64,
    /// Counters broken down by content kind.
    pub by_kind: BTreeMap<ContentKind, KindStats>,
    /// Estimated bytes held by the memory tier.
    pub memory_bytes: u64,
    /// When the counters were last reset.
    pub last_reset: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_rate_math() {
        let stats = CacheStats::default();
        stats.record_hit(ContentKind::Runbooks);
        stats.record_hit(ContentKind::Runbooks);
        stats.record_miss(ContentKind::General);

        let snap = stats.snapshot(42);
        assert_eq!(snap.total_operations, 3);
        assert!((snap.hit_rate - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(snap.by_kind[&ContentKind::Runbooks].hits, 2);
        assert_eq!(snap.by_kind[&ContentKind::General].misses, 1);
        assert_eq!(snap.memory_bytes, 42);
    }

    #[test]
    fn reset_zeroes_counters() {
        let stats = CacheStats::default();
        stats.record_hit(ContentKind::Runbooks);
        let before = stats.snapshot(0).last_reset;
        stats.reset();
        let snap = stats.snapshot(0);
        assert_eq!(snap.total_operations, 0);
        assert!(snap.last_reset >= before);
    }
}
