//! Startup cache warming.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, info, warn};

use opsbox_core::ContentKind;

use crate::entry::CacheKey;
use crate::hybrid::HybridCache;

/// Loader consulted by the warmer for critical-set entries.
///
/// The query engine implements this by resolving the identifier through the
/// adapter registry.
#[async_trait]
pub trait WarmSource: Send + Sync {
    /// Loads the payload for a critical entry, or `None` when the
    /// identifier no longer resolves.
    async fn load(&self, kind: ContentKind, id: &str) -> Option<Bytes>;
}

/// Pre-populates the cache with the configured critical set.
///
/// Only entries whose content kind carries the `warm` flag in the TTL
/// policy are loaded. Warming runs asynchronously after startup; failures
/// are logged and skipped, never fatal.
pub struct CacheWarmer {
    cache: Arc<HybridCache>,
    critical_set: Vec<(ContentKind, String)>,
}

impl CacheWarmer {
    /// Creates a warmer over the given critical set.
    pub fn new(cache: Arc<HybridCache>, critical_set: Vec<(ContentKind, String)>) -> Self {
        Self {
            cache,
            critical_set,
        }
    }

    /// Spawns the warm task. Resolves to the number of entries populated.
    pub fn spawn(self, source: Arc<dyn WarmSource>) -> tokio::task::JoinHandle<usize> {
        tokio::spawn(async move {
            let warm_kinds = self.cache.policy().warm_kinds();
            let mut warmed = 0usize;
            for (kind, id) in &self.critical_set {
                if !warm_kinds.contains(kind) {
                    debug!(kind = %kind, id, "skipping non-warmup kind");
                    continue;
                }
                match source.load(*kind, id).await {
                    Some(payload) => {
                        let key = CacheKey::new(*kind, id.as_str());
                        if let Err(err) = self.cache.put(&key, payload).await {
                            warn!(key = %key, error = %err, "warm write failed");
                        } else {
                            warmed += 1;
                        }
                    }
                    None => warn!(kind = %kind, id, "critical entry did not resolve"),
                }
            }
            info!(warmed, total = self.critical_set.len(), "cache warmup finished");
            warmed
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticSource;

    #[async_trait]
    impl WarmSource for StaticSource {
        async fn load(&self, _kind: ContentKind, id: &str) -> Option<Bytes> {
            (id != "gone").then(|| Bytes::from(format!("{{\"id\":\"{id}\"}}")))
        }
    }

    #[tokio::test]
    async fn warms_only_flagged_kinds() {
        let cache = Arc::new(HybridCache::builder().max_entries(16).build());
        let warmer = CacheWarmer::new(
            Arc::clone(&cache),
            vec![
                (ContentKind::Runbooks, "rb-1".to_owned()),
                (ContentKind::Runbooks, "gone".to_owned()),
                (ContentKind::General, "g-1".to_owned()),
            ],
        );
        let warmed = warmer.spawn(Arc::new(StaticSource)).await.unwrap();
        // Default policy warms runbooks only; "gone" fails to resolve.
        assert_eq!(warmed, 1);
        assert!(
            cache
                .get(&CacheKey::new(ContentKind::Runbooks, "rb-1"))
                .await
                .is_some()
        );
        assert!(
            cache
                .get(&CacheKey::new(ContentKind::General, "g-1"))
                .await
                .is_none()
        );
    }
}
