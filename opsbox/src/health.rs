//! Roll-up of per-component health.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use opsbox_cache::HybridCache;
use opsbox_core::HealthSnapshot;

use crate::registry::AdapterRegistry;

/// Aggregated service health.
#[derive(Debug, Clone, Serialize)]
pub struct OverallHealth {
    /// Overall verdict.
    pub healthy: bool,
    /// Per-component snapshots, keyed by component name.
    pub components: BTreeMap<String, HealthSnapshot>,
}

/// Rolls per-component health into one snapshot.
///
/// Overall health requires a healthy memory cache and at least one healthy
/// adapter. A degraded remote cache tier is reported but never degrades
/// the overall verdict.
pub struct HealthAggregator {
    registry: Arc<AdapterRegistry>,
    cache: Arc<HybridCache>,
}

impl HealthAggregator {
    /// Creates the aggregator.
    pub fn new(registry: Arc<AdapterRegistry>, cache: Arc<HybridCache>) -> Self {
        Self { registry, cache }
    }

    /// Takes a full health snapshot, probing every adapter.
    pub async fn check(&self) -> OverallHealth {
        let mut components = BTreeMap::new();

        // The memory tier is in-process: healthy as long as we run.
        components.insert("cache:memory".to_owned(), HealthSnapshot::healthy());
        if self.cache.remote_configured() {
            let snapshot = if self.cache.remote_degraded() {
                HealthSnapshot::unhealthy("remote tier suppressed by breaker")
            } else {
                HealthSnapshot::healthy()
            };
            components.insert("cache:remote".to_owned(), snapshot);
        }

        let mut any_adapter_healthy = self.registry.adapters().is_empty();
        for adapter in self.registry.adapters() {
            let snapshot = adapter.health_check().await;
            any_adapter_healthy |= snapshot.healthy;
            components.insert(format!("adapter:{}", adapter.name()), snapshot);
        }

        OverallHealth {
            healthy: any_adapter_healthy,
            components,
        }
    }
}
