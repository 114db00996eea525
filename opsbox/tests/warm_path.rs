//! The cache warm path over a real filesystem source.

use std::sync::Arc;

use opsbox::{
    AdapterRegistry, EngineConfig, QueryEngine, RegistryConfig,
};
use opsbox_cache::{CacheWarmer, HybridCache};
use opsbox_core::{AlertContext, ContentKind, Severity, SourceAdapter};
use opsbox_file::{FileSystemAdapter, FileSystemConfig};

const RUNBOOK_JSON: &str = r#"{
    "id": "rb-db-cpu",
    "title": "Database CPU Runbook",
    "triggers": [{
        "alert_type": "high_cpu",
        "severity": ["critical"],
        "systems": ["database"]
    }],
    "decision_tree": {"root": {"type": "action", "action": "investigate_queries"}},
    "procedures": [{
        "id": "investigate_queries",
        "name": "Investigate slow queries",
        "steps": [{"action": "List the slowest queries"}]
    }]
}"#;

async fn engine_over_fixture(dir: &tempfile::TempDir) -> Arc<QueryEngine> {
    std::fs::write(dir.path().join("rb-db-cpu.json"), RUNBOOK_JSON).unwrap();
    let adapter =
        Arc::new(FileSystemAdapter::new(FileSystemConfig::new("docs", dir.path())).unwrap());
    adapter.initialize().await.unwrap();

    let mut registry = AdapterRegistry::new(RegistryConfig::default());
    registry.register(adapter);
    let cache = Arc::new(HybridCache::builder().max_entries(256).build());
    Arc::new(QueryEngine::new(
        Arc::new(registry),
        cache,
        EngineConfig::default(),
    ))
}

#[tokio::test]
async fn warm_path_over_filesystem_source() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_over_fixture(&dir).await;
    let alert = AlertContext::new("high_cpu", Severity::Critical, ["database".to_owned()]);

    let first = engine.search_runbooks(&alert, "corr-1").await.unwrap();
    assert!(!first.cache_hit);
    assert_eq!(first.data.len(), 1);
    assert_eq!(first.data[0].runbook.id, "rb-db-cpu");
    assert!(first.data[0].confidence >= 0.8);

    let second = engine.search_runbooks(&alert, "corr-2").await.unwrap();
    assert!(second.cache_hit);
    assert!(second.retrieval_time_ms < 50);
    assert_eq!(second.data[0].confidence, first.data[0].confidence);
    assert_eq!(second.data[0].match_reasons, first.data[0].match_reasons);
}

#[tokio::test]
async fn warmer_populates_critical_runbooks() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_over_fixture(&dir).await;
    let cache = Arc::clone(engine.cache());

    let warmer = CacheWarmer::new(
        Arc::clone(&cache),
        vec![(ContentKind::Runbooks, "rb-db-cpu".to_owned())],
    );
    let warmed = warmer.spawn(engine.clone()).await.unwrap();
    assert_eq!(warmed, 1);

    // A warmed runbook resolves without touching the adapters again.
    let found = engine.find_runbook("rb-db-cpu", "corr").await.unwrap().unwrap();
    assert_eq!(found.runbook.id, "rb-db-cpu");
}
