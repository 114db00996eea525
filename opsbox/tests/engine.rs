//! End-to-end engine scenarios over scriptable adapters.

mod support;

use std::sync::Arc;
use std::time::Duration;

use opsbox::{EngineConfig, ErrorCode, RegistryConfig};
use opsbox_core::{ContentKind, SearchFilters, SourceAdapter};
use opsbox_resilience::BreakerConfig;

use support::{Behavior, MockAdapter, build_engine, critical_db_alert, db_cpu_runbook};

fn fast_adapter(name: &str, priority: u32) -> MockAdapter {
    MockAdapter::new(
        name,
        priority,
        Behavior::Ok {
            delay: Duration::ZERO,
        },
    )
}

#[tokio::test]
async fn cache_warm_path_second_call_hits() {
    let adapter = Arc::new(fast_adapter("docs", 1).with_runbook(db_cpu_runbook()));
    let engine = build_engine(
        vec![adapter as Arc<dyn SourceAdapter>],
        RegistryConfig::default(),
        EngineConfig::default(),
    );
    let alert = critical_db_alert();

    let first = engine.search_runbooks(&alert, "corr-1").await.unwrap();
    assert!(!first.cache_hit);
    assert_eq!(first.data.len(), 1);
    assert_eq!(first.data[0].runbook.id, "rb-db-cpu");
    assert!(
        first.data[0].confidence >= 0.8,
        "confidence {} below 0.8",
        first.data[0].confidence
    );

    let second = engine.search_runbooks(&alert, "corr-2").await.unwrap();
    assert!(second.cache_hit);
    assert!(second.retrieval_time_ms < 50);
    assert_eq!(second.data[0].runbook.id, first.data[0].runbook.id);
    assert_eq!(second.data[0].confidence, first.data[0].confidence);
    assert_eq!(second.data[0].match_reasons, first.data[0].match_reasons);
}

#[tokio::test]
async fn breaker_trips_after_threshold_and_skips_adapter() {
    let adapter = Arc::new(MockAdapter::new("flaky", 1, Behavior::FailTransient));
    let registry_config = RegistryConfig {
        breaker: BreakerConfig {
            failure_threshold: 3,
            cooloff: Duration::from_secs(60),
            probe_count: 1,
        },
        ..RegistryConfig::default()
    };
    let engine = build_engine(
        vec![Arc::clone(&adapter) as Arc<dyn SourceAdapter>],
        registry_config,
        EngineConfig::default(),
    );

    // First three calls reach the adapter and fail hard.
    for i in 0..3 {
        let err = engine
            .search_knowledge_base("anything", &SearchFilters::default(), "corr")
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ServiceUnavailable, "call {i}");
    }
    assert_eq!(adapter.call_count(), 3);

    // Calls four and five short-circuit: no outbound call, CIRCUIT_OPEN
    // annotation, empty degraded success.
    for _ in 0..2 {
        let response = engine
            .search_knowledge_base("anything", &SearchFilters::default(), "corr")
            .await
            .unwrap();
        assert!(response.data.is_empty());
        assert!(response.degraded);
        assert_eq!(response.adapter_errors.len(), 1);
        assert_eq!(response.adapter_errors[0].code, ErrorCode::CircuitOpen);
    }
    assert_eq!(adapter.call_count(), 3, "open breaker must stop outbound calls");
}

#[tokio::test]
async fn partial_deadline_keeps_fast_adapter_results() {
    let fast = Arc::new(fast_adapter("fast", 1).with_runbook(db_cpu_runbook()));
    let hanging = Arc::new(MockAdapter::new("hanging", 2, Behavior::Hang));
    let engine = build_engine(
        vec![
            Arc::clone(&fast) as Arc<dyn SourceAdapter>,
            Arc::clone(&hanging) as Arc<dyn SourceAdapter>,
        ],
        RegistryConfig::default(),
        EngineConfig {
            adapter_timeout: Duration::from_secs(5),
            overall_timeout: Duration::from_millis(200),
            max_results: 10,
        },
    );

    let response = engine
        .search_runbooks(&critical_db_alert(), "corr")
        .await
        .unwrap();
    assert_eq!(response.data.len(), 1);
    assert_eq!(response.data[0].source, "fast");
    assert!(response.degraded);
    let hanging_error = response
        .adapter_errors
        .iter()
        .find(|f| f.adapter.as_str() == "hanging")
        .expect("hanging adapter must be annotated");
    assert_eq!(hanging_error.code, ErrorCode::RequestTimeout);
}

#[tokio::test]
async fn zero_overall_deadline_fails_before_fan_out() {
    let adapter = Arc::new(fast_adapter("docs", 1).with_runbook(db_cpu_runbook()));
    let engine = build_engine(
        vec![Arc::clone(&adapter) as Arc<dyn SourceAdapter>],
        RegistryConfig::default(),
        EngineConfig {
            overall_timeout: Duration::ZERO,
            ..EngineConfig::default()
        },
    );

    let err = engine
        .search_runbooks(&critical_db_alert(), "corr")
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::RequestTimeout);
    assert_eq!(adapter.call_count(), 0, "no fan-out may happen");
}

#[tokio::test]
async fn empty_source_set_returns_empty_success() {
    let engine = build_engine(
        Vec::new(),
        RegistryConfig::default(),
        EngineConfig::default(),
    );
    let response = engine
        .search_runbooks(&critical_db_alert(), "corr")
        .await
        .unwrap();
    assert!(response.data.is_empty());
    assert!(!response.degraded);

    let response = engine
        .search_knowledge_base("db", &SearchFilters::default(), "corr")
        .await
        .unwrap();
    assert!(response.data.is_empty());
}

#[tokio::test]
async fn clear_by_kind_leaves_other_kinds_cached() {
    let adapter = Arc::new(fast_adapter("docs", 1).with_runbook(db_cpu_runbook()));
    let engine = build_engine(
        vec![adapter as Arc<dyn SourceAdapter>],
        RegistryConfig::default(),
        EngineConfig::default(),
    );
    let alert = critical_db_alert();

    // Populate a runbook-kind entry and a procedure-kind entry.
    engine.search_runbooks(&alert, "corr").await.unwrap();
    engine
        .get_procedure("rb-db-cpu", "investigate_queries", "corr")
        .await
        .unwrap();

    engine.cache().clear_kind(ContentKind::Runbooks).await.unwrap();

    // Runbook search misses cache again; procedure still hits.
    let runbooks = engine.search_runbooks(&alert, "corr").await.unwrap();
    assert!(!runbooks.cache_hit);
    let procedure = engine
        .get_procedure("rb-db-cpu", "investigate_queries", "corr")
        .await
        .unwrap();
    assert!(procedure.cache_hit);
}

#[tokio::test]
async fn get_procedure_resolves_by_id_and_name() {
    let adapter = Arc::new(fast_adapter("docs", 1).with_runbook(db_cpu_runbook()));
    let engine = build_engine(
        vec![adapter as Arc<dyn SourceAdapter>],
        RegistryConfig::default(),
        EngineConfig::default(),
    );

    let by_id = engine
        .get_procedure("rb-db-cpu", "investigate_queries", "corr")
        .await
        .unwrap();
    assert_eq!(by_id.data.id, "investigate_queries");

    let by_name = engine
        .get_procedure("rb-db-cpu", "Investigate slow queries", "corr")
        .await
        .unwrap();
    assert_eq!(by_name.data.id, "investigate_queries");

    let missing = engine
        .get_procedure("rb-db-cpu", "no_such_procedure", "corr")
        .await
        .unwrap_err();
    assert_eq!(missing.code, ErrorCode::NotFound);

    let missing_runbook = engine
        .get_procedure("rb-unknown", "whatever", "corr")
        .await
        .unwrap_err();
    assert_eq!(missing_runbook.code, ErrorCode::NotFound);
}

#[tokio::test]
async fn decision_tree_comes_from_best_match() {
    let adapter = Arc::new(fast_adapter("docs", 1).with_runbook(db_cpu_runbook()));
    let engine = build_engine(
        vec![adapter as Arc<dyn SourceAdapter>],
        RegistryConfig::default(),
        EngineConfig::default(),
    );

    let response = engine
        .get_decision_tree(&critical_db_alert(), "corr")
        .await
        .unwrap();
    assert_eq!(response.data.runbook_id, "rb-db-cpu");
    assert!(response.data.branch_confidences.contains_key("yes"));
    assert!(response.data.branch_confidences.contains_key("no"));

    // Every branch confidence is bounded by the match confidence.
    for confidence in response.data.branch_confidences.values() {
        assert!(*confidence <= response.confidence);
    }
}

#[tokio::test]
async fn fusion_prefers_highest_score_then_priority() {
    // Both adapters return the same runbook id; the higher-priority (lower
    // number) adapter must win the tie.
    let primary = Arc::new(fast_adapter("primary", 1).with_runbook(db_cpu_runbook()));
    let secondary = Arc::new(fast_adapter("secondary", 5).with_runbook(db_cpu_runbook()));
    let engine = build_engine(
        vec![
            primary as Arc<dyn SourceAdapter>,
            secondary as Arc<dyn SourceAdapter>,
        ],
        RegistryConfig::default(),
        EngineConfig::default(),
    );

    let response = engine
        .search_runbooks(&critical_db_alert(), "corr")
        .await
        .unwrap();
    assert_eq!(response.data.len(), 1, "duplicates must fuse");
    assert_eq!(response.data[0].source, "primary");
}

#[tokio::test]
async fn ranked_lists_are_sorted_and_bounded() {
    let mut adapter = fast_adapter("docs", 1);
    for i in 0..5 {
        adapter = adapter.with_document(opsbox_core::Document {
            id: smol_str::SmolStr::new(format!("doc-{i}")),
            title: format!("database doc {i}"),
            body: "database troubleshooting".to_owned(),
            source: smol_str::SmolStr::new("docs"),
            source_kind: opsbox_core::SourceKind::File,
            uri: format!("file:///doc-{i}"),
            category: opsbox_core::Category::Guide,
            updated_at: chrono::Utc::now(),
            metadata: Default::default(),
        });
    }
    let engine = build_engine(
        vec![Arc::new(adapter) as Arc<dyn SourceAdapter>],
        RegistryConfig::default(),
        EngineConfig::default(),
    );

    let filters = SearchFilters {
        max_results: Some(3),
        ..SearchFilters::default()
    };
    let response = engine
        .search_knowledge_base("database", &filters, "corr")
        .await
        .unwrap();
    assert_eq!(response.data.len(), 3);
    for pair in response.data.windows(2) {
        assert!(pair[0].confidence >= pair[1].confidence);
    }
    for result in &response.data {
        assert!((0.0..=1.0).contains(&result.confidence));
    }
}
