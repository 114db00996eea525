//! Tool dispatcher validation and response shaping.

mod support;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use opsbox::{
    EngineConfig, ErrorCode, EscalationPolicy, FeedbackSink, PerformanceMonitor, RegistryConfig,
    ToolDispatcher, ToolRequest,
};
use opsbox_core::SourceAdapter;
use support::{Behavior, MockAdapter, build_engine, db_cpu_runbook};

async fn dispatcher_with_fixture(dir: &tempfile::TempDir) -> ToolDispatcher {
    let adapter = Arc::new(
        MockAdapter::new(
            "docs",
            1,
            Behavior::Ok {
                delay: Duration::ZERO,
            },
        )
        .with_runbook(db_cpu_runbook()),
    );
    let engine = build_engine(
        vec![adapter as Arc<dyn SourceAdapter>],
        RegistryConfig::default(),
        EngineConfig::default(),
    );
    let feedback = Arc::new(
        FeedbackSink::open(dir.path().join("feedback.jsonl"))
            .await
            .unwrap(),
    );
    ToolDispatcher::new(
        engine,
        EscalationPolicy::default(),
        feedback,
        Arc::new(PerformanceMonitor::default()),
    )
}

fn request(tool: &str, arguments: serde_json::Value) -> ToolRequest {
    ToolRequest {
        tool: tool.to_owned(),
        arguments,
        correlation_id: Some("corr-test".to_owned()),
    }
}

#[tokio::test]
async fn search_runbooks_shapes_the_envelope() {
    let dir = tempfile::tempdir().unwrap();
    let dispatcher = dispatcher_with_fixture(&dir).await;

    let response = dispatcher
        .dispatch(request(
            "search_runbooks",
            json!({
                "alert_type": "high_cpu",
                "severity": "critical",
                "affected_systems": ["database"],
            }),
        ))
        .await;

    assert!(response.success, "error: {:?}", response.error);
    assert_eq!(response.metadata.correlation_id, "corr-test");
    let data = response.data.unwrap();
    assert_eq!(data["total_results"], 1);
    assert!(data["confidence_score"].as_f64().unwrap() >= 0.8);
    assert!(data["match_reasons"].as_array().unwrap().len() > 1);
    assert_eq!(data["cache_hit"], false);
    assert!(data["retrieval_time_ms"].is_u64());
    assert_eq!(data["source"], "docs");
}

#[tokio::test]
async fn repeated_search_reports_cache_hit_in_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let dispatcher = dispatcher_with_fixture(&dir).await;
    let args = json!({
        "alert_type": "high_cpu",
        "severity": "critical",
        "affected_systems": ["database"],
    });

    let first = dispatcher.dispatch(request("search_runbooks", args.clone())).await;
    let second = dispatcher.dispatch(request("search_runbooks", args)).await;
    assert!(!first.metadata.cache_hit);
    assert!(second.metadata.cache_hit);
    assert_eq!(
        first.data.unwrap()["runbooks"],
        second.data.unwrap()["runbooks"]
    );
}

#[tokio::test]
async fn invalid_arguments_fail_validation() {
    let dir = tempfile::tempdir().unwrap();
    let dispatcher = dispatcher_with_fixture(&dir).await;

    // Missing required field.
    let response = dispatcher
        .dispatch(request("search_runbooks", json!({"severity": "critical"})))
        .await;
    assert!(!response.success);
    assert_eq!(response.error.as_ref().unwrap().code, ErrorCode::ValidationError);
    assert!(!response.error.unwrap().details.retry_recommended);

    // Bad enum value.
    let response = dispatcher
        .dispatch(request(
            "search_runbooks",
            json!({"alert_type": "x", "severity": "catastrophic"}),
        ))
        .await;
    assert_eq!(response.error.unwrap().code, ErrorCode::ValidationError);

    // Unknown tool.
    let response = dispatcher.dispatch(request("search_everything", json!({}))).await;
    assert_eq!(response.error.as_ref().unwrap().code, ErrorCode::ValidationError);
    assert_eq!(response.http_status(), 400);
}

#[tokio::test]
async fn get_procedure_requires_a_key() {
    let dir = tempfile::tempdir().unwrap();
    let dispatcher = dispatcher_with_fixture(&dir).await;

    let response = dispatcher
        .dispatch(request("get_procedure", json!({"runbook_id": "rb-db-cpu"})))
        .await;
    assert_eq!(response.error.unwrap().code, ErrorCode::ValidationError);

    let response = dispatcher
        .dispatch(request(
            "get_procedure",
            json!({"runbook_id": "rb-db-cpu", "procedure_id": "investigate_queries"}),
        ))
        .await;
    assert!(response.success);
    let data = response.data.unwrap();
    assert_eq!(data["procedure"]["id"], "investigate_queries");
}

#[tokio::test]
async fn escalation_path_honors_severity_and_hours() {
    let dir = tempfile::tempdir().unwrap();
    let dispatcher = dispatcher_with_fixture(&dir).await;

    let response = dispatcher
        .dispatch(request(
            "get_escalation_path",
            json!({"severity": "critical", "business_hours": true}),
        ))
        .await;
    let data = response.data.unwrap();
    let contacts = data["contacts"].as_array().unwrap();
    assert_eq!(contacts[0]["name"], "on-call engineer");

    let response = dispatcher
        .dispatch(request(
            "get_escalation_path",
            json!({
                "severity": "critical",
                "business_hours": true,
                "failed_attempts": ["on-call engineer"],
            }),
        ))
        .await;
    let data = response.data.unwrap();
    assert_eq!(data["contacts"][0]["name"], "secondary on-call");
}

#[tokio::test]
async fn feedback_appends_exactly_one_record() {
    let dir = tempfile::tempdir().unwrap();
    let dispatcher = dispatcher_with_fixture(&dir).await;

    let response = dispatcher
        .dispatch(request(
            "record_resolution_feedback",
            json!({
                "runbook_id": "rb-db-cpu",
                "procedure_id": "investigate_queries",
                "outcome": "success",
                "resolution_time_minutes": 12,
            }),
        ))
        .await;
    assert!(response.success);
    assert_eq!(response.data.unwrap()["recorded"], true);

    let log = std::fs::read_to_string(dir.path().join("feedback.jsonl")).unwrap();
    let lines: Vec<&str> = log.lines().collect();
    assert_eq!(lines.len(), 1);
    let record: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(record["runbook_id"], "rb-db-cpu");
    assert_eq!(record["procedure_id"], "investigate_queries");
    assert_eq!(record["outcome"], "success");
    assert_eq!(record["resolution_time_minutes"], 12);
    assert!(record["timestamp"].is_string());

    // Feedback does not rerank: a subsequent search is unchanged.
    let search = dispatcher
        .dispatch(request(
            "search_runbooks",
            json!({
                "alert_type": "high_cpu",
                "severity": "critical",
                "affected_systems": ["database"],
            }),
        ))
        .await;
    assert!(search.success);
    assert_eq!(search.data.unwrap()["total_results"], 1);
}

#[tokio::test]
async fn list_sources_reports_health_and_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let dispatcher = dispatcher_with_fixture(&dir).await;

    let response = dispatcher.dispatch(request("list_sources", json!({}))).await;
    assert!(response.success);
    let data = response.data.unwrap();
    let sources = data["sources"].as_array().unwrap();
    assert_eq!(sources.len(), 1);
    assert_eq!(sources[0]["name"], "docs");
    assert_eq!(sources[0]["kind"], "file");
    assert_eq!(sources[0]["healthy"], true);
    assert_eq!(sources[0]["breaker"], "closed");
    assert!(sources[0]["metadata"]["document_count"].is_u64());
}

#[tokio::test]
async fn unknown_correlation_id_is_generated() {
    let dir = tempfile::tempdir().unwrap();
    let dispatcher = dispatcher_with_fixture(&dir).await;
    let response = dispatcher
        .dispatch(ToolRequest {
            tool: "list_sources".to_owned(),
            arguments: json!({}),
            correlation_id: None,
        })
        .await;
    assert!(!response.metadata.correlation_id.is_empty());
}

#[tokio::test]
async fn monitor_sees_dispatched_tools() {
    let dir = tempfile::tempdir().unwrap();
    let dispatcher = dispatcher_with_fixture(&dir).await;
    dispatcher.dispatch(request("list_sources", json!({}))).await;
    dispatcher.dispatch(request("bogus_tool", json!({}))).await;

    let report = dispatcher.monitor().report();
    assert_eq!(report.tools[&smol_str::SmolStr::new("list_sources")].invocations, 1);
    assert_eq!(report.tools[&smol_str::SmolStr::new("bogus_tool")].errors, 1);
}
