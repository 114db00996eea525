//! HTTP ingress tests over an in-process router.

use std::sync::Arc;

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use serde_json::{Value, json};
use tower::ServiceExt;

use opsbox_server::{App, AppConfig, http};

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

async fn test_app(dir: &tempfile::TempDir) -> Arc<App> {
    std::fs::create_dir_all(dir.path().join("docs")).unwrap();
    std::fs::write(dir.path().join("docs/rb-db-cpu.json"), RUNBOOK_JSON).unwrap();

    let yaml = format!(
        "sources:\n  - kind: file\n    name: docs\n    base_paths: [\"{}\"]\nfeedback:\n  path: \"{}\"\n",
        dir.path().join("docs").display(),
        dir.path().join("feedback.jsonl").display(),
    );
    let config = AppConfig::from_yaml(&yaml).unwrap();
    Arc::new(App::build(config).await.unwrap())
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn tool_request(tool: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(format!("/api/tools/{tool}"))
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-correlation-id", "http-test")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn search_runbooks_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(&dir).await;
    let router = http::router(Arc::clone(&app));

    let request = tool_request(
        "search_runbooks",
        json!({
            "alert_type": "high_cpu",
            "severity": "critical",
            "affected_systems": ["database"],
        }),
    );
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["metadata"]["correlation_id"], "http-test");
    assert_eq!(body["data"]["total_results"], 1);
    assert!(body["data"]["confidence_score"].as_f64().unwrap() >= 0.8);
    app.shutdown().await;
}

#[tokio::test]
async fn post_without_json_content_type_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(&dir).await;
    let router = http::router(Arc::clone(&app));

    let request = Request::builder()
        .method("POST")
        .uri("/api/tools/search_runbooks")
        .body(Body::from("{}"))
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    app.shutdown().await;
}

#[tokio::test]
async fn unknown_tool_maps_to_400() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(&dir).await;
    let router = http::router(Arc::clone(&app));

    let response = router
        .oneshot(tool_request("search_everything", json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    assert_eq!(body["error"]["details"]["retry_recommended"], false);
    app.shutdown().await;
}

#[tokio::test]
async fn validation_error_carries_details() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(&dir).await;
    let router = http::router(Arc::clone(&app));

    let response = router
        .oneshot(tool_request("search_runbooks", json!({"severity": "critical"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    assert_eq!(body["error"]["details"]["correlation_id"], "http-test");
    assert!(body["error"]["details"]["recovery_actions"].is_array());
    app.shutdown().await;
}

#[tokio::test]
async fn health_and_observability_endpoints() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(&dir).await;
    let router = http::router(Arc::clone(&app));

    let response = router
        .clone()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["healthy"], true);
    assert_eq!(body["components"]["adapter:docs"]["healthy"], true);
    assert_eq!(body["components"]["cache:memory"]["healthy"], true);

    let response = router
        .clone()
        .oneshot(Request::get("/api/sources").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["sources"][0]["name"], "docs");

    let response = router
        .clone()
        .oneshot(Request::get("/api/performance").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = router
        .oneshot(Request::get("/api/cache/stats").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["remote_configured"], false);
    app.shutdown().await;
}

#[tokio::test]
async fn cache_invalidate_clears_by_kind() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(&dir).await;
    let router = http::router(Arc::clone(&app));

    let search = json!({
        "alert_type": "high_cpu",
        "severity": "critical",
        "affected_systems": ["database"],
    });
    router
        .clone()
        .oneshot(tool_request("search_runbooks", search.clone()))
        .await
        .unwrap();
    let warm = router
        .clone()
        .oneshot(tool_request("search_runbooks", search.clone()))
        .await
        .unwrap();
    assert_eq!(body_json(warm).await["metadata"]["cache_hit"], true);

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/cache/invalidate")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json!({"kind": "runbooks"}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(body_json(response).await["cleared"], true);

    let cold = router
        .oneshot(tool_request("search_runbooks", search))
        .await
        .unwrap();
    assert_eq!(body_json(cold).await["metadata"]["cache_hit"], false);
    app.shutdown().await;
}
