//! HTTP/JSON ingress (axum).
//!
//! Mirrors the tool vocabulary as POST endpoints plus a small read-only
//! surface for health, sources, performance, and cache statistics. Every
//! response carries the same envelope as the stdio ingress plus an HTTP
//! status from the error taxonomy.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};

use opsbox::{ToolRequest, ToolResponse};
use opsbox_core::ContentKind;

use crate::app::App;

/// Header carrying the caller's correlation id.
const CORRELATION_HEADER: &str = "x-correlation-id";

/// Builds the service router.
pub fn router(app: Arc<App>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/sources", get(sources))
        .route("/api/performance", get(performance))
        .route("/api/cache/stats", get(cache_stats))
        .route("/api/cache/invalidate", post(cache_invalidate))
        .route("/api/tools/{tool}", post(call_tool))
        .with_state(app)
}

async fn health(State(app): State<Arc<App>>) -> Response {
    let overall = app.health.check().await;
    let status = if overall.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(overall)).into_response()
}

async fn sources(State(app): State<Arc<App>>, headers: HeaderMap) -> Response {
    let response = app
        .dispatcher
        .dispatch(ToolRequest {
            tool: "list_sources".to_owned(),
            arguments: Value::Object(Default::default()),
            correlation_id: correlation_id(&headers),
        })
        .await;
    envelope(response)
}

async fn performance(State(app): State<Arc<App>>) -> Response {
    Json(app.dispatcher.monitor().report()).into_response()
}

async fn cache_stats(State(app): State<Arc<App>>) -> Response {
    Json(json!({
        "stats": app.cache.stats(),
        "remote_configured": app.cache.remote_configured(),
        "remote_degraded": app.cache.remote_degraded(),
    }))
    .into_response()
}

#[derive(Debug, Deserialize)]
struct InvalidateRequest {
    /// Content kind to clear; everything when absent.
    #[serde(default)]
    kind: Option<ContentKind>,
}

async fn cache_invalidate(
    State(app): State<Arc<App>>,
    Json(request): Json<InvalidateRequest>,
) -> Response {
    let result = match request.kind {
        Some(kind) => app.cache.clear_kind(kind).await,
        None => app.cache.clear_all().await,
    };
    match result {
        Ok(()) => Json(json!({"cleared": true})).into_response(),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"cleared": false, "error": err.to_string()})),
        )
            .into_response(),
    }
}

async fn call_tool(
    State(app): State<Arc<App>>,
    Path(tool): Path<String>,
    headers: HeaderMap,
    Json(arguments): Json<Value>,
) -> Response {
    let response = app
        .dispatcher
        .dispatch(ToolRequest {
            tool,
            arguments,
            correlation_id: correlation_id(&headers),
        })
        .await;
    envelope(response)
}

fn correlation_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(CORRELATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

fn envelope(response: ToolResponse) -> Response {
    let status =
        StatusCode::from_u16(response.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(response)).into_response()
}
