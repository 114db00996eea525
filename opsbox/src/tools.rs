//! The seven tool verbs: input validation, dispatch, response shaping.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use opsbox_core::{AgentState, AlertContext, Category, SearchFilters, Severity};

use crate::engine::QueryEngine;
use crate::error::{ErrorCode, ToolError};
use crate::escalation::EscalationPolicy;
use crate::feedback::{FeedbackRecord, FeedbackSink, ResolutionOutcome};
use crate::monitor::PerformanceMonitor;
use crate::query::ToolKind;
use crate::registry::AdapterFailure;

/// A tool invocation as received from either ingress.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolRequest {
    /// Tool verb name.
    pub tool: String,
    /// Tool arguments object.
    #[serde(default)]
    pub arguments: Value,
    /// Caller-supplied correlation id; generated when absent.
    #[serde(default)]
    pub correlation_id: Option<String>,
}

/// Metadata block attached to every response.
#[derive(Debug, Clone, Serialize)]
pub struct ResponseMetadata {
    /// Correlation id echoed (or assigned) by the service.
    pub correlation_id: String,
    /// End-to-end execution time of the tool call.
    pub execution_time_ms: u64,
    /// Whether the answer came from cache.
    pub cache_hit: bool,
    /// Deadline fired or some adapters failed.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub degraded: bool,
    /// Per-adapter failure annotations.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub adapter_errors: Vec<AdapterFailure>,
}

/// The response envelope shared by both ingress surfaces.
#[derive(Debug, Clone, Serialize)]
pub struct ToolResponse {
    /// Whether the call succeeded.
    pub success: bool,
    /// Payload on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Structured error on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolError>,
    /// Metadata block.
    pub metadata: ResponseMetadata,
}

impl ToolResponse {
    /// HTTP status of this response.
    pub fn http_status(&self) -> u16 {
        self.error
            .as_ref()
            .map(|e| e.code.http_status())
            .unwrap_or(200)
    }
}

struct ToolOutput {
    data: Value,
    cache_hit: bool,
    degraded: bool,
    adapter_errors: Vec<AdapterFailure>,
}

impl ToolOutput {
    fn plain(data: Value) -> Self {
        Self {
            data,
            cache_hit: false,
            degraded: false,
            adapter_errors: Vec::new(),
        }
    }
}

/// Dispatches the fixed tool vocabulary against the engine.
pub struct ToolDispatcher {
    engine: Arc<QueryEngine>,
    escalation: EscalationPolicy,
    feedback: Arc<FeedbackSink>,
    monitor: Arc<PerformanceMonitor>,
}

impl ToolDispatcher {
    /// Creates the dispatcher.
    pub fn new(
        engine: Arc<QueryEngine>,
        escalation: EscalationPolicy,
        feedback: Arc<FeedbackSink>,
        monitor: Arc<PerformanceMonitor>,
    ) -> Self {
        Self {
            engine,
            escalation,
            feedback,
            monitor,
        }
    }

    /// The engine behind this dispatcher.
    pub fn engine(&self) -> &Arc<QueryEngine> {
        &self.engine
    }

    /// The performance monitor behind this dispatcher.
    pub fn monitor(&self) -> &Arc<PerformanceMonitor> {
        &self.monitor
    }

    /// Validates, executes, and shapes one tool invocation.
    pub async fn dispatch(&self, request: ToolRequest) -> ToolResponse {
        let started = Instant::now();
        let correlation_id = request
            .correlation_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let result = match ToolKind::from_name(&request.tool) {
            Some(tool) => self.run(tool, request.arguments, &correlation_id).await,
            None => Err(ToolError::new(
                ErrorCode::ValidationError,
                format!("unknown tool '{}'", request.tool),
                &correlation_id,
            )),
        };

        let execution_time_ms = started.elapsed().as_millis() as u64;
        let tool_name = request.tool.as_str();
        match result {
            Ok(output) => {
                self.monitor
                    .record(tool_name, started.elapsed(), true, output.cache_hit);
                crate::metrics::record_tool(tool_name, true, output.cache_hit, started.elapsed());
                ToolResponse {
                    success: true,
                    data: Some(output.data),
                    error: None,
                    metadata: ResponseMetadata {
                        correlation_id,
                        execution_time_ms,
                        cache_hit: output.cache_hit,
                        degraded: output.degraded,
                        adapter_errors: output.adapter_errors,
                    },
                }
            }
            Err(error) => {
                debug!(tool = tool_name, code = ?error.code, "tool call failed");
                self.monitor.record(tool_name, started.elapsed(), false, false);
                crate::metrics::record_tool(tool_name, false, false, started.elapsed());
                ToolResponse {
                    success: false,
                    data: None,
                    error: Some(error),
                    metadata: ResponseMetadata {
                        correlation_id,
                        execution_time_ms,
                        cache_hit: false,
                        degraded: false,
                        adapter_errors: Vec::new(),
                    },
                }
            }
        }
    }

    async fn run(
        &self,
        tool: ToolKind,
        arguments: Value,
        correlation_id: &str,
    ) -> Result<ToolOutput, ToolError> {
        match tool {
            ToolKind::SearchRunbooks => self.search_runbooks(arguments, correlation_id).await,
            ToolKind::GetDecisionTree => self.get_decision_tree(arguments, correlation_id).await,
            ToolKind::GetProcedure => self.get_procedure(arguments, correlation_id).await,
            ToolKind::GetEscalationPath => self.get_escalation_path(arguments, correlation_id),
            ToolKind::ListSources => self.list_sources().await,
            ToolKind::SearchKnowledgeBase => {
                self.search_knowledge_base(arguments, correlation_id).await
            }
            ToolKind::RecordResolutionFeedback => {
                self.record_feedback(arguments, correlation_id).await
            }
        }
    }

    async fn search_runbooks(
        &self,
        arguments: Value,
        correlation_id: &str,
    ) -> Result<ToolOutput, ToolError> {
        let args: SearchRunbooksArgs = decode(arguments, correlation_id)?;
        let alert = AlertContext {
            alert_type: args.alert_type,
            severity: args.severity,
            affected_systems: args.affected_systems.into_iter().collect(),
            context: args.context,
            agent_state: None,
        };
        let response = self.engine.search_runbooks(&alert, correlation_id).await?;
        let data = json!({
            "runbooks": response.data,
            "total_results": response.data.len(),
            "confidence_score": response.confidence,
            "match_reasons": response.match_reasons,
            "retrieval_time_ms": response.retrieval_time_ms,
            "source": response.source,
            "cache_hit": response.cache_hit,
        });
        Ok(ToolOutput {
            data,
            cache_hit: response.cache_hit,
            degraded: response.degraded,
            adapter_errors: response.adapter_errors,
        })
    }

    async fn get_decision_tree(
        &self,
        arguments: Value,
        correlation_id: &str,
    ) -> Result<ToolOutput, ToolError> {
        let args: GetDecisionTreeArgs = decode(arguments, correlation_id)?;
        let mut alert = args.alert_context;
        if args.agent_state.is_some() {
            alert.agent_state = args.agent_state;
        }
        let response = self.engine.get_decision_tree(&alert, correlation_id).await?;
        let data = json!({
            "runbook_id": response.data.runbook_id,
            "title": response.data.title,
            "decision_tree": response.data.tree,
            "branch_confidences": response.data.branch_confidences,
            "confidence_score": response.confidence,
            "match_reasons": response.match_reasons,
            "retrieval_time_ms": response.retrieval_time_ms,
            "source": response.source,
            "cache_hit": response.cache_hit,
        });
        Ok(ToolOutput {
            data,
            cache_hit: response.cache_hit,
            degraded: response.degraded,
            adapter_errors: response.adapter_errors,
        })
    }

    async fn get_procedure(
        &self,
        arguments: Value,
        correlation_id: &str,
    ) -> Result<ToolOutput, ToolError> {
        let args: GetProcedureArgs = decode(arguments, correlation_id)?;
        let key = args
            .procedure_id
            .or(args.step_name)
            .ok_or_else(|| {
                ToolError::new(
                    ErrorCode::ValidationError,
                    "one of 'procedure_id' or 'step_name' is required",
                    correlation_id,
                )
            })?;
        let response = self
            .engine
            .get_procedure(&args.runbook_id, &key, correlation_id)
            .await?;
        let data = json!({
            "runbook_id": args.runbook_id,
            "procedure": response.data,
            "confidence_score": response.confidence,
            "match_reasons": response.match_reasons,
            "retrieval_time_ms": response.retrieval_time_ms,
            "source": response.source,
            "cache_hit": response.cache_hit,
        });
        Ok(ToolOutput {
            data,
            cache_hit: response.cache_hit,
            degraded: response.degraded,
            adapter_errors: response.adapter_errors,
        })
    }

    fn get_escalation_path(
        &self,
        arguments: Value,
        correlation_id: &str,
    ) -> Result<ToolOutput, ToolError> {
        let started = Instant::now();
        let args: GetEscalationPathArgs = decode(arguments, correlation_id)?;
        let failed = args.failed_attempts.map(|a| a.len()).unwrap_or(0);
        let contacts =
            self.escalation
                .resolve(args.severity, args.business_hours.unwrap_or(true), failed);
        let data = json!({
            "contacts": contacts,
            "confidence_score": 1.0,
            "match_reasons": ["escalation policy"],
            "retrieval_time_ms": started.elapsed().as_millis() as u64,
            "source": "escalation-policy",
            "cache_hit": false,
        });
        Ok(ToolOutput::plain(data))
    }

    async fn list_sources(&self) -> Result<ToolOutput, ToolError> {
        let started = Instant::now();
        let mut sources = Vec::new();
        for adapter in self.engine.registry().adapters() {
            let health = adapter.health_check().await;
            let metadata = adapter.metadata();
            let breaker = self.engine.registry().breaker_state(adapter.name());
            sources.push(json!({
                "name": metadata.name,
                "kind": metadata.kind,
                "priority": adapter.priority(),
                "healthy": health.healthy,
                "health": health,
                "metadata": metadata,
                "breaker": format!("{breaker:?}").to_lowercase(),
            }));
        }
        let data = json!({
            "sources": sources,
            "confidence_score": 1.0,
            "match_reasons": [],
            "retrieval_time_ms": started.elapsed().as_millis() as u64,
            "source": "registry",
            "cache_hit": false,
        });
        Ok(ToolOutput::plain(data))
    }

    async fn search_knowledge_base(
        &self,
        arguments: Value,
        correlation_id: &str,
    ) -> Result<ToolOutput, ToolError> {
        let args: SearchKnowledgeBaseArgs = decode(arguments, correlation_id)?;
        if args.query.trim().is_empty() {
            return Err(ToolError::new(
                ErrorCode::ValidationError,
                "'query' must not be empty",
                correlation_id,
            ));
        }
        let filters = SearchFilters {
            categories: args.categories,
            min_confidence: args.min_confidence,
            max_results: args.max_results,
            updated_after: args
                .max_age_days
                .map(|days| chrono::Utc::now() - chrono::Duration::days(i64::from(days))),
        };
        let response = self
            .engine
            .search_knowledge_base(&args.query, &filters, correlation_id)
            .await?;
        let data = json!({
            "results": response.data,
            "total_results": response.data.len(),
            "confidence_score": response.confidence,
            "match_reasons": response.match_reasons,
            "retrieval_time_ms": response.retrieval_time_ms,
            "source": response.source,
            "cache_hit": response.cache_hit,
        });
        Ok(ToolOutput {
            data,
            cache_hit: response.cache_hit,
            degraded: response.degraded,
            adapter_errors: response.adapter_errors,
        })
    }

    async fn record_feedback(
        &self,
        arguments: Value,
        correlation_id: &str,
    ) -> Result<ToolOutput, ToolError> {
        let args: RecordFeedbackArgs = decode(arguments, correlation_id)?;
        let record = FeedbackRecord {
            timestamp: chrono::Utc::now(),
            runbook_id: args.runbook_id,
            procedure_id: args.procedure_id,
            outcome: args.outcome,
            resolution_time_minutes: args.resolution_time_minutes,
            notes: args.notes,
        };
        self.feedback.record(&record).await.map_err(|e| {
            ToolError::new(
                ErrorCode::InternalError,
                format!("feedback write failed: {e}"),
                correlation_id,
            )
        })?;
        Ok(ToolOutput::plain(json!({
            "recorded": true,
            "timestamp": record.timestamp,
        })))
    }
}

fn decode<T: serde::de::DeserializeOwned>(
    arguments: Value,
    correlation_id: &str,
) -> Result<T, ToolError> {
    serde_json::from_value(arguments)
        .map_err(|e| ToolError::new(ErrorCode::ValidationError, e.to_string(), correlation_id))
}

#[derive(Debug, Deserialize)]
struct SearchRunbooksArgs {
    alert_type: String,
    severity: Severity,
    #[serde(default)]
    affected_systems: Vec<String>,
    #[serde(default)]
    context: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct GetDecisionTreeArgs {
    alert_context: AlertContext,
    #[serde(default)]
    agent_state: Option<AgentState>,
}

#[derive(Debug, Deserialize)]
struct GetProcedureArgs {
    runbook_id: String,
    #[serde(default)]
    procedure_id: Option<String>,
    #[serde(default)]
    step_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GetEscalationPathArgs {
    severity: Severity,
    #[serde(default)]
    business_hours: Option<bool>,
    #[serde(default)]
    failed_attempts: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct SearchKnowledgeBaseArgs {
    query: String,
    #[serde(default)]
    categories: Vec<Category>,
    #[serde(default)]
    min_confidence: Option<f64>,
    #[serde(default)]
    max_results: Option<usize>,
    #[serde(default)]
    max_age_days: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct RecordFeedbackArgs {
    runbook_id: String,
    procedure_id: String,
    outcome: ResolutionOutcome,
    #[serde(default)]
    resolution_time_minutes: Option<u32>,
    #[serde(default)]
    notes: Option<String>,
}
