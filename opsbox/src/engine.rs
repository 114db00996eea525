//! The query engine: cache read-through, capability-filtered fan-out,
//! result fusion, and ranking.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use opsbox_cache::{CacheKey, HybridCache, WarmSource};
use opsbox_core::{
    AlertContext, Category, ContentKind, DecisionNode, DecisionTree, Procedure, Runbook,
    SearchFilters, SearchResult, Severity, SourceAdapter,
};

use crate::error::{ErrorCode, ToolError};
use crate::extract::RunbookExtractor;
use crate::query::{ToolKind, fingerprint};
use crate::registry::{AdapterFailure, AdapterRegistry, FanOut};
use crate::score::{alert_text_relevance, rank, score_runbook};

/// Engine deadlines and result limits.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Per-adapter soft deadline.
    pub adapter_timeout: Duration,
    /// Overall hard deadline per tool invocation.
    pub overall_timeout: Duration,
    /// Default ranked-list truncation.
    pub max_results: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            adapter_timeout: Duration::from_secs(5),
            overall_timeout: Duration::from_secs(10),
            max_results: 10,
        }
    }
}

/// A scored runbook match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunbookMatch {
    /// The matched runbook.
    pub runbook: Runbook,
    /// Composite confidence in [0, 1].
    pub confidence: f64,
    /// Names of every non-zero confidence contributor.
    pub match_reasons: Vec<String>,
    /// Producing source name.
    pub source: String,
    /// Producing adapter priority (lower wins ties).
    pub source_priority: u32,
}

/// The decision tree resolved for an alert context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTreeResult {
    /// Runbook the tree came from.
    pub runbook_id: String,
    /// Runbook title.
    pub title: String,
    /// The tree itself.
    pub tree: DecisionTree,
    /// Per-branch confidence at the root.
    pub branch_confidences: BTreeMap<String, f64>,
}

/// Engine response envelope shared by every retrieval flow.
#[derive(Debug, Clone, Serialize)]
pub struct EngineResponse<T> {
    /// The payload.
    pub data: T,
    /// Confidence of the top-ranked element (0 when empty).
    pub confidence: f64,
    /// Match reasons of the top-ranked element.
    pub match_reasons: Vec<String>,
    /// Wall-clock time the engine spent on the call.
    pub retrieval_time_ms: u64,
    /// Source of the top-ranked element.
    pub source: Option<String>,
    /// Whether the payload came from cache.
    pub cache_hit: bool,
    /// Deadline fired or some adapters failed.
    pub degraded: bool,
    /// Per-adapter failure annotations.
    pub adapter_errors: Vec<AdapterFailure>,
}

impl<T> EngineResponse<T> {
    fn fresh(data: T, started: Instant) -> Self {
        Self {
            data,
            confidence: 0.0,
            match_reasons: Vec::new(),
            retrieval_time_ms: started.elapsed().as_millis() as u64,
            source: None,
            cache_hit: false,
            degraded: false,
            adapter_errors: Vec::new(),
        }
    }
}

/// The query engine.
///
/// Owns request normalization, the hybrid-cache read/write path, the
/// capability-filtered fan-out through the registry, fusion by identifier,
/// and composite-confidence ranking.
pub struct QueryEngine {
    registry: Arc<AdapterRegistry>,
    cache: Arc<HybridCache>,
    config: EngineConfig,
}

impl QueryEngine {
    /// Creates the engine.
    pub fn new(registry: Arc<AdapterRegistry>, cache: Arc<HybridCache>, config: EngineConfig) -> Self {
        Self {
            registry,
            cache,
            config,
        }
    }

    /// The registry behind this engine.
    pub fn registry(&self) -> &Arc<AdapterRegistry> {
        &self.registry
    }

    /// The cache behind this engine.
    pub fn cache(&self) -> &Arc<HybridCache> {
        &self.cache
    }

    /// A zero overall deadline fails before any fan-out.
    fn ensure_deadline(&self, correlation_id: &str) -> Result<(), ToolError> {
        if self.config.overall_timeout.is_zero() {
            return Err(ToolError::new(
                ErrorCode::RequestTimeout,
                "overall deadline is zero",
                correlation_id,
            ));
        }
        Ok(())
    }

    /// Finds runbooks applicable to an alert, ranked by composite
    /// confidence.
    pub async fn search_runbooks(
        &self,
        alert: &AlertContext,
        correlation_id: &str,
    ) -> Result<EngineResponse<Vec<RunbookMatch>>, ToolError> {
        let started = Instant::now();
        self.ensure_deadline(correlation_id)?;

        let inputs = serde_json::to_value(alert)
            .map_err(|e| ToolError::new(ErrorCode::InternalError, e.to_string(), correlation_id))?;
        let key = CacheKey::new(
            ContentKind::Runbooks,
            fingerprint(ToolKind::SearchRunbooks, &inputs),
        );
        if let Some(matches) = self.cache.get_json::<Vec<RunbookMatch>>(&key).await {
            let top = matches
                .first()
                .map(|m| (m.confidence, m.match_reasons.clone(), m.source.clone()));
            return Ok(cached_response(matches, started, top));
        }

        let eligible: Vec<Arc<dyn SourceAdapter>> = self
            .registry
            .adapters()
            .iter()
            .filter(|a| a.supports_runbooks())
            .cloned()
            .collect();

        let fanout = self
            .registry
            .fan_out(
                &eligible,
                self.config.adapter_timeout,
                self.config.overall_timeout,
                |adapter| {
                    let alert = alert.clone();
                    async move { collect_candidates(adapter, &alert).await }
                },
            )
            .await;

        self.fail_if_all_failed(&fanout, correlation_id)?;

        let now = Utc::now();
        let mut by_id: HashMap<String, RunbookMatch> = HashMap::new();
        for (adapter, candidates) in &fanout.ok {
            for candidate in candidates {
                let text_relevance = candidate
                    .text_relevance
                    .unwrap_or_else(|| alert_text_relevance(&candidate.runbook, alert));
                let freshness_at = candidate
                    .updated_at
                    .or(candidate.runbook.metadata.last_validated);
                let scored =
                    score_runbook(&candidate.runbook, alert, text_relevance, freshness_at, now);
                let matched = RunbookMatch {
                    runbook: candidate.runbook.clone(),
                    confidence: scored.confidence,
                    match_reasons: scored.reasons,
                    source: adapter.name().to_owned(),
                    source_priority: adapter.priority(),
                };
                merge_match(&mut by_id, matched);
            }
        }

        let mut matches: Vec<RunbookMatch> = by_id.into_values().collect();
        matches.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.source_priority.cmp(&b.source_priority))
                .then_with(|| a.runbook.id.cmp(&b.runbook.id))
        });
        matches.truncate(self.config.max_results);

        let degraded = fanout.degraded || !fanout.failures.is_empty();
        if !degraded {
            self.write_cache(&key, &matches).await;
        }

        let mut response = EngineResponse::fresh(matches, started);
        response.degraded = degraded;
        response.adapter_errors = fanout.failures;
        if let Some(top) = response.data.first() {
            response.confidence = top.confidence;
            response.match_reasons = top.match_reasons.clone();
            response.source = Some(top.source.clone());
        }
        Ok(response)
    }

    /// Free-text search across every adapter.
    pub async fn search_knowledge_base(
        &self,
        query: &str,
        filters: &SearchFilters,
        correlation_id: &str,
    ) -> Result<EngineResponse<Vec<SearchResult>>, ToolError> {
        let started = Instant::now();
        self.ensure_deadline(correlation_id)?;

        let inputs = serde_json::json!({ "query": query, "filters": filters });
        let key = CacheKey::new(
            ContentKind::KnowledgeBase,
            fingerprint(ToolKind::SearchKnowledgeBase, &inputs),
        );
        if let Some(mut results) = self.cache.get_json::<Vec<SearchResult>>(&key).await {
            for result in &mut results {
                result.cache_hit = true;
            }
            let top = results.first().map(|r| {
                (
                    r.confidence,
                    r.match_reasons.clone(),
                    r.document.source.to_string(),
                )
            });
            return Ok(cached_response(results, started, top));
        }

        let eligible = self.registry.adapters().to_vec();
        let fanout = self
            .registry
            .fan_out(
                &eligible,
                self.config.adapter_timeout,
                self.config.overall_timeout,
                |adapter| {
                    let filters = filters.clone();
                    let query = query.to_owned();
                    async move { adapter.search(&query, &filters).await }
                },
            )
            .await;

        self.fail_if_all_failed(&fanout, correlation_id)?;

        // Fuse by global id: the highest-scoring copy wins, ties go to the
        // higher-priority adapter.
        let mut by_id: HashMap<String, SearchResult> = HashMap::new();
        for (_, results) in fanout.ok {
            for result in results {
                let id = result.document.global_id();
                match by_id.get_mut(&id) {
                    Some(existing) => {
                        let better = result.confidence > existing.confidence
                            || (result.confidence == existing.confidence
                                && result.source_priority < existing.source_priority);
                        if better {
                            *existing = result;
                        }
                    }
                    None => {
                        by_id.insert(id, result);
                    }
                }
            }
        }
        let mut results: Vec<SearchResult> = by_id.into_values().collect();
        rank(&mut results);
        results.truncate(filters.max_results.unwrap_or(self.config.max_results));

        let degraded = fanout.degraded || !fanout.failures.is_empty();
        if !degraded {
            self.write_cache(&key, &results).await;
        }

        let mut response = EngineResponse::fresh(results, started);
        response.degraded = degraded;
        response.adapter_errors = fanout.failures;
        if let Some(top) = response.data.first() {
            response.confidence = top.confidence;
            response.match_reasons = top.match_reasons.clone();
            response.source = Some(top.document.source.to_string());
        }
        Ok(response)
    }

    /// Resolves the decision tree governing an alert.
    pub async fn get_decision_tree(
        &self,
        alert: &AlertContext,
        correlation_id: &str,
    ) -> Result<EngineResponse<DecisionTreeResult>, ToolError> {
        let started = Instant::now();
        self.ensure_deadline(correlation_id)?;

        let inputs = serde_json::to_value(alert)
            .map_err(|e| ToolError::new(ErrorCode::InternalError, e.to_string(), correlation_id))?;
        let key = CacheKey::new(
            ContentKind::DecisionTrees,
            fingerprint(ToolKind::GetDecisionTree, &inputs),
        );
        if let Some(result) = self.cache.get_json::<DecisionTreeResult>(&key).await {
            let top = Some((
                result.branch_confidences.values().copied().fold(0.0, f64::max),
                vec!["cached decision tree".to_owned()],
                result.runbook_id.clone(),
            ));
            return Ok(cached_response(result, started, top));
        }

        let matches = self.search_runbooks(alert, correlation_id).await?;
        let Some(best) = matches.data.first() else {
            return Err(ToolError::new(
                ErrorCode::NotFound,
                format!("no runbook matches alert '{}'", alert.alert_type),
                correlation_id,
            ));
        };

        let attempted: Vec<&str> = alert
            .agent_state
            .as_ref()
            .map(|s| s.attempted_procedures.iter().map(String::as_str).collect())
            .unwrap_or_default();
        let result = DecisionTreeResult {
            runbook_id: best.runbook.id.clone(),
            title: best.runbook.title.clone(),
            tree: best.runbook.decision_tree.clone(),
            branch_confidences: branch_confidences(
                &best.runbook.decision_tree,
                best.confidence,
                &attempted,
            ),
        };

        if !matches.degraded {
            self.write_cache(&key, &result).await;
        }

        let mut response = EngineResponse::fresh(result, started);
        response.confidence = best.confidence;
        response.match_reasons = best.match_reasons.clone();
        response.source = Some(best.source.clone());
        response.degraded = matches.degraded;
        response.adapter_errors = matches.adapter_errors;
        Ok(response)
    }

    /// Fetches one procedure of a runbook by procedure id or step name.
    pub async fn get_procedure(
        &self,
        runbook_id: &str,
        procedure_key: &str,
        correlation_id: &str,
    ) -> Result<EngineResponse<Procedure>, ToolError> {
        let started = Instant::now();
        self.ensure_deadline(correlation_id)?;

        let inputs = serde_json::json!({
            "runbook_id": runbook_id,
            "procedure": procedure_key,
        });
        let key = CacheKey::new(
            ContentKind::Procedures,
            fingerprint(ToolKind::GetProcedure, &inputs),
        );
        if let Some(procedure) = self.cache.get_json::<Procedure>(&key).await {
            let top = Some((1.0, vec!["cached procedure".to_owned()], procedure.id.clone()));
            return Ok(cached_response(procedure, started, top));
        }

        let Some(found) = self.find_runbook(runbook_id, correlation_id).await? else {
            return Err(ToolError::new(
                ErrorCode::NotFound,
                format!("runbook '{runbook_id}' not found"),
                correlation_id,
            ));
        };
        let Some(procedure) = found.runbook.procedure(procedure_key).cloned() else {
            return Err(ToolError::new(
                ErrorCode::NotFound,
                format!("runbook '{runbook_id}' has no procedure '{procedure_key}'"),
                correlation_id,
            ));
        };

        self.write_cache(&key, &procedure).await;

        let mut response = EngineResponse::fresh(procedure, started);
        response.confidence = found.confidence;
        response.match_reasons = vec!["exact runbook id match".to_owned()];
        response.source = Some(found.source.clone());
        Ok(response)
    }

    /// Resolves one runbook by id across every runbook-capable adapter.
    pub async fn find_runbook(
        &self,
        runbook_id: &str,
        _correlation_id: &str,
    ) -> Result<Option<RunbookMatch>, ToolError> {
        let key = CacheKey::new(ContentKind::Runbooks, runbook_id.to_owned());
        if let Some(found) = self.cache.get_json::<RunbookMatch>(&key).await {
            return Ok(Some(found));
        }

        let eligible: Vec<Arc<dyn SourceAdapter>> = self
            .registry
            .adapters()
            .iter()
            .filter(|a| a.supports_runbooks())
            .cloned()
            .collect();
        let fanout = self
            .registry
            .fan_out(
                &eligible,
                self.config.adapter_timeout,
                self.config.overall_timeout,
                |adapter| {
                    let runbook_id = runbook_id.to_owned();
                    async move { lookup_runbook(adapter, &runbook_id).await }
                },
            )
            .await;

        let mut best: Option<(u32, Runbook, String)> = None;
        for (adapter, found) in fanout.ok {
            if let Some(runbook) = found {
                let priority = adapter.priority();
                let replace = best
                    .as_ref()
                    .map(|(existing, _, _)| priority < *existing)
                    .unwrap_or(true);
                if replace {
                    best = Some((priority, runbook, adapter.name().to_owned()));
                }
            }
        }
        let Some((priority, runbook, source)) = best else {
            return Ok(None);
        };
        let found = RunbookMatch {
            confidence: runbook.metadata.confidence_score.max(0.5),
            match_reasons: vec!["exact runbook id match".to_owned()],
            source,
            source_priority: priority,
            runbook,
        };
        self.write_cache(&key, &found).await;
        Ok(Some(found))
    }

    async fn write_cache<T: Serialize>(&self, key: &CacheKey, value: &T) {
        if let Err(err) = self.cache.put_json(key, value).await {
            warn!(key = %key, error = %err, "cache write failed");
        }
    }

    fn fail_if_all_failed<T>(
        &self,
        fanout: &FanOut<T>,
        correlation_id: &str,
    ) -> Result<(), ToolError> {
        if !fanout.all_failed() {
            return Ok(());
        }
        // Breaker skips are not adapter errors: a fan-out that was entirely
        // skipped still succeeds with an empty, degraded result.
        let hard: Vec<&AdapterFailure> = fanout
            .failures
            .iter()
            .filter(|f| f.code != ErrorCode::CircuitOpen)
            .collect();
        if hard.is_empty() || hard.len() != fanout.failures.len() {
            return Ok(());
        }
        let code = if hard.iter().all(|f| f.code == hard[0].code) {
            hard[0].code
        } else {
            ErrorCode::ServiceUnavailable
        };
        debug!(?code, failures = fanout.failures.len(), "all adapters failed");
        Err(ToolError::new(
            code,
            "every eligible source failed",
            correlation_id,
        ))
    }
}

struct RunbookCandidate {
    runbook: Runbook,
    text_relevance: Option<f64>,
    updated_at: Option<DateTime<Utc>>,
}

/// Per-adapter candidate collection: structured runbooks plus runbooks
/// extracted from matching documents.
async fn collect_candidates(
    adapter: Arc<dyn SourceAdapter>,
    alert: &AlertContext,
) -> Result<Vec<RunbookCandidate>, opsbox_core::SourceError> {
    let mut candidates = Vec::new();
    for runbook in adapter.search_runbooks(alert).await? {
        candidates.push(RunbookCandidate {
            runbook,
            text_relevance: None,
            updated_at: None,
        });
    }

    let filters = SearchFilters {
        categories: vec![Category::Runbook, Category::Procedure],
        min_confidence: None,
        max_results: Some(10),
        updated_after: None,
    };
    match adapter.search(&alert.alert_type, &filters).await {
        Ok(results) => {
            for result in results {
                if let Some(runbook) = RunbookExtractor::extract(&result.document) {
                    candidates.push(RunbookCandidate {
                        runbook,
                        text_relevance: Some(result.confidence),
                        updated_at: Some(result.document.updated_at),
                    });
                }
            }
        }
        Err(err) => {
            // Structured candidates already answered the call; document
            // extraction is best-effort on top.
            debug!(adapter = adapter.name(), error = %err, "document search failed");
        }
    }
    Ok(candidates)
}

async fn lookup_runbook(
    adapter: Arc<dyn SourceAdapter>,
    runbook_id: &str,
) -> Result<Option<Runbook>, opsbox_core::SourceError> {
    let probe = AlertContext::new(runbook_id, Severity::Medium, []);
    let mut found = adapter.search_runbooks(&probe).await?;
    found.retain(|runbook| runbook.id == runbook_id);
    if let Some(runbook) = found.pop() {
        return Ok(Some(runbook));
    }

    let filters = SearchFilters {
        categories: vec![Category::Runbook, Category::Procedure],
        min_confidence: None,
        max_results: Some(10),
        updated_after: None,
    };
    let results = adapter.search(runbook_id, &filters).await?;
    for result in results {
        if let Some(runbook) = RunbookExtractor::extract(&result.document)
            && runbook.id == runbook_id
        {
            return Ok(Some(runbook));
        }
    }
    Ok(None)
}

fn merge_match(by_id: &mut HashMap<String, RunbookMatch>, candidate: RunbookMatch) {
    match by_id.get_mut(&candidate.runbook.id) {
        Some(existing) => {
            let better = candidate.confidence > existing.confidence
                || (candidate.confidence == existing.confidence
                    && candidate.source_priority < existing.source_priority);
            if better {
                *existing = candidate;
            }
        }
        None => {
            by_id.insert(candidate.runbook.id.clone(), candidate);
        }
    }
}

fn branch_confidences(
    tree: &DecisionTree,
    base_confidence: f64,
    attempted: &[&str],
) -> BTreeMap<String, f64> {
    let mut out = BTreeMap::new();
    match &tree.root {
        DecisionNode::Condition { branches, .. } => {
            for (label, node) in branches {
                let mut confidence = base_confidence;
                // Branches whose action the agent already attempted rank
                // lower on a revisit.
                if let DecisionNode::Action { action, .. } = node
                    && attempted.iter().any(|a| a.eq_ignore_ascii_case(action))
                {
                    confidence *= 0.5;
                }
                out.insert(label.clone(), confidence);
            }
        }
        DecisionNode::Action { action, .. } => {
            let mut confidence = base_confidence;
            if attempted.iter().any(|a| a.eq_ignore_ascii_case(action)) {
                confidence *= 0.5;
            }
            out.insert(action.clone(), confidence);
        }
    }
    out
}

fn cached_response<T>(
    data: T,
    started: Instant,
    top: Option<(f64, Vec<String>, String)>,
) -> EngineResponse<T> {
    let (confidence, match_reasons, source) = match top {
        Some((confidence, reasons, source)) => (confidence, reasons, Some(source)),
        None => (0.0, Vec::new(), None),
    };
    EngineResponse {
        data,
        confidence,
        match_reasons,
        retrieval_time_ms: started.elapsed().as_millis() as u64,
        source,
        cache_hit: true,
        degraded: false,
        adapter_errors: Vec::new(),
    }
}

#[async_trait]
impl WarmSource for QueryEngine {
    async fn load(&self, kind: ContentKind, id: &str) -> Option<Bytes> {
        if kind != ContentKind::Runbooks {
            return None;
        }
        let found = self.find_runbook(id, "warmup").await.ok().flatten()?;
        serde_json::to_vec(&found).ok().map(Bytes::from)
    }
}
