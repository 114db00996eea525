//! The filesystem source adapter.

use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use globset::GlobSet;
use tracing::{debug, info, warn};

use opsbox_core::{
    AlertContext, Document, HealthSnapshot, RollingWindow, Runbook, SearchFilters, SearchResult,
    SourceAdapter, SourceError, SourceKind, SourceMetadata,
};
use opsbox_resilience::{SingleFlight, TokenBucket};

use crate::config::FileSystemConfig;
use crate::scan::{IndexState, scan};

/// Default wait budget for a rate-limiter token on local operations.
const TOKEN_WAIT: Duration = Duration::from_secs(1);

/// Health probe budget.
const HEALTH_BUDGET: Duration = Duration::from_secs(2);

/// Source adapter over local documentation trees.
///
/// The index is an immutable generation behind an `RwLock<Arc<_>>`: readers
/// clone the `Arc` (a consistent snapshot) and are never blocked by a
/// refresh, which builds a new generation off-thread and swaps it in.
pub struct FileSystemAdapter {
    config: FileSystemConfig,
    include: GlobSet,
    exclude: GlobSet,
    state: RwLock<Arc<IndexState>>,
    refresh: SingleFlight<Result<bool, SourceError>>,
    limiter: TokenBucket,
    window: RollingWindow,
}

impl FileSystemAdapter {
    /// Creates the adapter; fails only on invalid glob patterns.
    pub fn new(config: FileSystemConfig) -> Result<Self, SourceError> {
        let (include, exclude) = config.build_globs()?;
        let limiter = TokenBucket::new(config.name.clone(), config.burst, config.rate_per_sec);
        Ok(Self {
            config,
            include,
            exclude,
            state: RwLock::new(Arc::new(IndexState::empty())),
            refresh: SingleFlight::new(),
            limiter,
            window: RollingWindow::default(),
        })
    }

    fn snapshot(&self) -> Arc<IndexState> {
        self.state
            .read()
            .map(|state| Arc::clone(&state))
            .unwrap_or_else(|e| Arc::clone(&e.into_inner()))
    }

    fn swap_state(&self, next: IndexState) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        *state = Arc::new(next);
    }

    async fn take_token(&self) -> Result<(), SourceError> {
        self.limiter
            .acquire(tokio::time::Instant::now() + TOKEN_WAIT)
            .await
            .map_err(|e| SourceError::RateLimited(e.to_string()))
    }

    async fn rebuild(&self, force: bool) -> Result<bool, SourceError> {
        let config = self.config.clone();
        let include = self.include.clone();
        let exclude = self.exclude.clone();
        let previous = if force { None } else { Some(self.snapshot()) };

        let outcome = tokio::task::spawn_blocking(move || {
            scan(&config, &include, &exclude, previous.as_deref())
        })
        .await
        .map_err(|e| SourceError::Fatal(format!("index build task failed: {e}")))??;

        if outcome.malformed > 0 {
            warn!(
                source = %self.config.name,
                malformed = outcome.malformed,
                "dropped malformed files during indexing"
            );
        }
        info!(
            source = %self.config.name,
            documents = outcome.state.docs.len(),
            runbooks = outcome.state.runbooks.len(),
            changed = outcome.changed,
            "index refreshed"
        );
        self.swap_state(outcome.state);
        Ok(outcome.changed)
    }

    fn record(&self, started: Instant, success: bool) {
        self.window.record(started.elapsed(), success);
    }
}

#[async_trait]
impl SourceAdapter for FileSystemAdapter {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn kind(&self) -> SourceKind {
        SourceKind::File
    }

    fn priority(&self) -> u32 {
        self.config.priority
    }

    async fn initialize(&self) -> Result<(), SourceError> {
        self.refresh_index(true).await.map(|_| ())
    }

    async fn search(
        &self,
        query: &str,
        filters: &SearchFilters,
    ) -> Result<Vec<SearchResult>, SourceError> {
        let started = Instant::now();
        self.take_token().await?;
        let snapshot = self.snapshot();

        let mut results: Vec<SearchResult> = snapshot
            .index
            .search(query)
            .into_iter()
            .filter_map(|(id, score)| {
                let doc = snapshot.docs.get(&id)?;
                if !filters.admits(&doc.document) {
                    return None;
                }
                if let Some(min) = filters.min_confidence
                    && score < min
                {
                    return None;
                }
                Some(SearchResult {
                    document: doc.document.clone(),
                    confidence: score,
                    match_reasons: vec!["text relevance".to_owned()],
                    retrieval_time_ms: 0,
                    cache_hit: false,
                    source_priority: self.config.priority,
                })
            })
            .collect();
        results.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.document.updated_at.cmp(&a.document.updated_at))
        });
        if let Some(max) = filters.max_results {
            results.truncate(max);
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        for result in &mut results {
            result.retrieval_time_ms = elapsed_ms;
        }
        self.record(started, true);
        Ok(results)
    }

    async fn search_runbooks(&self, alert: &AlertContext) -> Result<Vec<Runbook>, SourceError> {
        let started = Instant::now();
        self.take_token().await?;
        let snapshot = self.snapshot();

        let runbooks: Vec<Runbook> = snapshot
            .runbooks
            .values()
            .filter(|(_, runbook)| runbook.candidate_for(alert))
            .map(|(_, runbook)| runbook.clone())
            .collect();

        debug!(
            source = %self.config.name,
            alert_type = %alert.alert_type,
            candidates = runbooks.len(),
            "runbook candidate search"
        );
        self.record(started, true);
        Ok(runbooks)
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>, SourceError> {
        let started = Instant::now();
        self.take_token().await?;
        let snapshot = self.snapshot();
        let doc = snapshot
            .docs
            .get(id)
            .map(|indexed| indexed.document.clone());
        self.record(started, true);
        Ok(doc)
    }

    async fn refresh_index(&self, force: bool) -> Result<bool, SourceError> {
        let started = Instant::now();
        let outcome = self
            .refresh
            .run(|| self.rebuild(force))
            .await
            .unwrap_or_else(|flight| Err(SourceError::Transient(flight.to_string())));
        self.record(started, outcome.is_ok());
        outcome
    }

    async fn health_check(&self) -> HealthSnapshot {
        let probe = async {
            for base in &self.config.base_paths {
                let metadata = tokio::fs::metadata(base).await?;
                if !metadata.is_dir() {
                    return Err(std::io::Error::other(format!(
                        "'{}' is not a directory",
                        base.display()
                    )));
                }
            }
            Ok::<_, std::io::Error>(())
        };

        let snapshot = self.snapshot();
        let result = tokio::time::timeout(HEALTH_BUDGET, probe).await;
        let health = match result {
            Ok(Ok(())) => HealthSnapshot::healthy(),
            Ok(Err(err)) => HealthSnapshot::unhealthy(err.to_string()),
            Err(_) => HealthSnapshot::unhealthy("health check timed out"),
        };
        health
            .with_latency_ms(self.window.avg_latency_ms() as u64)
            .with_attribute("document_count", snapshot.docs.len().to_string())
            .with_attribute("runbook_count", snapshot.runbooks.len().to_string())
    }

    fn metadata(&self) -> SourceMetadata {
        SourceMetadata {
            name: self.config.name.clone(),
            kind: SourceKind::File,
            document_count: self.snapshot().docs.len(),
            avg_response_time_ms: self.window.avg_latency_ms(),
            success_rate: self.window.success_rate(),
        }
    }

    async fn cleanup(&self) {
        self.swap_state(IndexState::empty());
    }
}
