//! The GitHub source adapter.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use globset::GlobSet;
use serde::Deserialize;
use smol_str::SmolStr;
use tracing::{debug, info, warn};

use opsbox_core::{
    AlertContext, Category, Document, HealthSnapshot, InvertedIndex, RollingWindow, Runbook,
    SearchFilters, SearchResult, SourceAdapter, SourceError, SourceKind, SourceMetadata,
};
use opsbox_resilience::{RetryPolicy, SingleFlight, TokenBucket};

/// Health probe budget.
const HEALTH_BUDGET: std::time::Duration = std::time::Duration::from_secs(2);

/// Blobs larger than this are not fetched.
const MAX_BLOB_BYTES: u64 = 1024 * 1024;

use crate::config::GitHubConfig;

#[derive(Debug, Deserialize)]
struct RepoInfo {
    default_branch: String,
    #[serde(default)]
    pushed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct TreeEntry {
    path: String,
    #[serde(rename = "type")]
    kind: String,
    sha: String,
    #[serde(default)]
    size: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct TreeResponse {
    tree: Vec<TreeEntry>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Debug, Deserialize)]
struct BlobResponse {
    content: String,
    encoding: String,
}

#[derive(Default)]
struct QuotaState {
    remaining: Option<i64>,
    reset_at: Option<DateTime<Utc>>,
}

struct GitHubIndex {
    docs: HashMap<SmolStr, Document>,
    index: InvertedIndex,
    runbooks: HashMap<String, Runbook>,
}

impl GitHubIndex {
    fn empty() -> Self {
        Self {
            docs: HashMap::new(),
            index: InvertedIndex::new(),
            runbooks: HashMap::new(),
        }
    }
}

/// Source adapter over GitHub repositories.
///
/// Walks each configured repository's default-branch tree and indexes the
/// blobs matching the include globs. The remaining API quota is tracked
/// from `x-ratelimit-*` response headers; when it drops below the safety
/// margin, further calls are suspended until the advertised reset.
pub struct GitHubAdapter {
    config: GitHubConfig,
    include: GlobSet,
    client: reqwest::Client,
    quota: Mutex<QuotaState>,
    limiter: TokenBucket,
    retry: RetryPolicy,
    state: RwLock<Arc<GitHubIndex>>,
    refresh: SingleFlight<Result<bool, SourceError>>,
    window: RollingWindow,
}

impl GitHubAdapter {
    /// Creates the adapter; fails on invalid glob patterns.
    pub fn new(config: GitHubConfig) -> Result<Self, SourceError> {
        let include = config.build_include()?;
        let client = reqwest::Client::builder()
            .user_agent("opsbox")
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| SourceError::Fatal(format!("http client build failed: {e}")))?;
        let limiter = TokenBucket::new(config.name.clone(), config.burst, config.rate_per_sec);
        Ok(Self {
            include,
            client,
            quota: Mutex::new(QuotaState::default()),
            limiter,
            retry: RetryPolicy::default(),
            state: RwLock::new(Arc::new(GitHubIndex::empty())),
            refresh: SingleFlight::new(),
            window: RollingWindow::default(),
            config,
        })
    }

    fn snapshot(&self) -> Arc<GitHubIndex> {
        self.state
            .read()
            .map(|state| Arc::clone(&state))
            .unwrap_or_else(|e| Arc::clone(&e.into_inner()))
    }

    fn swap_state(&self, next: GitHubIndex) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        *state = Arc::new(next);
    }

    fn token(&self) -> Result<Option<String>, SourceError> {
        match &self.config.token_env {
            Some(var) => std::env::var(var).map(Some).map_err(|_| {
                SourceError::AuthFailed(format!("environment variable '{var}' is not set"))
            }),
            None => Ok(None),
        }
    }

    /// Rejects the call when the tracked quota is below the safety margin
    /// and the reset timestamp has not passed.
    fn check_quota(&self) -> Result<(), SourceError> {
        let quota = self.quota.lock().unwrap_or_else(|e| e.into_inner());
        if let (Some(remaining), Some(reset_at)) = (quota.remaining, quota.reset_at)
            && remaining < self.config.quota_margin
            && Utc::now() < reset_at
        {
            return Err(SourceError::RateLimited(format!(
                "API quota low ({remaining} left), suspended until {reset_at}"
            )));
        }
        Ok(())
    }

    fn update_quota(&self, headers: &reqwest::header::HeaderMap) {
        let parse = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<i64>().ok())
        };
        let remaining = parse("x-ratelimit-remaining");
        // The reset header is epoch seconds.
        let reset_at =
            parse("x-ratelimit-reset").and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0));
        if remaining.is_none() {
            return;
        }
        let mut quota = self.quota.lock().unwrap_or_else(|e| e.into_inner());
        quota.remaining = remaining;
        if reset_at.is_some() {
            quota.reset_at = reset_at;
        }
    }

    async fn api_get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, SourceError> {
        self.check_quota()?;
        self.limiter
            .acquire(tokio::time::Instant::now() + self.config.request_timeout)
            .await
            .map_err(|e| SourceError::RateLimited(e.to_string()))?;

        let url = format!("{}{path}", self.config.api_base);
        let fetch = |url: String| async move {
            let mut builder = self
                .client
                .get(&url)
                .header("Accept", "application/vnd.github+json");
            if let Some(token) = self.token()? {
                builder = builder.bearer_auth(token);
            }
            let response = builder
                .send()
                .await
                .map_err(|e| SourceError::Transient(format!("request to {url} failed: {e}")))?;

            self.update_quota(response.headers());
            let status = response.status();
            match status.as_u16() {
                200..=299 => response
                    .json::<T>()
                    .await
                    .map_err(|e| SourceError::Malformed(format!("response from {url}: {e}"))),
                401 => Err(SourceError::AuthFailed(format!("{url} returned 401"))),
                403 | 429 => Err(SourceError::RateLimited(format!("{url} returned {status}"))),
                404 => Err(SourceError::NotFound(url.clone())),
                500..=599 => Err(SourceError::Transient(format!("{url} returned {status}"))),
                _ => Err(SourceError::Transient(format!("{url} returned {status}"))),
            }
        };
        self.retry.run(|_| fetch(url.clone())).await
    }

    async fn index_repository(&self, repo: &str, next: &mut GitHubIndex) -> Result<(), SourceError> {
        let info: RepoInfo = self.api_get(&format!("/repos/{repo}")).await?;
        let tree: TreeResponse = self
            .api_get(&format!(
                "/repos/{repo}/git/trees/{}?recursive=1",
                info.default_branch
            ))
            .await?;
        if tree.truncated {
            warn!(source = %self.config.name, repo, "tree listing truncated by the API");
        }
        let updated_at = info.pushed_at.unwrap_or_else(Utc::now);

        for entry in tree.tree {
            if entry.kind != "blob" || !self.include.is_match(&entry.path) {
                continue;
            }
            if entry.size.is_some_and(|size| size > MAX_BLOB_BYTES) {
                debug!(source = %self.config.name, repo, path = %entry.path, "blob too large");
                continue;
            }
            let blob: BlobResponse = match self
                .api_get(&format!("/repos/{repo}/git/blobs/{}", entry.sha))
                .await
            {
                Ok(blob) => blob,
                Err(err) => {
                    warn!(source = %self.config.name, repo, path = %entry.path, error = %err,
                        "blob fetch failed");
                    continue;
                }
            };
            let Some(text) = decode_blob(&blob) else {
                warn!(source = %self.config.name, repo, path = %entry.path, "blob decode failed");
                continue;
            };

            let id = SmolStr::new(format!("{repo}/{}", entry.path));
            match blob_to_document(&self.config.name, &id, repo, &entry.path, &text, updated_at) {
                Some((document, runbook)) => {
                    next.index
                        .insert(id.clone(), &document.title, &document.body);
                    if let Some(runbook) = runbook {
                        next.runbooks.insert(runbook.id.clone(), runbook);
                    }
                    next.docs.insert(id, document);
                }
                None => {
                    debug!(source = %self.config.name, repo, path = %entry.path,
                        "malformed file skipped");
                }
            }
        }
        Ok(())
    }

    async fn rebuild(&self) -> Result<bool, SourceError> {
        let previous = self.snapshot();
        let mut next = GitHubIndex::empty();
        let mut failures = 0usize;

        for repo in &self.config.repositories {
            // Partial success is the contract: a failing repository never
            // fails the overall refresh.
            if let Err(err) = self.index_repository(repo, &mut next).await {
                warn!(source = %self.config.name, repo, error = %err, "repository refresh failed");
                failures += 1;
            }
        }

        if failures == self.config.repositories.len() && !self.config.repositories.is_empty() {
            return Err(SourceError::Transient(
                "every configured repository failed to refresh".to_owned(),
            ));
        }

        let changed = next.docs.len() != previous.docs.len()
            || next.docs.keys().any(|id| !previous.docs.contains_key(id));
        info!(
            source = %self.config.name,
            documents = next.docs.len(),
            runbooks = next.runbooks.len(),
            failures,
            changed,
            "github index refreshed"
        );
        self.swap_state(next);
        Ok(changed)
    }

    fn record(&self, started: Instant, success: bool) {
        self.window.record(started.elapsed(), success);
    }
}

fn decode_blob(blob: &BlobResponse) -> Option<String> {
    match blob.encoding.as_str() {
        "base64" => {
            let compact: String = blob
                .content
                .chars()
                .filter(|c| !c.is_whitespace())
                .collect();
            let bytes = BASE64.decode(compact).ok()?;
            String::from_utf8(bytes).ok()
        }
        "utf-8" => Some(blob.content.clone()),
        _ => None,
    }
}

fn blob_to_document(
    source: &SmolStr,
    id: &SmolStr,
    repo: &str,
    path: &str,
    text: &str,
    updated_at: DateTime<Utc>,
) -> Option<(Document, Option<Runbook>)> {
    let is_json = path.to_ascii_lowercase().ends_with(".json");
    let (title, category, runbook) = if is_json {
        let value: serde_json::Value = serde_json::from_str(text).ok()?;
        let shaped = value.as_object().is_some_and(|obj| {
            obj.contains_key("id") && obj.contains_key("triggers") && obj.contains_key("procedures")
        });
        if shaped {
            let runbook: Runbook = serde_json::from_value(value).ok()?;
            runbook.validate().ok()?;
            (runbook.title.clone(), Category::Runbook, Some(runbook))
        } else {
            (file_name(path), Category::General, None)
        }
    } else {
        let title = text
            .lines()
            .find_map(|line| line.strip_prefix('#'))
            .map(|rest| rest.trim_start_matches('#').trim().to_owned())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| file_name(path));
        let lower = title.to_ascii_lowercase();
        let category = if lower.contains("runbook") {
            Category::Runbook
        } else if lower.contains("procedure") {
            Category::Procedure
        } else if lower.contains("guide") {
            Category::Guide
        } else {
            Category::General
        };
        (title, category, None)
    };

    let document = Document {
        id: id.clone(),
        title,
        body: text.to_owned(),
        source: source.clone(),
        source_kind: SourceKind::Github,
        uri: format!("github://{repo}/{path}"),
        category,
        updated_at,
        metadata: Default::default(),
    };
    Some((document, runbook))
}

fn file_name(path: &str) -> String {
    path.rsplit('/').next().unwrap_or(path).to_owned()
}

#[async_trait]
impl SourceAdapter for GitHubAdapter {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Github
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
        let snapshot = self.snapshot();
        let mut results: Vec<SearchResult> = snapshot
            .index
            .search(query)
            .into_iter()
            .filter_map(|(id, score)| {
                let document = snapshot.docs.get(&id)?;
                if !filters.admits(document) {
                    return None;
                }
                if let Some(min) = filters.min_confidence
                    && score < min
                {
                    return None;
                }
                Some(SearchResult {
                    document: document.clone(),
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
        let snapshot = self.snapshot();
        let runbooks: Vec<Runbook> = snapshot
            .runbooks
            .values()
            .filter(|runbook| runbook.candidate_for(alert))
            .cloned()
            .collect();
        self.record(started, true);
        Ok(runbooks)
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>, SourceError> {
        let started = Instant::now();
        let snapshot = self.snapshot();
        let document = snapshot.docs.get(id).cloned();
        self.record(started, true);
        Ok(document)
    }

    async fn refresh_index(&self, _force: bool) -> Result<bool, SourceError> {
        let started = Instant::now();
        let outcome = self
            .refresh
            .run(|| self.rebuild())
            .await
            .unwrap_or_else(|flight| Err(SourceError::Transient(flight.to_string())));
        self.record(started, outcome.is_ok());
        outcome
    }

    async fn health_check(&self) -> HealthSnapshot {
        let snapshot = self.snapshot();
        let quota_attr = {
            let quota = self.quota.lock().unwrap_or_else(|e| e.into_inner());
            quota
                .remaining
                .map(|r| r.to_string())
                .unwrap_or_else(|| "unknown".to_owned())
        };

        let probe = self.api_get::<serde_json::Value>("/rate_limit");
        let health = match tokio::time::timeout(HEALTH_BUDGET, probe).await {
            Ok(Ok(_)) => HealthSnapshot::healthy(),
            Ok(Err(err)) => HealthSnapshot::unhealthy(err.to_string()),
            Err(_) => HealthSnapshot::unhealthy("health check timed out"),
        };
        health
            .with_latency_ms(self.window.avg_latency_ms() as u64)
            .with_attribute("document_count", snapshot.docs.len().to_string())
            .with_attribute("quota_remaining", quota_attr)
    }

    fn metadata(&self) -> SourceMetadata {
        SourceMetadata {
            name: self.config.name.clone(),
            kind: SourceKind::Github,
            document_count: self.snapshot().docs.len(),
            avg_response_time_ms: self.window.avg_latency_ms(),
            success_rate: self.window.success_rate(),
        }
    }

    async fn cleanup(&self) {
        self.swap_state(GitHubIndex::empty());
    }
}
