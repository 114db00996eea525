//! The web source adapter.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use regex::Regex;
use smol_str::SmolStr;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use url::Url;

use opsbox_core::{
    AlertContext, Category, Document, HealthSnapshot, InvertedIndex, RollingWindow, Runbook,
    SearchFilters, SearchResult, SourceAdapter, SourceError, SourceKind, SourceMetadata,
};
use opsbox_resilience::{RetryPolicy, SingleFlight, TokenBucket};

use crate::auth::AuthState;
use crate::config::WebConfig;
use crate::extract::{classify, extract_content};
use crate::robots::{RobotsPolicy, USER_AGENT};

/// Health probe budget.
const HEALTH_BUDGET: std::time::Duration = std::time::Duration::from_secs(2);

struct WebIndex {
    docs: HashMap<SmolStr, Document>,
    index: InvertedIndex,
    runbooks: HashMap<String, Runbook>,
}

impl WebIndex {
    fn empty() -> Self {
        Self {
            docs: HashMap::new(),
            index: InvertedIndex::new(),
            runbooks: HashMap::new(),
        }
    }
}

struct FetchedPage {
    body: String,
    content_type: String,
    last_modified: Option<DateTime<Utc>>,
}

/// Source adapter over HTTP endpoints, wikis, and crawlable sites.
///
/// Per-host token buckets are always enforced; the global concurrent-request
/// ceiling (a semaphore) is shared across hosts. Robots.txt is honored when
/// enabled, fetched once per host per process.
pub struct WebAdapter {
    config: WebConfig,
    include: Vec<Regex>,
    exclude: Vec<Regex>,
    client: reqwest::Client,
    auth: AuthState,
    robots: DashMap<String, Arc<RobotsPolicy>>,
    host_buckets: DashMap<String, Arc<TokenBucket>>,
    permits: Arc<Semaphore>,
    retry: RetryPolicy,
    state: RwLock<Arc<WebIndex>>,
    refresh: SingleFlight<Result<bool, SourceError>>,
    window: RollingWindow,
}

impl WebAdapter {
    /// Creates the adapter; fails on invalid URL patterns or root URLs.
    pub fn new(config: WebConfig) -> Result<Self, SourceError> {
        let (include, exclude) = config.compile_patterns()?;
        for root in &config.root_urls {
            Url::parse(root)
                .map_err(|e| SourceError::Fatal(format!("invalid root URL '{root}': {e}")))?;
        }
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| SourceError::Fatal(format!("http client build failed: {e}")))?;
        let auth = AuthState::new(config.auth.clone());
        let permits = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Ok(Self {
            include,
            exclude,
            client,
            auth,
            robots: DashMap::new(),
            host_buckets: DashMap::new(),
            permits,
            retry: RetryPolicy::default(),
            state: RwLock::new(Arc::new(WebIndex::empty())),
            refresh: SingleFlight::new(),
            window: RollingWindow::default(),
            config,
        })
    }

    fn snapshot(&self) -> Arc<WebIndex> {
        self.state
            .read()
            .map(|state| Arc::clone(&state))
            .unwrap_or_else(|e| Arc::clone(&e.into_inner()))
    }

    fn swap_state(&self, next: WebIndex) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        *state = Arc::new(next);
    }

    fn bucket_for(&self, host: &str) -> Arc<TokenBucket> {
        self.host_buckets
            .entry(host.to_owned())
            .or_insert_with(|| {
                Arc::new(TokenBucket::new(
                    host.to_owned(),
                    self.config.burst,
                    self.config.rate_per_sec,
                ))
            })
            .clone()
    }

    async fn robots_for(&self, url: &Url) -> Arc<RobotsPolicy> {
        let host = url.host_str().unwrap_or_default().to_owned();
        if let Some(policy) = self.robots.get(&host) {
            return policy.clone();
        }
        let mut robots_url = url.clone();
        robots_url.set_path("/robots.txt");
        robots_url.set_query(None);

        let policy = match self.client.get(robots_url).send().await {
            Ok(response) if response.status().is_success() => match response.text().await {
                Ok(text) => Arc::new(RobotsPolicy::parse(&text)),
                Err(_) => Arc::new(RobotsPolicy::allow_all()),
            },
            _ => Arc::new(RobotsPolicy::allow_all()),
        };
        self.robots.insert(host, policy.clone());
        policy
    }

    /// Whether a crawled (non-root) URL passes the include/exclude patterns.
    ///
    /// With no include patterns configured, crawling is restricted to the
    /// hosts of the configured roots.
    fn crawl_allowed(&self, url: &str) -> bool {
        if self.exclude.iter().any(|re| re.is_match(url)) {
            return false;
        }
        if self.include.is_empty() {
            let Ok(parsed) = Url::parse(url) else {
                return false;
            };
            let host = parsed.host_str().unwrap_or_default();
            return self.config.root_urls.iter().any(|root| {
                Url::parse(root)
                    .ok()
                    .and_then(|u| u.host_str().map(|h| h == host))
                    .unwrap_or(false)
            });
        }
        self.include.iter().any(|re| re.is_match(url))
    }

    async fn fetch_once(&self, url: &Url, reauth: bool) -> Result<FetchedPage, SourceError> {
        if reauth {
            self.auth.invalidate().await;
        }
        let builder = self.client.get(url.clone());
        let builder = self.auth.apply(&self.client, builder).await?;
        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                SourceError::Transient(format!("request to {url} timed out"))
            } else {
                SourceError::Transient(format!("request to {url} failed: {e}"))
            }
        })?;

        let status = response.status();
        match status.as_u16() {
            200..=299 => {}
            401 | 403 => {
                return Err(SourceError::AuthFailed(format!("{url} returned {status}")));
            }
            404 | 410 => return Err(SourceError::NotFound(url.to_string())),
            429 => return Err(SourceError::RateLimited(format!("{url} returned 429"))),
            500..=599 => {
                return Err(SourceError::Transient(format!("{url} returned {status}")));
            }
            _ => return Err(SourceError::Transient(format!("{url} returned {status}"))),
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("text/html")
            .to_owned();
        let last_modified = response
            .headers()
            .get(reqwest::header::LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
            .map(|dt| dt.with_timezone(&Utc));
        let body = response
            .text()
            .await
            .map_err(|e| SourceError::Transient(format!("body read from {url} failed: {e}")))?;
        Ok(FetchedPage {
            body,
            content_type,
            last_modified,
        })
    }

    /// Fetches one URL under the robots gate, per-host bucket, global
    /// ceiling, retry policy, and auth refresh-on-401.
    async fn fetch(&self, url: &Url) -> Result<FetchedPage, SourceError> {
        if self.config.respect_robots {
            let robots = self.robots_for(url).await;
            if !robots.allows(url.path()) {
                return Err(SourceError::NotFound(format!(
                    "{url} disallowed by robots.txt"
                )));
            }
        }

        let host = url.host_str().unwrap_or_default();
        let bucket = self.bucket_for(host);
        bucket
            .acquire(tokio::time::Instant::now() + self.config.request_timeout)
            .await
            .map_err(|e| SourceError::RateLimited(e.to_string()))?;

        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| SourceError::Fatal("request semaphore closed".to_owned()))?;

        let result = self.retry.run(|_| self.fetch_once(url, false)).await;

        // One re-authenticated retry after 401 for refreshable auth modes.
        match result {
            Err(SourceError::AuthFailed(_)) if self.auth.refreshable() => {
                self.fetch_once(url, true).await
            }
            other => other,
        }
    }

    fn page_to_document(&self, url: &Url, page: &FetchedPage) -> (Document, Option<Runbook>) {
        let updated_at = page.last_modified.unwrap_or_else(Utc::now);
        let id = SmolStr::new(url.as_str());

        if page.content_type.contains("json") {
            if let Ok(value) = serde_json::from_str::<serde_json::Value>(&page.body)
                && value.as_object().is_some_and(|obj| {
                    obj.contains_key("id")
                        && obj.contains_key("triggers")
                        && obj.contains_key("procedures")
                })
            {
                match serde_json::from_value::<Runbook>(value) {
                    Ok(runbook) if runbook.validate().is_ok() => {
                        let document = Document {
                            id,
                            title: runbook.title.clone(),
                            body: page.body.clone(),
                            source: self.config.name.clone(),
                            source_kind: SourceKind::Web,
                            uri: url.to_string(),
                            category: Category::Runbook,
                            updated_at,
                            metadata: Default::default(),
                        };
                        return (document, Some(runbook));
                    }
                    Ok(runbook) => {
                        warn!(source = %self.config.name, url = %url, id = %runbook.id,
                            "runbook failed validation, indexing as plain document");
                    }
                    Err(err) => {
                        warn!(source = %self.config.name, url = %url, error = %err,
                            "runbook-shaped JSON failed schema decode");
                    }
                }
            }
            let document = Document {
                id,
                title: url.to_string(),
                body: page.body.clone(),
                source: self.config.name.clone(),
                source_kind: SourceKind::Web,
                uri: url.to_string(),
                category: Category::Api,
                updated_at,
                metadata: Default::default(),
            };
            return (document, None);
        }

        let extracted = extract_content(&page.body, url, &self.config.strip_selectors);
        let category = classify(&extracted.title, &extracted.text, extracted.code_blocks);
        let mut metadata = std::collections::BTreeMap::new();
        metadata.insert("quality".to_owned(), format!("{:.2}", extracted.quality));
        let document = Document {
            id,
            title: extracted.title,
            body: extracted.text,
            source: self.config.name.clone(),
            source_kind: SourceKind::Web,
            uri: url.to_string(),
            category,
            updated_at,
            metadata,
        };
        (document, None)
    }

    async fn crawl(&self) -> WebIndex {
        let mut next = WebIndex::empty();
        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<(Url, usize)> = VecDeque::new();

        for root in &self.config.root_urls {
            if let Ok(url) = Url::parse(root) {
                queue.push_back((url, 0));
            }
        }

        while let Some((url, depth)) = queue.pop_front() {
            if !visited.insert(url.to_string()) {
                continue;
            }
            let page = match self.fetch(&url).await {
                Ok(page) => page,
                Err(err) => {
                    // Partial success: one bad page never fails the refresh.
                    warn!(source = %self.config.name, url = %url, error = %err, "fetch failed");
                    continue;
                }
            };

            let is_html = page.content_type.contains("html");
            let (document, runbook) = self.page_to_document(&url, &page);
            next.index
                .insert(document.id.clone(), &document.title, &document.body);
            if let Some(runbook) = runbook {
                next.runbooks.insert(runbook.id.clone(), runbook);
            }

            if is_html && depth < self.config.max_depth {
                let extracted = extract_content(&page.body, &url, &self.config.strip_selectors);
                for link in extracted.links {
                    if !visited.contains(&link) && self.crawl_allowed(&link) {
                        if let Ok(link) = Url::parse(&link) {
                            queue.push_back((link, depth + 1));
                        }
                    }
                }
            }
            next.docs.insert(document.id.clone(), document);
        }
        next
    }

    async fn rebuild(&self) -> Result<bool, SourceError> {
        let previous = self.snapshot();
        let next = self.crawl().await;
        if next.docs.is_empty() && !self.config.root_urls.is_empty() {
            // Everything failed; keep the previous index and report trouble.
            return Err(SourceError::Transient(
                "no page could be fetched during refresh".to_owned(),
            ));
        }
        let changed = next.docs.len() != previous.docs.len()
            || next.docs.keys().any(|id| !previous.docs.contains_key(id));
        info!(
            source = %self.config.name,
            documents = next.docs.len(),
            runbooks = next.runbooks.len(),
            changed,
            "web index refreshed"
        );
        self.swap_state(next);
        Ok(changed)
    }

    fn record(&self, started: Instant, success: bool) {
        self.window.record(started.elapsed(), success);
    }
}

#[async_trait]
impl SourceAdapter for WebAdapter {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Web
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
        let Some(root) = self.config.root_urls.first() else {
            return HealthSnapshot::unhealthy("no root URLs configured");
        };
        let probe = async {
            let url = Url::parse(root)
                .map_err(|e| SourceError::Fatal(format!("invalid root URL: {e}")))?;
            self.fetch_once(&url, false).await.map(|_| ())
        };
        let snapshot = self.snapshot();
        let health = match tokio::time::timeout(HEALTH_BUDGET, probe).await {
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
            kind: SourceKind::Web,
            document_count: self.snapshot().docs.len(),
            avg_response_time_ms: self.window.avg_latency_ms(),
            success_rate: self.window.success_rate(),
        }
    }

    async fn cleanup(&self) {
        self.swap_state(WebIndex::empty());
        self.robots.clear();
        self.host_buckets.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> WebAdapter {
        let mut config = WebConfig::new(
            "wiki",
            vec!["https://wiki.example.com/ops".to_owned()],
        );
        config.exclude_patterns = vec![r"\.pdf$".to_owned()];
        WebAdapter::new(config).unwrap()
    }

    #[test]
    fn crawl_restricted_to_root_hosts_without_includes() {
        let adapter = adapter();
        assert!(adapter.crawl_allowed("https://wiki.example.com/ops/db"));
        assert!(!adapter.crawl_allowed("https://elsewhere.example.org/x"));
        assert!(!adapter.crawl_allowed("https://wiki.example.com/manual.pdf"));
    }

    #[test]
    fn include_patterns_widen_the_crawl() {
        let mut config = WebConfig::new("wiki", vec!["https://a.example.com/".to_owned()]);
        config.include_patterns = vec![r"example\.org/runbooks/".to_owned()];
        let adapter = WebAdapter::new(config).unwrap();
        assert!(adapter.crawl_allowed("https://b.example.org/runbooks/db"));
        assert!(!adapter.crawl_allowed("https://b.example.org/blog/"));
    }

    #[test]
    fn json_runbook_pages_become_structured_runbooks() {
        let adapter = adapter();
        let url = Url::parse("https://wiki.example.com/api/runbooks/rb-1").unwrap();
        let page = FetchedPage {
            body: r#"{
                "id": "rb-1",
                "title": "Web Runbook",
                "triggers": [{"alert_type": "latency", "severity": ["high"], "systems": ["api"]}],
                "procedures": [{"id": "p1", "name": "restart", "steps": [{"action": "restart"}]}],
                "decision_tree": {"root": {"type": "action", "action": "p1"}}
            }"#
            .to_owned(),
            content_type: "application/json".to_owned(),
            last_modified: None,
        };
        let (document, runbook) = adapter.page_to_document(&url, &page);
        assert_eq!(document.category, Category::Runbook);
        assert_eq!(runbook.unwrap().id, "rb-1");
    }

    #[test]
    fn html_pages_are_extracted_and_classified() {
        let adapter = adapter();
        let url = Url::parse("https://wiki.example.com/ops/db").unwrap();
        let page = FetchedPage {
            body: "<html><head><title>DB Incident Runbook</title></head><body>\
                <nav>menu</nav><p>Severity: critical</p><p>1. Check</p><p>2. Fix</p></body></html>"
                .to_owned(),
            content_type: "text/html; charset=utf-8".to_owned(),
            last_modified: None,
        };
        let (document, runbook) = adapter.page_to_document(&url, &page);
        assert!(runbook.is_none());
        assert_eq!(document.category, Category::Runbook);
        assert_eq!(document.title, "DB Incident Runbook");
        assert!(!document.body.contains("menu"));
        assert!(document.metadata.contains_key("quality"));
    }
}
