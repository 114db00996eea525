//! The source adapter capability surface.
//!
//! Every source backend (filesystem, web, GitHub) implements
//! [`SourceAdapter`]. The trait is dyn-compatible; the registry holds
//! adapters as `Arc<dyn SourceAdapter>` and fans queries out to them.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::alert::AlertContext;
use crate::document::Document;
use crate::error::SourceError;
use crate::health::HealthSnapshot;
use crate::runbook::Runbook;
use crate::search::{SearchFilters, SearchResult};

/// Kind of a source backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Local filesystem documentation tree.
    File,
    /// HTTP endpoints, wikis, or crawled sites.
    Web,
    /// GitHub repositories.
    Github,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SourceKind::File => "file",
            SourceKind::Web => "web",
            SourceKind::Github => "github",
        };
        f.write_str(s)
    }
}

/// Descriptive metadata reported by an adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceMetadata {
    /// Configured source name.
    pub name: SmolStr,
    /// Source kind.
    pub kind: SourceKind,
    /// Number of documents currently indexed.
    pub document_count: usize,
    /// Average response time over the rolling window, in milliseconds.
    pub avg_response_time_ms: f64,
    /// Success rate over the rolling window, in [0, 1].
    pub success_rate: f64,
}

/// Uniform capability surface over a documentation backend.
///
/// Implementations wrap every outbound call in their circuit breaker and
/// rate limiter, record per-call latency into a rolling window, and classify
/// errors into [`SourceError`]. Retryable classes are retried with
/// exponential backoff before surfacing.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Configured source name, unique within the registry.
    fn name(&self) -> &str;

    /// Source kind.
    fn kind(&self) -> SourceKind;

    /// Routing priority; lower numbers win ties during result fusion.
    fn priority(&self) -> u32;

    /// Whether the adapter can serve `search_runbooks` natively.
    fn supports_runbooks(&self) -> bool {
        true
    }

    /// Authenticates and builds the initial index.
    async fn initialize(&self) -> Result<(), SourceError>;

    /// Free-text search with optional filters.
    async fn search(
        &self,
        query: &str,
        filters: &SearchFilters,
    ) -> Result<Vec<SearchResult>, SourceError>;

    /// Specialized retrieval returning structured runbooks for an alert.
    async fn search_runbooks(&self, alert: &AlertContext) -> Result<Vec<Runbook>, SourceError>;

    /// Direct fetch by id; `None` when the id resolves to nothing.
    async fn get_document(&self, id: &str) -> Result<Option<Document>, SourceError>;

    /// Rebuilds or revalidates the index.
    ///
    /// Concurrent calls coalesce: a call arriving while a refresh is running
    /// returns the running refresh's outcome instead of doing work. Returns
    /// `true` when the index changed.
    async fn refresh_index(&self, force: bool) -> Result<bool, SourceError>;

    /// Health probe; must complete within a bounded budget (default 2 s)
    /// even when the backing service hangs.
    async fn health_check(&self) -> HealthSnapshot;

    /// Rolling metadata for this adapter.
    fn metadata(&self) -> SourceMetadata;

    /// Releases network, file, and cache handles. Idempotent.
    async fn cleanup(&self);
}
