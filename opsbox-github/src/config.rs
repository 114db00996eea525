//! GitHub adapter configuration.

use std::time::Duration;

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use opsbox_core::SourceError;

fn default_priority() -> u32 {
    3
}

fn default_api_base() -> String {
    "https://api.github.com".to_owned()
}

fn default_include() -> Vec<String> {
    vec![
        "docs/**".to_owned(),
        "runbooks/**".to_owned(),
        "**/*.md".to_owned(),
        "**/*.json".to_owned(),
    ]
}

fn default_quota_margin() -> i64 {
    100
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_rate_per_sec() -> f64 {
    5.0
}

fn default_burst() -> u32 {
    10
}

/// Configuration of one GitHub source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubConfig {
    /// Source name, unique within the registry.
    pub name: SmolStr,
    /// Routing priority; lower wins ties.
    #[serde(default = "default_priority")]
    pub priority: u32,
    /// Repositories as `owner/name`.
    pub repositories: Vec<String>,
    /// Blob path globs worth indexing.
    #[serde(default = "default_include")]
    pub include_paths: Vec<String>,
    /// Environment variable holding the API token; unauthenticated when
    /// unset (sharply lower quota).
    #[serde(default)]
    pub token_env: Option<String>,
    /// API base URL; overridable for GitHub Enterprise.
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Remaining-quota safety margin; calls are suspended below it until
    /// the reported reset timestamp.
    #[serde(default = "default_quota_margin")]
    pub quota_margin: i64,
    /// Per-request timeout.
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Token-bucket refill rate for API calls.
    #[serde(default = "default_rate_per_sec")]
    pub rate_per_sec: f64,
    /// Token-bucket burst capacity.
    #[serde(default = "default_burst")]
    pub burst: u32,
}

impl GitHubConfig {
    /// Minimal config over a repository list, defaults elsewhere.
    pub fn new(name: impl Into<SmolStr>, repositories: Vec<String>) -> Self {
        Self {
            name: name.into(),
            priority: default_priority(),
            repositories,
            include_paths: default_include(),
            token_env: None,
            api_base: default_api_base(),
            quota_margin: default_quota_margin(),
            request_timeout: default_request_timeout(),
            rate_per_sec: default_rate_per_sec(),
            burst: default_burst(),
        }
    }

    pub(crate) fn build_include(&self) -> Result<GlobSet, SourceError> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &self.include_paths {
            let glob = Glob::new(pattern)
                .map_err(|e| SourceError::Fatal(format!("invalid glob '{pattern}': {e}")))?;
            builder.add(glob);
        }
        builder
            .build()
            .map_err(|e| SourceError::Fatal(format!("glob set build failed: {e}")))
    }
}
