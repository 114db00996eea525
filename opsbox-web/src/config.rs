//! Web adapter configuration.

use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use opsbox_core::SourceError;

use crate::auth::AuthConfig;

fn default_priority() -> u32 {
    2
}

fn default_max_depth() -> usize {
    0
}

fn default_respect_robots() -> bool {
    true
}

fn default_rate_per_sec() -> f64 {
    4.0
}

fn default_burst() -> u32 {
    8
}

fn default_max_concurrent() -> usize {
    8
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_strip_selectors() -> Vec<String> {
    ["nav", "footer", "aside", "header", "script", "style", "noscript"]
        .into_iter()
        .map(str::to_owned)
        .collect()
}

/// Configuration of one web source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    /// Source name, unique within the registry.
    pub name: SmolStr,
    /// Routing priority; lower wins ties.
    #[serde(default = "default_priority")]
    pub priority: u32,
    /// Root URLs fetched on every refresh.
    pub root_urls: Vec<String>,
    /// Link-following depth below the roots; 0 fetches only the roots.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    /// URL patterns (regular expressions) a crawled URL must match.
    #[serde(default)]
    pub include_patterns: Vec<String>,
    /// URL patterns that exclude a URL even when included.
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    /// Honor `robots.txt` disallow rules.
    #[serde(default = "default_respect_robots")]
    pub respect_robots: bool,
    /// Authentication mode.
    #[serde(default)]
    pub auth: AuthConfig,
    /// Per-host token refill rate.
    #[serde(default = "default_rate_per_sec")]
    pub rate_per_sec: f64,
    /// Per-host burst capacity.
    #[serde(default = "default_burst")]
    pub burst: u32,
    /// Global ceiling on concurrent requests, shared across hosts.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Per-request timeout.
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Selectors removed before content extraction.
    #[serde(default = "default_strip_selectors")]
    pub strip_selectors: Vec<String>,
}

impl WebConfig {
    /// Minimal config over a set of root URLs, defaults elsewhere.
    pub fn new(name: impl Into<SmolStr>, root_urls: Vec<String>) -> Self {
        Self {
            name: name.into(),
            priority: default_priority(),
            root_urls,
            max_depth: default_max_depth(),
            include_patterns: Vec::new(),
            exclude_patterns: Vec::new(),
            respect_robots: default_respect_robots(),
            auth: AuthConfig::default(),
            rate_per_sec: default_rate_per_sec(),
            burst: default_burst(),
            max_concurrent: default_max_concurrent(),
            request_timeout: default_request_timeout(),
            strip_selectors: default_strip_selectors(),
        }
    }

    pub(crate) fn compile_patterns(&self) -> Result<(Vec<Regex>, Vec<Regex>), SourceError> {
        Ok((
            compile(&self.include_patterns)?,
            compile(&self.exclude_patterns)?,
        ))
    }
}

fn compile(patterns: &[String]) -> Result<Vec<Regex>, SourceError> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(p).map_err(|e| SourceError::Fatal(format!("invalid URL pattern '{p}': {e}")))
        })
        .collect()
}
