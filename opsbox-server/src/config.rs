//! Service configuration.
//!
//! Read once at startup from a YAML document; reconfiguration is a
//! restart. Credentials are never inlined - auth fields name the
//! environment variables the secrets are resolved from.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use opsbox::{EngineConfig, RegistryConfig, monitor::AlertRules};
use opsbox_cache::{HybridCache, KindPolicy, RemoteBackend, TtlPolicy};
use opsbox_core::{ContentKind, SourceAdapter, SourceError};
use opsbox_file::{FileSystemAdapter, FileSystemConfig};
use opsbox_github::{GitHubAdapter, GitHubConfig};
use opsbox_web::{WebAdapter, WebConfig};

/// One configured source, tagged by kind.
///
/// The kind string picks the adapter constructor - no reflection, just an
/// enum lookup.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    /// Local filesystem documentation tree.
    File(FileSystemConfig),
    /// HTTP endpoints, wikis, crawled sites.
    Web(WebConfig),
    /// GitHub repositories.
    Github(GitHubConfig),
}

impl SourceConfig {
    /// Builds the adapter for this source.
    pub fn into_adapter(self) -> Result<Arc<dyn SourceAdapter>, SourceError> {
        Ok(match self {
            SourceConfig::File(config) => Arc::new(FileSystemAdapter::new(config)?),
            SourceConfig::Web(config) => Arc::new(WebAdapter::new(config)?),
            SourceConfig::Github(config) => Arc::new(GitHubAdapter::new(config)?),
        })
    }
}

/// Cache strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CacheStrategy {
    /// Memory tier only.
    #[default]
    MemoryOnly,
    /// Memory tier plus remote tier.
    Hybrid,
}

fn default_max_entries() -> u64 {
    10_000
}

fn default_refill_cap() -> Duration {
    Duration::from_secs(300)
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(60)
}

/// Cache settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Whether caching is enabled at all.
    pub enabled: bool,
    /// Tier strategy.
    pub strategy: CacheStrategy,
    /// Memory-tier entry cap.
    pub max_entries: u64,
    /// Environment variable holding the remote tier URL.
    pub remote_url_env: Option<String>,
    /// Memory-tier TTL cap applied when refilling from the remote tier.
    #[serde(with = "humantime_serde")]
    pub refill_cap: Duration,
    /// Active expiry sweep interval for the memory tier.
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
    /// Per-content-kind TTL overrides.
    pub kinds: BTreeMap<ContentKind, KindPolicy>,
    /// Critical runbook ids pre-populated at startup.
    pub warm_ids: Vec<String>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            strategy: CacheStrategy::default(),
            max_entries: default_max_entries(),
            remote_url_env: None,
            refill_cap: default_refill_cap(),
            sweep_interval: default_sweep_interval(),
            kinds: BTreeMap::new(),
            warm_ids: Vec::new(),
        }
    }
}

impl CacheSettings {
    /// Builds the hybrid cache.
    ///
    /// A hybrid strategy whose remote URL is unset or whose environment
    /// variable is missing degrades to memory-only with a warning - the
    /// service must start healthy without the remote tier.
    pub fn build_cache(&self) -> Result<HybridCache, SourceError> {
        // Disabled caching keeps the wiring in place but zero-TTLs every
        // kind, so every read is a miss and entries die immediately.
        let policy = if self.enabled {
            TtlPolicy::with_overrides(self.kinds.clone())
        } else {
            let zeroed = ContentKind::ALL
                .iter()
                .map(|kind| {
                    (
                        *kind,
                        KindPolicy {
                            ttl: Duration::ZERO,
                            warm: false,
                        },
                    )
                })
                .collect();
            TtlPolicy::with_overrides(zeroed)
        };
        let mut builder = HybridCache::builder()
            .max_entries(self.max_entries)
            .refill_cap(self.refill_cap)
            .policy(policy);

        if self.enabled && self.strategy == CacheStrategy::Hybrid {
            match self.remote_url() {
                Some(url) => {
                    let remote = RemoteBackend::new(&url).map_err(|e| {
                        SourceError::Fatal(format!("invalid remote cache URL: {e}"))
                    })?;
                    builder = builder.remote(remote);
                }
                None => {
                    warn!("hybrid cache configured without a remote URL, running memory-only");
                }
            }
        }
        Ok(builder.build())
    }

    fn remote_url(&self) -> Option<String> {
        let var = self.remote_url_env.as_ref()?;
        match std::env::var(var) {
            Ok(url) if !url.is_empty() => Some(url),
            _ => {
                warn!(var = var.as_str(), "remote cache URL variable unset");
                None
            }
        }
    }

    /// The critical warm set, typed for the warmer.
    pub fn warm_set(&self) -> Vec<(ContentKind, String)> {
        self.warm_ids
            .iter()
            .map(|id| (ContentKind::Runbooks, id.clone()))
            .collect()
    }
}

fn default_adapter_deadline() -> Duration {
    Duration::from_secs(5)
}

fn default_overall_deadline() -> Duration {
    Duration::from_secs(10)
}

fn default_max_results() -> usize {
    10
}

/// Engine deadlines.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeadlineSettings {
    /// Per-adapter soft deadline.
    #[serde(with = "humantime_serde")]
    pub adapter: Duration,
    /// Overall hard deadline per tool call.
    #[serde(with = "humantime_serde")]
    pub overall: Duration,
    /// Ranked-list truncation.
    pub max_results: usize,
}

impl Default for DeadlineSettings {
    fn default() -> Self {
        Self {
            adapter: default_adapter_deadline(),
            overall: default_overall_deadline(),
            max_results: default_max_results(),
        }
    }
}

impl DeadlineSettings {
    /// As engine configuration.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            adapter_timeout: self.adapter,
            overall_timeout: self.overall,
            max_results: self.max_results,
        }
    }
}

/// Registry concurrency limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegistrySettings {
    /// Global ceiling on concurrent outbound adapter calls.
    pub global_concurrency: usize,
    /// Per-adapter ceiling.
    pub per_adapter_concurrency: usize,
    /// Queue wait before `Overloaded`.
    #[serde(with = "humantime_serde")]
    pub queue_wait: Duration,
    /// Consecutive failures before an adapter's breaker opens.
    pub breaker_threshold: u32,
    /// Breaker cool-off.
    #[serde(with = "humantime_serde")]
    pub breaker_cooloff: Duration,
    /// Probe budget in half-open state.
    pub breaker_probes: u32,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        let defaults = RegistryConfig::default();
        Self {
            global_concurrency: defaults.global_concurrency,
            per_adapter_concurrency: defaults.per_adapter_concurrency,
            queue_wait: defaults.queue_wait,
            breaker_threshold: defaults.breaker.failure_threshold,
            breaker_cooloff: defaults.breaker.cooloff,
            breaker_probes: defaults.breaker.probe_count,
        }
    }
}

impl RegistrySettings {
    /// As registry configuration.
    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            global_concurrency: self.global_concurrency,
            per_adapter_concurrency: self.per_adapter_concurrency,
            queue_wait: self.queue_wait,
            breaker: opsbox_resilience::BreakerConfig {
                failure_threshold: self.breaker_threshold,
                cooloff: self.breaker_cooloff,
                probe_count: self.breaker_probes,
            },
        }
    }
}

/// Performance alert rules.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PerformanceSettings {
    /// p95 latency threshold.
    #[serde(with = "humantime_serde")]
    pub p95_latency: Duration,
    /// Error-rate threshold in [0, 1].
    pub error_rate: f64,
    /// Minimum samples before rules fire.
    pub min_samples: usize,
}

impl Default for PerformanceSettings {
    fn default() -> Self {
        let defaults = AlertRules::default();
        Self {
            p95_latency: defaults.p95_latency,
            error_rate: defaults.error_rate,
            min_samples: defaults.min_samples,
        }
    }
}

impl PerformanceSettings {
    /// As monitor rules.
    pub fn alert_rules(&self) -> AlertRules {
        AlertRules {
            p95_latency: self.p95_latency,
            error_rate: self.error_rate,
            min_samples: self.min_samples,
        }
    }
}

fn default_feedback_path() -> PathBuf {
    PathBuf::from("feedback.jsonl")
}

/// Feedback log settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedbackSettings {
    /// Path of the append-only JSONL log.
    pub path: PathBuf,
}

impl Default for FeedbackSettings {
    fn default() -> Self {
        Self {
            path: default_feedback_path(),
        }
    }
}

/// The whole service configuration.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Configured sources.
    pub sources: Vec<SourceConfig>,
    /// Cache settings.
    pub cache: CacheSettings,
    /// Engine deadlines.
    pub deadlines: DeadlineSettings,
    /// Registry limits.
    pub registry: RegistrySettings,
    /// Performance alert rules.
    pub performance: PerformanceSettings,
    /// Escalation contact chains; defaults when absent.
    pub escalation: opsbox::EscalationPolicy,
    /// Feedback log settings.
    pub feedback: FeedbackSettings,
}

impl AppConfig {
    /// Parses a YAML configuration document.
    pub fn from_yaml(text: &str) -> Result<Self, String> {
        serde_saphyr::from_str(text).map_err(|e| e.to_string())
    }

    /// Reads and parses the configuration file.
    pub async fn load(path: &std::path::Path) -> Result<Self, String> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| format!("cannot read '{}': {e}", path.display()))?;
        Self::from_yaml(&text)
    }
}
