//! Service assembly: wires sources, cache, engine, and tools together.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use opsbox::{
    AdapterRegistry, HealthAggregator, PerformanceMonitor, QueryEngine, ToolDispatcher,
};
use opsbox_cache::{CacheWarmer, HybridCache};
use opsbox_core::SourceError;

use crate::config::AppConfig;

/// Bootstrap failure.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Configuration could not be parsed or applied.
    #[error("configuration error: {0}")]
    Config(String),
    /// A source adapter could not be constructed.
    #[error(transparent)]
    Source(#[from] SourceError),
    /// The feedback log could not be opened.
    #[error("feedback log error: {0}")]
    Feedback(#[from] std::io::Error),
}

/// The assembled service.
pub struct App {
    /// Tool dispatcher serving both ingress surfaces.
    pub dispatcher: Arc<ToolDispatcher>,
    /// The query engine.
    pub engine: Arc<QueryEngine>,
    /// Health roll-up.
    pub health: Arc<HealthAggregator>,
    /// The hybrid cache.
    pub cache: Arc<HybridCache>,
    sweeper: tokio::task::JoinHandle<()>,
}

impl App {
    /// Builds the service from its configuration.
    ///
    /// Adapters that fail to initialize stay registered and unhealthy; the
    /// service starts as long as the core wiring succeeds.
    pub async fn build(config: AppConfig) -> Result<App, BootstrapError> {
        let mut registry = AdapterRegistry::new(config.registry.registry_config());
        for source in config.sources.clone() {
            registry.register(source.into_adapter()?);
        }
        let registry = Arc::new(registry);

        let failed = registry.initialize_all().await;
        for (name, err) in &failed {
            warn!(adapter = name.as_str(), error = %err, "source starts unhealthy");
        }

        let cache = Arc::new(config.cache.build_cache()?);
        let sweeper = cache.start_sweeper(config.cache.sweep_interval);

        let engine = Arc::new(QueryEngine::new(
            Arc::clone(&registry),
            Arc::clone(&cache),
            config.deadlines.engine_config(),
        ));

        let warm_set = config.cache.warm_set();
        if !warm_set.is_empty() {
            CacheWarmer::new(Arc::clone(&cache), warm_set).spawn(engine.clone());
        }

        let monitor = Arc::new(PerformanceMonitor::new(config.performance.alert_rules()));
        let feedback = Arc::new(opsbox::FeedbackSink::open(&config.feedback.path).await?);
        let dispatcher = Arc::new(ToolDispatcher::new(
            Arc::clone(&engine),
            config.escalation.clone(),
            feedback,
            Arc::clone(&monitor),
        ));
        let health = Arc::new(HealthAggregator::new(
            Arc::clone(&registry),
            Arc::clone(&cache),
        ));

        info!(
            sources = registry.adapters().len(),
            failed = failed.len(),
            "service assembled"
        );
        Ok(App {
            dispatcher,
            engine,
            health,
            cache,
            sweeper,
        })
    }

    /// Releases adapters and background tasks.
    pub async fn shutdown(&self) {
        self.sweeper.abort();
        self.engine.registry().cleanup_all().await;
        info!("service shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourceConfig;
    use opsbox_file::FileSystemConfig;

    #[tokio::test]
    async fn builds_from_empty_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig {
            feedback: crate::config::FeedbackSettings {
                path: dir.path().join("feedback.jsonl"),
            },
            ..AppConfig::default()
        };
        let app = App::build(config).await.unwrap();
        let health = app.health.check().await;
        // No adapters configured: trivially healthy, memory-only cache.
        assert!(health.healthy);
        app.shutdown().await;
    }

    #[tokio::test]
    async fn failing_source_does_not_prevent_startup() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig {
            sources: vec![SourceConfig::File(FileSystemConfig::new(
                "missing",
                "/nonexistent/opsbox/docs",
            ))],
            feedback: crate::config::FeedbackSettings {
                path: dir.path().join("feedback.jsonl"),
            },
            ..AppConfig::default()
        };
        let app = App::build(config).await.unwrap();
        let health = app.health.check().await;
        assert!(!health.healthy, "sole adapter is unhealthy");
        assert!(health.components["adapter:missing"].error.is_some());
        app.shutdown().await;
    }
}
