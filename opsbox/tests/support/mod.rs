//! Shared test support: a scriptable in-memory source adapter.
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use opsbox_core::{
    AlertContext, Document, HealthSnapshot, Runbook, SearchFilters, SearchResult, SourceAdapter,
    SourceError, SourceKind, SourceMetadata,
};
use smol_str::SmolStr;

/// What the mock does on every retrieval call.
pub enum Behavior {
    /// Answer from the configured runbooks/documents after `delay`.
    Ok { delay: Duration },
    /// Fail with a transient error.
    FailTransient,
    /// Never answer (sleeps for a minute).
    Hang,
}

pub struct MockAdapter {
    pub name: SmolStr,
    pub priority: u32,
    pub behavior: Behavior,
    pub runbooks: Vec<Runbook>,
    pub documents: Vec<Document>,
    pub calls: AtomicU32,
}

impl MockAdapter {
    pub fn new(name: &str, priority: u32, behavior: Behavior) -> Self {
        Self {
            name: SmolStr::new(name),
            priority,
            behavior,
            runbooks: Vec::new(),
            documents: Vec::new(),
            calls: AtomicU32::new(0),
        }
    }

    pub fn with_runbook(mut self, runbook: Runbook) -> Self {
        self.runbooks.push(runbook);
        self
    }

    pub fn with_document(mut self, document: Document) -> Self {
        self.documents.push(document);
        self
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    async fn gate(&self) -> Result<(), SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            Behavior::Ok { delay } => {
                if !delay.is_zero() {
                    tokio::time::sleep(*delay).await;
                }
                Ok(())
            }
            Behavior::FailTransient => Err(SourceError::Transient("mock backend down".into())),
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            }
        }
    }
}

#[async_trait]
impl SourceAdapter for MockAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SourceKind {
        SourceKind::File
    }

    fn priority(&self) -> u32 {
        self.priority
    }

    async fn initialize(&self) -> Result<(), SourceError> {
        Ok(())
    }

    async fn search(
        &self,
        query: &str,
        filters: &SearchFilters,
    ) -> Result<Vec<SearchResult>, SourceError> {
        self.gate().await?;
        let query = query.to_ascii_lowercase();
        Ok(self
            .documents
            .iter()
            .filter(|doc| filters.admits(doc))
            .filter(|doc| {
                doc.title.to_ascii_lowercase().contains(&query)
                    || doc.body.to_ascii_lowercase().contains(&query)
            })
            .map(|doc| SearchResult {
                document: doc.clone(),
                confidence: 0.7,
                match_reasons: vec!["text relevance".to_owned()],
                retrieval_time_ms: 1,
                cache_hit: false,
                source_priority: self.priority,
            })
            .collect())
    }

    async fn search_runbooks(&self, alert: &AlertContext) -> Result<Vec<Runbook>, SourceError> {
        self.gate().await?;
        Ok(self
            .runbooks
            .iter()
            .filter(|runbook| runbook.candidate_for(alert))
            .cloned()
            .collect())
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>, SourceError> {
        self.gate().await?;
        Ok(self.documents.iter().find(|d| d.id == id).cloned())
    }

    async fn refresh_index(&self, _force: bool) -> Result<bool, SourceError> {
        Ok(false)
    }

    async fn health_check(&self) -> HealthSnapshot {
        match self.behavior {
            Behavior::Ok { .. } => HealthSnapshot::healthy(),
            _ => HealthSnapshot::unhealthy("mock backend down"),
        }
    }

    fn metadata(&self) -> SourceMetadata {
        SourceMetadata {
            name: self.name.clone(),
            kind: SourceKind::File,
            document_count: self.documents.len() + self.runbooks.len(),
            avg_response_time_ms: 1.0,
            success_rate: 1.0,
        }
    }

    async fn cleanup(&self) {}
}

/// The scenario-1 runbook fixture.
pub fn db_cpu_runbook() -> Runbook {
    serde_json::from_value(serde_json::json!({
        "id": "rb-db-cpu",
        "title": "Database CPU Runbook",
        "version": "1.2.0",
        "triggers": [{
            "alert_type": "high_cpu",
            "severity": ["critical"],
            "systems": ["database"]
        }],
        "decision_tree": {
            "root": {
                "type": "condition",
                "condition": "Is replication lag above 30s?",
                "branches": {
                    "yes": {"type": "action", "action": "investigate_queries"},
                    "no": {"type": "action", "action": "escalate_to_dba"}
                }
            }
        },
        "procedures": [{
            "id": "investigate_queries",
            "name": "Investigate slow queries",
            "steps": [{"action": "List the slowest queries"}]
        }],
        "metadata": {"confidence_score": 0.9}
    }))
    .unwrap()
}

pub fn critical_db_alert() -> AlertContext {
    AlertContext::new(
        "high_cpu",
        opsbox_core::Severity::Critical,
        ["database".to_owned()],
    )
}

pub use builders::build_engine;

mod builders {
    use super::*;
    use opsbox::{AdapterRegistry, EngineConfig, QueryEngine, RegistryConfig};
    use opsbox_cache::HybridCache;

    pub fn build_engine(
        adapters: Vec<Arc<dyn SourceAdapter>>,
        registry_config: RegistryConfig,
        engine_config: EngineConfig,
    ) -> Arc<QueryEngine> {
        let mut registry = AdapterRegistry::new(registry_config);
        for adapter in adapters {
            registry.register(adapter);
        }
        let cache = Arc::new(HybridCache::builder().max_entries(1024).build());
        Arc::new(QueryEngine::new(Arc::new(registry), cache, engine_config))
    }
}
