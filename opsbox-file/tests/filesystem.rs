//! Integration tests for the filesystem adapter over temp directories.

use std::fs;
use std::sync::Arc;

use opsbox_core::{AlertContext, Category, SearchFilters, Severity, SourceAdapter};
use opsbox_file::{FileSystemAdapter, FileSystemConfig};
use tempfile::TempDir;

const RUNBOOK_JSON: &str = r#"{
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
        "steps": [{
            "action": "List the slowest queries",
            "command": "SELECT * FROM pg_stat_activity ORDER BY query_start LIMIT 10;"
        }]
    }]
}"#;

fn write_fixture(dir: &TempDir) {
    fs::create_dir_all(dir.path().join("runbooks")).unwrap();
    fs::write(dir.path().join("runbooks/rb-db-cpu.json"), RUNBOOK_JSON).unwrap();
    fs::write(
        dir.path().join("runbooks/postgres.md"),
        "---\ntitle: Postgres Failover Runbook\ncategory: runbook\n---\n\
         # Postgres Failover Runbook\n\nSeverity: critical\n\n1. Promote the replica\n2. Update DNS\n",
    )
    .unwrap();
    fs::write(
        dir.path().join("guide.md"),
        "# Monitoring Guide\n\nHow to read the dashboards.\n",
    )
    .unwrap();
}

async fn adapter_over(dir: &TempDir) -> FileSystemAdapter {
    let adapter = FileSystemAdapter::new(FileSystemConfig::new("docs", dir.path())).unwrap();
    adapter.initialize().await.unwrap();
    adapter
}

#[tokio::test]
async fn indexes_and_searches_documents() {
    let dir = TempDir::new().unwrap();
    write_fixture(&dir);
    let adapter = adapter_over(&dir).await;

    assert_eq!(adapter.metadata().document_count, 3);

    let results = adapter
        .search("postgres failover", &SearchFilters::default())
        .await
        .unwrap();
    assert!(!results.is_empty());
    assert_eq!(results[0].document.title, "Postgres Failover Runbook");
    assert_eq!(results[0].document.category, Category::Runbook);

    // Typo tolerance via the fuzzy matcher.
    let fuzzy = adapter
        .search("postgrs failovr", &SearchFilters::default())
        .await
        .unwrap();
    assert!(!fuzzy.is_empty());
}

#[tokio::test]
async fn runbook_json_is_parsed_and_matched() {
    let dir = TempDir::new().unwrap();
    write_fixture(&dir);
    let adapter = adapter_over(&dir).await;

    let alert = AlertContext::new("high_cpu", Severity::Critical, ["database".to_owned()]);
    let runbooks = adapter.search_runbooks(&alert).await.unwrap();
    assert_eq!(runbooks.len(), 1);
    assert_eq!(runbooks[0].id, "rb-db-cpu");
    assert_eq!(runbooks[0].procedures[0].id, "investigate_queries");

    // Unrelated alerts produce no candidates.
    let other = AlertContext::new("certificate_expiry", Severity::Low, []);
    assert!(adapter.search_runbooks(&other).await.unwrap().is_empty());
}

#[tokio::test]
async fn malformed_json_is_dropped_not_fatal() {
    let dir = TempDir::new().unwrap();
    write_fixture(&dir);
    fs::write(dir.path().join("broken.json"), "{invalid json").unwrap();

    let adapter = adapter_over(&dir).await;

    // Only the well-formed files are counted.
    assert_eq!(adapter.metadata().document_count, 3);

    // No search surfaces the broken file.
    let results = adapter.search("invalid json", &SearchFilters::default()).await.unwrap();
    assert!(results.iter().all(|r| r.document.id != "broken.json"));
    assert!(adapter.get_document("broken.json").await.unwrap().is_none());
}

#[tokio::test]
async fn refresh_skips_unchanged_files() {
    let dir = TempDir::new().unwrap();
    write_fixture(&dir);
    let adapter = adapter_over(&dir).await;

    // Nothing changed since initialize.
    assert!(!adapter.refresh_index(false).await.unwrap());

    fs::write(dir.path().join("new.md"), "# Incident Review Guide\n").unwrap();
    assert!(adapter.refresh_index(false).await.unwrap());
    assert_eq!(adapter.metadata().document_count, 4);

    fs::remove_file(dir.path().join("new.md")).unwrap();
    assert!(adapter.refresh_index(false).await.unwrap());
    assert_eq!(adapter.metadata().document_count, 3);
}

#[tokio::test]
async fn concurrent_refreshes_coalesce() {
    let dir = TempDir::new().unwrap();
    write_fixture(&dir);
    let adapter = Arc::new(adapter_over(&dir).await);

    let mut handles = Vec::new();
    for _ in 0..4 {
        let adapter = Arc::clone(&adapter);
        handles.push(tokio::spawn(async move { adapter.refresh_index(false).await }));
    }
    for handle in handles {
        // All calls return the (shared) outcome rather than erroring.
        handle.await.unwrap().unwrap();
    }
}

#[tokio::test]
async fn document_ids_are_stable_across_refresh() {
    let dir = TempDir::new().unwrap();
    write_fixture(&dir);
    let adapter = adapter_over(&dir).await;

    let before = adapter.get_document("guide.md").await.unwrap().unwrap();
    adapter.refresh_index(true).await.unwrap();
    let after = adapter.get_document("guide.md").await.unwrap().unwrap();
    assert_eq!(before.id, after.id);
    assert_eq!(before.title, after.title);
}

#[tokio::test]
async fn health_reports_document_count_and_missing_path() {
    let dir = TempDir::new().unwrap();
    write_fixture(&dir);
    let adapter = adapter_over(&dir).await;

    let health = adapter.health_check().await;
    assert!(health.healthy);
    assert_eq!(health.attributes["document_count"], "3");

    let gone = FileSystemAdapter::new(FileSystemConfig::new("gone", "/nonexistent/path/opsbox"))
        .unwrap();
    let health = gone.health_check().await;
    assert!(!health.healthy);
}
