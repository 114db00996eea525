//! Append-only resolution feedback log.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::info;

/// Outcome of a resolution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionOutcome {
    /// The procedure resolved the alert.
    Success,
    /// The procedure helped but did not fully resolve.
    PartialSuccess,
    /// The procedure did not help.
    Failure,
}

/// One feedback line. Feedback is capture-only in v1 - it never reranks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackRecord {
    /// Server-assigned timestamp.
    pub timestamp: DateTime<Utc>,
    /// Runbook the agent followed.
    pub runbook_id: String,
    /// Procedure the agent ran.
    pub procedure_id: String,
    /// Outcome of the attempt.
    pub outcome: ResolutionOutcome,
    /// Minutes from alert to resolution, if known.
    #[serde(default)]
    pub resolution_time_minutes: Option<u32>,
    /// Free-form notes.
    #[serde(default)]
    pub notes: Option<String>,
}

/// Append-only JSONL sink, flushed after every write.
pub struct FeedbackSink {
    file: Mutex<File>,
    path: std::path::PathBuf,
}

impl FeedbackSink {
    /// Opens (or creates) the log at `path` in append mode.
    pub async fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        Ok(Self {
            file: Mutex::new(file),
            path,
        })
    }

    /// Path of the underlying log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one record and flushes it to disk.
    pub async fn record(&self, record: &FeedbackRecord) -> std::io::Result<()> {
        let mut line = serde_json::to_string(record).map_err(std::io::Error::other)?;
        line.push('\n');
        let mut file = self.file.lock().await;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        info!(
            runbook_id = %record.runbook_id,
            procedure_id = %record.procedure_id,
            outcome = ?record.outcome,
            "resolution feedback recorded"
        );
        Ok(())
    }
}
