//! Blocking index build over the configured base paths.

use std::collections::HashMap;
use std::path::Path;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use globset::GlobSet;
use smol_str::SmolStr;
use tracing::{debug, warn};
use walkdir::WalkDir;

use opsbox_core::{Category, Document, InvertedIndex, Runbook, SourceError, SourceKind};

use crate::config::FileSystemConfig;
use crate::frontmatter::parse_front_matter;

/// Files larger than this are skipped; documentation files should be small.
const MAX_FILE_BYTES: u64 = 2 * 1024 * 1024;

pub(crate) struct IndexedDoc {
    pub document: Document,
    pub mtime: SystemTime,
    pub size: u64,
}

/// One immutable index generation. Readers hold an `Arc` snapshot; refresh
/// builds a new generation and swaps it in.
pub(crate) struct IndexState {
    pub docs: HashMap<SmolStr, IndexedDoc>,
    pub index: InvertedIndex,
    /// Runbook id to (document id, runbook).
    pub runbooks: HashMap<String, (SmolStr, Runbook)>,
}

impl IndexState {
    pub fn empty() -> Self {
        Self {
            docs: HashMap::new(),
            index: InvertedIndex::new(),
            runbooks: HashMap::new(),
        }
    }
}

pub(crate) struct ScanOutcome {
    pub state: IndexState,
    pub changed: bool,
    pub malformed: usize,
}

/// Walks the base paths and builds a fresh index generation.
///
/// With `previous` supplied, files whose mtime and size are unchanged are
/// carried over without re-reading.
pub(crate) fn scan(
    config: &FileSystemConfig,
    include: &GlobSet,
    exclude: &GlobSet,
    previous: Option<&IndexState>,
) -> Result<ScanOutcome, SourceError> {
    let mut state = IndexState::empty();
    let mut changed = false;
    let mut malformed = 0usize;

    for base in &config.base_paths {
        if !base.is_dir() {
            return Err(SourceError::Transient(format!(
                "base path '{}' is not a directory",
                base.display()
            )));
        }
        for entry in WalkDir::new(base).max_depth(config.max_depth) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(source = %config.name, error = %err, "skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry.path().strip_prefix(base).unwrap_or(entry.path());
            if !include.is_match(rel) || exclude.is_match(rel) {
                continue;
            }

            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(err) => {
                    warn!(source = %config.name, path = %rel.display(), error = %err, "stat failed");
                    continue;
                }
            };
            if metadata.len() > MAX_FILE_BYTES {
                debug!(source = %config.name, path = %rel.display(), "file too large, skipping");
                continue;
            }
            let mtime = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            let id = SmolStr::new(rel.to_string_lossy().replace('\\', "/"));

            // Unchanged files are carried over without re-reading.
            if let Some(previous) = previous
                && let Some(prior) = previous.docs.get(&id)
                && prior.mtime == mtime
                && prior.size == metadata.len()
            {
                carry_over(&mut state, &id, prior, previous);
                continue;
            }
            changed = true;

            let text = match std::fs::read_to_string(entry.path()) {
                Ok(text) => text,
                Err(err) => {
                    warn!(source = %config.name, path = %rel.display(), error = %err, "read failed");
                    continue;
                }
            };

            match index_file(config, &id, entry.path(), &text, mtime, metadata.len()) {
                Some((doc, runbook)) => {
                    state.index.insert(id.clone(), &doc.document.title, &doc.document.body);
                    if let Some(runbook) = runbook {
                        state.runbooks.insert(runbook.id.clone(), (id.clone(), runbook));
                    }
                    state.docs.insert(id, doc);
                }
                None => malformed += 1,
            }
        }
    }

    if let Some(previous) = previous
        && previous.docs.keys().any(|id| !state.docs.contains_key(id))
    {
        changed = true;
    }

    Ok(ScanOutcome {
        state,
        changed,
        malformed,
    })
}

fn carry_over(state: &mut IndexState, id: &SmolStr, prior: &IndexedDoc, previous: &IndexState) {
    state
        .index
        .insert(id.clone(), &prior.document.title, &prior.document.body);
    for (runbook_id, (doc_id, runbook)) in &previous.runbooks {
        if doc_id == id {
            state
                .runbooks
                .insert(runbook_id.clone(), (doc_id.clone(), runbook.clone()));
        }
    }
    state.docs.insert(
        id.clone(),
        IndexedDoc {
            document: prior.document.clone(),
            mtime: prior.mtime,
            size: prior.size,
        },
    );
}

/// Builds the document (and runbook, for well-formed runbook JSON) for one
/// file. `None` means the file is malformed and must not be indexed.
fn index_file(
    config: &FileSystemConfig,
    id: &SmolStr,
    path: &Path,
    text: &str,
    mtime: SystemTime,
    size: u64,
) -> Option<(IndexedDoc, Option<Runbook>)> {
    let updated_at: DateTime<Utc> = mtime.into();
    let is_json = path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    let (title, body, category, metadata, runbook) = if is_json {
        let value: serde_json::Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(err) => {
                warn!(source = %config.name, path = %path.display(), error = %err,
                    "malformed JSON, dropping file");
                return None;
            }
        };
        if looks_like_runbook(&value) {
            let runbook: Runbook = match serde_json::from_value(value) {
                Ok(runbook) => runbook,
                Err(err) => {
                    warn!(source = %config.name, path = %path.display(), error = %err,
                        "runbook JSON failed schema validation, dropping file");
                    return None;
                }
            };
            if let Err(err) = runbook.validate() {
                warn!(source = %config.name, path = %path.display(), error = %err,
                    "runbook failed invariant validation, dropping file");
                return None;
            }
            (
                runbook.title.clone(),
                text.to_owned(),
                Category::Runbook,
                Default::default(),
                Some(runbook),
            )
        } else {
            (file_stem(path), text.to_owned(), Category::General, Default::default(), None)
        }
    } else {
        let (meta, stripped) = parse_front_matter(text);
        let title = meta
            .get("title")
            .cloned()
            .or_else(|| first_heading(stripped))
            .unwrap_or_else(|| file_stem(path));
        let category = meta
            .get("category")
            .and_then(|c| serde_json::from_value(serde_json::Value::String(c.clone())).ok())
            .unwrap_or_else(|| classify_markdown(&title, stripped));
        (title, stripped.to_owned(), category, meta, None)
    };

    let document = Document {
        id: id.clone(),
        title,
        body,
        source: config.name.clone(),
        source_kind: SourceKind::File,
        uri: format!("file://{}", path.display()),
        category,
        updated_at,
        metadata,
    };
    Some((
        IndexedDoc {
            document,
            mtime,
            size,
        },
        runbook,
    ))
}

fn looks_like_runbook(value: &serde_json::Value) -> bool {
    value.as_object().is_some_and(|obj| {
        obj.contains_key("id") && obj.contains_key("triggers") && obj.contains_key("procedures")
    })
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

fn first_heading(text: &str) -> Option<String> {
    text.lines()
        .find_map(|line| line.strip_prefix('#'))
        .map(|rest| rest.trim_start_matches('#').trim().to_owned())
        .filter(|heading| !heading.is_empty())
}

fn classify_markdown(title: &str, body: &str) -> Category {
    let title = title.to_ascii_lowercase();
    if title.contains("runbook") || title.contains("alert response") {
        return Category::Runbook;
    }
    if title.contains("procedure") {
        return Category::Procedure;
    }
    if title.contains("api") {
        return Category::Api;
    }
    if title.contains("guide") || title.contains("how to") {
        return Category::Guide;
    }
    let body = body.to_ascii_lowercase();
    let has_steps = body.lines().any(|line| {
        let line = line.trim_start();
        line.starts_with("1.") || line.starts_with("step 1")
    });
    let has_severity = ["critical", "high", "medium", "low", "severity"]
        .iter()
        .any(|kw| body.contains(kw));
    if has_steps && has_severity {
        Category::Runbook
    } else if has_steps {
        Category::Procedure
    } else {
        Category::General
    }
}
