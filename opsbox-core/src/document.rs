//! Document types for retrieved knowledge units.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::adapter::SourceKind;

/// Category tag assigned to a document during indexing.
///
/// Categories drive retrieval filters and the content-type-aware cache TTLs
/// (via [`ContentKind`]). Adapters classify documents by structural features
/// (numbered steps, code blocks, severity keywords) or explicit metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    /// Structured operational document keyed to alert conditions.
    Runbook,
    /// An ordered, executable sequence of steps.
    Procedure,
    /// Conditional navigation structure (usually embedded in a runbook).
    DecisionTree,
    /// API reference material.
    Api,
    /// How-to or conceptual guide.
    Guide,
    /// Anything else.
    General,
}

impl Category {
    /// The cache content kind this category maps to.
    pub fn content_kind(self) -> ContentKind {
        match self {
            Category::Runbook => ContentKind::Runbooks,
            Category::Procedure => ContentKind::Procedures,
            Category::DecisionTree => ContentKind::DecisionTrees,
            Category::Api | Category::Guide => ContentKind::KnowledgeBase,
            Category::General => ContentKind::General,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Category::Runbook => "runbook",
            Category::Procedure => "procedure",
            Category::DecisionTree => "decision-tree",
            Category::Api => "api",
            Category::Guide => "guide",
            Category::General => "general",
        };
        f.write_str(s)
    }
}

/// Content kind used to partition the cache.
///
/// Each kind carries its own TTL and warmup flag in the cache policy.
/// Invalidation by kind (`clear_kind`) only touches entries tagged with the
/// given kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    /// Extracted runbooks and runbook search results.
    Runbooks,
    /// Individual procedures.
    Procedures,
    /// Decision trees resolved for an alert context.
    DecisionTrees,
    /// Knowledge-base search results (guides, API docs).
    KnowledgeBase,
    /// Everything else.
    General,
}

impl ContentKind {
    /// All kinds, in a stable order. Used by `clear_all` and statistics.
    pub const ALL: [ContentKind; 5] = [
        ContentKind::Runbooks,
        ContentKind::Procedures,
        ContentKind::DecisionTrees,
        ContentKind::KnowledgeBase,
        ContentKind::General,
    ];
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ContentKind::Runbooks => "runbooks",
            ContentKind::Procedures => "procedures",
            ContentKind::DecisionTrees => "decision_trees",
            ContentKind::KnowledgeBase => "knowledge_base",
            ContentKind::General => "general",
        };
        f.write_str(s)
    }
}

/// A retrieved unit of documentation.
///
/// Documents are owned by the adapter that produced them. The `id` is stable
/// across re-indexing for the same underlying resource and unique within a
/// source; [`Document::global_id`] prefixes it with the source name for
/// global uniqueness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Identifier, stable across re-indexing, unique within the source.
    pub id: SmolStr,
    /// Human-readable title.
    pub title: String,
    /// Body text (markdown, extracted HTML text, or raw JSON).
    pub body: String,
    /// Name of the producing source.
    pub source: SmolStr,
    /// Kind of the producing source.
    pub source_kind: SourceKind,
    /// Origin URI (file path, URL, or repository path).
    pub uri: String,
    /// Category tag.
    pub category: Category,
    /// Last-modified timestamp of the underlying resource.
    pub updated_at: DateTime<Utc>,
    /// Free-form metadata (front-matter keys, HTTP headers, etc.).
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Document {
    /// Globally unique identifier: `"{source}:{id}"`.
    pub fn global_id(&self) -> String {
        format!("{}:{}", self.source, self.id)
    }

    /// Age of the document relative to `now`.
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.updated_at)
    }
}
