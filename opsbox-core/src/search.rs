//! Search request filters and results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::document::{Category, Document};

/// Optional filters applied to a free-text search.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchFilters {
    /// Restrict to the given categories; empty means all.
    #[serde(default)]
    pub categories: Vec<Category>,
    /// Drop results below this confidence.
    #[serde(default)]
    pub min_confidence: Option<f64>,
    /// Truncate the ranked list to this many results.
    #[serde(default)]
    pub max_results: Option<usize>,
    /// Only return documents modified after this instant.
    #[serde(default)]
    pub updated_after: Option<DateTime<Utc>>,
}

impl SearchFilters {
    /// Whether a document passes the category and date-window filters.
    ///
    /// Confidence and result-count filters apply after scoring and are not
    /// checked here.
    pub fn admits(&self, document: &Document) -> bool {
        if !self.categories.is_empty() && !self.categories.contains(&document.category) {
            return false;
        }
        if let Some(after) = self.updated_after
            && document.updated_at < after
        {
            return false;
        }
        true
    }
}

/// A scored retrieval result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// The matched document.
    pub document: Document,
    /// Composite confidence in [0, 1]; monotone in match quality within a
    /// single query.
    pub confidence: f64,
    /// Names of every non-zero confidence contributor.
    pub match_reasons: Vec<String>,
    /// Retrieval latency of the producing adapter, in milliseconds.
    pub retrieval_time_ms: u64,
    /// Whether the result was served from cache.
    pub cache_hit: bool,
    /// Priority of the producing adapter (lower wins ties).
    #[serde(default)]
    pub source_priority: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::SourceKind;
    use smol_str::SmolStr;

    fn doc(category: Category, updated_at: DateTime<Utc>) -> Document {
        Document {
            id: SmolStr::new("d1"),
            title: "t".to_owned(),
            body: "b".to_owned(),
            source: SmolStr::new("fs"),
            source_kind: SourceKind::File,
            uri: "file:///d1".to_owned(),
            category,
            updated_at,
            metadata: Default::default(),
        }
    }

    #[test]
    fn filters_admit_by_category_and_date() {
        let now = Utc::now();
        let filters = SearchFilters {
            categories: vec![Category::Runbook],
            updated_after: Some(now - chrono::Duration::days(1)),
            ..Default::default()
        };
        assert!(filters.admits(&doc(Category::Runbook, now)));
        assert!(!filters.admits(&doc(Category::Guide, now)));
        assert!(!filters.admits(&doc(Category::Runbook, now - chrono::Duration::days(2))));
    }
}
