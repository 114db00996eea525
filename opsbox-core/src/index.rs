//! In-memory inverted index with fuzzy fallback.
//!
//! All three adapters index their documents here: a token index over
//! lowercased terms plus a bounded edit-distance matcher for typo
//! tolerance. Scores are normalized to [0, 1] so the query engine can use
//! them directly as the text-relevance contributor.

use std::collections::HashMap;

use smol_str::SmolStr;

/// Weight applied to fuzzy (edit-distance) token matches relative to exact
/// matches.
const FUZZY_WEIGHT: f64 = 0.6;

/// Extra weight for tokens that appear in the document title.
const TITLE_BOOST: f64 = 0.5;

/// Splits text into lowercased alphanumeric tokens.
///
/// Underscores and hyphens are treated as separators so `high_cpu` and
/// `high-cpu` produce the same tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        if ch.is_alphanumeric() {
            current.extend(ch.to_lowercase());
        } else if !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Levenshtein edit distance between two strings.
pub fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];
    for (i, &ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Edit-distance budget for a query token: longer tokens tolerate more typos.
fn fuzzy_budget(token: &str) -> usize {
    match token.chars().count() {
        0..=3 => 0,
        4..=7 => 1,
        _ => 2,
    }
}

#[derive(Default)]
struct DocEntry {
    title_tokens: Vec<String>,
}

/// Inverted index keyed on lowercased tokens.
///
/// The index is built inside `refresh_index` and swapped in whole, so it
/// needs no internal synchronization; adapters guard it with their own
/// snapshot lock.
#[derive(Default)]
pub struct InvertedIndex {
    postings: HashMap<String, HashMap<SmolStr, u32>>,
    docs: HashMap<SmolStr, DocEntry>,
}

impl InvertedIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of indexed documents.
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    /// Whether the index holds no documents.
    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Indexes a document's title and body under `id`, replacing any
    /// previous entry for the same id.
    pub fn insert(&mut self, id: SmolStr, title: &str, body: &str) {
        self.remove(&id);
        let title_tokens = tokenize(title);
        let body_tokens = tokenize(body);
        let entry = DocEntry {
            title_tokens: title_tokens.clone(),
        };
        for token in title_tokens.into_iter().chain(body_tokens) {
            *self
                .postings
                .entry(token)
                .or_default()
                .entry(id.clone())
                .or_insert(0) += 1;
        }
        self.docs.insert(id, entry);
    }

    /// Removes a document from the index.
    pub fn remove(&mut self, id: &SmolStr) {
        if self.docs.remove(id).is_none() {
            return;
        }
        self.postings.retain(|_, docs| {
            docs.remove(id);
            !docs.is_empty()
        });
    }

    /// Scores all documents against a free-text query.
    ///
    /// Returns `(id, score)` pairs with score in [0, 1], unsorted. Tokens
    /// with no exact posting fall back to the closest vocabulary term within
    /// the edit-distance budget, weighted down by [`FUZZY_WEIGHT`].
    pub fn search(&self, query: &str) -> Vec<(SmolStr, f64)> {
        let query_tokens = tokenize(query);
        if query_tokens.is_empty() || self.docs.is_empty() {
            return Vec::new();
        }

        let mut accumulated: HashMap<SmolStr, f64> = HashMap::new();
        for token in &query_tokens {
            let (posting, weight) = match self.postings.get(token) {
                Some(posting) => (Some(posting), 1.0),
                None => (self.closest_posting(token), FUZZY_WEIGHT),
            };
            let Some(posting) = posting else { continue };
            for (id, &tf) in posting {
                let entry = &self.docs[id];
                // Dampened term frequency so long documents don't dominate.
                let tf_score = f64::from(tf.min(4)) / 4.0;
                let mut contribution = weight * (0.5 + 0.5 * tf_score);
                if entry.title_tokens.iter().any(|t| t == token) {
                    contribution += TITLE_BOOST;
                }
                *accumulated.entry(id.clone()).or_insert(0.0) += contribution;
            }
        }

        let max_per_token = 1.0 + TITLE_BOOST;
        let denom = query_tokens.len() as f64 * max_per_token;
        accumulated
            .into_iter()
            .map(|(id, raw)| (id, (raw / denom).clamp(0.0, 1.0)))
            .collect()
    }

    /// The posting list of the vocabulary term closest to `token`, within
    /// the fuzzy budget.
    fn closest_posting(&self, token: &str) -> Option<&HashMap<SmolStr, u32>> {
        let budget = fuzzy_budget(token);
        if budget == 0 {
            return None;
        }
        let mut best: Option<(usize, &String)> = None;
        for term in self.postings.keys() {
            if term.len().abs_diff(token.len()) > budget {
                continue;
            }
            let distance = edit_distance(term, token);
            if distance <= budget
                && match best {
                    Some((d, t)) => distance < d || (distance == d && term < t),
                    None => true,
                }
            {
                best = Some((distance, term));
            }
        }
        best.map(|(_, term)| &self.postings[term])
    }
}
