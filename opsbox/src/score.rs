//! Composite confidence scoring.
//!
//! The composite score is a weighted sum of five contributors; the
//! match-reason list names every non-zero contributor. Ranking is a total
//! order: confidence descending, then adapter priority ascending (lower
//! number wins), then freshness descending.

use chrono::{DateTime, Utc};

use opsbox_core::{AlertContext, Runbook, SearchResult, tokenize};

/// Contributor weights of the composite score.
pub const WEIGHT_TRIGGER: f64 = 0.40;
/// Severity-alignment weight.
pub const WEIGHT_SEVERITY: f64 = 0.20;
/// System-overlap (Jaccard) weight.
pub const WEIGHT_SYSTEMS: f64 = 0.20;
/// Text-relevance weight.
pub const WEIGHT_TEXT: f64 = 0.15;
/// Freshness weight.
pub const WEIGHT_FRESHNESS: f64 = 0.05;

/// A composite score with its contributing reasons.
#[derive(Debug, Clone, PartialEq)]
pub struct Scored {
    /// Composite confidence in [0, 1].
    pub confidence: f64,
    /// Names of every non-zero contributor.
    pub reasons: Vec<String>,
}

/// Freshness contribution: 1 under 7 days old, 0 at 180 days or older,
/// linear in between.
pub fn freshness_score(updated_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let age_days = now.signed_duration_since(updated_at).num_days();
    if age_days < 7 {
        1.0
    } else if age_days >= 180 {
        0.0
    } else {
        (180 - age_days) as f64 / 173.0
    }
}

/// Scores a runbook against an alert context.
///
/// `text_relevance` is the adapter's normalized fuzzy+token score for the
/// producing document; `freshness_at` is the best known modification
/// timestamp (document mtime or runbook `last_validated`).
pub fn score_runbook(
    runbook: &Runbook,
    alert: &AlertContext,
    text_relevance: f64,
    freshness_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Scored {
    let mut confidence = 0.0;
    let mut reasons = Vec::new();

    // Exact trigger match on alert type; token overlap scores half.
    let exact = runbook
        .triggers
        .iter()
        .any(|t| t.alert_type.eq_ignore_ascii_case(&alert.alert_type));
    if exact {
        confidence += WEIGHT_TRIGGER;
        reasons.push("exact trigger match".to_owned());
    } else {
        let alert_tokens = tokenize(&alert.alert_type);
        let overlap = runbook
            .triggers
            .iter()
            .map(|t| {
                let trigger_tokens = tokenize(&t.alert_type);
                let shared = alert_tokens
                    .iter()
                    .filter(|tok| trigger_tokens.contains(tok))
                    .count();
                if alert_tokens.is_empty() {
                    0.0
                } else {
                    shared as f64 / alert_tokens.len() as f64
                }
            })
            .fold(0.0f64, f64::max);
        if overlap > 0.0 {
            confidence += WEIGHT_TRIGGER * 0.5 * overlap;
            reasons.push("partial trigger match".to_owned());
        }
    }

    // Severity alignment: the alert severity appears in a trigger's set.
    let severity_aligned = runbook
        .triggers
        .iter()
        .any(|t| t.severity.contains(&alert.severity));
    if severity_aligned {
        confidence += WEIGHT_SEVERITY;
        reasons.push("severity alignment".to_owned());
    }

    // System overlap: Jaccard of affected systems vs. trigger system globs.
    let jaccard = system_jaccard(runbook, alert);
    if jaccard > 0.0 {
        confidence += WEIGHT_SYSTEMS * jaccard;
        reasons.push("system overlap".to_owned());
    }

    if text_relevance > 0.0 {
        confidence += WEIGHT_TEXT * text_relevance.clamp(0.0, 1.0);
        reasons.push("text relevance".to_owned());
    }

    if let Some(updated_at) = freshness_at {
        let freshness = freshness_score(updated_at, now);
        if freshness > 0.0 {
            confidence += WEIGHT_FRESHNESS * freshness;
            reasons.push("freshness".to_owned());
        }
    }

    Scored {
        confidence: confidence.clamp(0.0, 1.0),
        reasons,
    }
}

fn system_jaccard(runbook: &Runbook, alert: &AlertContext) -> f64 {
    if alert.affected_systems.is_empty() {
        return 0.0;
    }
    let matched = alert
        .affected_systems
        .iter()
        .filter(|system| {
            runbook
                .triggers
                .iter()
                .any(|t| !t.systems.is_empty() && t.matches_system(system))
        })
        .count();
    let mut trigger_systems: Vec<String> = runbook
        .triggers
        .iter()
        .flat_map(|t| t.systems.iter().map(|s| s.to_ascii_lowercase()))
        .collect();
    trigger_systems.sort();
    trigger_systems.dedup();
    let union = alert.affected_systems.len() + trigger_systems.len() - matched;
    if union == 0 {
        0.0
    } else {
        matched as f64 / union as f64
    }
}

/// Plain text relevance between an alert and a runbook's title/triggers,
/// used when the producing adapter supplied no text score.
pub fn alert_text_relevance(runbook: &Runbook, alert: &AlertContext) -> f64 {
    let mut haystack = tokenize(&runbook.title);
    haystack.extend(tokenize(&runbook.id));
    for trigger in &runbook.triggers {
        haystack.extend(tokenize(&trigger.alert_type));
    }
    let needles = tokenize(&alert.alert_type);
    if needles.is_empty() {
        return 0.0;
    }
    let matched = needles.iter().filter(|n| haystack.contains(n)).count();
    matched as f64 / needles.len() as f64
}

/// Sorts a ranked list: confidence desc, adapter priority asc, freshness
/// desc. Deterministic given the same result set.
pub fn rank(results: &mut [SearchResult]) {
    results.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.source_priority.cmp(&b.source_priority))
            .then_with(|| b.document.updated_at.cmp(&a.document.updated_at))
    });
}
