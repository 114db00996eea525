//! Structural runbook extraction.
//!
//! Turns documents into structured [`Runbook`]s: JSON documents through the
//! schema, markdown documents through a structural parse of headings,
//! numbered steps, fenced commands, and an optional "Decision Tree"
//! section. Documents that fail validation are logged and dropped.

use std::collections::BTreeMap;

use pulldown_cmark::{Event, Parser, Tag, TagEnd};
use tracing::{debug, warn};

use opsbox_core::{
    Category, DecisionNode, DecisionTree, Document, Procedure, ProcedureStep, Runbook,
    RunbookMetadata, Severity, Trigger,
};

const HEADING_KEYWORDS: [&str; 3] = ["runbook", "procedure", "alert response"];
const SEVERITY_KEYWORDS: [(&str, Severity); 4] = [
    ("critical", Severity::Critical),
    ("high", Severity::High),
    ("medium", Severity::Medium),
    ("low", Severity::Low),
];

/// Extracts structured runbooks from documents.
pub struct RunbookExtractor;

impl RunbookExtractor {
    /// Decides whether the document represents a runbook and extracts it.
    ///
    /// Returns `None` for documents that do not qualify or fail validation.
    pub fn extract(document: &Document) -> Option<Runbook> {
        let body = document.body.trim_start();
        if body.starts_with('{') {
            return Self::extract_json(document);
        }
        Self::extract_markdown(document)
    }

    fn extract_json(document: &Document) -> Option<Runbook> {
        let value: serde_json::Value = match serde_json::from_str(&document.body) {
            Ok(value) => value,
            Err(err) => {
                warn!(doc = %document.global_id(), error = %err, "malformed JSON document");
                return None;
            }
        };
        let shaped = value.as_object().is_some_and(|obj| {
            obj.contains_key("id") && obj.contains_key("triggers") && obj.contains_key("procedures")
        });
        if !shaped {
            return None;
        }
        let runbook: Runbook = match serde_json::from_value(value) {
            Ok(runbook) => runbook,
            Err(err) => {
                warn!(doc = %document.global_id(), error = %err, "runbook JSON failed schema");
                return None;
            }
        };
        if let Err(err) = runbook.validate() {
            warn!(doc = %document.global_id(), error = %err, "runbook failed validation, dropped");
            return None;
        }
        Some(runbook)
    }

    fn extract_markdown(document: &Document) -> Option<Runbook> {
        let body_lower = document.body.to_ascii_lowercase();
        let title_lower = document.title.to_ascii_lowercase();

        let heading_qualifies = HEADING_KEYWORDS
            .iter()
            .any(|kw| title_lower.contains(kw) || first_heading_contains(&body_lower, kw));
        let has_steps = body_lower.lines().any(|line| {
            let line = line.trim_start();
            line.starts_with("1.") || line.starts_with("step 1")
        });
        let has_severity = SEVERITY_KEYWORDS
            .iter()
            .any(|(kw, _)| body_lower.contains(kw));
        if !heading_qualifies && !(has_steps && has_severity) {
            return None;
        }

        let parsed = parse_markdown(&document.body);
        if parsed.procedures.is_empty() {
            debug!(doc = %document.global_id(), "qualifying document had no extractable steps");
            return None;
        }

        let procedure_ids: Vec<String> =
            parsed.procedures.iter().map(|p| p.id.clone()).collect();
        let decision_tree = parsed
            .decision_bullets
            .as_ref()
            .and_then(|bullets| tree_from_bullets(bullets, &parsed.procedures))
            .unwrap_or_else(|| DecisionTree::linear(&procedure_ids));

        let severities: Vec<Severity> = SEVERITY_KEYWORDS
            .iter()
            .filter(|(kw, _)| body_lower.contains(kw))
            .map(|(_, severity)| *severity)
            .collect();

        let trigger = Trigger {
            alert_type: trigger_name(document),
            severity: severities,
            systems: document
                .metadata
                .get("systems")
                .map(|s| s.split(',').map(|x| x.trim().to_owned()).collect())
                .unwrap_or_default(),
            conditions: Vec::new(),
        };

        let runbook = Runbook {
            id: format!("rb-{}", slug(&document.id)),
            title: document.title.clone(),
            version: "1.0.0".to_owned(),
            triggers: vec![trigger],
            severity_mapping: BTreeMap::new(),
            decision_tree,
            procedures: parsed.procedures,
            metadata: RunbookMetadata {
                confidence_score: 0.5,
                last_validated: Some(document.updated_at),
                ..RunbookMetadata::default()
            },
        };
        match runbook.validate() {
            Ok(()) => Some(runbook),
            Err(err) => {
                warn!(doc = %document.global_id(), error = %err, "extracted runbook invalid");
                None
            }
        }
    }
}

/// The alert-type string a markdown runbook is triggered by: an explicit
/// `alert_type` metadata key, else the title tokens.
fn trigger_name(document: &Document) -> String {
    document
        .metadata
        .get("alert_type")
        .cloned()
        .unwrap_or_else(|| slug(&document.title).replace('-', "_"))
}

struct ParsedMarkdown {
    procedures: Vec<Procedure>,
    decision_bullets: Option<Vec<String>>,
}

fn parse_markdown(body: &str) -> ParsedMarkdown {
    let mut procedures: Vec<Procedure> = Vec::new();
    let mut decision_bullets: Option<Vec<String>> = None;

    let mut section = String::new();
    let mut in_heading = false;
    let mut heading_text = String::new();

    let mut ordered_depth = 0usize;
    let mut bullet_depth = 0usize;
    let mut in_item = false;
    let mut item_text = String::new();
    let mut steps: Vec<ProcedureStep> = Vec::new();

    let mut in_code = false;
    let mut code_text = String::new();

    for event in Parser::new(body) {
        match event {
            Event::Start(Tag::Heading { .. }) => {
                flush_procedure(&mut procedures, &mut steps, &section);
                in_heading = true;
                heading_text.clear();
            }
            Event::End(TagEnd::Heading(_)) => {
                in_heading = false;
                section = heading_text.trim().to_owned();
            }
            Event::Start(Tag::List(ordinal)) => {
                if ordinal.is_some() {
                    ordered_depth += 1;
                } else {
                    bullet_depth += 1;
                }
            }
            Event::End(TagEnd::List(is_ordered)) => {
                if is_ordered {
                    ordered_depth = ordered_depth.saturating_sub(1);
                    if ordered_depth == 0 {
                        flush_procedure(&mut procedures, &mut steps, &section);
                    }
                } else {
                    bullet_depth = bullet_depth.saturating_sub(1);
                }
            }
            Event::Start(Tag::Item) => {
                in_item = true;
                item_text.clear();
            }
            Event::End(TagEnd::Item) => {
                in_item = false;
                let text = item_text.trim().to_owned();
                if text.is_empty() {
                    continue;
                }
                if ordered_depth > 0 {
                    steps.push(ProcedureStep {
                        action: text,
                        command: None,
                        expected_outcome: None,
                        timeout_seconds: None,
                    });
                } else if bullet_depth > 0 && section.to_ascii_lowercase().contains("decision tree")
                {
                    decision_bullets.get_or_insert_with(Vec::new).push(text);
                }
            }
            Event::Start(Tag::CodeBlock(_)) => {
                in_code = true;
                code_text.clear();
            }
            Event::End(TagEnd::CodeBlock) => {
                in_code = false;
                let command = code_text.trim().to_owned();
                if command.is_empty() {
                    continue;
                }
                // A fenced block immediately after (or inside) a step is
                // that step's command.
                let target = if !steps.is_empty() {
                    steps.last_mut()
                } else {
                    procedures
                        .last_mut()
                        .and_then(|p| p.steps.last_mut())
                };
                if let Some(step) = target
                    && step.command.is_none()
                {
                    step.command = Some(command);
                }
            }
            Event::Text(text) | Event::Code(text) => {
                if in_heading {
                    heading_text.push_str(&text);
                } else if in_code {
                    code_text.push_str(&text);
                } else if in_item {
                    item_text.push_str(&text);
                }
            }
            Event::SoftBreak | Event::HardBreak => {
                if in_item {
                    item_text.push(' ');
                }
            }
            _ => {}
        }
    }
    flush_procedure(&mut procedures, &mut steps, &section);

    ParsedMarkdown {
        procedures,
        decision_bullets,
    }
}

fn flush_procedure(procedures: &mut Vec<Procedure>, steps: &mut Vec<ProcedureStep>, section: &str) {
    if steps.is_empty() {
        return;
    }
    let name = if section.is_empty() {
        format!("Procedure {}", procedures.len() + 1)
    } else {
        section.to_owned()
    };
    let id = if section.is_empty() {
        format!("procedure-{}", procedures.len() + 1)
    } else {
        slug(section)
    };
    // An unindented code fence splits a numbered list in two; steps flushed
    // under the same section belong to one procedure.
    if let Some(last) = procedures.last_mut()
        && last.id == id
    {
        last.steps.append(steps);
        return;
    }
    procedures.push(Procedure {
        id,
        name,
        steps: std::mem::take(steps),
        prerequisites: Vec::new(),
        tools_required: Vec::new(),
        rollback_steps: Vec::new(),
        success_criteria: Vec::new(),
        estimated_duration_minutes: None,
    });
}

/// Builds a condition chain from "Decision Tree" bullets of the form
/// `If <condition>: <action>`. Actions are resolved against procedure ids
/// and names; bullets that resolve to nothing are skipped. Returns `None`
/// when no bullet resolves, so the caller falls back to a linear tree.
fn tree_from_bullets(bullets: &[String], procedures: &[Procedure]) -> Option<DecisionTree> {
    let mut resolved: Vec<(String, String)> = Vec::new();
    for bullet in bullets {
        let rest = bullet
            .strip_prefix("If ")
            .or_else(|| bullet.strip_prefix("if "))
            .unwrap_or(bullet);
        let Some((condition, action_text)) = rest.split_once(':') else {
            continue;
        };
        let action_text = action_text.trim();
        let action = if opsbox_core::runbook::is_escalation_action(action_text) {
            Some(action_text.to_owned())
        } else {
            procedures
                .iter()
                .find(|p| {
                    p.id.eq_ignore_ascii_case(action_text)
                        || p.name.eq_ignore_ascii_case(action_text)
                        || action_text.to_ascii_lowercase().contains(&p.id)
                })
                .map(|p| p.id.clone())
        };
        if let Some(action) = action {
            resolved.push((condition.trim().to_owned(), action));
        }
    }
    if resolved.is_empty() {
        return None;
    }

    // Chain bottom-up: the "no" branch of each condition is the next one,
    // ending in escalation.
    let mut node = DecisionNode::Action {
        action: "escalate".to_owned(),
        next_steps: Vec::new(),
    };
    for (condition, action) in resolved.into_iter().rev() {
        let mut branches = BTreeMap::new();
        branches.insert(
            "yes".to_owned(),
            DecisionNode::Action {
                action,
                next_steps: Vec::new(),
            },
        );
        branches.insert("no".to_owned(), node);
        node = DecisionNode::Condition {
            condition,
            branches,
        };
    }
    Some(DecisionTree { root: node })
}

fn first_heading_contains(body_lower: &str, keyword: &str) -> bool {
    body_lower
        .lines()
        .find(|line| line.trim_start().starts_with('#'))
        .is_some_and(|line| line.contains(keyword))
}

fn slug(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_dash = true;
    for ch in text.chars() {
        if ch.is_alphanumeric() {
            out.extend(ch.to_lowercase());
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    out.trim_end_matches('-').to_owned()
}

/// Whether a category can hold extractable runbooks.
pub fn extractable(category: Category) -> bool {
    matches!(category, Category::Runbook | Category::Procedure)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use opsbox_core::SourceKind;
    use smol_str::SmolStr;

    fn document(title: &str, body: &str) -> Document {
        Document {
            id: SmolStr::new("runbooks/db.md"),
            title: title.to_owned(),
            body: body.to_owned(),
            source: SmolStr::new("docs"),
            source_kind: SourceKind::File,
            uri: "file:///runbooks/db.md".to_owned(),
            category: Category::Runbook,
            updated_at: Utc::now(),
            metadata: Default::default(),
        }
    }

    const MARKDOWN_RUNBOOK: &str = "\
# Database CPU Runbook

Severity: critical

## Investigate Queries

1. List the slowest queries
```sql
SELECT * FROM pg_stat_activity;
```
2. Check replication lag

## Decision Tree

- If lag is above 30s: investigate-queries
- If disk is full: escalate to storage
";

    #[test]
    fn markdown_runbook_is_extracted() {
        let rb = RunbookExtractor::extract(&document("Database CPU Runbook", MARKDOWN_RUNBOOK))
            .unwrap();
        assert_eq!(rb.title, "Database CPU Runbook");
        assert_eq!(rb.procedures.len(), 1);
        let procedure = &rb.procedures[0];
        assert_eq!(procedure.id, "investigate-queries");
        assert_eq!(procedure.steps.len(), 2);
        assert_eq!(
            procedure.steps[0].command.as_deref(),
            Some("SELECT * FROM pg_stat_activity;")
        );
        assert!(rb.validate().is_ok());
    }

    #[test]
    fn decision_tree_bullets_become_condition_chain() {
        let rb = RunbookExtractor::extract(&document("Database CPU Runbook", MARKDOWN_RUNBOOK))
            .unwrap();
        match &rb.decision_tree.root {
            DecisionNode::Condition { condition, branches } => {
                assert_eq!(condition, "lag is above 30s");
                assert!(branches.contains_key("yes"));
                assert!(branches.contains_key("no"));
            }
            other => panic!("expected condition root, got {other:?}"),
        }
    }

    #[test]
    fn plain_prose_is_not_a_runbook() {
        assert!(
            RunbookExtractor::extract(&document(
                "Architecture Notes",
                "Some prose about the system.\n"
            ))
            .is_none()
        );
    }

    #[test]
    fn steps_plus_severity_qualify_without_keyword_heading() {
        let body = "# Disk alerts\n\nSeverity: high\n\n1. Check df output\n2. Clear tmp\n";
        let rb = RunbookExtractor::extract(&document("Disk alerts", body)).unwrap();
        assert_eq!(rb.procedures.len(), 1);
        // No explicit tree: a linear all-procedures tree is synthesized.
        match &rb.decision_tree.root {
            DecisionNode::Action { action, .. } => assert_eq!(action, &rb.procedures[0].id),
            other => panic!("expected linear tree, got {other:?}"),
        }
    }

    #[test]
    fn json_document_goes_through_schema() {
        let body = r#"{
            "id": "rb-json",
            "title": "JSON Runbook",
            "triggers": [{"alert_type": "x", "severity": ["low"], "systems": []}],
            "procedures": [{"id": "p", "name": "p", "steps": [{"action": "a"}]}],
            "decision_tree": {"root": {"type": "action", "action": "p"}}
        }"#;
        let rb = RunbookExtractor::extract(&document("ignored", body)).unwrap();
        assert_eq!(rb.id, "rb-json");

        assert!(RunbookExtractor::extract(&document("bad", "{invalid json")).is_none());
    }
}
