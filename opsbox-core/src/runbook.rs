//! Runbook data model and the runbook JSON contract.
//!
//! A [`Runbook`] is a derived artifact: it is constructed on demand from
//! documents by the runbook extractor, cached, and never mutated. The JSON
//! shape accepted here is the external contract for `.json` runbook files
//! indexed by source adapters.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::alert::Severity;
use crate::error::SourceError;

/// Maximum decision-tree depth accepted on decode.
///
/// Trees are acyclic by construction (owned nodes), but a depth bound keeps
/// adversarial or broken inputs from producing pathological recursion.
pub const MAX_TREE_DEPTH: usize = 32;

/// Alert condition that makes a runbook applicable.
///
/// The structured form is authoritative. A legacy flat form
/// (`"triggers": ["high_cpu"]`) is accepted on decode and normalized into a
/// structured trigger with empty severity and system sets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "TriggerForm")]
pub struct Trigger {
    /// Alert type this trigger matches, e.g. `"high_cpu"`.
    pub alert_type: String,
    /// Severities this trigger applies to; empty means any.
    #[serde(default)]
    pub severity: Vec<Severity>,
    /// System glob patterns this trigger applies to; empty means any.
    #[serde(default)]
    pub systems: Vec<String>,
    /// Optional free-form conditions (informational).
    #[serde(default)]
    pub conditions: Vec<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TriggerForm {
    Flat(String),
    Structured {
        alert_type: String,
        #[serde(default)]
        severity: Vec<Severity>,
        #[serde(default)]
        systems: Vec<String>,
        #[serde(default)]
        conditions: Vec<String>,
    },
}

impl From<TriggerForm> for Trigger {
    fn from(form: TriggerForm) -> Self {
        match form {
            TriggerForm::Flat(alert_type) => Trigger {
                alert_type,
                severity: Vec::new(),
                systems: Vec::new(),
                conditions: Vec::new(),
            },
            TriggerForm::Structured {
                alert_type,
                severity,
                systems,
                conditions,
            } => Trigger {
                alert_type,
                severity,
                systems,
                conditions,
            },
        }
    }
}

impl Trigger {
    /// Whether a system name matches any of this trigger's system globs.
    ///
    /// Globs support a single trailing `*`; anything else is an exact,
    /// case-insensitive match. An empty system list matches everything.
    pub fn matches_system(&self, system: &str) -> bool {
        if self.systems.is_empty() {
            return true;
        }
        let system = system.to_ascii_lowercase();
        self.systems.iter().any(|pattern| {
            let pattern = pattern.to_ascii_lowercase();
            match pattern.strip_suffix('*') {
                Some(prefix) => system.starts_with(prefix),
                None => system == pattern,
            }
        })
    }
}

/// Per-severity response policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeverityPolicy {
    /// Response-time budget in minutes.
    pub response_time_minutes: u32,
    /// Escalate automatically when the budget is exceeded.
    #[serde(default)]
    pub auto_escalate: bool,
    /// Requires immediate action regardless of budget.
    #[serde(default)]
    pub immediate_action: bool,
}

/// A node in a decision tree.
///
/// Either a predicate over the alert context with labeled branches, or a
/// terminal action. Terminal actions refer to a procedure id or to an
/// escalation verb (`escalate…`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DecisionNode {
    /// Predicate node: a boolean condition with a branch per outcome label.
    Condition {
        /// Human-readable condition evaluated against the alert context.
        condition: String,
        /// Branch label (e.g. `"yes"`, `"no"`) to child node.
        branches: BTreeMap<String, DecisionNode>,
    },
    /// Terminal node: named action plus ordered next-step hints.
    Action {
        /// Procedure id or escalation verb.
        action: String,
        /// Ordered follow-up hints for the agent.
        #[serde(default)]
        next_steps: Vec<String>,
    },
}

impl DecisionNode {
    fn collect_actions<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            DecisionNode::Condition { branches, .. } => {
                for child in branches.values() {
                    child.collect_actions(out);
                }
            }
            DecisionNode::Action { action, .. } => out.push(action),
        }
    }

    fn depth(&self) -> usize {
        match self {
            DecisionNode::Condition { branches, .. } => {
                1 + branches.values().map(DecisionNode::depth).max().unwrap_or(0)
            }
            DecisionNode::Action { .. } => 1,
        }
    }
}

/// Rooted decision tree of a runbook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    /// Root node.
    pub root: DecisionNode,
}

impl DecisionTree {
    /// All terminal action names reachable in the tree.
    pub fn actions(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.root.collect_actions(&mut out);
        out
    }

    /// A linear tree that runs the given procedures in order.
    ///
    /// Used when a document has no explicit decision tree.
    pub fn linear(procedure_ids: &[String]) -> Self {
        let next_steps: Vec<String> = procedure_ids.iter().skip(1).cloned().collect();
        let action = procedure_ids.first().cloned().unwrap_or_else(|| "escalate".to_owned());
        DecisionTree {
            root: DecisionNode::Action { action, next_steps },
        }
    }
}

/// One step of a procedure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcedureStep {
    /// What to do.
    pub action: String,
    /// Optional command to run.
    #[serde(default)]
    pub command: Option<String>,
    /// Expected outcome of the step.
    #[serde(default)]
    pub expected_outcome: Option<String>,
    /// Per-step timeout in seconds.
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

/// An ordered, executable sequence of steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Procedure {
    /// Identifier referenced by decision-tree actions.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Ordered steps.
    pub steps: Vec<ProcedureStep>,
    /// Prerequisites checked before running.
    #[serde(default)]
    pub prerequisites: Vec<String>,
    /// Tools the operator needs.
    #[serde(default)]
    pub tools_required: Vec<String>,
    /// Rollback steps if the procedure fails midway.
    #[serde(default)]
    pub rollback_steps: Vec<String>,
    /// Criteria confirming success.
    #[serde(default)]
    pub success_criteria: Vec<String>,
    /// Estimated duration in minutes.
    #[serde(default)]
    pub estimated_duration_minutes: Option<u32>,
}

/// Runbook quality metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RunbookMetadata {
    /// Author-asserted confidence in [0, 1].
    #[serde(default)]
    pub confidence_score: f64,
    /// Historical success rate in [0, 1], if tracked.
    #[serde(default)]
    pub success_rate: Option<f64>,
    /// Average resolution time in minutes, if tracked.
    #[serde(default)]
    pub avg_resolution_minutes: Option<u32>,
    /// When the runbook was last validated against reality.
    #[serde(default)]
    pub last_validated: Option<DateTime<Utc>>,
    /// Other runbooks or systems this one depends on.
    #[serde(default)]
    pub dependencies: Vec<String>,
}

/// Structured operational document keyed to alert conditions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Runbook {
    /// Stable identifier.
    pub id: String,
    /// Title.
    pub title: String,
    /// Semantic version string.
    #[serde(default = "default_version")]
    pub version: String,
    /// Ordered triggers.
    pub triggers: Vec<Trigger>,
    /// Severity to response policy map.
    #[serde(default)]
    pub severity_mapping: BTreeMap<Severity, SeverityPolicy>,
    /// Decision tree; synthesized as linear when absent in the source.
    #[serde(default = "missing_tree")]
    pub decision_tree: DecisionTree,
    /// Ordered procedures.
    pub procedures: Vec<Procedure>,
    /// Quality metadata.
    #[serde(default)]
    pub metadata: RunbookMetadata,
}

fn default_version() -> String {
    "1.0.0".to_owned()
}

fn missing_tree() -> DecisionTree {
    DecisionTree {
        root: DecisionNode::Action {
            action: "escalate".to_owned(),
            next_steps: Vec::new(),
        },
    }
}

/// Whether a decision-tree action is an escalation verb rather than a
/// procedure reference.
pub fn is_escalation_action(action: &str) -> bool {
    action.to_ascii_lowercase().starts_with("escalate")
}

impl Runbook {
    /// Validates the structural invariants of the runbook.
    ///
    /// - every procedure referenced by the decision tree exists in
    ///   `procedures` (or is an escalation verb);
    /// - the tree depth is bounded by [`MAX_TREE_DEPTH`];
    /// - the metadata confidence score is within [0, 1].
    pub fn validate(&self) -> Result<(), SourceError> {
        if self.id.is_empty() {
            return Err(SourceError::Malformed("runbook id is empty".to_owned()));
        }
        if self.decision_tree.root.depth() > MAX_TREE_DEPTH {
            return Err(SourceError::Malformed(format!(
                "runbook {}: decision tree deeper than {MAX_TREE_DEPTH}",
                self.id
            )));
        }
        if !(0.0..=1.0).contains(&self.metadata.confidence_score) {
            return Err(SourceError::Malformed(format!(
                "runbook {}: confidence score {} outside [0, 1]",
                self.id, self.metadata.confidence_score
            )));
        }
        for action in self.decision_tree.actions() {
            if is_escalation_action(action) {
                continue;
            }
            if !self.procedures.iter().any(|p| p.id == action) {
                return Err(SourceError::Malformed(format!(
                    "runbook {}: decision tree references unknown procedure '{action}'",
                    self.id
                )));
            }
        }
        Ok(())
    }

    /// The linear tree synthesized from this runbook's procedures.
    pub fn synthesized_tree(&self) -> DecisionTree {
        let ids: Vec<String> = self.procedures.iter().map(|p| p.id.clone()).collect();
        DecisionTree::linear(&ids)
    }

    /// Whether this runbook is a retrieval candidate for the alert.
    ///
    /// Candidate selection is deliberately loose - an exact or
    /// token-overlapping alert type, or an affected-system match against a
    /// trigger's system globs, qualifies. The query engine computes the
    /// composite confidence and filters.
    pub fn candidate_for(&self, alert: &crate::alert::AlertContext) -> bool {
        let alert_tokens = crate::index::tokenize(&alert.alert_type);
        let by_type = self.triggers.iter().any(|trigger| {
            if trigger.alert_type.eq_ignore_ascii_case(&alert.alert_type) {
                return true;
            }
            let trigger_tokens = crate::index::tokenize(&trigger.alert_type);
            alert_tokens.iter().any(|t| trigger_tokens.contains(t))
        });
        by_type
            || alert.affected_systems.iter().any(|system| {
                self.triggers
                    .iter()
                    .any(|t| !t.systems.is_empty() && t.matches_system(system))
            })
    }

    /// Looks up a procedure by id or, failing that, by name.
    pub fn procedure(&self, key: &str) -> Option<&Procedure> {
        self.procedures
            .iter()
            .find(|p| p.id == key)
            .or_else(|| self.procedures.iter().find(|p| p.name.eq_ignore_ascii_case(key)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn procedure(id: &str) -> Procedure {
        Procedure {
            id: id.to_owned(),
            name: id.replace('_', " "),
            steps: vec![ProcedureStep {
                action: "check".to_owned(),
                command: None,
                expected_outcome: None,
                timeout_seconds: None,
            }],
            prerequisites: Vec::new(),
            tools_required: Vec::new(),
            rollback_steps: Vec::new(),
            success_criteria: Vec::new(),
            estimated_duration_minutes: None,
        }
    }

    fn runbook_with_tree(root: DecisionNode) -> Runbook {
        Runbook {
            id: "rb-1".to_owned(),
            title: "Test".to_owned(),
            version: "1.0.0".to_owned(),
            triggers: vec![Trigger {
                alert_type: "high_cpu".to_owned(),
                severity: vec![Severity::Critical],
                systems: vec!["database".to_owned()],
                conditions: Vec::new(),
            }],
            severity_mapping: BTreeMap::new(),
            decision_tree: DecisionTree { root },
            procedures: vec![procedure("investigate_queries")],
            metadata: RunbookMetadata::default(),
        }
    }

    #[test]
    fn validate_accepts_known_procedure_refs() {
        let rb = runbook_with_tree(DecisionNode::Action {
            action: "investigate_queries".to_owned(),
            next_steps: Vec::new(),
        });
        assert!(rb.validate().is_ok());
    }

    #[test]
    fn validate_accepts_escalation_actions() {
        let rb = runbook_with_tree(DecisionNode::Action {
            action: "escalate_to_oncall".to_owned(),
            next_steps: Vec::new(),
        });
        assert!(rb.validate().is_ok());
    }

    #[test]
    fn validate_rejects_unknown_procedure_refs() {
        let rb = runbook_with_tree(DecisionNode::Action {
            action: "restart_everything".to_owned(),
            next_steps: Vec::new(),
        });
        assert!(matches!(rb.validate(), Err(SourceError::Malformed(_))));
    }

    #[test]
    fn flat_triggers_are_normalized() {
        let json = r#"{
            "id": "rb-legacy",
            "title": "Legacy",
            "triggers": ["disk_full"],
            "procedures": []
        }"#;
        let rb: Runbook = serde_json::from_str(json).unwrap();
        assert_eq!(rb.triggers[0].alert_type, "disk_full");
        assert!(rb.triggers[0].severity.is_empty());
        assert!(rb.triggers[0].systems.is_empty());
    }

    #[test]
    fn structured_triggers_decode() {
        let json = r#"{
            "id": "rb-db-cpu",
            "title": "Database CPU",
            "triggers": [{
                "alert_type": "high_cpu",
                "severity": ["critical"],
                "systems": ["database"]
            }],
            "procedures": []
        }"#;
        let rb: Runbook = serde_json::from_str(json).unwrap();
        assert_eq!(rb.triggers[0].severity, vec![Severity::Critical]);
    }

    #[test]
    fn system_glob_matching() {
        let t = Trigger {
            alert_type: "x".to_owned(),
            severity: Vec::new(),
            systems: vec!["db-*".to_owned(), "cache".to_owned()],
            conditions: Vec::new(),
        };
        assert!(t.matches_system("db-primary"));
        assert!(t.matches_system("Cache"));
        assert!(!t.matches_system("web-1"));
    }

    #[test]
    fn linear_tree_runs_procedures_in_order() {
        let tree = DecisionTree::linear(&["a".to_owned(), "b".to_owned(), "c".to_owned()]);
        match &tree.root {
            DecisionNode::Action { action, next_steps } => {
                assert_eq!(action, "a");
                assert_eq!(next_steps, &["b".to_owned(), "c".to_owned()]);
            }
            _ => panic!("expected action root"),
        }
    }
}
