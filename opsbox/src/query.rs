//! Tool vocabulary and cache fingerprinting.

use sha2::{Digest, Sha256};

use opsbox_core::ContentKind;

/// The fixed tool vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    /// Find runbooks applicable to an alert.
    SearchRunbooks,
    /// Resolve the governing decision tree for an alert context.
    GetDecisionTree,
    /// Fetch one procedure of a runbook.
    GetProcedure,
    /// Resolve the escalation contact chain.
    GetEscalationPath,
    /// List configured sources with health and metadata.
    ListSources,
    /// Free-text search across the knowledge base.
    SearchKnowledgeBase,
    /// Record the outcome of a resolution attempt.
    RecordResolutionFeedback,
}

impl ToolKind {
    /// All tools, in a stable order.
    pub const ALL: [ToolKind; 7] = [
        ToolKind::SearchRunbooks,
        ToolKind::GetDecisionTree,
        ToolKind::GetProcedure,
        ToolKind::GetEscalationPath,
        ToolKind::ListSources,
        ToolKind::SearchKnowledgeBase,
        ToolKind::RecordResolutionFeedback,
    ];

    /// Wire name of the tool.
    pub fn name(self) -> &'static str {
        match self {
            ToolKind::SearchRunbooks => "search_runbooks",
            ToolKind::GetDecisionTree => "get_decision_tree",
            ToolKind::GetProcedure => "get_procedure",
            ToolKind::GetEscalationPath => "get_escalation_path",
            ToolKind::ListSources => "list_sources",
            ToolKind::SearchKnowledgeBase => "search_knowledge_base",
            ToolKind::RecordResolutionFeedback => "record_resolution_feedback",
        }
    }

    /// Parses a wire name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|tool| tool.name() == name)
    }

    /// Whether the tool is pure. Results of pure tools are cacheable;
    /// feedback recording is a write and never cached.
    pub fn is_pure(self) -> bool {
        !matches!(self, ToolKind::RecordResolutionFeedback)
    }

    /// Cache content kind of the tool's results.
    pub fn content_kind(self) -> ContentKind {
        match self {
            ToolKind::SearchRunbooks => ContentKind::Runbooks,
            ToolKind::GetDecisionTree => ContentKind::DecisionTrees,
            ToolKind::GetProcedure => ContentKind::Procedures,
            ToolKind::SearchKnowledgeBase => ContentKind::KnowledgeBase,
            _ => ContentKind::General,
        }
    }
}

/// Computes the stable cache fingerprint of a tool invocation.
///
/// The hash covers the tool name and a canonical rendering of the inputs:
/// object keys sorted, strings lowercased. Stability across processes
/// matters - fingerprints key the remote cache tier too.
pub fn fingerprint(tool: ToolKind, inputs: &serde_json::Value) -> String {
    let mut canonical = String::new();
    canonicalize(inputs, &mut canonical);
    let mut hasher = Sha256::new();
    hasher.update(tool.name().as_bytes());
    hasher.update(b"|");
    hasher.update(canonical.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(32);
    for byte in digest.iter().take(16) {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

fn canonicalize(value: &serde_json::Value, out: &mut String) {
    match value {
        serde_json::Value::Null => out.push_str("null"),
        serde_json::Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        serde_json::Value::Number(n) => out.push_str(&n.to_string()),
        serde_json::Value::String(s) => {
            out.push('"');
            out.push_str(&s.to_lowercase());
            out.push('"');
        }
        serde_json::Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                canonicalize(item, out);
            }
            out.push(']');
        }
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push('"');
                out.push_str(&key.to_lowercase());
                out.push_str("\":");
                canonicalize(&map[key], out);
            }
            out.push('}');
        }
    }
}
