//! Alert context types - the query input produced by incident-response agents.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Alert severity level, ordered from least to most severe.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational, no response-time pressure.
    Low,
    /// Needs attention within business hours.
    #[default]
    Medium,
    /// Needs prompt attention.
    High,
    /// Active incident, immediate response.
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        f.write_str(s)
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(format!("unknown severity: {other}")),
        }
    }
}

/// State carried by an agent that has already started working the alert.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    /// Procedure ids the agent has already attempted.
    #[serde(default)]
    pub attempted_procedures: Vec<String>,
    /// Minutes elapsed since the alert fired.
    #[serde(default)]
    pub elapsed_minutes: Option<u32>,
    /// Whether the alert fired during business hours.
    #[serde(default)]
    pub business_hours: Option<bool>,
}

/// The alert-driven query input.
///
/// Sets are ordered (`BTreeSet`) so that normalization for cache
/// fingerprinting is canonical without extra sorting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertContext {
    /// Alert type string, e.g. `"high_cpu"` or `"disk_full"`.
    pub alert_type: String,
    /// Severity of the firing alert.
    pub severity: Severity,
    /// Systems affected by the alert.
    #[serde(default)]
    pub affected_systems: BTreeSet<String>,
    /// Free-form context supplied by the caller.
    #[serde(default)]
    pub context: BTreeMap<String, String>,
    /// Optional agent progress state.
    #[serde(default)]
    pub agent_state: Option<AgentState>,
}

impl AlertContext {
    /// Creates a context with just the required fields.
    pub fn new(
        alert_type: impl Into<String>,
        severity: Severity,
        affected_systems: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            alert_type: alert_type.into(),
            severity,
            affected_systems: affected_systems.into_iter().collect(),
            context: BTreeMap::new(),
            agent_state: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_ordering() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn severity_round_trips_through_str() {
        for s in [
            Severity::Low,
            Severity::Medium,
            Severity::High,
            Severity::Critical,
        ] {
            assert_eq!(s.to_string().parse::<Severity>().unwrap(), s);
        }
        assert!("urgent".parse::<Severity>().is_err());
    }
}
