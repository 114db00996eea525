//! Escalation path policy.

use serde::{Deserialize, Serialize};

use opsbox_core::Severity;

/// One contact tier in an escalation chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationContact {
    /// Role or team name.
    pub name: String,
    /// How to reach them (pager alias, channel, phone).
    pub contact: String,
    /// Minutes to wait at this tier before moving to the next.
    pub escalate_after_minutes: u32,
}

/// Per-severity contact chains, with separate off-hours chains.
///
/// The resolved path is ordered: first entry is paged first. Failed
/// attempts reported by the agent shift the entry point down the chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationPolicy {
    /// Chain for low and medium severity during business hours.
    #[serde(default)]
    pub standard: Vec<EscalationContact>,
    /// Chain for high and critical severity.
    #[serde(default)]
    pub urgent: Vec<EscalationContact>,
    /// Chain used outside business hours regardless of severity.
    #[serde(default)]
    pub off_hours: Vec<EscalationContact>,
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        let contact = |name: &str, contact: &str, minutes: u32| EscalationContact {
            name: name.to_owned(),
            contact: contact.to_owned(),
            escalate_after_minutes: minutes,
        };
        Self {
            standard: vec![
                contact("on-call engineer", "pager:oncall-primary", 30),
                contact("team lead", "pager:team-lead", 60),
            ],
            urgent: vec![
                contact("on-call engineer", "pager:oncall-primary", 10),
                contact("secondary on-call", "pager:oncall-secondary", 20),
                contact("incident commander", "pager:incident-commander", 30),
            ],
            off_hours: vec![
                contact("night on-call", "pager:oncall-night", 15),
                contact("incident commander", "pager:incident-commander", 30),
            ],
        }
    }
}

impl EscalationPolicy {
    /// Resolves the ordered contact chain for a severity and time of day.
    ///
    /// Each already-failed attempt skips one tier, never emptying the
    /// chain below its last contact.
    pub fn resolve(
        &self,
        severity: Severity,
        business_hours: bool,
        failed_attempts: usize,
    ) -> Vec<EscalationContact> {
        let chain = if !business_hours && !self.off_hours.is_empty() {
            &self.off_hours
        } else if severity >= Severity::High {
            &self.urgent
        } else {
            &self.standard
        };
        if chain.is_empty() {
            return Vec::new();
        }
        let skip = failed_attempts.min(chain.len() - 1);
        chain[skip..].to_vec()
    }
}
