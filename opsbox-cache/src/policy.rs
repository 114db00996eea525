//! Content-type-aware TTL policy.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use opsbox_core::ContentKind;

/// TTL and warmup settings for one content kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindPolicy {
    /// Time-to-live for entries of this kind.
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
    /// Pre-populate entries of this kind at startup.
    #[serde(default)]
    pub warm: bool,
}

/// Per-content-kind TTL table.
///
/// Kinds without an explicit override use conservative defaults: runbooks
/// live the longest (and are warmed), general results the shortest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TtlPolicy {
    policies: BTreeMap<ContentKind, KindPolicy>,
}

impl Default for TtlPolicy {
    fn default() -> Self {
        let mut policies = BTreeMap::new();
        policies.insert(
            ContentKind::Runbooks,
            KindPolicy {
                ttl: Duration::from_secs(3600),
                warm: true,
            },
        );
        policies.insert(
            ContentKind::Procedures,
            KindPolicy {
                ttl: Duration::from_secs(1800),
                warm: false,
            },
        );
        policies.insert(
            ContentKind::DecisionTrees,
            KindPolicy {
                ttl: Duration::from_secs(1800),
                warm: false,
            },
        );
        policies.insert(
            ContentKind::KnowledgeBase,
            KindPolicy {
                ttl: Duration::from_secs(900),
                warm: false,
            },
        );
        policies.insert(
            ContentKind::General,
            KindPolicy {
                ttl: Duration::from_secs(300),
                warm: false,
            },
        );
        Self { policies }
    }
}

impl TtlPolicy {
    /// Builds a policy from explicit per-kind overrides on top of defaults.
    pub fn with_overrides(overrides: BTreeMap<ContentKind, KindPolicy>) -> Self {
        let mut policy = Self::default();
        policy.policies.extend(overrides);
        policy
    }

    /// TTL for the given kind.
    pub fn ttl_for(&self, kind: ContentKind) -> Duration {
        self.policies
            .get(&kind)
            .map(|p| p.ttl)
            .unwrap_or(Duration::from_secs(300))
    }

    /// Kinds flagged for startup warming.
    pub fn warm_kinds(&self) -> Vec<ContentKind> {
        self.policies
            .iter()
            .filter(|(_, p)| p.warm)
            .map(|(kind, _)| *kind)
            .collect()
    }
}
