//! Component health reporting.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Point-in-time health of a single component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    /// Whether the component considers itself healthy.
    pub healthy: bool,
    /// Error message when unhealthy.
    #[serde(default)]
    pub error: Option<String>,
    /// When the check ran.
    pub last_check: DateTime<Utc>,
    /// Rolling latency of the component's recent calls, in milliseconds.
    #[serde(default)]
    pub latency_ms: Option<u64>,
    /// Component-specific attributes (document counts, quota, etc.).
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl HealthSnapshot {
    /// A healthy snapshot taken now.
    pub fn healthy() -> Self {
        Self {
            healthy: true,
            error: None,
            last_check: Utc::now(),
            latency_ms: None,
            attributes: BTreeMap::new(),
        }
    }

    /// An unhealthy snapshot taken now, with the given error.
    pub fn unhealthy(error: impl Into<String>) -> Self {
        Self {
            healthy: false,
            error: Some(error.into()),
            last_check: Utc::now(),
            latency_ms: None,
            attributes: BTreeMap::new(),
        }
    }

    /// Attaches an attribute.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Attaches a latency observation.
    pub fn with_latency_ms(mut self, latency_ms: u64) -> Self {
        self.latency_ms = Some(latency_ms);
        self
    }
}
