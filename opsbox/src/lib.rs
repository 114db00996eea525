#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

/// Error taxonomy surfaced to tool callers.
pub mod error;

/// Adapter registry: lifecycle, routing, bounded fan-out.
pub mod registry;

/// Query normalization and cache fingerprinting.
pub mod query;

/// Composite confidence scoring and ranking.
pub mod score;

/// Structural runbook extraction from markdown and JSON documents.
pub mod extract;

/// The query engine: cache read-through, fan-out, fusion, ranking.
pub mod engine;

/// The seven tool verbs, input validation, response shaping.
pub mod tools;

/// Escalation path policy.
pub mod escalation;

/// Roll-up of per-component health.
pub mod health;

/// Latency windows and rule-based alerts.
pub mod monitor;

/// Append-only resolution feedback log.
pub mod feedback;

/// Metrics declaration and recording (behind the `metrics` feature).
pub mod metrics;

pub use engine::{DecisionTreeResult, EngineConfig, EngineResponse, QueryEngine, RunbookMatch};
pub use error::{ErrorCode, ToolError};
pub use escalation::{EscalationContact, EscalationPolicy};
pub use extract::RunbookExtractor;
pub use feedback::{FeedbackRecord, FeedbackSink, ResolutionOutcome};
pub use health::{HealthAggregator, OverallHealth};
pub use monitor::{PerfAlert, PerformanceMonitor, PerformanceReport};
pub use query::{ToolKind, fingerprint};
pub use registry::{AdapterFailure, AdapterRegistry, FanOut, RegistryConfig};
pub use tools::{ResponseMetadata, ToolDispatcher, ToolRequest, ToolResponse};
