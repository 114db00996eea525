#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

pub mod adapter;
pub mod alert;
pub mod document;
pub mod error;
pub mod health;
pub mod index;
pub mod runbook;
pub mod search;
pub mod window;

pub use adapter::{SourceAdapter, SourceKind, SourceMetadata};
pub use alert::{AgentState, AlertContext, Severity};
pub use document::{Category, ContentKind, Document};
pub use error::SourceError;
pub use health::HealthSnapshot;
pub use index::{InvertedIndex, edit_distance, tokenize};
pub use runbook::{
    DecisionNode, DecisionTree, Procedure, ProcedureStep, Runbook, RunbookMetadata, SeverityPolicy,
    Trigger,
};
pub use search::{SearchFilters, SearchResult};
pub use window::RollingWindow;

/// Result type for source adapter operations.
pub type SourceResult<T> = Result<T, SourceError>;
