//! Structured error codes surfaced to tool callers.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use opsbox_core::SourceError;

/// Error code carried by every failed tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Input violates the tool schema.
    ValidationError,
    /// Identifier resolved to no document.
    NotFound,
    /// An adapter could not authenticate.
    AuthFailed,
    /// An adapter exceeded its quota.
    RateLimited,
    /// Per-call or overall deadline exceeded.
    RequestTimeout,
    /// A breaker short-circuited a dependency.
    CircuitOpen,
    /// All adapters in the required set are unhealthy.
    ServiceUnavailable,
    /// Concurrency ceiling exceeded.
    Overloaded,
    /// Deadline hit with some adapters still outstanding.
    PartialResult,
    /// Unclassified.
    InternalError,
}

impl ErrorCode {
    /// HTTP status this code maps to at the ingress.
    pub fn http_status(self) -> u16 {
        match self {
            ErrorCode::ValidationError => 400,
            ErrorCode::NotFound => 404,
            ErrorCode::AuthFailed => 502,
            ErrorCode::RateLimited => 429,
            ErrorCode::RequestTimeout => 504,
            ErrorCode::CircuitOpen => 503,
            ErrorCode::ServiceUnavailable => 503,
            ErrorCode::Overloaded => 503,
            ErrorCode::PartialResult => 200,
            ErrorCode::InternalError => 500,
        }
    }

    /// Whether the caller should retry.
    pub fn retry_recommended(self) -> bool {
        matches!(
            self,
            ErrorCode::RateLimited
                | ErrorCode::RequestTimeout
                | ErrorCode::CircuitOpen
                | ErrorCode::ServiceUnavailable
                | ErrorCode::Overloaded
        )
    }

    /// Suggested operator actions included in error details.
    pub fn recovery_actions(self) -> Vec<String> {
        let actions: &[&str] = match self {
            ErrorCode::ValidationError => &["fix the request arguments against the tool schema"],
            ErrorCode::NotFound => &["verify the identifier", "refresh the source indexes"],
            ErrorCode::AuthFailed => &["check the source credentials in the environment"],
            ErrorCode::RateLimited => &["back off and retry after the quota resets"],
            ErrorCode::RequestTimeout => &["retry", "raise the deadline for slow sources"],
            ErrorCode::CircuitOpen => &["wait for the breaker cool-off", "check source health"],
            ErrorCode::ServiceUnavailable => &["check source health", "retry shortly"],
            ErrorCode::Overloaded => &["reduce concurrent requests", "retry with backoff"],
            ErrorCode::PartialResult => &[],
            ErrorCode::InternalError => &["inspect service logs"],
        };
        actions.iter().map(|s| (*s).to_owned()).collect()
    }
}

/// Detail block attached to every error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Request-scoped correlation id echoed from ingress.
    pub correlation_id: String,
    /// Suggested operator actions.
    pub recovery_actions: Vec<String>,
    /// Whether the caller should retry.
    pub retry_recommended: bool,
}

/// A failed tool call.
#[derive(Debug, Clone, Serialize, Deserialize, Error)]
#[error("{code:?}: {message}")]
pub struct ToolError {
    /// Structured code from the taxonomy.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Detail block.
    pub details: ErrorDetails,
}

impl ToolError {
    /// Creates an error with details derived from the code.
    pub fn new(code: ErrorCode, message: impl Into<String>, correlation_id: &str) -> Self {
        Self {
            code,
            message: message.into(),
            details: ErrorDetails {
                correlation_id: correlation_id.to_owned(),
                recovery_actions: code.recovery_actions(),
                retry_recommended: code.retry_recommended(),
            },
        }
    }

    /// Maps an adapter error into the caller-facing taxonomy.
    pub fn from_source(err: &SourceError, correlation_id: &str) -> Self {
        Self::new(source_error_code(err), err.to_string(), correlation_id)
    }
}

/// The caller-facing code an adapter error maps to.
pub fn source_error_code(err: &SourceError) -> ErrorCode {
    match err {
        SourceError::Transient(_) | SourceError::Fatal(_) => ErrorCode::ServiceUnavailable,
        SourceError::AuthFailed(_) => ErrorCode::AuthFailed,
        SourceError::NotFound(_) => ErrorCode::NotFound,
        SourceError::RateLimited(_) => ErrorCode::RateLimited,
        SourceError::Malformed(_) => ErrorCode::InternalError,
    }
}
