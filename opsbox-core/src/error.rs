//! Source error taxonomy.

use thiserror::Error;

/// Classified error from a source adapter.
///
/// The classification drives retry behavior: [`SourceError::Transient`] and
/// [`SourceError::RateLimited`] are retried with exponential backoff up to
/// the configured attempt ceiling; everything else fails the call
/// immediately.
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    /// Temporary failure (network, 5xx, unavailable backend).
    #[error("source unavailable: {0}")]
    Transient(String),

    /// The adapter could not authenticate with its backend.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// The identifier resolved to no document.
    #[error("not found: {0}")]
    NotFound(String),

    /// The backend rejected the call due to quota exhaustion.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// The backend returned data the adapter could not parse.
    #[error("malformed document: {0}")]
    Malformed(String),

    /// Unrecoverable failure; the adapter should be considered unhealthy.
    #[error("fatal source error: {0}")]
    Fatal(String),
}

impl SourceError {
    /// Whether the error class is worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SourceError::Transient(_) | SourceError::RateLimited(_))
    }

    /// Stable label for logs and response metadata.
    pub fn kind(&self) -> &'static str {
        match self {
            SourceError::Transient(_) => "transient",
            SourceError::AuthFailed(_) => "auth_failed",
            SourceError::NotFound(_) => "not_found",
            SourceError::RateLimited(_) => "rate_limited",
            SourceError::Malformed(_) => "malformed",
            SourceError::Fatal(_) => "fatal",
        }
    }
}

impl From<std::io::Error> for SourceError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => SourceError::NotFound(err.to_string()),
            std::io::ErrorKind::PermissionDenied => SourceError::AuthFailed(err.to_string()),
            _ => SourceError::Transient(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryability_follows_classification() {
        assert!(SourceError::Transient("x".into()).is_retryable());
        assert!(SourceError::RateLimited("x".into()).is_retryable());
        assert!(!SourceError::AuthFailed("x".into()).is_retryable());
        assert!(!SourceError::NotFound("x".into()).is_retryable());
        assert!(!SourceError::Malformed("x".into()).is_retryable());
        assert!(!SourceError::Fatal("x".into()).is_retryable());
    }
}
