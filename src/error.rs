//! Error types for the memory engine.

use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// The five error kinds the engine surfaces. Each wraps an underlying cause
/// as a string rather than the original error type, since the two stores
/// (relational, vector) report through different error hierarchies.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The relational or vector store reported a problem (disk full,
    /// corrupted row, malformed schema).
    #[error("storage error: {0}")]
    Storage(String),

    /// A relation or entity reference named an entity that does not exist.
    /// Raised in place of a generic storage error on foreign-key violations.
    #[error("entity not found: {0}")]
    EntityNotFound(String),

    /// The embedding provider failed to load, or returned a vector of the
    /// wrong dimension. Cached on first failure; cleared by `reset`.
    #[error("embedding error: {0}")]
    Embedding(String),

    /// Reserved for scoring/merge pipeline failures; not raised on any
    /// currently implemented path.
    #[error("retrieval error: {0}")]
    Retrieval(String),

    /// Reserved for synthesis pipeline failures. Reflection's own failure
    /// modes degrade to empty output rather than raising this.
    #[error("reflection error: {0}")]
    Reflection(String),

    /// Invalid or inconsistent configuration at startup.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl EngineError {
    /// Whether retrying the operation that produced this error might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Storage(msg) => {
                msg.contains("database is locked") || msg.contains("busy")
            }
            _ => false,
        }
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(e: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(err, msg) = &e {
            if err.code == rusqlite::ErrorCode::ConstraintViolation
                && msg.as_deref().unwrap_or_default().contains("FOREIGN KEY")
            {
                return EngineError::EntityNotFound(e.to_string());
            }
        }
        EngineError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Storage(e.to_string())
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Storage(e.to_string())
    }
}
