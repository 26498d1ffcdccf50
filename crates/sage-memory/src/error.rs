//! Memory Error Types
//!
//! Defines the error taxonomy for the memory subsystem. Background job
//! failures are contained by the scheduler; only caller misuse on the
//! foreground path surfaces as `InvalidInput`.

use thiserror::Error;

/// Memory result type alias
pub type MemoryResult<T> = Result<T, MemoryError>;

/// Memory subsystem errors
#[derive(Debug, Error)]
pub enum MemoryError {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigValidationError),

    /// Embedding computation failed; the entry stays un-indexed
    #[error("indexing failed: {message}")]
    IndexingFailure { message: String },

    /// Snapshot read or write failed
    #[error("persistence failure: {message}")]
    PersistenceFailure { message: String },

    /// Caller violated an operation contract
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    /// Timeout error
    #[error("operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl MemoryError {
    /// Create an indexing failure
    pub fn indexing(message: impl Into<String>) -> Self {
        Self::IndexingFailure {
            message: message.into(),
        }
    }

    /// Create a persistence failure
    pub fn persistence(message: impl Into<String>) -> Self {
        Self::PersistenceFailure {
            message: message.into(),
        }
    }

    /// Create an invalid input error
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    /// Check if this error is an indexing failure
    pub fn is_indexing_failure(&self) -> bool {
        matches!(self, Self::IndexingFailure { .. })
    }

    /// Check if this error came from the persistence layer
    pub fn is_persistence_failure(&self) -> bool {
        matches!(
            self,
            Self::PersistenceFailure { .. } | Self::Database(_) | Self::Io(_) | Self::Serialization(_)
        )
    }

    /// Check if this error is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
