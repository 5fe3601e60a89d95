//! Error types for the embedded replica.

use thiserror::Error;
use uuid::Uuid;

/// Result type for replica operations.
pub type ReplicaResult<T> = Result<T, ReplicaError>;

/// Errors that can occur in replica operations.
#[derive(Debug, Error)]
pub enum ReplicaError {
    /// Underlying SQLite error.
    #[error("sql error: {0}")]
    Sql(#[from] rusqlite::Error),

    /// Schema bootstrap failed. Fatal: the caller must abort startup.
    #[error("migration failed: {message}")]
    MigrationFailed {
        /// Description of the failure.
        message: String,
    },

    /// Task not found.
    #[error("task not found: {id}")]
    TaskNotFound {
        /// The task ID that was not found.
        id: Uuid,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },
}

impl ReplicaError {
    /// Creates a migration failed error.
    pub fn migration_failed(message: impl Into<String>) -> Self {
        Self::MigrationFailed {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }
}
