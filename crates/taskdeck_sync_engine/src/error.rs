//! Error types for the sync engine.

use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// Malformed request or response payload.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The server answered outside the 2xx range; the batch was not
    /// accepted.
    #[error("server rejected request: status {status}: {message}")]
    ServerRejected {
        /// HTTP status code.
        status: u16,
        /// Response body or reason.
        message: String,
    },

    /// Replica error during apply or acknowledgment.
    #[error("replica error: {0}")]
    Replica(#[from] taskdeck_replica::ReplicaError),

    /// The subscription or push loop was shut down.
    #[error("sync engine shut down")]
    ShutDown,
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if the failed operation can be retried.
    ///
    /// Push and feed errors leave no replica state behind, so retryable
    /// here means "worth attempting again", not "safe to attempt again" —
    /// every error is safe.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::ServerRejected { .. } => true,
            SyncError::Protocol(_) => false,
            SyncError::Replica(_) => false,
            SyncError::ShutDown => false,
        }
    }
}
