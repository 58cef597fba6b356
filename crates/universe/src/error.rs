//! Error types for the universe crate.

use fabsync_hashtree::TreeError;
use thiserror::Error;

/// Result type alias for universe operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Universe error types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("backend '{backend}' failed to {operation}: {reason}")]
    Backend {
        backend: String,
        operation: String,
        reason: String,
    },

    #[error("worker for root '{root}' stopped")]
    WorkerStopped { root: String },

    #[error(transparent)]
    Tree(#[from] TreeError),
}

impl Error {
    /// Create a backend error.
    pub fn backend(
        backend: impl Into<String>,
        operation: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Backend {
            backend: backend.into(),
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create a worker stopped error.
    pub fn worker_stopped(root: impl Into<String>) -> Self {
        Self::WorkerStopped { root: root.into() }
    }
}
