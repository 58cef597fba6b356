//! Error types for the reconciler crate.

use std::fmt;

/// Result type alias for reconciler operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Reconciler error types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A state view operation failed.
    ViewFailed {
        view: String,
        operation: String,
        reason: String,
    },
    /// Tree construction or lookup failed.
    TreeFailed { reason: String },
    /// Status reporting failed.
    StatusFailed { reason: String },
    /// Processing a root panicked.
    RootPanicked { root: String },
    /// Loop was stopped.
    LoopStopped,
    /// Invalid configuration.
    InvalidConfig { reason: String },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ViewFailed {
                view,
                operation,
                reason,
            } => {
                write!(f, "view '{view}' failed to {operation}: {reason}")
            }
            Self::TreeFailed { reason } => {
                write!(f, "tree operation failed: {reason}")
            }
            Self::StatusFailed { reason } => {
                write!(f, "status reporting failed: {reason}")
            }
            Self::RootPanicked { root } => {
                write!(f, "processing of root '{root}' panicked")
            }
            Self::LoopStopped => {
                write!(f, "reconciliation loop stopped")
            }
            Self::InvalidConfig { reason } => {
                write!(f, "invalid configuration: {reason}")
            }
        }
    }
}

impl std::error::Error for Error {}

impl From<fabsync_hashtree::TreeError> for Error {
    fn from(err: fabsync_hashtree::TreeError) -> Self {
        Self::tree_failed(err.to_string())
    }
}

impl Error {
    /// Create a view failed error.
    pub fn view_failed(
        view: impl Into<String>,
        operation: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::ViewFailed {
            view: view.into(),
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create a tree failed error.
    pub fn tree_failed(reason: impl Into<String>) -> Self {
        Self::TreeFailed {
            reason: reason.into(),
        }
    }

    /// Create a status failed error.
    pub fn status_failed(reason: impl Into<String>) -> Self {
        Self::StatusFailed {
            reason: reason.into(),
        }
    }

    /// Create a root panicked error.
    pub fn root_panicked(root: impl Into<String>) -> Self {
        Self::RootPanicked { root: root.into() }
    }

    /// Create an invalid config error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }
}
