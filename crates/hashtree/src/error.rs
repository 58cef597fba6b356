//! Error types for the hash tree crate.

use thiserror::Error;

use crate::key::TreeKey;

/// Result type alias for tree operations.
pub type Result<T> = std::result::Result<T, TreeError>;

/// Tree error types.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    /// Key is rooted somewhere other than the tree's root.
    #[error("key '{key}' is not rooted at '{root}'")]
    InconsistentRoot { root: String, key: TreeKey },

    /// No node exists at the key.
    #[error("node '{key}' not found")]
    NotFound { key: TreeKey },

    /// A serialized record does not describe a valid tree.
    #[error("invalid tree record: {reason}")]
    InvalidRecord { reason: String },

    /// JSON encoding or decoding failed.
    #[error("tree serialization failed: {reason}")]
    Serialization { reason: String },
}

impl TreeError {
    /// Create an inconsistent root error.
    pub fn inconsistent_root(root: impl Into<String>, key: TreeKey) -> Self {
        Self::InconsistentRoot {
            root: root.into(),
            key,
        }
    }

    /// Create a not found error.
    pub fn not_found(key: TreeKey) -> Self {
        Self::NotFound { key }
    }

    /// Create an invalid record error.
    pub fn invalid_record(reason: impl Into<String>) -> Self {
        Self::InvalidRecord {
            reason: reason.into(),
        }
    }

    /// Create a serialization error.
    pub fn serialization(reason: impl Into<String>) -> Self {
        Self::Serialization {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TreeError::inconsistent_root("t1", TreeKey::from(["t2", "bd1"]));
        assert!(err.to_string().contains("t2/bd1"));
        assert!(err.to_string().contains("t1"));

        let err = TreeError::not_found(TreeKey::from(["t1", "x"]));
        assert_eq!(err.to_string(), "node 't1/x' not found");
    }
}
