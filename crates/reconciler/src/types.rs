//! Core types for the reconciler.

use std::fmt;

use fabsync_hashtree::{Attributes, TreeDiff, TreeKey};
use serde::{Deserialize, Serialize};

/// Kind reported for resources that stand for an ownership marker.
pub const OWNERSHIP_MARKER_KIND: &str = "ownership-tag";

/// Concrete domain object materialized from a tree key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    /// Object type, taken from the last key segment by default.
    pub kind: String,
    /// Tree key of the object.
    pub key: TreeKey,
    /// Object attributes.
    #[serde(default)]
    pub attributes: Attributes,
    /// Whether this stands for the ownership marker rather than the object.
    #[serde(default)]
    pub ownership_marker: bool,
}

impl Resource {
    /// Create a resource whose kind comes from its key.
    pub fn new(key: TreeKey, attributes: Attributes) -> Self {
        let kind = key.kind().unwrap_or_default().to_string();
        Self {
            kind,
            key,
            attributes,
            ownership_marker: false,
        }
    }

    /// Resource without attributes, enough to address a deletion.
    pub fn reference(key: TreeKey) -> Self {
        Self::new(key, Attributes::new())
    }

    /// The ownership marker attached to the object at `key`.
    pub fn ownership_marker(key: TreeKey) -> Self {
        Self {
            kind: OWNERSHIP_MARKER_KIND.to_string(),
            key,
            attributes: Attributes::new(),
            ownership_marker: true,
        }
    }

    /// Tenant root of the resource.
    pub fn root(&self) -> Option<&str> {
        self.key.root()
    }

    /// Identity used for failure tracking.
    pub fn identity(&self) -> ResourceIdentity {
        ResourceIdentity {
            kind: self.kind.clone(),
            key: self.key.clone(),
        }
    }
}

/// Identity of a resource: its kind and key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceIdentity {
    pub kind: String,
    pub key: TreeKey,
}

impl fmt::Display for ResourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.key)
    }
}

/// What the reconciler asks the backing system to do with a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Create,
    Delete,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// Creates and deletes pushed to a backing system in one call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceBatch {
    pub create: Vec<Resource>,
    pub delete: Vec<Resource>,
}

impl ResourceBatch {
    /// Create a new empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a resource under the given action.
    pub fn push(&mut self, action: ActionKind, resource: Resource) {
        match action {
            ActionKind::Create => self.create.push(resource),
            ActionKind::Delete => self.delete.push(resource),
        }
    }

    /// Total number of resources.
    pub fn len(&self) -> usize {
        self.create.len() + self.delete.len()
    }

    /// Check if the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.create.is_empty() && self.delete.is_empty()
    }
}

/// Sync status of one resource, persisted by a status store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum SyncStatus {
    /// Diverged; an action is in flight.
    SyncPending,
    /// Converged.
    Synced,
    /// Gave up after repeated failures.
    SyncFailed { action: ActionKind, reason: String },
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SyncPending => write!(f, "sync-pending"),
            Self::Synced => write!(f, "synced"),
            Self::SyncFailed { action, reason } => write!(f, "sync-failed ({action}: {reason})"),
        }
    }
}

/// A status change emitted for one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusTransition {
    pub root: String,
    pub key: TreeKey,
    pub status: SyncStatus,
}

impl StatusTransition {
    /// Create a new status transition.
    pub fn new(root: impl Into<String>, key: TreeKey, status: SyncStatus) -> Self {
        Self {
            root: root.into(),
            key,
            status,
        }
    }
}

/// Outcome of one root in one pass.
#[derive(Debug, Clone, Default)]
pub struct RootOutcome {
    /// Tenant root.
    pub root: String,
    /// Full difference between desired and observed state.
    pub delta: TreeDiff,
    /// Part of the difference actually attempted this pass.
    pub attempted: TreeDiff,
    /// Resources pushed to the observed side.
    pub pushed: usize,
    /// Resources skipped because their retry deadline had not passed.
    pub backed_off: usize,
    /// Resources that reached the terminal failure state this pass.
    pub failed: Vec<ResourceIdentity>,
    /// Whether the root was reset instead of pushed.
    pub reset: bool,
}

impl RootOutcome {
    /// Outcome of a root with nothing to do.
    pub fn converged(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Whether desired and observed state differed.
    pub fn diverged(&self) -> bool {
        !self.delta.is_empty()
    }
}

/// Result of one reconciliation pass over every shared root.
#[derive(Debug, Default)]
pub struct PassReport {
    /// Outcomes of the roots processed without error, ordered by root.
    pub outcomes: Vec<RootOutcome>,
    /// Roots whose processing failed, ordered by root.
    pub errors: Vec<(String, crate::error::Error)>,
}

impl PassReport {
    /// Whether any root still differs or could not be processed.
    pub fn diverged(&self) -> bool {
        !self.errors.is_empty() || self.outcomes.iter().any(RootOutcome::diverged)
    }

    /// Whether every root is converged.
    pub fn converged(&self) -> bool {
        !self.diverged()
    }

    /// Roots reset during the pass.
    pub fn reset_roots(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.reset)
            .map(|outcome| outcome.root.as_str())
            .collect()
    }

    /// Outcome of a given root.
    pub fn outcome(&self, root: &str) -> Option<&RootOutcome> {
        self.outcomes.iter().find(|outcome| outcome.root == root)
    }
}
