//! Contract of a backing system that trees are observed from.

use async_trait::async_trait;
use fabsync_hashtree::{Attributes, Metadata, StructuredHashTree, TreeKey};
use fabsync_reconciler::{Resource, ResourceBatch};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::kind::TreeKind;

/// A change to one node of an observed tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TreeEvent {
    /// The object exists with this content.
    Upsert {
        key: TreeKey,
        attributes: Attributes,
        #[serde(default)]
        metadata: Metadata,
    },
    /// The object is gone.
    Delete { key: TreeKey },
    /// The object is in a state that must not be diffed.
    MarkError { key: TreeKey, error: bool },
}

impl TreeEvent {
    /// Key of the changed node.
    pub fn key(&self) -> &TreeKey {
        match self {
            Self::Upsert { key, .. } | Self::Delete { key } | Self::MarkError { key, .. } => key,
        }
    }
}

/// Ordered stream of tree changes for one root and kind.
pub type EventStream = BoxStream<'static, TreeEvent>;

/// A system trees are hydrated from and resources are pushed to.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// Full snapshot of a root.
    async fn load(&self, root: &str, kind: TreeKind) -> Result<StructuredHashTree>;

    /// Changes to a root from now on, in the order they happened.
    async fn subscribe(&self, root: &str, kind: TreeKind) -> Result<EventStream>;

    /// Resources to create for the given keys.
    async fn fetch(&self, kind: TreeKind, keys: &[TreeKey]) -> Result<Vec<Resource>>;

    /// Resources to delete for the given keys.
    async fn fetch_for_delete(&self, kind: TreeKind, keys: &[TreeKey]) -> Result<Vec<Resource>>;

    /// Apply creates and deletes. Individual failures are not reported.
    async fn push(&self, kind: TreeKind, batch: ResourceBatch) -> Result<()>;
}
