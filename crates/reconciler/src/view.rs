//! Contract for one side of a reconciliation.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use fabsync_hashtree::{StructuredHashTree, TreeKey};

use crate::error::Result;
use crate::types::{Resource, ResourceBatch};

/// A view of state the reconciler can read from and push to.
///
/// The reconciler holds two views: the desired side and the observed side.
/// Resources are fetched from the desired side for creation, from the
/// observed side for deletion, and always pushed to the observed side.
#[async_trait]
pub trait StateView: Send + Sync {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// Tenant roots this view currently serves.
    async fn roots(&self) -> BTreeSet<String>;

    /// Consistent snapshot of the tree for a root.
    ///
    /// An unserved or unknown root yields an empty tree.
    async fn tree(&self, root: &str) -> Result<Arc<StructuredHashTree>>;

    /// Resources to create for the given keys.
    ///
    /// Best effort: keys without a materializable object are skipped.
    async fn get_resources(&self, keys: &[TreeKey]) -> Result<Vec<Resource>>;

    /// Resources to delete for the given keys.
    ///
    /// May substitute an ownership marker for objects this view does not own.
    async fn get_resources_for_delete(&self, keys: &[TreeKey]) -> Result<Vec<Resource>>;

    /// Apply creates and deletes.
    async fn push_resources(&self, batch: ResourceBatch) -> Result<()>;

    /// Start serving exactly the given roots, stopping any others.
    async fn serve(&self, roots: &BTreeSet<String>) -> Result<()>;

    /// Discard and rebuild the state of the given roots.
    async fn reset(&self, roots: &BTreeSet<String>) -> Result<()>;

    /// Wait until snapshots reflect every change accepted so far.
    async fn settle(&self) -> Result<()> {
        Ok(())
    }
}
