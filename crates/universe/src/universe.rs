//! A backend slice exposed to the reconciler.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use fabsync_hashtree::{StructuredHashTree, TreeKey};
use fabsync_reconciler::{Resource, ResourceBatch, StateView};
use tracing::debug;

use crate::backend::Backend;
use crate::kind::TreeKind;
use crate::pool::TenantPool;

/// One tree kind of one backend, served per tenant root.
///
/// Trees come from the observation workers of the pool. Resources are
/// fetched from and pushed to the backend directly.
pub struct Universe<B: Backend> {
    name: String,
    backend: Arc<B>,
    pool: TenantPool<B>,
}

impl<B: Backend> Universe<B> {
    /// Create a universe serving no roots.
    pub fn new(backend: Arc<B>, kind: TreeKind) -> Self {
        Self {
            name: format!("{}/{kind}", backend.name()),
            pool: TenantPool::new(backend.clone(), kind),
            backend,
        }
    }

    /// Get the tree kind.
    pub fn kind(&self) -> TreeKind {
        self.pool.kind()
    }

    /// Get the backend.
    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Roots with a running worker, hydrated or not.
    pub async fn served(&self) -> BTreeSet<String> {
        self.pool.served().await
    }

    /// Stop every observation worker.
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }

    fn failed(&self, operation: &str, error: crate::Error) -> fabsync_reconciler::Error {
        fabsync_reconciler::Error::view_failed(&self.name, operation, error.to_string())
    }
}

#[async_trait]
impl<B: Backend> StateView for Universe<B> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn roots(&self) -> BTreeSet<String> {
        self.pool.roots().await
    }

    async fn tree(&self, root: &str) -> fabsync_reconciler::Result<Arc<StructuredHashTree>> {
        Ok(self.pool.snapshot(root).await.unwrap_or_default())
    }

    async fn get_resources(&self, keys: &[TreeKey]) -> fabsync_reconciler::Result<Vec<Resource>> {
        self.backend
            .fetch(self.kind(), keys)
            .await
            .map_err(|e| self.failed("get resources", e))
    }

    async fn get_resources_for_delete(
        &self,
        keys: &[TreeKey],
    ) -> fabsync_reconciler::Result<Vec<Resource>> {
        self.backend
            .fetch_for_delete(self.kind(), keys)
            .await
            .map_err(|e| self.failed("get resources for delete", e))
    }

    async fn push_resources(&self, batch: ResourceBatch) -> fabsync_reconciler::Result<()> {
        debug!(
            universe = %self.name,
            create = batch.create.len(),
            delete = batch.delete.len(),
            "Pushing"
        );
        self.backend
            .push(self.kind(), batch)
            .await
            .map_err(|e| self.failed("push resources", e))
    }

    async fn serve(&self, roots: &BTreeSet<String>) -> fabsync_reconciler::Result<()> {
        self.pool.serve(roots).await;
        Ok(())
    }

    async fn reset(&self, roots: &BTreeSet<String>) -> fabsync_reconciler::Result<()> {
        self.pool
            .reset(roots)
            .await
            .map_err(|e| self.failed("reset", e))
    }

    async fn settle(&self) -> fabsync_reconciler::Result<()> {
        self.pool.settle().await.map_err(|e| self.failed("settle", e))
    }
}
