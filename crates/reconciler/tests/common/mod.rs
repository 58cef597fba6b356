//! Scripted state view shared by the reconciler integration tests.

#![allow(dead_code)]
#![allow(clippy::panic)]

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use fabsync_hashtree::{Attributes, StructuredHashTree, TreeKey, attributes};
use fabsync_reconciler::{Error, Resource, ResourceBatch, Result, StateView};
use tokio::sync::RwLock;

/// In-memory view that applies pushes to its own trees.
///
/// Keys listed as rejected are accepted by `push_resources` but never
/// applied, like a backend that silently fails to create them.
pub struct ScriptedView {
    name: String,
    trees: RwLock<HashMap<String, StructuredHashTree>>,
    rejected: RwLock<HashSet<TreeKey>>,
    broken_roots: RwLock<HashSet<String>>,
    panicking_roots: RwLock<HashSet<String>>,
    pub pushes: AtomicUsize,
    pub resets: AtomicUsize,
}

impl ScriptedView {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            trees: RwLock::new(HashMap::new()),
            rejected: RwLock::new(HashSet::new()),
            broken_roots: RwLock::new(HashSet::new()),
            panicking_roots: RwLock::new(HashSet::new()),
            pushes: AtomicUsize::new(0),
            resets: AtomicUsize::new(0),
        }
    }

    /// Add an object with a single attribute.
    pub async fn put(&self, segments: &[&str], value: i64) -> Result<()> {
        let key = TreeKey::from(segments);
        let root = key.root().unwrap_or_default().to_string();
        let mut trees = self.trees.write().await;
        trees
            .entry(root)
            .or_default()
            .add(key, attributes([("value", value)]))?;
        Ok(())
    }

    pub async fn reject(&self, segments: &[&str]) {
        self.rejected.write().await.insert(TreeKey::from(segments));
    }

    pub async fn accept(&self, segments: &[&str]) {
        self.rejected.write().await.remove(&TreeKey::from(segments));
    }

    pub async fn break_root(&self, root: &str) {
        self.broken_roots.write().await.insert(root.to_string());
    }

    /// Make reading the tree of `root` panic.
    pub async fn panic_on(&self, root: &str) {
        self.panicking_roots.write().await.insert(root.to_string());
    }

    pub async fn contains(&self, segments: &[&str]) -> bool {
        let key = TreeKey::from(segments);
        let root = key.root().unwrap_or_default().to_string();
        self.trees
            .read()
            .await
            .get(&root)
            .is_some_and(|tree| tree.find(&key).is_some_and(|node| !node.is_dummy()))
    }

    pub fn resets(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }

    pub fn pushes(&self) -> usize {
        self.pushes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StateView for ScriptedView {
    fn name(&self) -> &str {
        &self.name
    }

    async fn roots(&self) -> BTreeSet<String> {
        BTreeSet::from(["t1".to_string(), "t2".to_string()])
    }

    async fn tree(&self, root: &str) -> Result<Arc<StructuredHashTree>> {
        if self.panicking_roots.read().await.contains(root) {
            panic!("tree of '{root}' is corrupt");
        }
        if self.broken_roots.read().await.contains(root) {
            return Err(Error::view_failed(&self.name, "read tree", "backend unavailable"));
        }
        let tree = self.trees.read().await.get(root).cloned().unwrap_or_default();
        Ok(Arc::new(tree))
    }

    async fn get_resources(&self, keys: &[TreeKey]) -> Result<Vec<Resource>> {
        let trees = self.trees.read().await;
        Ok(keys
            .iter()
            .filter_map(|key| {
                let tree = trees.get(key.root()?)?;
                let node = tree.find(key)?;
                Some(Resource::new(key.clone(), node.attributes().clone()))
            })
            .collect())
    }

    async fn get_resources_for_delete(&self, keys: &[TreeKey]) -> Result<Vec<Resource>> {
        Ok(keys.iter().cloned().map(Resource::reference).collect())
    }

    async fn push_resources(&self, batch: ResourceBatch) -> Result<()> {
        self.pushes.fetch_add(1, Ordering::SeqCst);
        let rejected = self.rejected.read().await;
        let mut trees = self.trees.write().await;
        for resource in batch.delete {
            let Some(tree) = resource.root().and_then(|root| trees.get_mut(root)) else {
                continue;
            };
            let has_children = tree.find(&resource.key).is_some_and(|node| !node.is_leaf());
            if has_children {
                tree.clear(&resource.key);
            } else {
                tree.pop(&resource.key);
            }
        }
        for resource in batch.create {
            if rejected.contains(&resource.key) {
                continue;
            }
            let root = resource.root().unwrap_or_default().to_string();
            trees
                .entry(root)
                .or_default()
                .add(resource.key, resource.attributes)?;
        }
        Ok(())
    }

    async fn serve(&self, _roots: &BTreeSet<String>) -> Result<()> {
        Ok(())
    }

    async fn reset(&self, _roots: &BTreeSet<String>) -> Result<()> {
        self.resets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A pair of views: what should exist and what does.
pub fn views() -> (Arc<ScriptedView>, Arc<ScriptedView>) {
    (
        Arc::new(ScriptedView::new("desired")),
        Arc::new(ScriptedView::new("observed")),
    )
}

pub fn key(segments: &[&str]) -> TreeKey {
    TreeKey::from(segments)
}

pub fn empty_attributes() -> Attributes {
    Attributes::new()
}
