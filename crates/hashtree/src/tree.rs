//! The structured hash tree.

use crate::error::{Result, TreeError};
use crate::key::TreeKey;
use crate::node::{Attributes, Metadata, TreeNode};

/// Ordered, content-hashed tree holding one tenant's snapshot.
///
/// Every node carries a hash of its own content and a hash of its whole
/// subtree, so equality is a root hash comparison and [`diff`] only walks
/// the subtrees whose hashes disagree.
///
/// [`diff`]: StructuredHashTree::diff
#[derive(Debug, Clone, Default)]
pub struct StructuredHashTree {
    pub(crate) root: Option<TreeNode>,
}

impl StructuredHashTree {
    /// Create an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_root(root: Option<TreeNode>) -> Self {
        Self { root }
    }

    /// The root node, if the tree is not empty.
    pub fn root(&self) -> Option<&TreeNode> {
        self.root.as_ref()
    }

    /// Key of the root node.
    pub fn root_key(&self) -> Option<&TreeKey> {
        self.root.as_ref().map(TreeNode::key)
    }

    /// Full hash of the root node.
    pub fn root_hash(&self) -> Option<&str> {
        self.root.as_ref().map(TreeNode::full_hash)
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Number of non-dummy nodes.
    pub fn len(&self) -> usize {
        self.nodes().iter().filter(|node| !node.dummy).count()
    }

    /// Insert or replace the node at `key` with empty metadata.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::InconsistentRoot`] when `key` is rooted elsewhere.
    pub fn add(&mut self, key: impl Into<TreeKey>, attributes: Attributes) -> Result<&mut Self> {
        self.add_with_metadata(key, attributes, Metadata::new())
    }

    /// Insert or replace the node at `key`.
    ///
    /// Missing ancestors are created as dummies and every hash on the path
    /// back to the root is recomputed. An empty key is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::InconsistentRoot`] when `key` is rooted elsewhere.
    pub fn add_with_metadata(
        &mut self,
        key: impl Into<TreeKey>,
        attributes: Attributes,
        metadata: Metadata,
    ) -> Result<&mut Self> {
        let key = key.into();
        let Some(root_segment) = key.root() else {
            return Ok(self);
        };
        let root_key = TreeKey::root_of(root_segment);
        if let Some(root) = &self.root {
            if root.key != root_key {
                return Err(TreeError::inconsistent_root(root.key.to_string(), key));
            }
        }
        let root = self
            .root
            .get_or_insert_with(|| TreeNode::placeholder(root_key));
        upsert(root, &key, attributes, metadata);
        Ok(self)
    }

    /// Add every `(key, attributes)` pair in order.
    ///
    /// # Errors
    ///
    /// Stops at the first key rooted elsewhere.
    pub fn include<I, K>(&mut self, items: I) -> Result<&mut Self>
    where
        I: IntoIterator<Item = (K, Attributes)>,
        K: Into<TreeKey>,
    {
        for (key, attributes) in items {
            self.add(key, attributes)?;
        }
        Ok(self)
    }

    /// Detach the subtree at `key` and return it as a tree of its own.
    ///
    /// The returned tree keeps dummy ancestors so its keys are unchanged.
    /// Ancestors left as childless dummies are pruned. Returns `None`
    /// without touching the tree when `key` does not exist.
    pub fn pop(&mut self, key: &TreeKey) -> Option<Self> {
        let root = self.root.as_mut()?;
        if key.is_empty() || !root.key.contains(key) {
            return None;
        }
        if root.key == *key {
            return self.root.take().map(Self::wrap);
        }
        let detached = detach(root, key)?;
        if root.is_prunable() {
            self.root = None;
        }
        Some(Self::wrap(detached))
    }

    /// Like [`pop`](Self::pop) but missing keys are an error.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::NotFound`] when `key` does not exist.
    pub fn remove(&mut self, key: &TreeKey) -> Result<Self> {
        self.pop(key).ok_or_else(|| TreeError::not_found(key.clone()))
    }

    /// Tombstone the node at `key` without deleting its children.
    ///
    /// A tombstone with no children is pruned right away. Missing keys are
    /// ignored.
    pub fn clear(&mut self, key: &TreeKey) -> &mut Self {
        self.mutate(key, &mut TreeNode::tombstone);
        self
    }

    /// Flag or unflag the subtree at `key` as excluded from diffing.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::NotFound`] when `key` does not exist.
    pub fn set_error(&mut self, key: &TreeKey, error: bool) -> Result<&mut Self> {
        if self.mutate(key, &mut |node| node.set_error(error)) {
            Ok(self)
        } else {
            Err(TreeError::not_found(key.clone()))
        }
    }

    /// Exact lookup.
    pub fn find(&self, key: &TreeKey) -> Option<&TreeNode> {
        let mut node = self.root.as_ref()?;
        if !node.key.contains(key) {
            return None;
        }
        while node.key.depth() < key.depth() {
            node = node.children.get(&key.prefix(node.key.depth() + 1))?;
        }
        Some(node)
    }

    /// Keys of non-dummy nodes whose metadata `name` equals `value`.
    pub fn find_by_metadata(&self, name: &str, value: &str) -> Vec<TreeKey> {
        self.select(|node| node.metadata_value(name) == Some(value))
    }

    /// Keys of non-dummy nodes without a metadata entry `name`.
    pub fn find_without_metadata(&self, name: &str) -> Vec<TreeKey> {
        self.select(|node| !node.metadata.contains_key(name))
    }

    /// Keys of every non-dummy node, parents before children.
    pub fn keys(&self) -> Vec<TreeKey> {
        self.select(|_| true)
    }

    /// Non-dummy, non-error keys at and below `key`.
    pub fn subtree_keys(&self, key: &TreeKey) -> Vec<TreeKey> {
        let mut keys = Vec::new();
        if let Some(node) = self.find(key) {
            crate::diff::collect_subtree(node, &mut keys);
        }
        keys
    }

    /// Every node, parents before children.
    pub fn nodes(&self) -> Vec<&TreeNode> {
        let mut nodes = Vec::new();
        if let Some(root) = &self.root {
            root.walk(&mut |node| nodes.push(node));
        }
        nodes
    }

    fn select(&self, predicate: impl Fn(&TreeNode) -> bool) -> Vec<TreeKey> {
        self.nodes()
            .into_iter()
            .filter(|node| !node.dummy && predicate(node))
            .map(|node| node.key.clone())
            .collect()
    }

    /// Apply `change` to the node at `key`, then rehash and prune the path.
    fn mutate(&mut self, key: &TreeKey, change: &mut dyn FnMut(&mut TreeNode)) -> bool {
        let Some(root) = self.root.as_mut() else {
            return false;
        };
        if !root.key.contains(key) || key.is_empty() {
            return false;
        }
        let found = mutate_at(root, key, change);
        if found && root.is_prunable() {
            self.root = None;
        }
        found
    }

    /// Re-root a detached node under fresh dummy ancestors.
    fn wrap(node: TreeNode) -> Self {
        let mut current = node;
        while let Some(parent_key) = current.key.parent() {
            let mut parent = TreeNode::placeholder(parent_key);
            parent.children.insert(current.key.clone(), current);
            parent.refresh_full_hash();
            current = parent;
        }
        Self::from_root(Some(current))
    }
}

impl PartialEq for StructuredHashTree {
    fn eq(&self, other: &Self) -> bool {
        self.root_hash() == other.root_hash()
    }
}

impl Eq for StructuredHashTree {}

fn upsert(node: &mut TreeNode, key: &TreeKey, attributes: Attributes, metadata: Metadata) {
    if node.key.depth() == key.depth() {
        node.set_content(attributes, metadata);
        return;
    }
    let child_key = key.prefix(node.key.depth() + 1);
    if !node.children.contains_key(&child_key) {
        node.children
            .insert(child_key.clone(), TreeNode::placeholder(child_key.clone()));
    }
    if let Some(child) = node.children.get_mut(&child_key) {
        upsert(child, key, attributes, metadata);
    }
    node.refresh_full_hash();
}

fn detach(node: &mut TreeNode, key: &TreeKey) -> Option<TreeNode> {
    let child_key = key.prefix(node.key.depth() + 1);
    let detached = if child_key == *key {
        node.children.remove(key)?
    } else {
        let child = node.children.get_mut(&child_key)?;
        let detached = detach(child, key)?;
        if child.is_prunable() {
            node.children.remove(&child_key);
        }
        detached
    };
    node.refresh_full_hash();
    Some(detached)
}

fn mutate_at(node: &mut TreeNode, key: &TreeKey, change: &mut dyn FnMut(&mut TreeNode)) -> bool {
    if node.key == *key {
        change(node);
        return true;
    }
    let child_key = key.prefix(node.key.depth() + 1);
    let Some(child) = node.children.get_mut(&child_key) else {
        return false;
    };
    if !mutate_at(child, key, change) {
        return false;
    }
    if child.is_prunable() {
        node.children.remove(&child_key);
    }
    node.refresh_full_hash();
    true
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::node::{Scalar, attributes};

    fn key(segments: &[&str]) -> TreeKey {
        TreeKey::from(segments)
    }

    fn sample() -> StructuredHashTree {
        let mut tree = StructuredHashTree::new();
        tree.add(key(&["t1", "bd1"]), attributes([("mtu", 1500)]))
            .unwrap()
            .add(key(&["t1", "bd1", "s1"]), attributes([("ip", "10.0.0.1/24")]))
            .unwrap()
            .add(key(&["t1", "bd2"]), attributes([("mtu", 9000)]))
            .unwrap();
        tree
    }

    #[test]
    fn test_add_creates_dummy_ancestors() {
        let mut tree = StructuredHashTree::new();
        tree.add(key(&["t1", "bd1", "s1"]), Attributes::new()).unwrap();

        assert!(tree.find(&key(&["t1"])).unwrap().is_dummy());
        assert!(tree.find(&key(&["t1", "bd1"])).unwrap().is_dummy());
        assert!(!tree.find(&key(&["t1", "bd1", "s1"])).unwrap().is_dummy());
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn test_add_empty_key_is_noop() {
        let mut tree = StructuredHashTree::new();
        tree.add(TreeKey::default(), Attributes::new()).unwrap();
        assert!(tree.is_empty());
    }

    #[test]
    fn test_add_rejects_foreign_root() {
        let mut tree = sample();
        let err = tree.add(key(&["t2", "bd1"]), Attributes::new()).unwrap_err();
        assert!(matches!(err, TreeError::InconsistentRoot { .. }));
    }

    #[test]
    fn test_add_replaces_existing_node() {
        let mut tree = sample();
        let before = tree.root_hash().unwrap().to_string();
        tree.add(key(&["t1", "bd2"]), attributes([("mtu", 1500)]))
            .unwrap();
        let node = tree.find(&key(&["t1", "bd2"])).unwrap();
        assert_eq!(node.attributes().get("mtu"), Some(&Scalar::Int(1500)));
        assert_ne!(tree.root_hash().unwrap(), before);
    }

    #[test]
    fn test_existing_dummy_becomes_real() {
        let mut tree = sample();
        tree.add(key(&["t1"]), attributes([("descr", "tenant")]))
            .unwrap();
        assert!(!tree.root().unwrap().is_dummy());
        assert_eq!(tree.len(), 4);
    }

    #[test]
    fn test_leaf_change_propagates_to_ancestors_only() {
        let mut tree = sample();
        let root_before = tree.root_hash().unwrap().to_string();
        let bd1_before = tree.find(&key(&["t1", "bd1"])).unwrap().full_hash().to_string();
        let bd2_before = tree.find(&key(&["t1", "bd2"])).unwrap().full_hash().to_string();

        tree.add(key(&["t1", "bd1", "s1"]), attributes([("ip", "10.0.1.1/24")]))
            .unwrap();

        assert_ne!(tree.root_hash().unwrap(), root_before);
        assert_ne!(tree.find(&key(&["t1", "bd1"])).unwrap().full_hash(), bd1_before);
        assert_eq!(tree.find(&key(&["t1", "bd2"])).unwrap().full_hash(), bd2_before);
    }

    #[test]
    fn test_attribute_order_does_not_matter() {
        let mut first = StructuredHashTree::new();
        first
            .add(key(&["t1", "k"]), attributes([("a", 1), ("b", 2)]))
            .unwrap();
        let mut second = StructuredHashTree::new();
        second
            .add(key(&["t1", "k"]), attributes([("b", 2), ("a", 1)]))
            .unwrap();

        assert_eq!(
            first.find(&key(&["t1", "k"])).unwrap().partial_hash(),
            second.find(&key(&["t1", "k"])).unwrap().partial_hash()
        );
        assert_eq!(first, second);
    }

    #[test]
    fn test_add_then_pop_round_trip() {
        let mut addition = StructuredHashTree::new();
        addition
            .add(key(&["t1", "bd1"]), attributes([("mtu", 1500)]))
            .unwrap();

        let mut tree = StructuredHashTree::new();
        tree.add(key(&["t1", "bd1"]), attributes([("mtu", 1500)]))
            .unwrap();
        let popped = tree.pop(&key(&["t1", "bd1"])).unwrap();

        assert_eq!(popped, addition);
        assert!(tree.is_empty());
        assert!(tree.root().is_none());
    }

    #[test]
    fn test_pop_prunes_dummy_ancestors() {
        let mut tree = StructuredHashTree::new();
        tree.add(key(&["t1", "a", "b", "c"]), Attributes::new())
            .unwrap()
            .add(key(&["t1", "x"]), Attributes::new())
            .unwrap();

        tree.pop(&key(&["t1", "a", "b", "c"])).unwrap();

        assert!(tree.find(&key(&["t1", "a"])).is_none());
        assert!(tree.find(&key(&["t1", "a", "b"])).is_none());
        assert!(tree.find(&key(&["t1", "x"])).is_some());
    }

    #[test]
    fn test_pop_missing_has_no_side_effects() {
        let mut tree = sample();
        let before = tree.clone();
        assert!(tree.pop(&key(&["t1", "nope"])).is_none());
        assert!(tree.pop(&key(&["t2"])).is_none());
        assert_eq!(tree, before);
    }

    #[test]
    fn test_pop_subtree_carries_children() {
        let mut tree = sample();
        let popped = tree.pop(&key(&["t1", "bd1"])).unwrap();
        assert!(popped.find(&key(&["t1", "bd1", "s1"])).is_some());
        assert!(tree.find(&key(&["t1", "bd1", "s1"])).is_none());
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn test_remove_missing_is_error() {
        let mut tree = sample();
        let err = tree.remove(&key(&["t1", "nope"])).unwrap_err();
        assert_eq!(err, TreeError::not_found(key(&["t1", "nope"])));
    }

    #[test]
    fn test_clear_keeps_children() {
        let mut tree = sample();
        tree.clear(&key(&["t1", "bd1"]));

        let node = tree.find(&key(&["t1", "bd1"])).unwrap();
        assert!(node.is_dummy());
        assert!(node.attributes().is_empty());
        assert!(tree.find(&key(&["t1", "bd1", "s1"])).is_some());
    }

    #[test]
    fn test_clear_leaf_prunes_it() {
        let mut tree = sample();
        tree.clear(&key(&["t1", "bd2"]));
        assert!(tree.find(&key(&["t1", "bd2"])).is_none());

        let mut single = StructuredHashTree::new();
        single.add(key(&["t1", "bd1"]), Attributes::new()).unwrap();
        single.clear(&key(&["t1", "bd1"]));
        assert!(single.is_empty());
    }

    #[test]
    fn test_set_error() {
        let mut tree = sample();
        tree.set_error(&key(&["t1", "bd1"]), true).unwrap();
        assert!(tree.find(&key(&["t1", "bd1"])).unwrap().is_error());
        assert!(tree.set_error(&key(&["t1", "zz"]), true).is_err());
    }

    #[test]
    fn test_metadata_queries() {
        let mut tree = StructuredHashTree::new();
        let mut meta = Metadata::new();
        meta.insert("related".into(), "true".into());
        tree.add_with_metadata(key(&["t1", "a"]), Attributes::new(), meta)
            .unwrap()
            .add(key(&["t1", "b"]), Attributes::new())
            .unwrap();

        assert_eq!(tree.find_by_metadata("related", "true"), vec![key(&["t1", "a"])]);
        assert_eq!(tree.find_without_metadata("related"), vec![key(&["t1", "b"])]);
    }

    #[test]
    fn test_find_outside_root() {
        let tree = sample();
        assert!(tree.find(&key(&["t2", "bd1"])).is_none());
        assert!(tree.find(&TreeKey::default()).is_none());
    }

    #[test]
    fn test_keys_are_ordered() {
        let tree = sample();
        assert_eq!(
            tree.keys(),
            vec![
                key(&["t1", "bd1"]),
                key(&["t1", "bd1", "s1"]),
                key(&["t1", "bd2"]),
            ]
        );
    }

    #[test]
    fn test_subtree_keys_skip_dummy_and_error_nodes() {
        let mut tree = sample();
        assert_eq!(
            tree.subtree_keys(&key(&["t1", "bd1"])),
            vec![key(&["t1", "bd1"]), key(&["t1", "bd1", "s1"])]
        );
        assert_eq!(tree.subtree_keys(&key(&["t1"])).len(), 3);
        assert!(tree.subtree_keys(&key(&["t1", "nope"])).is_empty());

        tree.set_error(&key(&["t1", "bd1", "s1"]), true).unwrap();
        assert_eq!(tree.subtree_keys(&key(&["t1", "bd1"])), vec![key(&["t1", "bd1"])]);
    }
}
