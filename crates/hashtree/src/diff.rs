//! Structural difference between two trees.

use serde::{Deserialize, Serialize};

use crate::key::TreeKey;
use crate::node::TreeNode;
use crate::tree::StructuredHashTree;

/// Keys to create and to delete on one tree to make it equal another.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeDiff {
    pub add: Vec<TreeKey>,
    pub remove: Vec<TreeKey>,
}

impl TreeDiff {
    /// Whether the trees are already equal.
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }

    /// Total number of operations.
    pub fn len(&self) -> usize {
        self.add.len() + self.remove.len()
    }

    /// Whether `key` appears on either side.
    pub fn contains(&self, key: &TreeKey) -> bool {
        self.add.contains(key) || self.remove.contains(key)
    }
}

impl StructuredHashTree {
    /// Operations to apply to `other` so that it equals `self`.
    ///
    /// Subtrees with equal full hashes are skipped without recursion. A node
    /// flagged as error on either side is compared by its own hash, but its
    /// children are never visited.
    pub fn diff(&self, other: &Self) -> TreeDiff {
        let mut diff = TreeDiff::default();
        match (self.root(), other.root()) {
            (None, None) => {}
            (Some(mine), None) => collect_subtree(mine, &mut diff.add),
            (None, Some(theirs)) => collect_subtree(theirs, &mut diff.remove),
            (Some(mine), Some(theirs)) if mine.key() != theirs.key() => {
                collect_subtree(mine, &mut diff.add);
                collect_subtree(theirs, &mut diff.remove);
            }
            (Some(mine), Some(theirs)) => diff_nodes(mine, theirs, &mut diff),
        }
        diff
    }
}

fn diff_nodes(mine: &TreeNode, theirs: &TreeNode, diff: &mut TreeDiff) {
    if mine.partial_hash() != theirs.partial_hash() {
        if !mine.is_dummy() {
            diff.add.push(mine.key().clone());
        } else if !theirs.is_dummy() {
            diff.remove.push(theirs.key().clone());
        }
    }
    if mine.is_error() || theirs.is_error() || mine.full_hash() == theirs.full_hash() {
        return;
    }
    for child in mine.children() {
        match theirs.child(child.key()) {
            None => collect_subtree(child, &mut diff.add),
            Some(other) if other.full_hash() != child.full_hash() => {
                diff_nodes(child, other, diff);
            }
            Some(_) => {}
        }
    }
    for other in theirs.children() {
        if mine.child(other.key()).is_none() {
            collect_subtree(other, &mut diff.remove);
        }
    }
}

/// Non-dummy keys of a subtree, parents first; error subtrees are skipped.
pub(crate) fn collect_subtree(node: &TreeNode, keys: &mut Vec<TreeKey>) {
    if node.is_error() {
        return;
    }
    if !node.is_dummy() {
        keys.push(node.key().clone());
    }
    for child in node.children() {
        collect_subtree(child, keys);
    }
}
