//! Tree nodes and their content hashes.

use std::collections::BTreeMap;
use std::fmt;

use im::OrdMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::key::TreeKey;

/// Scalar attribute value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
}

impl Scalar {
    fn feed(&self, hasher: &mut Sha256) {
        match self {
            Self::Null => hasher.update([0u8]),
            Self::Bool(value) => hasher.update([1u8, u8::from(*value)]),
            Self::Int(value) => {
                hasher.update([2u8]);
                hasher.update(value.to_be_bytes());
            }
            Self::Str(value) => {
                hasher.update([3u8]);
                feed_str(hasher, value);
            }
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(value) => write!(f, "{value}"),
            Self::Int(value) => write!(f, "{value}"),
            Self::Str(value) => write!(f, "{value}"),
        }
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for Scalar {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

/// A resource's own properties, sorted by name.
pub type Attributes = BTreeMap<String, Scalar>;

/// Auxiliary node tags, never hashed.
pub type Metadata = BTreeMap<String, String>;

/// Build an attribute map from `(name, value)` pairs.
pub fn attributes<I, K, V>(pairs: I) -> Attributes
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Scalar>,
{
    pairs
        .into_iter()
        .map(|(name, value)| (name.into(), value.into()))
        .collect()
}

/// Feed a length, so that variable-length fields cannot run into each other.
fn feed_len(hasher: &mut Sha256, len: usize) {
    hasher.update(u64::try_from(len).unwrap_or(u64::MAX).to_be_bytes());
}

fn feed_str(hasher: &mut Sha256, value: &str) {
    feed_len(hasher, value.len());
    hasher.update(value.as_bytes());
}

/// Hash of a node's own content: key, attributes in name order, and markers.
pub(crate) fn partial_hash(
    key: &TreeKey,
    attributes: &Attributes,
    dummy: bool,
    error: bool,
) -> String {
    let mut hasher = Sha256::new();
    feed_len(&mut hasher, key.depth());
    for segment in key.segments() {
        feed_str(&mut hasher, segment);
    }
    feed_len(&mut hasher, attributes.len());
    for (name, value) in attributes {
        feed_str(&mut hasher, name);
        value.feed(&mut hasher);
    }
    hasher.update([u8::from(dummy), u8::from(error)]);
    format!("{:x}", hasher.finalize())
}

/// A node of a [`StructuredHashTree`](crate::StructuredHashTree).
#[derive(Debug, Clone)]
pub struct TreeNode {
    pub(crate) key: TreeKey,
    pub(crate) attributes: Attributes,
    pub(crate) metadata: Metadata,
    pub(crate) partial_hash: String,
    pub(crate) full_hash: String,
    pub(crate) dummy: bool,
    pub(crate) error: bool,
    pub(crate) children: OrdMap<TreeKey, TreeNode>,
}

impl TreeNode {
    /// Structural placeholder for a path segment never created explicitly.
    pub(crate) fn placeholder(key: TreeKey) -> Self {
        let mut node = Self {
            key,
            attributes: Attributes::new(),
            metadata: Metadata::new(),
            partial_hash: String::new(),
            full_hash: String::new(),
            dummy: true,
            error: false,
            children: OrdMap::new(),
        };
        node.rehash();
        node
    }

    pub fn key(&self) -> &TreeKey {
        &self.key
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Metadata value for `name`.
    pub fn metadata_value(&self, name: &str) -> Option<&str> {
        self.metadata.get(name).map(String::as_str)
    }

    pub fn partial_hash(&self) -> &str {
        &self.partial_hash
    }

    pub fn full_hash(&self) -> &str {
        &self.full_hash
    }

    pub fn is_dummy(&self) -> bool {
        self.dummy
    }

    pub fn is_error(&self) -> bool {
        self.error
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Children in key order.
    pub fn children(&self) -> impl Iterator<Item = &TreeNode> {
        self.children.values()
    }

    /// Direct child with the given key.
    pub fn child(&self, key: &TreeKey) -> Option<&TreeNode> {
        self.children.get(key)
    }

    /// Set the node's own content and recompute both hashes.
    pub(crate) fn set_content(&mut self, attributes: Attributes, metadata: Metadata) {
        self.attributes = attributes;
        self.metadata = metadata;
        self.dummy = false;
        self.rehash();
    }

    /// Turn the node into a tombstone, keeping its children.
    pub(crate) fn tombstone(&mut self) {
        self.attributes = Attributes::new();
        self.dummy = true;
        self.rehash();
    }

    pub(crate) fn set_error(&mut self, error: bool) {
        self.error = error;
        self.rehash();
    }

    /// Recompute the partial hash and then the full hash.
    pub(crate) fn rehash(&mut self) {
        self.partial_hash = partial_hash(&self.key, &self.attributes, self.dummy, self.error);
        self.refresh_full_hash();
    }

    /// Recompute the full hash from the partial hash and the children.
    pub(crate) fn refresh_full_hash(&mut self) {
        if self.children.is_empty() {
            self.full_hash = self.partial_hash.clone();
            return;
        }
        let mut hasher = Sha256::new();
        hasher.update(self.partial_hash.as_bytes());
        for child in self.children.values() {
            hasher.update(child.full_hash.as_bytes());
        }
        self.full_hash = format!("{:x}", hasher.finalize());
    }

    /// Whether the node is a dummy with nothing below it.
    pub(crate) fn is_prunable(&self) -> bool {
        self.dummy && self.children.is_empty()
    }

    /// Visit this node and every descendant, parents before children.
    pub(crate) fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a TreeNode)) {
        visit(self);
        for child in self.children.values() {
            child.walk(visit);
        }
    }
}

impl PartialEq for TreeNode {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.full_hash == other.full_hash
    }
}

impl Eq for TreeNode {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_hash_ignores_insertion_order() {
        let key = TreeKey::from(["t1", "bd1"]);
        let mut first = Attributes::new();
        first.insert("a".into(), Scalar::Int(1));
        first.insert("b".into(), Scalar::Int(2));
        let mut second = Attributes::new();
        second.insert("b".into(), Scalar::Int(2));
        second.insert("a".into(), Scalar::Int(1));

        assert_eq!(
            partial_hash(&key, &first, false, false),
            partial_hash(&key, &second, false, false)
        );
    }

    #[test]
    fn test_markers_change_partial_hash() {
        let key = TreeKey::from(["t1"]);
        let attrs = Attributes::new();
        let plain = partial_hash(&key, &attrs, false, false);
        assert_ne!(plain, partial_hash(&key, &attrs, true, false));
        assert_ne!(plain, partial_hash(&key, &attrs, false, true));
    }

    #[test]
    fn test_scalar_types_hash_differently() {
        let key = TreeKey::from(["t1"]);
        let as_int = attributes([("v", Scalar::Int(1))]);
        let as_str = attributes([("v", Scalar::from("1"))]);
        assert_ne!(
            partial_hash(&key, &as_int, false, false),
            partial_hash(&key, &as_str, false, false)
        );
    }

    #[test]
    fn test_separator_bytes_in_values_do_not_collide() {
        let key = TreeKey::from(["t1"]);
        let split = attributes([("a", "x"), ("b", "y")]);
        let packed = attributes([("a", "x\u{1e}b\u{1f}\u{3}y")]);
        assert_ne!(
            partial_hash(&key, &split, false, false),
            partial_hash(&key, &packed, false, false)
        );

        let joined = TreeKey::from(["t1", "a\u{1f}b"]);
        let nested = TreeKey::from(["t1", "a", "b"]);
        assert_ne!(
            partial_hash(&joined, &Attributes::new(), false, false),
            partial_hash(&nested, &Attributes::new(), false, false)
        );
    }

    #[test]
    fn test_leaf_full_hash_equals_partial() {
        let node = TreeNode::placeholder(TreeKey::from(["t1"]));
        assert_eq!(node.full_hash(), node.partial_hash());
        assert!(node.is_prunable());
    }

    #[test]
    fn test_scalar_json_shape() {
        let attrs = attributes([
            ("name", Scalar::from("bd1")),
            ("mtu", Scalar::Int(9000)),
            ("enabled", Scalar::Bool(true)),
        ]);
        let json = serde_json::to_string(&attrs).unwrap_or_default();
        assert_eq!(json, r#"{"enabled":true,"mtu":9000,"name":"bd1"}"#);
    }
}
