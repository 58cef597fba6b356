//! Hierarchical tree keys.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Separator between a segment's type and its name (`bridge-domain|bd1`).
pub const KIND_SEPARATOR: char = '|';

/// Ordered path of segments identifying a node.
///
/// Every prefix of a key identifies an ancestor, and the first segment is
/// the tenant root shared by every key of a tree. Keys order
/// lexicographically segment by segment, which is the order children are
/// kept in.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TreeKey(Vec<String>);

impl TreeKey {
    /// Create a key from its segments.
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// Key made of a single root segment.
    pub fn root_of(segment: impl Into<String>) -> Self {
        Self(vec![segment.into()])
    }

    /// The segments of this key.
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Number of segments.
    pub fn depth(&self) -> usize {
        self.0.len()
    }

    /// Whether the key has no segments.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// First segment (the tenant root), if any.
    pub fn root(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    /// Last segment, if any.
    pub fn leaf(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    /// Type half of the last segment; the whole segment when it has no `|`.
    pub fn kind(&self) -> Option<&str> {
        self.leaf()
            .map(|leaf| leaf.split_once(KIND_SEPARATOR).map_or(leaf, |(kind, _)| kind))
    }

    /// Key made of the first `len` segments (clamped to the key length).
    pub fn prefix(&self, len: usize) -> Self {
        Self(self.0.iter().take(len).cloned().collect())
    }

    /// Parent key, or `None` for a root or empty key.
    pub fn parent(&self) -> Option<Self> {
        match self.0.len() {
            0 | 1 => None,
            n => Some(self.prefix(n.saturating_sub(1))),
        }
    }

    /// Key of a direct child of this key.
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Self(segments)
    }

    /// Whether `self` is a strict ancestor of `other`.
    pub fn is_ancestor_of(&self, other: &Self) -> bool {
        self.0.len() < other.0.len() && other.0.starts_with(&self.0)
    }

    /// Whether `self` equals `other` or is an ancestor of it.
    pub fn contains(&self, other: &Self) -> bool {
        other.0.starts_with(&self.0)
    }
}

impl fmt::Display for TreeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("/"))
    }
}

impl From<Vec<String>> for TreeKey {
    fn from(segments: Vec<String>) -> Self {
        Self(segments)
    }
}

impl From<&[&str]> for TreeKey {
    fn from(segments: &[&str]) -> Self {
        Self::new(segments.iter().copied())
    }
}

impl<const N: usize> From<[&str; N]> for TreeKey {
    fn from(segments: [&str; N]) -> Self {
        Self::new(segments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_and_leaf() {
        let key = TreeKey::from(["tenant|t1", "bridge-domain|bd1"]);
        assert_eq!(key.root(), Some("tenant|t1"));
        assert_eq!(key.leaf(), Some("bridge-domain|bd1"));
        assert_eq!(key.kind(), Some("bridge-domain"));

        let bare = TreeKey::from(["t1"]);
        assert_eq!(bare.kind(), Some("t1"));
    }

    #[test]
    fn test_parent_and_prefix() {
        let key = TreeKey::from(["t1", "bd1", "s1"]);
        assert_eq!(key.parent(), Some(TreeKey::from(["t1", "bd1"])));
        assert_eq!(key.prefix(1), TreeKey::from(["t1"]));
        assert_eq!(key.prefix(10), key);
        assert_eq!(TreeKey::from(["t1"]).parent(), None);
    }

    #[test]
    fn test_ancestry() {
        let root = TreeKey::from(["t1"]);
        let leaf = TreeKey::from(["t1", "bd1"]);
        assert!(root.is_ancestor_of(&leaf));
        assert!(!leaf.is_ancestor_of(&root));
        assert!(!leaf.is_ancestor_of(&leaf));
        assert!(leaf.contains(&leaf));
    }

    #[test]
    fn test_ordering_is_segment_wise() {
        let a = TreeKey::from(["t1", "a"]);
        let b = TreeKey::from(["t1", "a", "z"]);
        let c = TreeKey::from(["t1", "b"]);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_display() {
        let key = TreeKey::from(["t1", "bd1"]);
        assert_eq!(key.to_string(), "t1/bd1");
    }
}
