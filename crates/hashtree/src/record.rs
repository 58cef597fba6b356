//! Nested record format for persisting and exchanging trees.
//!
//! A tree serializes as its root record, or `null` when empty. Each record
//! keeps the stored hashes verbatim, so a tree read back compares equal to
//! the one written even when the producer omitted the attributes.

use im::OrdMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Result, TreeError};
use crate::key::TreeKey;
use crate::node::{Attributes, Metadata, TreeNode};
use crate::tree::StructuredHashTree;

/// Serialized shape of one node and its subtree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub key: TreeKey,
    pub partial_hash: String,
    pub full_hash: String,
    #[serde(default)]
    pub dummy: bool,
    #[serde(default)]
    pub error: bool,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub attributes: Attributes,
    #[serde(default)]
    pub children: Vec<NodeRecord>,
}

impl From<&TreeNode> for NodeRecord {
    fn from(node: &TreeNode) -> Self {
        Self {
            key: node.key.clone(),
            partial_hash: node.partial_hash.clone(),
            full_hash: node.full_hash.clone(),
            dummy: node.dummy,
            error: node.error,
            metadata: node.metadata.clone(),
            attributes: node.attributes.clone(),
            children: node.children.values().map(Self::from).collect(),
        }
    }
}

impl TryFrom<NodeRecord> for TreeNode {
    type Error = TreeError;

    fn try_from(record: NodeRecord) -> Result<Self> {
        let mut children = OrdMap::new();
        for child in record.children {
            if child.key.parent().as_ref() != Some(&record.key) {
                return Err(TreeError::invalid_record(format!(
                    "'{}' is not a direct child of '{}'",
                    child.key, record.key
                )));
            }
            let child = Self::try_from(child)?;
            if children.insert(child.key.clone(), child).is_some() {
                return Err(TreeError::invalid_record(format!(
                    "duplicate child under '{}'",
                    record.key
                )));
            }
        }

        if record.dummy && children.is_empty() {
            return Err(TreeError::invalid_record(format!(
                "dummy node '{}' has no children",
                record.key
            )));
        }

        let node = Self {
            key: record.key,
            attributes: record.attributes,
            metadata: record.metadata,
            partial_hash: record.partial_hash,
            full_hash: record.full_hash,
            dummy: record.dummy,
            error: record.error,
            children,
        };
        let mut expected = node.clone();
        expected.refresh_full_hash();
        if expected.full_hash != node.full_hash {
            return Err(TreeError::invalid_record(format!(
                "full hash of '{}' does not match its children",
                node.key
            )));
        }
        Ok(node)
    }
}

impl StructuredHashTree {
    /// Root record, or `None` for an empty tree.
    pub fn to_record(&self) -> Option<NodeRecord> {
        self.root().map(NodeRecord::from)
    }

    /// Rebuild a tree from its root record.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::InvalidRecord`] when the record is not a
    /// well-formed single-rooted tree.
    pub fn from_record(record: Option<NodeRecord>) -> Result<Self> {
        let Some(record) = record else {
            return Ok(Self::new());
        };
        if record.key.depth() != 1 {
            return Err(TreeError::invalid_record(format!(
                "root '{}' must have exactly one segment",
                record.key
            )));
        }
        Ok(Self::from_root(Some(TreeNode::try_from(record)?)))
    }

    /// Encode as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::Serialization`] if encoding fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| TreeError::serialization(e.to_string()))
    }

    /// Encode as indented JSON.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::Serialization`] if encoding fails.
    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| TreeError::serialization(e.to_string()))
    }

    /// Decode from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::Serialization`] for malformed JSON and
    /// [`TreeError::InvalidRecord`] for a malformed tree.
    pub fn from_json(json: &str) -> Result<Self> {
        let record: Option<NodeRecord> =
            serde_json::from_str(json).map_err(|e| TreeError::serialization(e.to_string()))?;
        Self::from_record(record)
    }
}

impl Serialize for StructuredHashTree {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_record().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for StructuredHashTree {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let record = Option::<NodeRecord>::deserialize(deserializer)?;
        Self::from_record(record).map_err(serde::de::Error::custom)
    }
}
