//! State files: the objects of a backing system as a JSON document.
//!
//! ```json
//! {
//!   "objects": [
//!     { "key": ["tenant|t1", "bd|web"], "attributes": { "mtu": 9000 } },
//!     { "key": ["tenant|t1", "vrf|shared"], "owner": "remote", "attributes": { "id": 1 } }
//!   ]
//! }
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use fabsync_core::{Result, ResultExt};
use fabsync_hashtree::{StructuredHashTree, TreeKey};
use fabsync_universe::{Backend, InMemoryBackend, StoredObject, TreeKind};
use serde::{Deserialize, Serialize};

/// One object and where it lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectEntry {
    pub key: TreeKey,
    #[serde(flatten)]
    pub object: StoredObject,
}

/// Every object of one backing system.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateFile {
    #[serde(default)]
    pub objects: Vec<ObjectEntry>,
}

impl StateFile {
    /// Read a state file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not a state file.
    pub fn load(path: &Path) -> Result<Self> {
        fabsync_core::fs::read_json(path)
    }

    /// Write a state file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        fabsync_core::fs::write_json(path, self)
    }

    /// Tenant roots of every object.
    pub fn roots(&self) -> BTreeSet<String> {
        self.objects
            .iter()
            .filter_map(|entry| entry.key.root())
            .map(str::to_string)
            .collect()
    }

    /// Load every object into a backend.
    pub async fn seed(&self, backend: &InMemoryBackend) {
        for entry in &self.objects {
            backend.insert(entry.key.clone(), entry.object.clone()).await;
        }
    }

    /// Capture every object of a backend.
    pub async fn capture(backend: &InMemoryBackend) -> Self {
        Self {
            objects: backend
                .objects()
                .await
                .into_iter()
                .map(|(key, object)| ObjectEntry { key, object })
                .collect(),
        }
    }

    /// Trees of one kind, by root.
    ///
    /// # Errors
    ///
    /// Returns [`fabsync_core::Error::InvalidRecord`] if the objects do not
    /// form valid trees.
    pub async fn trees(&self, kind: TreeKind) -> Result<BTreeMap<String, StructuredHashTree>> {
        let backend = InMemoryBackend::new("state");
        self.seed(&backend).await;
        let mut trees = BTreeMap::new();
        for root in self.roots() {
            let tree = backend.load(&root, kind).await.invalid_record(&root)?;
            trees.insert(root, tree);
        }
        Ok(trees)
    }
}
