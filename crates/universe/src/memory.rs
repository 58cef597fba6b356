//! In-memory backing system.
//!
//! Holds objects keyed by tree key. Each object has configuration
//! attributes, observed-only attributes and an owner. The three tree kinds
//! are projections of the same objects:
//!
//! - `Config`: locally owned objects with their configuration
//! - `Monitored`: remotely owned objects with their configuration
//! - `Operational`: objects with observed-only attributes
//!
//! Deleting an ownership marker releases the object: it stays in place but
//! leaves both the config and the monitored trees.
//!
//! Every mutation emits the matching events to subscribers, in order, before
//! the call returns.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use fabsync_hashtree::{Attributes, StructuredHashTree, TreeKey};
use fabsync_reconciler::{Resource, ResourceBatch};
use futures::channel::mpsc;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::backend::{Backend, EventStream, TreeEvent};
use crate::error::{Error, Result};
use crate::kind::TreeKind;

/// Management authority of an object.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Owner {
    /// Managed by this system.
    #[default]
    Local,
    /// Managed by someone else; only observed here.
    Remote,
    /// Left in place but managed by no one.
    Released,
}

/// One object of the backing system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredObject {
    #[serde(default)]
    pub owner: Owner,
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(default)]
    pub observed: Attributes,
}

impl StoredObject {
    /// A locally owned object.
    pub fn local(attributes: Attributes) -> Self {
        Self {
            owner: Owner::Local,
            attributes,
            observed: Attributes::new(),
        }
    }

    /// A remotely owned object.
    pub fn remote(attributes: Attributes) -> Self {
        Self {
            owner: Owner::Remote,
            ..Self::local(attributes)
        }
    }

    /// Content of this object in a tree of `kind`, if it belongs there.
    fn projection(&self, kind: TreeKind) -> Option<&Attributes> {
        match kind {
            TreeKind::Config => (self.owner == Owner::Local).then_some(&self.attributes),
            TreeKind::Monitored => (self.owner == Owner::Remote).then_some(&self.attributes),
            TreeKind::Operational => (!self.observed.is_empty()).then_some(&self.observed),
        }
    }
}

struct Subscriber {
    root: String,
    kind: TreeKind,
    sender: mpsc::UnboundedSender<TreeEvent>,
}

#[derive(Default)]
struct State {
    objects: BTreeMap<TreeKey, StoredObject>,
    subscribers: Vec<Subscriber>,
    failing: HashSet<TreeKey>,
    /// Objects flagged as not diffable.
    errors: HashSet<TreeKey>,
    pushes: usize,
}

impl State {
    /// Replace the object at `key` and notify subscribers.
    fn write(&mut self, key: TreeKey, object: Option<StoredObject>) {
        let before = match &object {
            Some(object) => self.objects.insert(key.clone(), object.clone()),
            None => {
                self.errors.remove(&key);
                self.objects.remove(&key)
            }
        };
        self.notify(&key, before.as_ref(), object.as_ref());
    }

    fn notify(
        &mut self,
        key: &TreeKey,
        before: Option<&StoredObject>,
        after: Option<&StoredObject>,
    ) {
        let Some(root) = key.root() else {
            return;
        };
        for kind in TreeKind::ALL {
            let was = before.and_then(|object| object.projection(kind));
            let event = match after.and_then(|object| object.projection(kind)) {
                Some(attributes) if was != Some(attributes) => TreeEvent::Upsert {
                    key: key.clone(),
                    attributes: attributes.clone(),
                    metadata: Default::default(),
                },
                Some(_) => continue,
                None if was.is_some() => TreeEvent::Delete { key: key.clone() },
                None => continue,
            };
            self.subscribers.retain(|subscriber| {
                if subscriber.root != root || subscriber.kind != kind {
                    return true;
                }
                subscriber.sender.unbounded_send(event.clone()).is_ok()
            });
        }
    }

    fn tree(&self, root: &str, kind: TreeKind) -> Result<StructuredHashTree> {
        let mut tree = StructuredHashTree::new();
        for (key, object) in self.objects.iter().filter(|(key, _)| key.root() == Some(root)) {
            if let Some(attributes) = object.projection(kind) {
                tree.add(key.clone(), attributes.clone())?;
            }
        }
        for key in self.errors.iter().filter(|key| key.root() == Some(root)) {
            if tree.find(key).is_some() {
                tree.set_error(key, true)?;
            }
        }
        Ok(tree)
    }
}

/// Backing system held entirely in memory.
pub struct InMemoryBackend {
    name: String,
    state: Mutex<State>,
}

impl InMemoryBackend {
    /// Create an empty backend.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(State::default()),
        }
    }

    /// Insert or replace an object.
    pub async fn insert(&self, key: impl Into<TreeKey>, object: StoredObject) {
        self.state.lock().await.write(key.into(), Some(object));
    }

    /// Delete an object.
    pub async fn delete(&self, key: &TreeKey) -> Option<StoredObject> {
        let mut state = self.state.lock().await;
        let before = state.objects.get(key).cloned();
        state.write(key.clone(), None);
        before
    }

    /// Change who manages an object.
    ///
    /// The object moves between the config and monitored trees.
    pub async fn set_owner(&self, key: &TreeKey, owner: Owner) -> Result<()> {
        self.update(key, |object| object.owner = owner).await
    }

    /// Replace the observed-only attributes of an object.
    pub async fn set_observed(&self, key: &TreeKey, observed: Attributes) -> Result<()> {
        self.update(key, |object| object.observed = observed).await
    }

    /// Flag an object as not diffable in every tree it appears in.
    ///
    /// The flag is kept until cleared or the object is deleted, so full
    /// loads carry it too.
    pub async fn mark_error(&self, key: &TreeKey, error: bool) {
        let mut state = self.state.lock().await;
        if !state.objects.contains_key(key) {
            return;
        }
        if error {
            state.errors.insert(key.clone());
        } else {
            state.errors.remove(key);
        }
        let Some(object) = state.objects.get(key) else {
            return;
        };
        let kinds: Vec<TreeKind> = TreeKind::ALL
            .into_iter()
            .filter(|kind| object.projection(*kind).is_some())
            .collect();
        let root = key.root().unwrap_or_default();
        for subscriber in state
            .subscribers
            .iter()
            .filter(|subscriber| subscriber.root == root && kinds.contains(&subscriber.kind))
        {
            let _ = subscriber.sender.unbounded_send(TreeEvent::MarkError {
                key: key.clone(),
                error,
            });
        }
    }

    async fn update(&self, key: &TreeKey, change: impl FnOnce(&mut StoredObject)) -> Result<()> {
        let mut state = self.state.lock().await;
        let mut object = state
            .objects
            .get(key)
            .cloned()
            .ok_or_else(|| {
                Error::backend(&self.name, "update object", format!("'{key}' not found"))
            })?;
        change(&mut object);
        state.write(key.clone(), Some(object));
        Ok(())
    }

    /// Silently drop every future push of `key`.
    pub async fn fail_key(&self, key: impl Into<TreeKey>) {
        self.state.lock().await.failing.insert(key.into());
    }

    /// Stop dropping pushes of `key`.
    pub async fn recover_key(&self, key: &TreeKey) {
        self.state.lock().await.failing.remove(key);
    }

    /// Object stored at `key`.
    pub async fn object(&self, key: &TreeKey) -> Option<StoredObject> {
        self.state.lock().await.objects.get(key).cloned()
    }

    /// Every stored object.
    pub async fn objects(&self) -> BTreeMap<TreeKey, StoredObject> {
        self.state.lock().await.objects.clone()
    }

    /// Number of push calls received.
    pub async fn pushes(&self) -> usize {
        self.state.lock().await.pushes
    }
}

#[async_trait]
impl Backend for InMemoryBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn load(&self, root: &str, kind: TreeKind) -> Result<StructuredHashTree> {
        self.state.lock().await.tree(root, kind)
    }

    async fn subscribe(&self, root: &str, kind: TreeKind) -> Result<EventStream> {
        let (sender, receiver) = mpsc::unbounded();
        self.state.lock().await.subscribers.push(Subscriber {
            root: root.to_string(),
            kind,
            sender,
        });
        Ok(receiver.boxed())
    }

    async fn fetch(&self, kind: TreeKind, keys: &[TreeKey]) -> Result<Vec<Resource>> {
        let state = self.state.lock().await;
        Ok(keys
            .iter()
            .filter_map(|key| {
                let attributes = state.objects.get(key)?.projection(kind)?;
                Some(Resource::new(key.clone(), attributes.clone()))
            })
            .collect())
    }

    async fn fetch_for_delete(&self, kind: TreeKind, keys: &[TreeKey]) -> Result<Vec<Resource>> {
        Ok(keys
            .iter()
            .cloned()
            .map(|key| match kind {
                TreeKind::Monitored => Resource::ownership_marker(key),
                TreeKind::Config | TreeKind::Operational => Resource::reference(key),
            })
            .collect())
    }

    async fn push(&self, kind: TreeKind, batch: ResourceBatch) -> Result<()> {
        let mut state = self.state.lock().await;
        state.pushes = state.pushes.saturating_add(1);
        debug!(
            backend = %self.name,
            %kind,
            create = batch.create.len(),
            delete = batch.delete.len(),
            "Applying batch"
        );

        for resource in batch.delete {
            if state.failing.contains(&resource.key) {
                continue;
            }
            let Some(mut object) = state.objects.get(&resource.key).cloned() else {
                continue;
            };
            match (kind, resource.ownership_marker) {
                (_, true) => {
                    object.owner = Owner::Released;
                    state.write(resource.key, Some(object));
                }
                (TreeKind::Operational, false) => {
                    object.observed.clear();
                    state.write(resource.key, Some(object));
                }
                (TreeKind::Config | TreeKind::Monitored, false) => {
                    state.write(resource.key, None);
                }
            }
        }

        for resource in batch.create {
            if state.failing.contains(&resource.key) {
                continue;
            }
            let mut object = state
                .objects
                .get(&resource.key)
                .cloned()
                .unwrap_or_else(|| StoredObject::local(Attributes::new()));
            match kind {
                TreeKind::Config => {
                    object.owner = Owner::Local;
                    object.attributes = resource.attributes;
                }
                TreeKind::Monitored => {
                    object.owner = Owner::Remote;
                    object.attributes = resource.attributes;
                }
                TreeKind::Operational => object.observed = resource.attributes,
            }
            state.write(resource.key, Some(object));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::indexing_slicing)]

    use super::*;
    use fabsync_hashtree::attributes;

    fn key(segments: &[&str]) -> TreeKey {
        TreeKey::from(segments)
    }

    #[tokio::test]
    async fn test_projections_by_kind() -> Result<()> {
        let backend = InMemoryBackend::new("fabric");
        backend
            .insert(key(&["t1", "bd|a"]), StoredObject::local(attributes([("mtu", 1500)])))
            .await;
        backend
            .insert(key(&["t1", "bd|b"]), StoredObject::remote(attributes([("mtu", 9000)])))
            .await;
        backend
            .set_observed(&key(&["t1", "bd|a"]), attributes([("faults", 2)]))
            .await?;

        let config = backend.load("t1", TreeKind::Config).await?;
        assert_eq!(config.keys(), vec![key(&["t1", "bd|a"])]);
        let monitored = backend.load("t1", TreeKind::Monitored).await?;
        assert_eq!(monitored.keys(), vec![key(&["t1", "bd|b"])]);
        let operational = backend.load("t1", TreeKind::Operational).await?;
        assert_eq!(operational.keys(), vec![key(&["t1", "bd|a"])]);
        Ok(())
    }

    #[tokio::test]
    async fn test_fetch_returns_projection() -> Result<()> {
        let backend = InMemoryBackend::new("fabric");
        backend
            .insert(key(&["t1", "bd|a"]), StoredObject::local(attributes([("mtu", 1500)])))
            .await;
        backend
            .set_observed(&key(&["t1", "bd|a"]), attributes([("faults", 2)]))
            .await?;

        let resources = backend
            .fetch(TreeKind::Config, &[key(&["t1", "bd|a"]), key(&["t1", "bd|missing"])])
            .await?;
        assert_eq!(resources.len(), 1);
        assert_eq!(resources[0].attributes, attributes([("mtu", 1500)]));
        let observed = backend.fetch(TreeKind::Operational, &[key(&["t1", "bd|a"])]).await?;
        assert_eq!(observed[0].attributes, attributes([("faults", 2)]));
        assert!(backend.fetch(TreeKind::Monitored, &[key(&["t1", "bd|a"])]).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_ownership_marker_delete_releases() -> Result<()> {
        let backend = InMemoryBackend::new("fabric");
        backend
            .insert(key(&["t1", "bd|a"]), StoredObject::remote(attributes([("mtu", 1500)])))
            .await;

        let deletes = backend
            .fetch_for_delete(TreeKind::Monitored, &[key(&["t1", "bd|a"])])
            .await?;
        assert!(deletes[0].ownership_marker);

        backend
            .push(
                TreeKind::Monitored,
                ResourceBatch {
                    create: Vec::new(),
                    delete: deletes,
                },
            )
            .await?;
        let object = backend.object(&key(&["t1", "bd|a"])).await;
        assert_eq!(object.map(|o| o.owner), Some(Owner::Released));
        assert!(backend.load("t1", TreeKind::Monitored).await?.is_empty());
        assert!(backend.load("t1", TreeKind::Config).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_failing_key_is_dropped() -> Result<()> {
        let backend = InMemoryBackend::new("fabric");
        backend.fail_key(key(&["t1", "bd|a"])).await;

        let mut batch = ResourceBatch::new();
        batch.push(
            fabsync_reconciler::ActionKind::Create,
            Resource::new(key(&["t1", "bd|a"]), attributes([("mtu", 1500)])),
        );
        backend.push(TreeKind::Config, batch.clone()).await?;
        assert!(backend.object(&key(&["t1", "bd|a"])).await.is_none());

        backend.recover_key(&key(&["t1", "bd|a"])).await;
        backend.push(TreeKind::Config, batch).await?;
        assert!(backend.object(&key(&["t1", "bd|a"])).await.is_some());
        assert_eq!(backend.pushes().await, 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_owner_flip_moves_between_trees() -> Result<()> {
        let backend = InMemoryBackend::new("fabric");
        let mut config = backend.subscribe("t1", TreeKind::Config).await?;
        let mut monitored = backend.subscribe("t1", TreeKind::Monitored).await?;

        backend
            .insert(key(&["t1", "bd|a"]), StoredObject::local(attributes([("mtu", 1500)])))
            .await;
        backend.set_owner(&key(&["t1", "bd|a"]), Owner::Remote).await?;

        assert!(matches!(config.next().await, Some(TreeEvent::Upsert { .. })));
        assert!(matches!(config.next().await, Some(TreeEvent::Delete { .. })));
        assert!(matches!(monitored.next().await, Some(TreeEvent::Upsert { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_error_flag_survives_reload() -> Result<()> {
        let backend = InMemoryBackend::new("fabric");
        let web = key(&["t1", "bd|web"]);
        backend
            .insert(web.clone(), StoredObject::local(attributes([("mtu", 1500)])))
            .await;
        let mut events = backend.subscribe("t1", TreeKind::Config).await?;

        backend.mark_error(&web, true).await;

        assert_eq!(
            events.next().await,
            Some(TreeEvent::MarkError {
                key: web.clone(),
                error: true
            })
        );
        let tree = backend.load("t1", TreeKind::Config).await?;
        assert!(tree.find(&web).is_some_and(|node| node.is_error()));
        let monitored = backend.load("t1", TreeKind::Monitored).await?;
        assert!(monitored.is_empty());

        backend.mark_error(&web, false).await;
        let tree = backend.load("t1", TreeKind::Config).await?;
        assert!(tree.find(&web).is_some_and(|node| !node.is_error()));

        backend.mark_error(&web, true).await;
        backend.delete(&web).await;
        backend
            .insert(web.clone(), StoredObject::local(attributes([("mtu", 9000)])))
            .await;
        let tree = backend.load("t1", TreeKind::Config).await?;
        assert!(tree.find(&web).is_some_and(|node| !node.is_error()));
        Ok(())
    }
}
