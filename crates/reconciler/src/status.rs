//! Sync status reporting.

use std::collections::BTreeMap;

use async_trait::async_trait;
use fabsync_hashtree::TreeKey;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::Result;
use crate::types::{StatusTransition, SyncStatus};

/// Sink for per-resource sync status changes.
#[async_trait]
pub trait StatusReporter: Send + Sync {
    /// Record a batch of transitions, in order.
    async fn report(&self, transitions: &[StatusTransition]) -> Result<()>;
}

/// Reporter that only logs transitions.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingStatusReporter;

#[async_trait]
impl StatusReporter for TracingStatusReporter {
    async fn report(&self, transitions: &[StatusTransition]) -> Result<()> {
        for transition in transitions {
            match &transition.status {
                SyncStatus::SyncFailed { action, reason } => warn!(
                    root = %transition.root,
                    key = %transition.key,
                    %action,
                    reason = %reason,
                    "Resource sync failed"
                ),
                status => info!(
                    root = %transition.root,
                    key = %transition.key,
                    status = %status,
                    "Resource sync status changed"
                ),
            }
        }
        Ok(())
    }
}

/// Reporter that keeps the latest status of every key, plus the history.
#[derive(Debug, Default)]
pub struct InMemoryStatusReporter {
    current: RwLock<BTreeMap<TreeKey, SyncStatus>>,
    history: RwLock<Vec<StatusTransition>>,
}

impl InMemoryStatusReporter {
    /// Create a new empty reporter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest status of a key.
    pub async fn status(&self, key: &TreeKey) -> Option<SyncStatus> {
        self.current.read().await.get(key).cloned()
    }

    /// Latest status of every key.
    pub async fn statuses(&self) -> BTreeMap<TreeKey, SyncStatus> {
        self.current.read().await.clone()
    }

    /// Every transition received, oldest first.
    pub async fn history(&self) -> Vec<StatusTransition> {
        self.history.read().await.clone()
    }

    /// Keys whose latest status matches.
    pub async fn keys_with(&self, predicate: impl Fn(&SyncStatus) -> bool) -> Vec<TreeKey> {
        self.current
            .read()
            .await
            .iter()
            .filter(|(_, status)| predicate(status))
            .map(|(key, _)| key.clone())
            .collect()
    }
}

#[async_trait]
impl StatusReporter for InMemoryStatusReporter {
    async fn report(&self, transitions: &[StatusTransition]) -> Result<()> {
        let mut current = self.current.write().await;
        for transition in transitions {
            current.insert(transition.key.clone(), transition.status.clone());
        }
        self.history.write().await.extend_from_slice(transitions);
        Ok(())
    }
}
