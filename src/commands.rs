//! Command implementations.
//!
//! Each command returns its output as a JSON string so callers decide where
//! it goes.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use fabsync_hashtree::{TreeDiff, TreeKey};
use fabsync_reconciler::{
    InMemoryStatusReporter, LoopStopper, ReconcilerBuilder, ReconciliationLoop, StateView,
    SyncStatus,
};
use fabsync_universe::{InMemoryBackend, TreeKind, Universe};
use serde::Serialize;
use tracing::info;

use crate::config::AppConfig;
use crate::state::StateFile;

/// Kinds reconciled by `run`. Operational state is observed, never pushed.
const RECONCILED_KINDS: [TreeKind; 2] = [TreeKind::Config, TreeKind::Monitored];

/// Hash trees of one kind in a state file, as tree records by root.
///
/// # Errors
///
/// Returns an error if the state file cannot be loaded.
pub async fn tree(state: &Path, kind: TreeKind) -> Result<String> {
    let state = load(state)?;
    let trees = state.trees(kind).await?;
    Ok(fabsync_core::fs::to_json_pretty(&trees)?)
}

/// Keys to create and delete, by root, to make `observed` match `desired`.
///
/// Roots present in only one file are compared against an empty tree.
///
/// # Errors
///
/// Returns an error if either state file cannot be loaded.
pub async fn diff(desired: &Path, observed: &Path, kind: TreeKind) -> Result<String> {
    let desired = load(desired)?.trees(kind).await?;
    let observed = load(observed)?.trees(kind).await?;
    let empty = fabsync_hashtree::StructuredHashTree::new();

    let roots: BTreeSet<&String> = desired.keys().chain(observed.keys()).collect();
    let diffs: BTreeMap<&String, TreeDiff> = roots
        .into_iter()
        .map(|root| {
            let want = desired.get(root).unwrap_or(&empty);
            let have = observed.get(root).unwrap_or(&empty);
            (root, want.diff(have))
        })
        .filter(|(_, diff)| !diff.is_empty())
        .collect();
    Ok(fabsync_core::fs::to_json_pretty(&diffs)?)
}

/// Options of the `run` command.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub desired: PathBuf,
    pub observed: Option<PathBuf>,
    pub max_passes: Option<u64>,
    pub output: Option<PathBuf>,
}

/// Outcome of the `run` command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    /// Passes run, by tree kind.
    pub passes: BTreeMap<String, u64>,
    /// Whether every tree matched when the run ended.
    pub converged: bool,
    /// Latest sync status of every key touched.
    pub statuses: Vec<StatusLine>,
}

/// Sync status of one key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusLine {
    pub key: TreeKey,
    pub status: SyncStatus,
}

/// Reconciliation of one tree kind between the store and the fabric.
struct KindSync {
    kind: TreeKind,
    desired: Arc<Universe<InMemoryBackend>>,
    observed: Arc<Universe<InMemoryBackend>>,
    looper: ReconciliationLoop,
}

impl KindSync {
    async fn start(
        kind: TreeKind,
        store: &Arc<InMemoryBackend>,
        fabric: &Arc<InMemoryBackend>,
        status: &Arc<InMemoryStatusReporter>,
        config: &AppConfig,
        roots: &BTreeSet<String>,
    ) -> Result<Self> {
        let desired = Arc::new(Universe::new(store.clone(), kind));
        let observed = Arc::new(Universe::new(fabric.clone(), kind));
        let reconciler = ReconcilerBuilder::new()
            .with_desired(desired.clone())
            .with_observed(observed.clone())
            .with_status(status.clone())
            .with_config(config.reconciler.clone())
            .build()
            .context("Invalid reconciler configuration")?;
        reconciler.serve(roots).await?;
        reconciler.settle().await?;
        Ok(Self {
            kind,
            desired,
            observed,
            looper: ReconciliationLoop::new(Arc::new(reconciler), config.sync.clone()),
        })
    }

    async fn drive(&mut self, max_passes: Option<u64>) -> fabsync_reconciler::Result<u64> {
        match max_passes {
            Some(max) => Ok(self.looper.run_until_converged(max).await?.passes),
            None => self.looper.run().await,
        }
    }

    /// Whether every root has equal trees on both sides.
    async fn converged(&self, roots: &BTreeSet<String>) -> Result<bool> {
        for root in roots {
            let want = self.desired.tree(root).await?;
            let have = self.observed.tree(root).await?;
            if want.root_hash() != have.root_hash() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn shutdown(&self) {
        self.desired.shutdown().await;
        self.observed.shutdown().await;
    }
}

/// Reconcile an in-memory fabric seeded from `observed` towards `desired`.
///
/// Runs `max_passes` passes per tree kind or, without a limit, until
/// `shutdown` resolves.
///
/// # Errors
///
/// Returns an error if a state file cannot be loaded or written, or if the
/// reconciler cannot be built.
pub async fn run(
    config: &AppConfig,
    options: RunOptions,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<RunReport> {
    let desired_state = load(&options.desired)?;
    let observed_state = match &options.observed {
        Some(path) => load(path)?,
        None => StateFile::default(),
    };
    let roots: BTreeSet<String> = desired_state
        .roots()
        .union(&observed_state.roots())
        .cloned()
        .collect();

    let store = Arc::new(InMemoryBackend::new("store"));
    desired_state.seed(&store).await;
    let fabric = Arc::new(InMemoryBackend::new("fabric"));
    observed_state.seed(&fabric).await;
    let status = Arc::new(InMemoryStatusReporter::new());

    let [config_kind, monitored_kind] = RECONCILED_KINDS;
    let mut config_sync =
        KindSync::start(config_kind, &store, &fabric, &status, config, &roots).await?;
    let mut monitored_sync =
        KindSync::start(monitored_kind, &store, &fabric, &status, config, &roots).await?;
    info!(roots = roots.len(), "Reconciling");

    let stoppers: Vec<LoopStopper> = [&config_sync, &monitored_sync]
        .iter()
        .map(|s| s.looper.stopper())
        .collect();
    let watcher = tokio::spawn(async move {
        shutdown.await;
        for stopper in stoppers {
            stopper.stop();
        }
    });

    let (config_passes, monitored_passes) = tokio::try_join!(
        config_sync.drive(options.max_passes),
        monitored_sync.drive(options.max_passes),
    )?;
    watcher.abort();

    let passes = BTreeMap::from([
        (config_sync.kind.to_string(), config_passes),
        (monitored_sync.kind.to_string(), monitored_passes),
    ]);
    let mut converged = true;
    for s in [&config_sync, &monitored_sync] {
        converged &= s.converged(&roots).await?;
        s.shutdown().await;
    }

    if let Some(path) = &options.output {
        StateFile::capture(&fabric)
            .await
            .save(path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }

    let statuses = status
        .statuses()
        .await
        .into_iter()
        .map(|(key, status)| StatusLine { key, status })
        .collect();
    Ok(RunReport {
        passes,
        converged,
        statuses,
    })
}

fn load(path: &Path) -> Result<StateFile> {
    StateFile::load(path).with_context(|| format!("Failed to load state file {}", path.display()))
}
