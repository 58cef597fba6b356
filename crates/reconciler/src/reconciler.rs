//! Reconciler implementation.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use fabsync_hashtree::{TreeDiff, TreeKey};
use futures::{FutureExt, StreamExt, stream};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::status::{StatusReporter, TracingStatusReporter};
use crate::tracker::{ActionTracker, TrackOutcome, TrackerConfig};
use crate::types::{
    ActionKind, PassReport, Resource, ResourceBatch, ResourceIdentity, RootOutcome,
    StatusTransition, SyncStatus,
};
use crate::view::StateView;

/// Configuration for the reconciler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// Base retry count; the reset limit is twice this, the purge limit
    /// twice the reset limit.
    pub max_create_retry: u32,
    /// Delay after the first failed attempt.
    #[serde(rename = "base_backoff_ms", with = "millis")]
    pub base_backoff: Duration,
    /// Upper bound on the retry delay.
    #[serde(rename = "max_backoff_ms", with = "millis")]
    pub max_backoff: Duration,
    /// Extra attempts granted when a failed resource is cleared.
    pub failed_retry_margin: u32,
    /// Roots processed concurrently within a pass.
    pub max_concurrent_roots: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            max_create_retry: 5,
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            failed_retry_margin: 5,
            max_concurrent_roots: 8,
        }
    }
}

impl ReconcilerConfig {
    /// Check the configuration for values the reconciler cannot work with.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] on the first invalid value.
    pub fn validate(&self) -> Result<()> {
        if self.max_create_retry == 0 {
            return Err(Error::invalid_config("max_create_retry must be at least 1"));
        }
        if self.max_concurrent_roots == 0 {
            return Err(Error::invalid_config("max_concurrent_roots must be at least 1"));
        }
        if self.base_backoff > self.max_backoff {
            return Err(Error::invalid_config(
                "base_backoff must not exceed max_backoff",
            ));
        }
        Ok(())
    }

    /// Tracker limits derived from this configuration.
    pub fn tracker_config(&self) -> TrackerConfig {
        TrackerConfig {
            base_backoff: self.base_backoff,
            max_backoff: self.max_backoff,
            failed_retry_margin: self.failed_retry_margin,
            ..TrackerConfig::from_max_create_retry(self.max_create_retry)
        }
    }
}

pub(crate) mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Resources of one root, sorted by what the tracker allows this pass.
#[derive(Debug, Default)]
struct Triage {
    batch: ResourceBatch,
    seen: HashSet<(ActionKind, ResourceIdentity)>,
    skipped: HashSet<TreeKey>,
    backed_off: usize,
    failed: Vec<(ActionKind, Resource)>,
    reset: bool,
}

/// Drives the observed view toward the desired view, one root at a time.
pub struct Reconciler {
    /// Where resources are fetched for creation.
    desired: Arc<dyn StateView>,
    /// Where resources are fetched for deletion, and where batches go.
    observed: Arc<dyn StateView>,
    status: Arc<dyn StatusReporter>,
    clock: Arc<dyn Clock>,
    config: ReconcilerConfig,
    tracker: Mutex<ActionTracker>,
    /// Keys reported pending, per root.
    pending: Mutex<HashMap<String, BTreeSet<TreeKey>>>,
}

impl Reconciler {
    /// Create a new reconciler.
    pub fn new(
        desired: Arc<dyn StateView>,
        observed: Arc<dyn StateView>,
        status: Arc<dyn StatusReporter>,
        clock: Arc<dyn Clock>,
        config: ReconcilerConfig,
    ) -> Self {
        let tracker = ActionTracker::new(config.tracker_config());
        Self {
            desired,
            observed,
            status,
            clock,
            config,
            tracker: Mutex::new(tracker),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Get the failure tracker.
    pub fn tracker(&self) -> &Mutex<ActionTracker> {
        &self.tracker
    }

    /// Make both views serve exactly the given roots.
    ///
    /// # Errors
    ///
    /// Returns the first view error.
    pub async fn serve(&self, roots: &BTreeSet<String>) -> Result<()> {
        info!(roots = roots.len(), "Serving roots");
        self.desired.serve(roots).await?;
        self.observed.serve(roots).await?;
        self.tracker.lock().await.retain_roots(roots);
        self.pending
            .lock()
            .await
            .retain(|root, _| roots.contains(root));
        Ok(())
    }

    /// Wait until both views reflect every change accepted so far.
    ///
    /// # Errors
    ///
    /// Returns the first view error.
    pub async fn settle(&self) -> Result<()> {
        self.desired.settle().await?;
        self.observed.settle().await
    }

    /// Clear a failed resource so it is retried.
    pub async fn clear_failed(
        &self,
        root: &str,
        action: ActionKind,
        identity: &ResourceIdentity,
    ) -> bool {
        let now = self.clock.now();
        self.tracker.lock().await.clear(root, action, identity, now)
    }

    /// Run one pass over every root served by both views.
    ///
    /// A failure in one root is recorded in the report and never stops the
    /// other roots.
    pub async fn reconcile(&self) -> PassReport {
        let desired_roots = self.desired.roots().await;
        let observed_roots = self.observed.roots().await;
        let roots: BTreeSet<String> = desired_roots
            .intersection(&observed_roots)
            .cloned()
            .collect();

        self.tracker.lock().await.retain_roots(&roots);
        self.pending
            .lock()
            .await
            .retain(|root, _| roots.contains(root));

        debug!(roots = roots.len(), "Starting reconciliation pass");

        let results: Vec<(String, Result<RootOutcome>)> = stream::iter(roots)
            .map(|root| async move {
                let outcome = AssertUnwindSafe(self.reconcile_root(&root))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| Err(Error::root_panicked(root.clone())));
                (root, outcome)
            })
            .buffer_unordered(self.config.max_concurrent_roots.max(1))
            .collect()
            .await;

        let mut report = PassReport::default();
        for (root, result) in results.into_iter().sorted_by(|a, b| a.0.cmp(&b.0)) {
            match result {
                Ok(outcome) => report.outcomes.push(outcome),
                Err(e) => {
                    warn!(root = %root, error = %e, "Reconciliation of root failed");
                    report.errors.push((root, e));
                }
            }
        }

        if report.converged() {
            debug!("All roots converged");
        } else {
            info!(
                diverged = report.outcomes.iter().filter(|o| o.diverged()).count(),
                errors = report.errors.len(),
                reset = report.reset_roots().len(),
                "Reconciliation pass complete"
            );
        }

        report
    }

    /// Reconcile a single root.
    async fn reconcile_root(&self, root: &str) -> Result<RootOutcome> {
        let desired = self.desired.tree(root).await?;
        let observed = self.observed.tree(root).await?;
        let delta = desired.diff(&observed);

        if delta.is_empty() {
            self.tracker.lock().await.forget_root(root);
            self.report_status(root, &delta, &Triage::default()).await?;
            return Ok(RootOutcome::converged(root));
        }

        debug!(
            root,
            add = delta.add.len(),
            remove = delta.remove.len(),
            "Root diverged"
        );

        let creates = self.desired.get_resources(&delta.add).await?;
        let deletes = self.observed.get_resources_for_delete(&delta.remove).await?;

        let now = self.clock.now();
        let triage = {
            let mut tracker = self.tracker.lock().await;
            triage(&mut tracker, root, creates, deletes, now)
        };

        if triage.reset {
            info!(root, "Resetting root after persistent divergence");
            self.report_failures(root, &triage.failed).await?;
            self.tracker.lock().await.reset_root(root, now);
            let roots = BTreeSet::from([root.to_string()]);
            self.observed.reset(&roots).await?;
            self.desired.reset(&roots).await?;
            return Ok(RootOutcome {
                root: root.to_string(),
                delta,
                failed: failed_identities(&triage.failed),
                reset: true,
                ..RootOutcome::default()
            });
        }

        let attempted = TreeDiff {
            add: without(&delta.add, &triage.skipped),
            remove: without(&delta.remove, &triage.skipped),
        };

        self.report_status(root, &attempted, &triage).await?;

        let pushed = triage.batch.len();
        if !triage.batch.is_empty() {
            debug!(
                root,
                create = triage.batch.create.len(),
                delete = triage.batch.delete.len(),
                "Pushing resources"
            );
            self.observed.push_resources(triage.batch).await?;
        }

        Ok(RootOutcome {
            root: root.to_string(),
            delta,
            attempted,
            pushed,
            backed_off: triage.backed_off,
            failed: failed_identities(&triage.failed),
            reset: false,
        })
    }

    /// Emit failed transitions for a root that is about to be reset.
    ///
    /// Other keys keep their status until the pass after the reset.
    async fn report_failures(&self, root: &str, failed: &[(ActionKind, Resource)]) -> Result<()> {
        if failed.is_empty() {
            return Ok(());
        }
        let transitions = {
            let mut pending = self.pending.lock().await;
            let tracked = pending.entry(root.to_string()).or_default();
            let transitions = failed_transitions(root, tracked, failed);
            if tracked.is_empty() {
                pending.remove(root);
            }
            transitions
        };
        self.status.report(&transitions).await
    }

    /// Emit pending, synced and failed transitions for a root.
    ///
    /// Keys leave the pending set either by converging or by failing.
    async fn report_status(&self, root: &str, attempted: &TreeDiff, triage: &Triage) -> Result<()> {
        let mut pending = self.pending.lock().await;
        let tracked = pending.entry(root.to_string()).or_default();
        let mut transitions = Vec::new();

        let diverged: HashSet<&TreeKey> = attempted
            .add
            .iter()
            .chain(&attempted.remove)
            .chain(&triage.skipped)
            .collect();
        let synced: Vec<TreeKey> = tracked
            .iter()
            .filter(|key| !diverged.contains(key))
            .cloned()
            .collect();
        for key in synced {
            tracked.remove(&key);
            transitions.push(StatusTransition::new(root, key, SyncStatus::Synced));
        }

        transitions.extend(failed_transitions(root, tracked, &triage.failed));

        for key in attempted.add.iter().chain(&attempted.remove) {
            if tracked.insert(key.clone()) {
                transitions.push(StatusTransition::new(root, key.clone(), SyncStatus::SyncPending));
            }
        }

        if pending.get(root).is_some_and(BTreeSet::is_empty) {
            pending.remove(root);
        }
        drop(pending);

        if transitions.is_empty() {
            return Ok(());
        }
        self.status.report(&transitions).await
    }
}

/// Decide, resource by resource, what to do with a root's difference.
fn triage(
    tracker: &mut ActionTracker,
    root: &str,
    creates: Vec<Resource>,
    deletes: Vec<Resource>,
    now: chrono::DateTime<chrono::Utc>,
) -> Triage {
    let mut triage = Triage::default();
    let resources = creates
        .into_iter()
        .map(|resource| (ActionKind::Create, resource))
        .chain(deletes.into_iter().map(|resource| (ActionKind::Delete, resource)));

    for (action, resource) in resources {
        let identity = resource.identity();
        if !triage.seen.insert((action, identity.clone())) {
            continue;
        }
        match tracker.observe(root, action, &identity, now) {
            TrackOutcome::Attempt => triage.batch.push(action, resource),
            TrackOutcome::BackedOff => {
                triage.backed_off += 1;
                triage.skipped.insert(resource.key);
            }
            TrackOutcome::ResetRoot => triage.reset = true,
            TrackOutcome::Failed => {
                triage.skipped.insert(resource.key.clone());
                triage.failed.push((action, resource));
            }
            TrackOutcome::StillFailed => {
                triage.skipped.insert(resource.key);
            }
        }
    }

    tracker.forget_converged(root, &triage.seen);
    triage
}

/// `sync-failed` transitions for resources that ran out of retries.
///
/// Their keys leave the pending set.
fn failed_transitions(
    root: &str,
    pending: &mut BTreeSet<TreeKey>,
    failed: &[(ActionKind, Resource)],
) -> Vec<StatusTransition> {
    failed
        .iter()
        .map(|(action, resource)| {
            pending.remove(&resource.key);
            StatusTransition::new(
                root,
                resource.key.clone(),
                SyncStatus::SyncFailed {
                    action: *action,
                    reason: "retry limit reached after root reset".to_string(),
                },
            )
        })
        .collect()
}

fn failed_identities(failed: &[(ActionKind, Resource)]) -> Vec<ResourceIdentity> {
    failed.iter().map(|(_, resource)| resource.identity()).collect()
}

fn without(keys: &[TreeKey], skipped: &HashSet<TreeKey>) -> Vec<TreeKey> {
    keys.iter()
        .filter(|key| !skipped.contains(key))
        .cloned()
        .collect()
}

/// Builder for Reconciler.
pub struct ReconcilerBuilder {
    desired: Option<Arc<dyn StateView>>,
    observed: Option<Arc<dyn StateView>>,
    status: Option<Arc<dyn StatusReporter>>,
    clock: Option<Arc<dyn Clock>>,
    config: ReconcilerConfig,
}

impl ReconcilerBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            desired: None,
            observed: None,
            status: None,
            clock: None,
            config: ReconcilerConfig::default(),
        }
    }

    /// Set the desired view.
    pub fn with_desired(mut self, view: Arc<dyn StateView>) -> Self {
        self.desired = Some(view);
        self
    }

    /// Set the observed view.
    pub fn with_observed(mut self, view: Arc<dyn StateView>) -> Self {
        self.observed = Some(view);
        self
    }

    /// Set a custom status reporter.
    pub fn with_status(mut self, status: Arc<dyn StatusReporter>) -> Self {
        self.status = Some(status);
        self
    }

    /// Set a custom clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Set the configuration.
    pub fn with_config(mut self, config: ReconcilerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the base retry count.
    pub fn max_create_retry(mut self, retries: u32) -> Self {
        self.config.max_create_retry = retries;
        self
    }

    /// Set the backoff bounds.
    pub fn backoff(mut self, base: Duration, max: Duration) -> Self {
        self.config.base_backoff = base;
        self.config.max_backoff = max;
        self
    }

    /// Build the reconciler.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if a view is missing or the
    /// configuration is invalid.
    pub fn build(self) -> Result<Reconciler> {
        let desired = self
            .desired
            .ok_or_else(|| Error::invalid_config("Desired view is required"))?;
        let observed = self
            .observed
            .ok_or_else(|| Error::invalid_config("Observed view is required"))?;
        self.config.validate()?;

        let status = self
            .status
            .unwrap_or_else(|| Arc::new(TracingStatusReporter));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        Ok(Reconciler::new(desired, observed, status, clock, self.config))
    }
}

impl Default for ReconcilerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
