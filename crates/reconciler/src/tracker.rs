//! Per-resource failure tracking with escalation.
//!
//! Every resource that keeps showing up in a root's difference is tracked
//! under its action. Each appearance counts as one attempt, and attempts
//! are rate limited by exponential backoff. Past the reset limit, the whole
//! root is reset once; past the purge limit after that, the resource is
//! marked failed and skipped until cleared by hand.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::clock::deadline;
use crate::types::{ActionKind, ResourceIdentity};

/// Calculate exponential backoff delay for a retry attempt.
///
/// `min(max, base * 2^attempt)`, saturating on overflow.
pub fn calculate_backoff(attempt: u32, base: Duration, max: Duration) -> Duration {
    let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
    base.saturating_mul(factor).min(max)
}

/// Next recovery step for a resource that keeps failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Escalation {
    /// Rebuild the whole root.
    Reset,
    /// Give up on the resource.
    Purge,
}

/// Whether a tracked resource is still retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackedState {
    Active,
    Failed,
}

/// What the reconciler should do with a resource this pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackOutcome {
    /// Include it in the batch.
    Attempt,
    /// Skip it; its retry deadline has not passed.
    BackedOff,
    /// The reset limit was crossed; reset the root.
    ResetRoot,
    /// The purge limit was crossed; report it failed and skip it.
    Failed,
    /// Already failed; skip it silently.
    StillFailed,
}

/// Limits and backoff shape of the tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerConfig {
    /// Attempts tolerated before the root is reset.
    pub reset_limit: u32,
    /// Attempts tolerated after a reset before giving up.
    pub purge_limit: u32,
    /// Delay after the first attempt.
    pub base_backoff: Duration,
    /// Upper bound on the delay.
    pub max_backoff: Duration,
    /// Added to the limit when a failed resource is cleared.
    pub failed_retry_margin: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self::from_max_create_retry(5)
    }
}

impl TrackerConfig {
    /// Derive the limits from a base retry count: reset at twice the count,
    /// purge at twice the reset limit.
    pub fn from_max_create_retry(max_create_retry: u32) -> Self {
        let reset_limit = max_create_retry.saturating_mul(2);
        Self {
            reset_limit,
            purge_limit: reset_limit.saturating_mul(2),
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            failed_retry_margin: 5,
        }
    }
}

/// Failure record of one (action, resource) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedAction {
    /// Attempts past the first; starts at -1 so the first appearance is 0.
    pub retries: i64,
    /// Attempts tolerated under the current escalation.
    pub limit: u32,
    pub escalation: Escalation,
    pub state: TrackedState,
    pub last_attempt: Option<DateTime<Utc>>,
    pub next_eligible: DateTime<Utc>,
}

impl TrackedAction {
    fn new(limit: u32, now: DateTime<Utc>) -> Self {
        Self {
            retries: -1,
            limit,
            escalation: Escalation::Reset,
            state: TrackedState::Active,
            last_attempt: None,
            next_eligible: now,
        }
    }

    /// Whether the resource reached the terminal state.
    pub fn is_failed(&self) -> bool {
        self.state == TrackedState::Failed
    }

    fn exceeded(&self) -> bool {
        self.retries.saturating_add(1) > i64::from(self.limit)
    }
}

type EntryKey = (ActionKind, ResourceIdentity);

/// Failure records, partitioned by tenant root.
#[derive(Debug, Default)]
pub struct ActionTracker {
    config: TrackerConfig,
    roots: HashMap<String, HashMap<EntryKey, TrackedAction>>,
}

impl ActionTracker {
    /// Create a new tracker.
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            roots: HashMap::new(),
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Record one appearance of a resource in a root's difference.
    pub fn observe(
        &mut self,
        root: &str,
        action: ActionKind,
        identity: &ResourceIdentity,
        now: DateTime<Utc>,
    ) -> TrackOutcome {
        let config = &self.config;
        let entry = self
            .roots
            .entry(root.to_string())
            .or_default()
            .entry((action, identity.clone()))
            .or_insert_with(|| TrackedAction::new(config.reset_limit, now));

        if entry.is_failed() {
            return TrackOutcome::StillFailed;
        }
        if now < entry.next_eligible {
            return TrackOutcome::BackedOff;
        }

        entry.retries = entry.retries.saturating_add(1);
        entry.last_attempt = Some(now);
        let attempt = u32::try_from(entry.retries).unwrap_or(u32::MAX);
        entry.next_eligible = deadline(
            now,
            calculate_backoff(attempt, config.base_backoff, config.max_backoff),
        );

        if !entry.exceeded() {
            debug!(
                root,
                %action,
                resource = %identity,
                retries = entry.retries,
                "Tracking attempt"
            );
            return TrackOutcome::Attempt;
        }

        match entry.escalation {
            Escalation::Reset => {
                warn!(
                    root,
                    %action,
                    resource = %identity,
                    "Retry limit reached, escalating to reset"
                );
                entry.escalation = Escalation::Purge;
                entry.limit = config.purge_limit;
                TrackOutcome::ResetRoot
            }
            Escalation::Purge => {
                warn!(
                    root,
                    %action,
                    resource = %identity,
                    "Retry limit reached after reset, giving up"
                );
                entry.state = TrackedState::Failed;
                TrackOutcome::Failed
            }
        }
    }

    /// Drop records of a root that did not appear in its latest difference.
    pub fn forget_converged(&mut self, root: &str, seen: &HashSet<EntryKey>) {
        if let Some(entries) = self.roots.get_mut(root) {
            entries.retain(|key, _| seen.contains(key));
            if entries.is_empty() {
                self.roots.remove(root);
            }
        }
    }

    /// Start the failure clock over after a root reset.
    ///
    /// Records already escalated past reset survive with fresh counters, so a
    /// root is reset at most once per persistent failure.
    pub fn reset_root(&mut self, root: &str, now: DateTime<Utc>) {
        if let Some(entries) = self.roots.get_mut(root) {
            entries.retain(|_, entry| entry.escalation == Escalation::Purge);
            for entry in entries.values_mut().filter(|entry| !entry.is_failed()) {
                entry.retries = -1;
                entry.last_attempt = None;
                entry.next_eligible = now;
            }
        }
    }

    /// Drop every record of a root.
    pub fn forget_root(&mut self, root: &str) {
        self.roots.remove(root);
    }

    /// Keep only the records of the given roots.
    pub fn retain_roots(&mut self, roots: &BTreeSet<String>) {
        self.roots.retain(|root, _| roots.contains(root));
    }

    /// Give a failed resource another round of attempts.
    ///
    /// Returns `false` when the resource is not in the failed state.
    pub fn clear(
        &mut self,
        root: &str,
        action: ActionKind,
        identity: &ResourceIdentity,
        now: DateTime<Utc>,
    ) -> bool {
        let margin = self.config.failed_retry_margin;
        let Some(entry) = self
            .roots
            .get_mut(root)
            .and_then(|entries| entries.get_mut(&(action, identity.clone())))
        else {
            return false;
        };
        if !entry.is_failed() {
            return false;
        }
        entry.state = TrackedState::Active;
        entry.limit = entry.limit.saturating_add(margin);
        entry.next_eligible = now;
        true
    }

    /// Record of a resource, if tracked.
    pub fn get(
        &self,
        root: &str,
        action: ActionKind,
        identity: &ResourceIdentity,
    ) -> Option<&TrackedAction> {
        self.roots
            .get(root)
            .and_then(|entries| entries.get(&(action, identity.clone())))
    }

    /// Number of records held for a root.
    pub fn tracked(&self, root: &str) -> usize {
        self.roots.get(root).map_or(0, HashMap::len)
    }

    /// Failed resources of a root.
    pub fn failed(&self, root: &str) -> Vec<(ActionKind, ResourceIdentity)> {
        let mut failed: Vec<_> = self
            .roots
            .get(root)
            .into_iter()
            .flatten()
            .filter(|(_, entry)| entry.is_failed())
            .map(|(key, _)| key.clone())
            .collect();
        failed.sort();
        failed
    }
}
