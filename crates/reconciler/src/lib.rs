//! Hash-tree driven reconciliation between a desired and an observed view.
//!
//! Each pass compares, root by root, the tree of the desired view with the
//! tree of the observed view:
//!
//! - **Diff**: keys to create and keys to delete
//! - **Materialize**: keys become resources on the side that has them
//! - **Track**: every resource is rate limited and escalated when it keeps
//!   failing to converge
//! - **Push**: the remaining creates and deletes go to the observed view
//!
//! # Escalation
//!
//! A resource still diverged after the reset limit makes the reconciler
//! reset its root once. If it is still diverged after the purge limit that
//! follows, it is reported `sync-failed` and skipped until cleared.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use fabsync_reconciler::{LoopConfig, ReconcilerBuilder, ReconciliationLoop};
//!
//! #[tokio::main]
//! async fn main() -> fabsync_reconciler::Result<()> {
//!     let reconciler = Arc::new(
//!         ReconcilerBuilder::new()
//!             .with_desired(desired_view)
//!             .with_observed(observed_view)
//!             .max_create_retry(5)
//!             .build()?,
//!     );
//!     reconciler.serve(&roots).await?;
//!
//!     let mut loop_runner = ReconciliationLoop::new(reconciler, LoopConfig::default());
//!     loop_runner.run().await?;
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod clock;
pub mod error;
pub mod r#loop;
pub mod reconciler;
pub mod status;
pub mod tracker;
pub mod types;
pub mod view;

// Re-export main types
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Error, Result};
pub use r#loop::{LoopConfig, LoopStopper, ReconciliationLoop, RunSummary};
pub use reconciler::{Reconciler, ReconcilerBuilder, ReconcilerConfig};
pub use status::{InMemoryStatusReporter, StatusReporter, TracingStatusReporter};
pub use tracker::{
    ActionTracker, Escalation, TrackOutcome, TrackedAction, TrackedState, TrackerConfig,
    calculate_backoff,
};
pub use types::{
    ActionKind, OWNERSHIP_MARKER_KIND, PassReport, Resource, ResourceBatch, ResourceIdentity,
    RootOutcome, StatusTransition, SyncStatus,
};
pub use view::StateView;
