//! Continuous reconciliation loop.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::reconciler::{Reconciler, millis};

/// Configuration for the reconciliation loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    /// Pause after a pass that left work behind.
    #[serde(rename = "busy_interval_ms", with = "millis")]
    pub busy_interval: Duration,
    /// Pause after a pass that found everything converged.
    #[serde(rename = "idle_interval_ms", with = "millis")]
    pub idle_interval: Duration,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            busy_interval: Duration::from_millis(100),
            idle_interval: Duration::from_secs(1),
        }
    }
}

impl LoopConfig {
    /// Check the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the idle interval is zero.
    pub fn validate(&self) -> Result<()> {
        if self.idle_interval.is_zero() {
            return Err(Error::invalid_config("idle_interval must be positive"));
        }
        Ok(())
    }
}

/// Summary of a bounded run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// Passes executed.
    pub passes: u64,
    /// Whether the last pass found every root converged.
    pub converged: bool,
}

/// Continuous reconciliation loop.
///
/// Runs passes back to back, sleeping the busy interval after a pass that
/// diverged and the idle interval after one that converged.
pub struct ReconciliationLoop {
    /// The reconciler.
    reconciler: Arc<Reconciler>,
    /// Loop configuration.
    config: LoopConfig,
    /// Stop signal receiver.
    stop_rx: watch::Receiver<bool>,
    /// Stop signal sender (for external control).
    stop_tx: watch::Sender<bool>,
}

impl ReconciliationLoop {
    /// Create a new reconciliation loop.
    pub fn new(reconciler: Arc<Reconciler>, config: LoopConfig) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        Self {
            reconciler,
            config,
            stop_rx,
            stop_tx,
        }
    }

    /// Run until stopped.
    ///
    /// Root failures never end the loop; they are logged and retried on the
    /// next pass.
    ///
    /// # Errors
    ///
    /// Returns an error only if the views cannot settle.
    pub async fn run(&mut self) -> Result<u64> {
        info!(
            busy_ms = self.config.busy_interval.as_millis(),
            idle_ms = self.config.idle_interval.as_millis(),
            "Starting reconciliation loop"
        );

        let mut passes = 0u64;
        loop {
            if *self.stop_rx.borrow() {
                info!(passes, "Reconciliation loop stopped");
                return Ok(passes);
            }
            let converged = self.pass().await?;
            passes = passes.saturating_add(1);

            match self.pause(converged).await {
                Ok(()) => {}
                Err(Error::LoopStopped) => {
                    info!(passes, "Reconciliation loop stopped");
                    return Ok(passes);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Run until every root converges or `max_passes` is reached.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LoopStopped`] if stopped before either happens.
    pub async fn run_until_converged(&mut self, max_passes: u64) -> Result<RunSummary> {
        let mut passes = 0u64;
        while passes < max_passes {
            let converged = self.pass().await?;
            passes = passes.saturating_add(1);
            if converged {
                info!(passes, "Converged");
                return Ok(RunSummary {
                    passes,
                    converged: true,
                });
            }
            self.pause(false).await?;
        }
        info!(passes, "Pass limit reached before convergence");
        Ok(RunSummary {
            passes,
            converged: false,
        })
    }

    /// Run one pass and wait for its pushes to land.
    async fn pass(&self) -> Result<bool> {
        let report = self.reconciler.reconcile().await;
        let converged = report.converged();
        if !converged {
            self.reconciler.settle().await?;
        }
        debug!(converged, "Pass finished");
        Ok(converged)
    }

    async fn pause(&mut self, converged: bool) -> Result<()> {
        let interval = if converged {
            self.config.idle_interval
        } else {
            self.config.busy_interval
        };
        tokio::select! {
            () = tokio::time::sleep(interval) => Ok(()),
            changed = self.stop_rx.changed() => {
                if changed.is_err() || *self.stop_rx.borrow() {
                    Err(Error::LoopStopped)
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Stop the loop.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Get a stopper handle.
    pub fn stopper(&self) -> LoopStopper {
        LoopStopper {
            stop_tx: self.stop_tx.clone(),
        }
    }
}

/// Handle to stop a reconciliation loop.
#[derive(Clone)]
pub struct LoopStopper {
    stop_tx: watch::Sender<bool>,
}

impl LoopStopper {
    /// Stop the loop.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }
}
