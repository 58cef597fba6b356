//! One observation worker per tenant root.
//!
//! Each worker owns the tree of its root. It subscribes to the backend,
//! hydrates the tree from a full load, then applies events in arrival order.
//! Every change is published as a fresh snapshot through a `watch` channel,
//! so readers always get a complete tree and never wait on the worker.
//!
//! A worker whose hydration fails keeps retrying with exponential backoff
//! until it succeeds, and re-hydrates when its subscription ends.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use fabsync_hashtree::StructuredHashTree;
use fabsync_reconciler::calculate_backoff;
use futures::{FutureExt, StreamExt, stream};
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

use crate::backend::{Backend, EventStream, TreeEvent};
use crate::error::{Error, Result};
use crate::kind::TreeKind;

/// Latest snapshot of a root; `None` until the first hydration succeeds.
type Snapshot = Option<Arc<StructuredHashTree>>;

/// Delay before the first hydration retry, doubled per failed attempt.
pub const HYDRATE_BASE_BACKOFF: Duration = Duration::from_millis(100);

/// Upper bound of the hydration retry delay.
pub const HYDRATE_MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Next hydration attempt of a worker that has no live subscription.
struct Retry {
    attempt: u32,
    at: Instant,
}

impl Retry {
    fn now() -> Self {
        Self {
            attempt: 0,
            at: Instant::now(),
        }
    }
}

enum Command {
    /// Rebuild the tree from a fresh load.
    Reset(oneshot::Sender<Result<()>>),
    /// Apply every event already queued, then reply.
    Settle(oneshot::Sender<()>),
}

struct WorkerHandle {
    snapshot: watch::Receiver<Snapshot>,
    commands: mpsc::UnboundedSender<Command>,
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    /// Signal the worker and wait for it to exit.
    async fn stop(self, root: &str) {
        let _ = self.stop_tx.send(());
        if let Err(e) = self.task.await {
            warn!(root, error = %e, "Observation worker did not exit cleanly");
        }
    }
}

/// Observation workers of one tree kind, keyed by root.
pub struct TenantPool<B: Backend> {
    kind: TreeKind,
    backend: Arc<B>,
    workers: Mutex<BTreeMap<String, WorkerHandle>>,
}

impl<B: Backend> TenantPool<B> {
    /// Create a pool serving no roots.
    pub fn new(backend: Arc<B>, kind: TreeKind) -> Self {
        Self {
            kind,
            backend,
            workers: Mutex::new(BTreeMap::new()),
        }
    }

    /// Get the tree kind.
    pub fn kind(&self) -> TreeKind {
        self.kind
    }

    /// Serve exactly `roots`: start workers for new roots, stop the rest.
    pub async fn serve(&self, roots: &BTreeSet<String>) {
        let mut workers = self.workers.lock().await;

        let removed: Vec<String> = workers
            .keys()
            .filter(|root| !roots.contains(*root))
            .cloned()
            .collect();
        for root in removed {
            if let Some(handle) = workers.remove(&root) {
                info!(root = %root, kind = %self.kind, "Stopping observation worker");
                handle.stop(&root).await;
            }
        }

        for root in roots {
            if !workers.contains_key(root) {
                info!(root = %root, kind = %self.kind, "Starting observation worker");
                workers.insert(root.clone(), self.spawn(root.clone()));
            }
        }
    }

    fn spawn(&self, root: String) -> WorkerHandle {
        let (publish, snapshot) = watch::channel(None);
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = oneshot::channel();
        let worker = Worker {
            root,
            kind: self.kind,
            backend: self.backend.clone(),
            tree: StructuredHashTree::new(),
            publish,
        };
        let task = tokio::spawn(worker.run(command_rx, stop_rx));
        WorkerHandle {
            snapshot,
            commands,
            stop_tx,
            task,
        }
    }

    /// Discard and rebuild the trees of the given roots.
    ///
    /// Roots that are not served are ignored.
    ///
    /// # Errors
    ///
    /// Returns the first backend error hit while reloading.
    pub async fn reset(&self, roots: &BTreeSet<String>) -> Result<()> {
        let pending: Vec<(String, oneshot::Receiver<Result<()>>)> = {
            let workers = self.workers.lock().await;
            roots
                .iter()
                .filter_map(|root| {
                    let handle = workers.get(root)?;
                    let (tx, rx) = oneshot::channel();
                    handle.commands.send(Command::Reset(tx)).ok()?;
                    Some((root.clone(), rx))
                })
                .collect()
        };
        for (root, rx) in pending {
            info!(root = %root, kind = %self.kind, "Resetting root");
            rx.await.map_err(|_| Error::worker_stopped(&root))??;
        }
        Ok(())
    }

    /// Latest snapshot of a root, if served and hydrated.
    pub async fn snapshot(&self, root: &str) -> Option<Arc<StructuredHashTree>> {
        let workers = self.workers.lock().await;
        let snapshot = workers.get(root)?.snapshot.borrow().clone();
        snapshot
    }

    /// Served roots that have a snapshot.
    pub async fn roots(&self) -> BTreeSet<String> {
        self.workers
            .lock()
            .await
            .iter()
            .filter(|(_, handle)| handle.snapshot.borrow().is_some())
            .map(|(root, _)| root.clone())
            .collect()
    }

    /// Served roots, hydrated or not.
    pub async fn served(&self) -> BTreeSet<String> {
        self.workers.lock().await.keys().cloned().collect()
    }

    /// Wait until every worker has applied the events queued so far.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WorkerStopped`] if a worker exited.
    pub async fn settle(&self) -> Result<()> {
        let pending: Vec<(String, oneshot::Receiver<()>)> = {
            let workers = self.workers.lock().await;
            workers
                .iter()
                .map(|(root, handle)| {
                    let (tx, rx) = oneshot::channel();
                    let _ = handle.commands.send(Command::Settle(tx));
                    (root.clone(), rx)
                })
                .collect()
        };
        for (root, rx) in pending {
            rx.await.map_err(|_| Error::worker_stopped(root))?;
        }
        Ok(())
    }

    /// Stop every worker.
    pub async fn shutdown(&self) {
        self.serve(&BTreeSet::new()).await;
    }
}

struct Worker<B: Backend> {
    root: String,
    kind: TreeKind,
    backend: Arc<B>,
    tree: StructuredHashTree,
    publish: watch::Sender<Snapshot>,
}

impl<B: Backend> Worker<B> {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut stop_rx: oneshot::Receiver<()>,
    ) {
        let mut events: EventStream = stream::pending().boxed();
        let mut retry = self.try_hydrate(&mut events, 0).await;

        loop {
            let retry_at = retry.as_ref().map_or_else(Instant::now, |r| r.at);
            tokio::select! {
                biased;
                _ = &mut stop_rx => break,
                command = commands.recv() => match command {
                    None => break,
                    Some(Command::Settle(reply)) => {
                        self.drain(&mut events);
                        let _ = reply.send(());
                    }
                    Some(Command::Reset(reply)) => {
                        let result = self.hydrate().await.map(|fresh| {
                            events = fresh;
                            retry = None;
                        });
                        let _ = reply.send(result);
                    }
                },
                () = time::sleep_until(retry_at), if retry.is_some() => {
                    let attempt = retry.as_ref().map_or(0, |r| r.attempt);
                    retry = self.try_hydrate(&mut events, attempt).await;
                }
                event = events.next() => match event {
                    Some(event) => self.apply(event),
                    None => {
                        warn!(root = %self.root, kind = %self.kind, "Subscription ended");
                        events = stream::pending().boxed();
                        retry = Some(Retry::now());
                    }
                },
            }
        }
        debug!(root = %self.root, kind = %self.kind, "Observation worker exited");
    }

    /// Hydrate into `events`, or schedule the next attempt after a backoff.
    async fn try_hydrate(&mut self, events: &mut EventStream, attempt: u32) -> Option<Retry> {
        match self.hydrate().await {
            Ok(fresh) => {
                *events = fresh;
                None
            }
            Err(e) => {
                let delay = calculate_backoff(attempt, HYDRATE_BASE_BACKOFF, HYDRATE_MAX_BACKOFF);
                warn!(
                    root = %self.root,
                    kind = %self.kind,
                    attempt,
                    retry_in = ?delay,
                    error = %e,
                    "Hydration failed"
                );
                let now = Instant::now();
                Some(Retry {
                    attempt: attempt.saturating_add(1),
                    at: now.checked_add(delay).unwrap_or(now),
                })
            }
        }
    }

    /// Subscribe first, then load, so no change between the two is lost.
    async fn hydrate(&mut self) -> Result<EventStream> {
        let events = self.backend.subscribe(&self.root, self.kind).await?;
        self.tree = self.backend.load(&self.root, self.kind).await?;
        debug!(root = %self.root, kind = %self.kind, nodes = self.tree.len(), "Hydrated");
        self.publish();
        Ok(events)
    }

    fn drain(&mut self, events: &mut EventStream) {
        while let Some(Some(event)) = events.next().now_or_never() {
            self.apply(event);
        }
    }

    fn apply(&mut self, event: TreeEvent) {
        let applied = match event {
            TreeEvent::Upsert {
                key,
                attributes,
                metadata,
            } => self
                .tree
                .add_with_metadata(key, attributes, metadata)
                .map(|_| ()),
            TreeEvent::Delete { key } => {
                if self.tree.find(&key).is_some_and(|node| !node.is_leaf()) {
                    self.tree.clear(&key);
                } else {
                    self.tree.pop(&key);
                }
                Ok(())
            }
            TreeEvent::MarkError { key, error } => self.tree.set_error(&key, error).map(|_| ()),
        };
        match applied {
            Ok(()) => self.publish(),
            Err(e) => warn!(root = %self.root, kind = %self.kind, error = %e, "Dropping event"),
        }
    }

    fn publish(&self) {
        self.publish.send_replace(Some(Arc::new(self.tree.clone())));
    }
}
