//! Event-driven controller loop shared by the namespace and profile
//! controllers.
//!
//! Store events and a periodic resync feed a [`WorkQueue`]; up to
//! `workers` passes run at once, never two for the same key. A failed pass
//! is put back on the queue after `requeue_delay`.

use async_trait::async_trait;
use pkg_constants::controller::{
    DEFAULT_WORKERS, NAMESPACE_RESYNC_SECS, REQUEUE_DELAY_SECS,
};
use pkg_state::Registry;
use pkg_state::watch::{Replay, WatchEvent};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, watch};
use tokio::task::{Id, JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::error::ReconcileError;
use crate::queue::WorkQueue;

/// One kind of reconciliation, keyed by object identity.
#[async_trait]
pub trait Reconciler: Send + Sync + 'static {
    /// Name used in log lines.
    const NAME: &'static str;

    /// The reconcile key a store event maps to, if it concerns this controller.
    fn key_for(&self, event: &WatchEvent) -> Option<String>;

    /// Every key, for the periodic resync.
    async fn list_keys(&self) -> Result<Vec<String>, ReconcileError>;

    async fn reconcile(&self, key: &str) -> Result<(), ReconcileError>;
}

#[derive(Debug, Clone, Copy)]
pub struct ControllerSettings {
    pub resync: Duration,
    pub requeue_delay: Duration,
    pub workers: usize,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            resync: Duration::from_secs(NAMESPACE_RESYNC_SECS),
            requeue_delay: Duration::from_secs(REQUEUE_DELAY_SECS),
            workers: DEFAULT_WORKERS,
        }
    }
}

/// How a pass ended when it did not succeed.
#[derive(Debug)]
enum PassFailure {
    Failed(ReconcileError),
    /// The task panicked or was cancelled.
    Aborted(String),
}

impl PassFailure {
    fn is_conflict(&self) -> bool {
        matches!(self, PassFailure::Failed(e) if e.is_conflict())
    }
}

impl std::fmt::Display for PassFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PassFailure::Failed(e) => write!(f, "{}", e),
            PassFailure::Aborted(e) => write!(f, "pass aborted: {}", e),
        }
    }
}

pub struct Controller<R: Reconciler> {
    registry: Registry,
    reconciler: Arc<R>,
    settings: ControllerSettings,
}

impl<R: Reconciler> Controller<R> {
    pub fn new(registry: Registry, reconciler: R, settings: ControllerSettings) -> Self {
        Self {
            registry,
            reconciler: Arc::new(reconciler),
            settings,
        }
    }

    /// Start the controller loop as a background task. It runs until
    /// `shutdown` flips to `true` or its sender is dropped; in-flight passes
    /// are aborted on exit.
    pub fn start(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                "{} started (resync={}s, workers={})",
                R::NAME,
                self.settings.resync.as_secs(),
                self.settings.workers
            );
            let mut event_rx = self.registry.store().event_log.subscribe();
            let mut resync = tokio::time::interval(self.settings.resync);
            let (requeue_tx, mut requeue_rx) = mpsc::unbounded_channel::<String>();
            let mut queue = WorkQueue::new();
            let mut passes: JoinSet<Result<(), ReconcileError>> = JoinSet::new();
            let mut running: HashMap<Id, String> = HashMap::new();
            let mut last_seq = self.registry.store().event_log.current_seq().await;

            loop {
                self.dispatch(&mut queue, &mut passes, &mut running);

                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = resync.tick() => {
                        self.enqueue_all(&mut queue).await;
                    }
                    result = event_rx.recv() => {
                        match result {
                            Ok(event) => {
                                last_seq = last_seq.max(event.seq);
                                if let Some(key) = self.reconciler.key_for(&event) {
                                    queue.add(key);
                                }
                            }
                            Err(RecvError::Lagged(missed)) => {
                                last_seq = self.catch_up(last_seq, missed, &mut queue).await;
                                resync.reset();
                            }
                            Err(RecvError::Closed) => break,
                        }
                    }
                    Some(key) = requeue_rx.recv() => {
                        queue.add(key);
                    }
                    Some(joined) = passes.join_next_with_id() => {
                        let (id, outcome) = match joined {
                            Ok((id, result)) => (id, result.map_err(PassFailure::Failed)),
                            Err(e) => (e.id(), Err(PassFailure::Aborted(e.to_string()))),
                        };
                        if let Some(key) = running.remove(&id) {
                            queue.done(&key);
                            if let Err(failure) = outcome {
                                self.requeue_later(&requeue_tx, key, &failure);
                            }
                        }
                    }
                }
            }

            passes.shutdown().await;
            info!("{} stopped", R::NAME);
        })
    }

    fn dispatch(
        &self,
        queue: &mut WorkQueue,
        passes: &mut JoinSet<Result<(), ReconcileError>>,
        running: &mut HashMap<Id, String>,
    ) {
        while !queue.is_empty() && running.len() < self.settings.workers.max(1) {
            let Some(key) = queue.next() else {
                break;
            };
            let reconciler = Arc::clone(&self.reconciler);
            let pass_key = key.clone();
            let handle = passes.spawn(async move { reconciler.reconcile(&pass_key).await });
            running.insert(handle.id(), key);
        }
    }

    /// Recover from a lagged subscription: replay the missed events from the
    /// log, or relist everything if the log no longer holds them. Returns the
    /// sequence number the subscription is caught up to.
    async fn catch_up(&self, last_seq: u64, missed: u64, queue: &mut WorkQueue) -> u64 {
        let event_log = &self.registry.store().event_log;
        match event_log.replay(last_seq).await {
            Replay::Events(events) => {
                debug!("{} replaying {} events after lag", R::NAME, events.len());
                let mut seq = last_seq;
                for event in events {
                    seq = event.seq;
                    if let Some(key) = self.reconciler.key_for(&event) {
                        queue.add(key);
                    }
                }
                seq
            }
            Replay::Gap { oldest_retained } => {
                warn!(
                    "{} missed {} events (log starts at {}), resyncing",
                    R::NAME,
                    missed,
                    oldest_retained
                );
                let seq = event_log.current_seq().await;
                self.enqueue_all(queue).await;
                seq
            }
        }
    }

    fn requeue_later(&self, tx: &mpsc::UnboundedSender<String>, key: String, failure: &PassFailure) {
        let delay = self.settings.requeue_delay;
        if failure.is_conflict() {
            debug!(
                "{} pass for {} raced a concurrent write, retrying in {}ms: {}",
                R::NAME,
                key,
                delay.as_millis(),
                failure
            );
        } else {
            warn!(
                "{} pass for {} failed, retrying in {}ms: {}",
                R::NAME,
                key,
                delay.as_millis(),
                failure
            );
        }
        let tx = tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(key);
        });
    }

    async fn enqueue_all(&self, queue: &mut WorkQueue) {
        match self.reconciler.list_keys().await {
            Ok(keys) => {
                let listed = keys.len();
                for key in keys {
                    queue.add(key);
                }
                debug!(
                    "{} resync: {} keys listed, {} queued, {} running",
                    R::NAME,
                    listed,
                    queue.len(),
                    queue.active()
                );
            }
            Err(e) => warn!("{} resync failed: {}", R::NAME, e),
        }
    }
}
