//! Pod event dispatch.
//!
//! Orchestrator changes arrive as [`PodEvent`]s. The dispatcher keeps one
//! worker per pod so that:
//! - Events for the same pod are handled one at a time, in arrival order
//! - Events for different pods are handled concurrently
//!
//! ## Event Flow
//!
//! ```text
//! pod poller ──► mpsc ──► PodEventDispatcher ──► worker(ns/name) ──► PodEventHandler
//!                                                worker(ns/name) ──► PodEventHandler
//! ```
//!
//! A worker exits once its queue has drained; the next event for that pod
//! spawns a fresh one.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use vnode_model::{Pod, PodKey};

use crate::lifecycle::{LifecycleError, PodLifecycleController};
use crate::orchestrator::Orchestrator;
use crate::store::TrackedPodStore;

/// A change to a pod assigned to this node.
#[derive(Debug, Clone, PartialEq)]
pub enum PodEvent {
    Added(Pod),
    Modified(Pod),
    Deleted(Pod),
}

impl PodEvent {
    pub fn pod(&self) -> &Pod {
        match self {
            PodEvent::Added(pod) | PodEvent::Modified(pod) | PodEvent::Deleted(pod) => pod,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            PodEvent::Added(_) => "added",
            PodEvent::Modified(_) => "modified",
            PodEvent::Deleted(_) => "deleted",
        }
    }
}

/// Applies pod events to the provider, the orchestrator and the store.
///
/// Callers must not handle two events for the same pod concurrently;
/// [`PodEventDispatcher`] takes care of that.
pub struct PodEventHandler {
    controller: Arc<PodLifecycleController>,
}

impl PodEventHandler {
    pub fn new(controller: Arc<PodLifecycleController>) -> Self {
        Self { controller }
    }

    pub fn controller(&self) -> &Arc<PodLifecycleController> {
        &self.controller
    }

    pub async fn handle(
        &self,
        cancel: &CancellationToken,
        event: PodEvent,
    ) -> Result<(), LifecycleError> {
        debug!(pod = %event.pod().key(), kind = event.kind(), "Handling pod event");

        match event {
            PodEvent::Added(pod) | PodEvent::Modified(pod) if !pod.is_being_deleted() => {
                self.sync_pod(cancel, pod).await
            }
            PodEvent::Added(pod) | PodEvent::Modified(pod) | PodEvent::Deleted(pod) => {
                self.remove_pod(cancel, &pod).await
            }
        }
    }

    /// Make sure `pod` is tracked and running at the provider.
    async fn sync_pod(&self, cancel: &CancellationToken, pod: Pod) -> Result<(), LifecycleError> {
        let store = self.controller.store();

        match store.get(pod.namespace(), pod.name()).await {
            Some(tracked) if tracked.uid() == pod.uid() => {
                // The listed copy can predate a status write made since the
                // list was taken, so refresh from the current record instead.
                return match self.controller.refresh_pod(cancel, &tracked).await {
                    Ok(_) => Ok(()),
                    Err(e) if e.is_not_found() => {
                        debug!(pod = %pod.key(), "Record vanished, waiting for its deletion");
                        Ok(())
                    }
                    Err(e) => Err(e),
                };
            }
            Some(stale) => {
                info!(
                    pod = %pod.key(),
                    old_uid = %stale.uid(),
                    new_uid = %pod.uid(),
                    "Pod was recreated, replacing previous incarnation"
                );
                if let Err(e) = self.controller.release_pod(cancel, &stale).await {
                    warn!(pod = %stale.key(), error = %e, "Failed to release previous incarnation");
                    if e.is_cancelled() {
                        return Err(e);
                    }
                }
                store.remove(&stale).await;
            }
            None => {}
        }

        store.upsert(pod.clone()).await;
        self.controller.create_pod(cancel, &pod).await
    }

    /// Delete `pod` and stop tracking it once the provider no longer has it.
    async fn remove_pod(&self, cancel: &CancellationToken, pod: &Pod) -> Result<(), LifecycleError> {
        let result = self.controller.delete_pod(cancel, pod).await;

        // Anything past the provider step means the provider let go of it.
        let provider_done = match &result {
            Ok(()) | Err(LifecycleError::Orchestrator(_)) => true,
            Err(LifecycleError::Provider(e)) => e.is_not_found(),
            Err(_) => false,
        };
        if provider_done {
            self.controller.store().remove(pod).await;
        }

        match result {
            Err(LifecycleError::Provider(e)) if e.is_not_found() => {
                debug!(pod = %pod.key(), "Pod was already gone from provider");
                Ok(())
            }
            other => other,
        }
    }
}

struct Worker {
    tx: mpsc::UnboundedSender<PodEvent>,
    pending: usize,
}

/// Fans pod events out to per-pod workers.
pub struct PodEventDispatcher {
    handler: Arc<PodEventHandler>,
}

impl PodEventDispatcher {
    pub fn new(handler: Arc<PodEventHandler>) -> Self {
        Self { handler }
    }

    /// Dispatch events until the channel closes or `cancel` fires.
    pub async fn run(self, mut events: mpsc::Receiver<PodEvent>, cancel: CancellationToken) {
        info!("Starting pod event dispatcher");

        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<PodKey>();
        let mut workers: HashMap<PodKey, Worker> = HashMap::new();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Pod event dispatcher shutting down");
                    break;
                }
                Some(key) = done_rx.recv() => {
                    if let Some(worker) = workers.get_mut(&key) {
                        worker.pending = worker.pending.saturating_sub(1);
                        if worker.pending == 0 {
                            // Dropping the sender lets the idle worker exit.
                            workers.remove(&key);
                        }
                    }
                }
                event = events.recv() => {
                    let Some(event) = event else {
                        info!("Pod event channel closed");
                        break;
                    };

                    let key = event.pod().key();
                    let worker = workers.entry(key.clone()).or_insert_with(|| Worker {
                        tx: self.spawn_worker(key.clone(), done_tx.clone(), cancel.clone()),
                        pending: 0,
                    });
                    worker.pending += 1;
                    if worker.tx.send(event).is_err() {
                        warn!(pod = %key, "Pod worker exited unexpectedly, dropping event");
                        workers.remove(&key);
                    }
                }
            }
        }
    }

    fn spawn_worker(
        &self,
        key: PodKey,
        done: mpsc::UnboundedSender<PodKey>,
        cancel: CancellationToken,
    ) -> mpsc::UnboundedSender<PodEvent> {
        let (tx, mut rx) = mpsc::unbounded_channel::<PodEvent>();
        let handler = Arc::clone(&self.handler);

        debug!(pod = %key, "Spawning pod worker");
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let kind = event.kind();
                if let Err(e) = handler.handle(&cancel, event).await {
                    error!(pod = %key, kind, error = %e, "Failed to handle pod event");
                }
                // The dispatcher may already be gone; keep draining regardless.
                let _ = done.send(key.clone());
            }
            debug!(pod = %key, "Pod worker exiting");
        });

        tx
    }
}

/// Events that bring `tracked` in line with the orchestrator's `listed` pods.
pub fn diff_pods(listed: &[Pod], tracked: &[Pod]) -> Vec<PodEvent> {
    let tracked_by_key: HashMap<PodKey, &Pod> = tracked.iter().map(|p| (p.key(), p)).collect();
    let mut events = Vec::new();

    for pod in listed {
        match tracked_by_key.get(&pod.key()) {
            None => events.push(PodEvent::Added(pod.clone())),
            Some(current) if current.uid() != pod.uid() => {
                events.push(PodEvent::Added(pod.clone()))
            }
            Some(current)
                if pod.is_being_deleted()
                    || current.metadata.resource_version != pod.metadata.resource_version =>
            {
                events.push(PodEvent::Modified(pod.clone()))
            }
            Some(_) => {}
        }
    }

    // A recreated pod is replaced through its Added event, not deleted here.
    let listed_keys: HashSet<PodKey> = listed.iter().map(Pod::key).collect();
    for pod in tracked {
        if !listed_keys.contains(&pod.key()) {
            events.push(PodEvent::Deleted(pod.clone()));
        }
    }

    events
}

/// Pod poller configuration.
#[derive(Debug, Clone)]
pub struct PollConfig {
    pub node_name: String,
    pub interval: Duration,
}

/// Poll the orchestrator for pods assigned to this node and emit the
/// differences against the store as events.
pub async fn poll_assigned_pods(
    orchestrator: Arc<dyn Orchestrator>,
    store: Arc<TrackedPodStore>,
    config: PollConfig,
    events: mpsc::Sender<PodEvent>,
    cancel: CancellationToken,
) {
    info!(
        node_name = %config.node_name,
        interval_ms = config.interval.as_millis() as u64,
        "Starting pod poller"
    );

    let mut interval = tokio::time::interval(config.interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Pod poller shutting down");
                return;
            }
            _ = interval.tick() => {}
        }

        let listed = match orchestrator.list_node_pods(&config.node_name).await {
            Ok(pods) => pods,
            Err(e) => {
                warn!(error = %e, "Failed to list assigned pods");
                continue;
            }
        };

        let changes = diff_pods(&listed, &store.get_pods().await);
        if !changes.is_empty() {
            debug!(count = changes.len(), "Pod changes detected");
        }

        for event in changes {
            if events.send(event).await.is_err() {
                info!("Pod event channel closed, stopping poller");
                return;
            }
        }
    }
}
