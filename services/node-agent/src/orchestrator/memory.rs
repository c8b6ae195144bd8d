//! In-process orchestrator record table.
//!
//! Behaves like the real record API where the agent can observe it:
//! compare-and-write on the resource version, NotFound on missing records,
//! and a fresh resource version on every write.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;
use vnode_model::{Pod, PodKey};

use super::{Orchestrator, OrchestratorError};

/// In-memory orchestrator.
#[derive(Default)]
pub struct InMemoryOrchestrator {
    pods: RwLock<HashMap<PodKey, Pod>>,
    version: AtomicU64,
    fail_status_writes: AtomicBool,
    fail_deletes: AtomicBool,
    status_writes: AtomicU64,
    deletions: RwLock<Vec<(PodKey, i64)>>,
}

impl InMemoryOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_version(&self) -> String {
        (self.version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    /// Store a record as the orchestrator would on assignment, returning it
    /// with its new resource version.
    pub async fn insert(&self, mut pod: Pod) -> Pod {
        pod.metadata.resource_version = self.next_version();
        let mut pods = self.pods.write().await;
        pods.insert(pod.key(), pod.clone());
        pod
    }

    pub async fn get(&self, namespace: &str, name: &str) -> Option<Pod> {
        self.pods
            .read()
            .await
            .get(&PodKey::new(namespace, name))
            .cloned()
    }

    /// Make every subsequent status write fail with a server error.
    pub fn set_fail_status_writes(&self, fail: bool) {
        self.fail_status_writes.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent delete fail with a server error. Calls are
    /// still recorded in [`Self::deletions`].
    pub fn set_fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Number of status writes accepted so far.
    pub fn status_writes(&self) -> u64 {
        self.status_writes.load(Ordering::SeqCst)
    }

    /// Every delete call received, with its grace period.
    pub async fn deletions(&self) -> Vec<(PodKey, i64)> {
        self.deletions.read().await.clone()
    }
}

#[async_trait]
impl Orchestrator for InMemoryOrchestrator {
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, OrchestratorError> {
        self.get(namespace, name)
            .await
            .ok_or_else(|| OrchestratorError::NotFound(PodKey::new(namespace, name).to_string()))
    }

    async fn update_status(&self, pod: &Pod) -> Result<Pod, OrchestratorError> {
        if self.fail_status_writes.load(Ordering::SeqCst) {
            return Err(OrchestratorError::Status {
                status: 500,
                body: "status writes disabled".to_string(),
            });
        }

        let key = pod.key();
        let mut pods = self.pods.write().await;
        let stored = pods
            .get_mut(&key)
            .ok_or_else(|| OrchestratorError::NotFound(key.to_string()))?;

        if stored.uid() != pod.uid() {
            return Err(OrchestratorError::Conflict(key.to_string()));
        }
        if !pod.metadata.resource_version.is_empty()
            && pod.metadata.resource_version != stored.metadata.resource_version
        {
            return Err(OrchestratorError::Conflict(key.to_string()));
        }

        stored.status = pod.status.clone();
        stored.metadata.resource_version = self.next_version();
        self.status_writes.fetch_add(1, Ordering::SeqCst);

        debug!(
            pod = %key,
            phase = %stored.status.phase,
            resource_version = %stored.metadata.resource_version,
            "Stored pod status"
        );
        Ok(stored.clone())
    }

    async fn delete_pod(
        &self,
        namespace: &str,
        name: &str,
        grace_period_seconds: i64,
    ) -> Result<(), OrchestratorError> {
        let key = PodKey::new(namespace, name);
        self.deletions
            .write()
            .await
            .push((key.clone(), grace_period_seconds));
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(OrchestratorError::Status {
                status: 500,
                body: "deletes disabled".to_string(),
            });
        }

        let mut pods = self.pods.write().await;
        match pods.remove(&key) {
            Some(_) => Ok(()),
            None => Err(OrchestratorError::NotFound(key.to_string())),
        }
    }

    async fn list_node_pods(&self, node_name: &str) -> Result<Vec<Pod>, OrchestratorError> {
        let pods = self.pods.read().await;
        let mut assigned: Vec<Pod> = pods
            .values()
            .filter(|p| p.spec.node_name.as_deref() == Some(node_name))
            .cloned()
            .collect();
        assigned.sort_by_key(|p| p.key());
        Ok(assigned)
    }
}
