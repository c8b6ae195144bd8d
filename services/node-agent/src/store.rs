//! Registry of the pods this node is currently responsible for.
//!
//! The store is the only state shared between the event-driven path and the
//! status sweep. Readers get cloned snapshots, so no lock is held while the
//! provider or orchestrator is being called.

use std::collections::HashMap;

use tokio::sync::RwLock;
use tracing::debug;
use vnode_model::{Pod, PodKey};

/// Tracked-pod store.
#[derive(Debug, Default)]
pub struct TrackedPodStore {
    pods: RwLock<HashMap<PodKey, Pod>>,
}

impl TrackedPodStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every tracked pod, ordered by namespace then name.
    pub async fn get_pods(&self) -> Vec<Pod> {
        let pods = self.pods.read().await;
        let mut snapshot: Vec<Pod> = pods.values().cloned().collect();
        snapshot.sort_by(|a, b| {
            (a.namespace(), a.name()).cmp(&(b.namespace(), b.name()))
        });
        snapshot
    }

    pub async fn get(&self, namespace: &str, name: &str) -> Option<Pod> {
        self.pods
            .read()
            .await
            .get(&PodKey::new(namespace, name))
            .cloned()
    }

    /// Track a pod, replacing whatever was stored under its name.
    ///
    /// Returns the previous record, which may belong to a different UID.
    pub async fn upsert(&self, pod: Pod) -> Option<Pod> {
        debug!(pod = %pod.key(), uid = %pod.uid(), "Tracking pod");
        self.pods.write().await.insert(pod.key(), pod)
    }

    /// Replace the stored record only if it is still the same pod.
    ///
    /// Returns false if the pod was removed (or replaced by a new UID) in the
    /// meantime; the store is left untouched in that case.
    pub async fn replace_if_tracked(&self, pod: Pod) -> bool {
        let mut pods = self.pods.write().await;
        match pods.get_mut(&pod.key()) {
            Some(current) if current.same_identity(&pod) => {
                *current = pod;
                true
            }
            _ => false,
        }
    }

    /// Stop tracking `pod`. Only removes the record if the UID matches.
    pub async fn remove(&self, pod: &Pod) -> Option<Pod> {
        let mut pods = self.pods.write().await;
        let key = pod.key();
        match pods.get(&key) {
            Some(current) if current.uid() == pod.uid() => {
                debug!(pod = %key, uid = %pod.uid(), "Untracking pod");
                pods.remove(&key)
            }
            _ => None,
        }
    }

    pub async fn len(&self) -> usize {
        self.pods.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.pods.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vnode_model::PodPhase;
    use vnode_testing::{dummy_pod, running_status};

    #[tokio::test]
    async fn test_snapshot_is_sorted_and_detached() {
        let store = TrackedPodStore::new();
        store.upsert(dummy_pod("nginx-1-b", &["bar"])).await;
        store.upsert(dummy_pod("nginx-0-a", &["bar"])).await;

        let snapshot = store.get_pods().await;
        let names: Vec<&str> = snapshot.iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["nginx-0-a", "nginx-1-b"]);

        store.remove(&snapshot[0]).await;
        assert_eq!(snapshot.len(), 2);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_replace_if_tracked_requires_same_uid() {
        let store = TrackedPodStore::new();
        let pod = dummy_pod("nginx-0-a", &["bar"]);
        store.upsert(pod.clone()).await;

        let updated = pod.with_status(running_status(&pod));
        assert!(store.replace_if_tracked(updated).await);
        assert_eq!(
            store.get("default", "nginx-0-a").await.unwrap().status.phase,
            PodPhase::Running
        );

        let recreated = dummy_pod("nginx-0-a", &["bar"]);
        assert!(!store.replace_if_tracked(recreated).await);
    }

    #[tokio::test]
    async fn test_replace_does_not_resurrect_removed_pod() {
        let store = TrackedPodStore::new();
        let pod = dummy_pod("nginx-0-a", &["bar"]);
        store.upsert(pod.clone()).await;
        store.remove(&pod).await;

        assert!(!store.replace_if_tracked(pod).await);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_remove_ignores_other_uid() {
        let store = TrackedPodStore::new();
        let pod = dummy_pod("nginx-0-a", &["bar"]);
        store.upsert(pod).await;

        let stale = dummy_pod("nginx-0-a", &["bar"]);
        assert!(store.remove(&stale).await.is_none());
        assert_eq!(store.len().await, 1);
    }
}
