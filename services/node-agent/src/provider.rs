//! Provider interface and mock implementation.
//!
//! The provider is whatever actually runs workloads for this node. The agent
//! only needs four things from it:
//! - Create and delete pods
//! - Report the live status of a pod
//! - Report a stats summary for the node
//!
//! A mock implementation is provided for testing and development.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};
use vnode_model::{
    ContainerState, ContainerStateRunning, ContainerStats, ContainerStatus, CpuStats, MemoryStats,
    NodeStats, Pod, PodKey, PodPhase, PodReference, PodStats, PodStatus, Summary,
};

/// Errors reported by a provider.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The provider does not know about the pod.
    #[error("pod {0} not found in provider")]
    NotFound(String),

    /// Any other backend failure.
    #[error("{0}")]
    Backend(String),
}

impl ProviderError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ProviderError::NotFound(_))
    }
}

/// Execution backend for pods assigned to this node.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Start running a pod.
    async fn create_pod(&self, pod: &Pod) -> Result<(), ProviderError>;

    /// Stop and forget a pod. Fails with [`ProviderError::NotFound`] if the
    /// provider has no such pod.
    async fn delete_pod(&self, pod: &Pod) -> Result<(), ProviderError>;

    /// Live status of a pod, or `None` if the provider does not know it.
    async fn get_pod_status(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PodStatus>, ProviderError>;

    /// Stats for the node and every pod the provider currently tracks.
    async fn get_stats_summary(&self) -> Result<Summary, ProviderError>;
}

#[derive(Debug, Clone)]
struct MockPod {
    pod: Pod,
    started_at: DateTime<Utc>,
}

/// Mock provider for testing and development.
///
/// Pods are "running" from the moment they are created, with every declared
/// container running.
pub struct MockProvider {
    node_name: String,
    started_at: DateTime<Utc>,
    pods: RwLock<BTreeMap<PodKey, MockPod>>,

    /// Whether creates should fail.
    fail_creates: AtomicBool,
}

impl MockProvider {
    /// Create a new mock provider for `node_name`.
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
            started_at: Utc::now(),
            pods: RwLock::new(BTreeMap::new()),
            fail_creates: AtomicBool::new(false),
        }
    }

    /// Create a mock provider that fails all creates.
    pub fn failing(node_name: impl Into<String>) -> Self {
        let provider = Self::new(node_name);
        provider.fail_creates.store(true, Ordering::SeqCst);
        provider
    }

    pub fn set_fail_creates(&self, fail: bool) {
        self.fail_creates.store(fail, Ordering::SeqCst);
    }

    /// Drop a pod without going through `delete_pod`, as if the backend lost
    /// it. Returns true if the pod was tracked.
    pub async fn forget(&self, namespace: &str, name: &str) -> bool {
        let mut pods = self.pods.write().await;
        pods.remove(&PodKey::new(namespace, name)).is_some()
    }

    pub async fn pod_count(&self) -> usize {
        self.pods.read().await.len()
    }

    pub async fn has_pod(&self, namespace: &str, name: &str) -> bool {
        self.pods
            .read()
            .await
            .contains_key(&PodKey::new(namespace, name))
    }

    fn container_id(pod: &Pod, container: &str) -> String {
        format!("mock://{}/{}/{}", pod.namespace(), pod.name(), container)
    }

    fn status_of(entry: &MockPod) -> PodStatus {
        let pod = &entry.pod;
        PodStatus {
            phase: PodPhase::Running,
            reason: None,
            message: None,
            pod_ip: Some("127.0.0.1".to_string()),
            start_time: Some(entry.started_at),
            container_statuses: pod
                .spec
                .containers
                .iter()
                .map(|c| ContainerStatus {
                    name: c.name.clone(),
                    state: ContainerState::Running(ContainerStateRunning {
                        started_at: Some(entry.started_at),
                    }),
                    ready: true,
                    restart_count: 0,
                    image: c.image.clone(),
                    container_id: Some(Self::container_id(pod, &c.name)),
                })
                .collect(),
        }
    }

    fn stats_of(entry: &MockPod, now: DateTime<Utc>) -> PodStats {
        let cpu = || CpuStats {
            time: now,
            usage_nano_cores: Some(0),
            usage_core_nano_seconds: Some(0),
        };
        let memory = || MemoryStats {
            time: now,
            usage_bytes: Some(0),
            working_set_bytes: Some(0),
        };

        PodStats {
            pod_ref: PodReference::from(&entry.pod),
            start_time: Some(entry.started_at),
            containers: entry
                .pod
                .spec
                .containers
                .iter()
                .map(|c| ContainerStats {
                    name: c.name.clone(),
                    start_time: Some(entry.started_at),
                    cpu: Some(cpu()),
                    memory: Some(memory()),
                })
                .collect(),
            cpu: Some(cpu()),
            memory: Some(memory()),
        }
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn create_pod(&self, pod: &Pod) -> Result<(), ProviderError> {
        if self.fail_creates.load(Ordering::SeqCst) {
            return Err(ProviderError::Backend(
                "Mock provider configured to fail".to_string(),
            ));
        }

        info!(
            namespace = %pod.namespace(),
            pod = %pod.name(),
            containers = pod.spec.containers.len(),
            "[MOCK] Creating pod"
        );

        let mut pods = self.pods.write().await;
        pods.insert(
            pod.key(),
            MockPod {
                pod: pod.clone(),
                started_at: Utc::now(),
            },
        );

        Ok(())
    }

    async fn delete_pod(&self, pod: &Pod) -> Result<(), ProviderError> {
        let mut pods = self.pods.write().await;
        match pods.remove(&pod.key()) {
            Some(_) => {
                info!(namespace = %pod.namespace(), pod = %pod.name(), "[MOCK] Deleted pod");
                Ok(())
            }
            None => Err(ProviderError::NotFound(pod.key().to_string())),
        }
    }

    async fn get_pod_status(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PodStatus>, ProviderError> {
        let pods = self.pods.read().await;
        let status = pods.get(&PodKey::new(namespace, name)).map(Self::status_of);
        debug!(
            namespace = %namespace,
            pod = %name,
            found = status.is_some(),
            "[MOCK] Pod status"
        );
        Ok(status)
    }

    async fn get_stats_summary(&self) -> Result<Summary, ProviderError> {
        let now = Utc::now();
        let pods = self.pods.read().await;

        Ok(Summary {
            node: NodeStats {
                node_name: self.node_name.clone(),
                start_time: Some(self.started_at),
                cpu: None,
                memory: None,
            },
            pods: pods.values().map(|entry| Self::stats_of(entry, now)).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vnode_testing::{dummy_pod, TEST_NODE_NAME};

    #[tokio::test]
    async fn test_mock_provider_create_and_status() {
        let provider = MockProvider::new(TEST_NODE_NAME);
        let pod = dummy_pod("nginx-0-a", &["bar", "baz"]);

        provider.create_pod(&pod).await.unwrap();

        let status = provider
            .get_pod_status(pod.namespace(), pod.name())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(status.phase, PodPhase::Running);
        assert_eq!(status.container_statuses.len(), 2);
        assert!(status.container_statuses.iter().all(|c| c.ready));
    }

    #[tokio::test]
    async fn test_mock_provider_unknown_pod_has_no_status() {
        let provider = MockProvider::new(TEST_NODE_NAME);

        let status = provider.get_pod_status("default", "ghost").await.unwrap();
        assert!(status.is_none());
    }

    #[tokio::test]
    async fn test_mock_provider_double_delete_is_not_found() {
        let provider = MockProvider::new(TEST_NODE_NAME);
        let pod = dummy_pod("nginx-0-a", &["bar"]);

        provider.create_pod(&pod).await.unwrap();
        provider.delete_pod(&pod).await.unwrap();

        let err = provider.delete_pod(&pod).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_mock_provider_failing() {
        let provider = MockProvider::failing(TEST_NODE_NAME);
        let pod = dummy_pod("nginx-0-a", &["bar"]);

        let err = provider.create_pod(&pod).await.unwrap_err();
        assert!(!err.is_not_found());
        assert_eq!(provider.pod_count().await, 0);
    }

    #[tokio::test]
    async fn test_mock_provider_summary_tracks_live_pods() {
        let provider = MockProvider::new(TEST_NODE_NAME);
        let first = dummy_pod("nginx-0-a", &["bar", "baz"]);
        let second = dummy_pod("nginx-1-b", &["bar"]);

        provider.create_pod(&first).await.unwrap();
        provider.create_pod(&second).await.unwrap();
        provider.delete_pod(&second).await.unwrap();

        let summary = provider.get_stats_summary().await.unwrap();
        assert_eq!(summary.node.node_name, TEST_NODE_NAME);
        assert_eq!(summary.pods.len(), 1);
        assert_eq!(summary.pods[0].pod_ref, PodReference::from(&first));
        assert_eq!(summary.pods[0].containers.len(), 2);
        summary.check(TEST_NODE_NAME).unwrap();
    }
}
