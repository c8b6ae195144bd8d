//! Pod records as seen by the node agent.
//!
//! A [`Pod`] is the orchestrator's record of a workload assigned to this node.
//! The agent only ever rewrites the `status` half of it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Status sentinels
// =============================================================================

/// Status reason recorded when the provider rejected a pod at creation.
pub const REASON_PROVIDER_FAILED: &str = "ProviderFailed";

/// Status reason recorded when the provider no longer knows about a pod.
pub const REASON_NOT_FOUND: &str = "NotFound";

/// Exit code given to containers the provider lost track of.
///
/// Never produced by a real process exit; always paired with
/// [`REASON_NOT_FOUND`].
pub const EXIT_CODE_NOT_FOUND: i32 = -137;

// =============================================================================
// Identity
// =============================================================================

/// Namespaced name of a pod.
///
/// Two records with the same key but different UIDs are different pods.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PodKey {
    pub namespace: String,
    pub name: String,
}

impl PodKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for PodKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

// =============================================================================
// Pod
// =============================================================================

/// A pod record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pod {
    pub metadata: ObjectMeta,
    pub spec: PodSpec,
    #[serde(default)]
    pub status: PodStatus,
}

impl Pod {
    pub fn namespace(&self) -> &str {
        &self.metadata.namespace
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn uid(&self) -> &str {
        &self.metadata.uid
    }

    pub fn key(&self) -> PodKey {
        PodKey::new(&self.metadata.namespace, &self.metadata.name)
    }

    /// Returns true if `other` is the same pod (same key and UID).
    pub fn same_identity(&self, other: &Pod) -> bool {
        self.metadata.namespace == other.metadata.namespace
            && self.metadata.name == other.metadata.name
            && self.metadata.uid == other.metadata.uid
    }

    /// Returns true once the orchestrator has asked for this pod to go away.
    pub fn is_being_deleted(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Returns a copy of this pod carrying `status` instead of its own.
    pub fn with_status(&self, status: PodStatus) -> Pod {
        Pod {
            metadata: self.metadata.clone(),
            spec: self.spec.clone(),
            status,
        }
    }
}

/// Object metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub namespace: String,
    pub name: String,
    pub uid: String,

    /// Optimistic-concurrency token. Empty means "write unconditionally".
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource_version: String,

    pub creation_timestamp: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,
}

/// Desired state of a pod.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,

    #[serde(default)]
    pub restart_policy: RestartPolicy,

    #[serde(default)]
    pub containers: Vec<Container>,
}

/// Pod restart policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestartPolicy {
    #[default]
    Always,
    OnFailure,
    Never,
}

impl std::fmt::Display for RestartPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RestartPolicy::Always => write!(f, "Always"),
            RestartPolicy::OnFailure => write!(f, "OnFailure"),
            RestartPolicy::Never => write!(f, "Never"),
        }
    }
}

/// A declared container.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    pub name: String,

    #[serde(default)]
    pub image: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
}

/// Environment variable for a container.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvVar {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_from: Option<EnvVarSource>,
}

impl EnvVar {
    pub fn literal(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
            value_from: None,
        }
    }

    pub fn from_field(name: impl Into<String>, field_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
            value_from: Some(EnvVarSource {
                field_ref: Some(ObjectFieldSelector {
                    field_path: field_path.into(),
                }),
            }),
        }
    }
}

/// Source for an environment variable's value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvVarSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_ref: Option<ObjectFieldSelector>,
}

/// Selects a field of the owning pod.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectFieldSelector {
    pub field_path: String,
}

// =============================================================================
// Status
// =============================================================================

/// Pod lifecycle phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PodPhase {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    /// Returns true for phases a pod never leaves.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl std::fmt::Display for PodPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PodPhase::Pending => write!(f, "Pending"),
            PodPhase::Running => write!(f, "Running"),
            PodPhase::Succeeded => write!(f, "Succeeded"),
            PodPhase::Failed => write!(f, "Failed"),
            PodPhase::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Observed state of a pod.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodStatus {
    #[serde(default)]
    pub phase: PodPhase,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_ip: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,

    #[serde(default)]
    pub container_statuses: Vec<ContainerStatus>,
}

impl PodStatus {
    /// Returns true once no reconciliation step may rewrite phase, reason or
    /// message: the phase is terminal, or creation failed at the provider.
    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal() || self.reason.as_deref() == Some(REASON_PROVIDER_FAILED)
    }

    pub fn container(&self, name: &str) -> Option<&ContainerStatus> {
        self.container_statuses.iter().find(|c| c.name == name)
    }
}

/// Observed state of a single container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerStatus {
    pub name: String,
    pub state: ContainerState,

    #[serde(default)]
    pub ready: bool,

    #[serde(default)]
    pub restart_count: i32,

    #[serde(default)]
    pub image: String,

    #[serde(default, rename = "containerID", skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
}

impl ContainerStatus {
    /// Start time of the container's current or last run, if known.
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        match &self.state {
            ContainerState::Running(running) => running.started_at,
            ContainerState::Terminated(terminated) => terminated.started_at,
            ContainerState::Waiting(_) => None,
        }
    }

    /// Returns true if this entry is the "provider lost this container" marker.
    pub fn is_lost(&self) -> bool {
        matches!(
            &self.state,
            ContainerState::Terminated(t)
                if t.exit_code == EXIT_CODE_NOT_FOUND && t.reason.as_deref() == Some(REASON_NOT_FOUND)
        )
    }
}

/// Container state; exactly one variant is set at a time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ContainerState {
    Waiting(ContainerStateWaiting),
    Running(ContainerStateRunning),
    Terminated(ContainerStateTerminated),
}

impl Default for ContainerState {
    fn default() -> Self {
        ContainerState::Waiting(ContainerStateWaiting::default())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerStateWaiting {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerStateRunning {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerStateTerminated {
    pub exit_code: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, rename = "containerID", skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn status(phase: PodPhase, reason: Option<&str>) -> PodStatus {
        PodStatus {
            phase,
            reason: reason.map(str::to_string),
            ..Default::default()
        }
    }

    #[rstest]
    #[case(PodPhase::Pending, None, false)]
    #[case(PodPhase::Running, None, false)]
    #[case(PodPhase::Unknown, None, false)]
    #[case(PodPhase::Succeeded, None, true)]
    #[case(PodPhase::Failed, None, true)]
    #[case(PodPhase::Pending, Some(REASON_PROVIDER_FAILED), true)]
    #[case(PodPhase::Running, Some(REASON_NOT_FOUND), false)]
    fn test_status_is_terminal(
        #[case] phase: PodPhase,
        #[case] reason: Option<&str>,
        #[case] expected: bool,
    ) {
        assert_eq!(status(phase, reason).is_terminal(), expected);
    }

    #[test]
    fn test_pod_deserialization() {
        let json = r#"{
            "metadata": {
                "namespace": "default",
                "name": "nginx-0-abcde",
                "uid": "6f1c0a57-1d0c-4bd0-9d5e-2b0d7f1f3c11",
                "resourceVersion": "42",
                "creationTimestamp": "2025-12-17T12:00:00Z"
            },
            "spec": {
                "nodeName": "vnode-0",
                "restartPolicy": "Never",
                "containers": [
                    {"name": "bar", "image": "nginx", "env": [{"name": "FOO", "value": "1"}]},
                    {"name": "baz", "image": "nginx"}
                ]
            }
        }"#;

        let pod: Pod = serde_json::from_str(json).unwrap();
        assert_eq!(pod.key(), PodKey::new("default", "nginx-0-abcde"));
        assert_eq!(pod.metadata.resource_version, "42");
        assert_eq!(pod.spec.restart_policy, RestartPolicy::Never);
        assert_eq!(pod.spec.containers.len(), 2);
        assert_eq!(pod.spec.containers[0].env[0], EnvVar::literal("FOO", "1"));
        assert_eq!(pod.status.phase, PodPhase::Pending);
        assert!(!pod.is_being_deleted());
    }

    #[test]
    fn test_container_state_wire_shape() {
        let status = ContainerStatus {
            name: "bar".to_string(),
            state: ContainerState::Terminated(ContainerStateTerminated {
                exit_code: EXIT_CODE_NOT_FOUND,
                reason: Some(REASON_NOT_FOUND.to_string()),
                container_id: Some("mock://default/p/bar".to_string()),
                ..Default::default()
            }),
            ready: false,
            restart_count: 0,
            image: "nginx".to_string(),
            container_id: Some("mock://default/p/bar".to_string()),
        };

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["state"]["terminated"]["exitCode"], -137);
        assert_eq!(json["state"]["terminated"]["reason"], "NotFound");
        assert_eq!(json["containerID"], "mock://default/p/bar");
        assert!(status.is_lost());
    }

    #[test]
    fn test_empty_resource_version_is_omitted() {
        let meta = ObjectMeta {
            namespace: "default".to_string(),
            name: "p".to_string(),
            uid: "u".to_string(),
            resource_version: String::new(),
            creation_timestamp: Utc::now(),
            deletion_timestamp: None,
        };

        let json = serde_json::to_string(&meta).unwrap();
        assert!(!json.contains("resourceVersion"));
    }

    #[test]
    fn test_started_at_follows_state() {
        let started = Utc::now();
        let mut status = ContainerStatus {
            name: "bar".to_string(),
            state: ContainerState::Running(ContainerStateRunning {
                started_at: Some(started),
            }),
            ready: true,
            restart_count: 0,
            image: String::new(),
            container_id: None,
        };
        assert_eq!(status.started_at(), Some(started));

        status.state = ContainerState::default();
        assert_eq!(status.started_at(), None);
        assert!(!status.is_lost());
    }
}
