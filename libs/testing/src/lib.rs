//! Pod fixtures for vnode tests.

use chrono::{Duration, Utc};
use uuid::Uuid;
use vnode_model::{
    Container, ContainerState, ContainerStateRunning, ContainerStatus, ObjectMeta, Pod, PodPhase,
    PodSpec, PodStatus, RestartPolicy,
};

pub const TEST_NAMESPACE: &str = "default";
pub const TEST_NODE_NAME: &str = "vnode-test";
pub const TEST_IMAGE: &str = "nginx";

/// A freshly assigned pod named `name` with one container per entry in
/// `containers`.
pub fn dummy_pod(name: &str, containers: &[&str]) -> Pod {
    Pod {
        metadata: ObjectMeta {
            namespace: TEST_NAMESPACE.to_string(),
            name: name.to_string(),
            uid: Uuid::new_v4().to_string(),
            resource_version: "1".to_string(),
            creation_timestamp: Utc::now(),
            deletion_timestamp: None,
        },
        spec: PodSpec {
            node_name: Some(TEST_NODE_NAME.to_string()),
            restart_policy: RestartPolicy::Always,
            containers: containers
                .iter()
                .map(|name| Container {
                    name: name.to_string(),
                    image: TEST_IMAGE.to_string(),
                    env: Vec::new(),
                })
                .collect(),
        },
        status: PodStatus::default(),
    }
}

/// Like [`dummy_pod`], but the name is `prefix` plus a random suffix, the way
/// generated names look (`nginx-0-` becomes `nginx-0-k3x9q`).
pub fn dummy_pod_with_prefix(prefix: &str, containers: &[&str]) -> Pod {
    let suffix: String = Uuid::new_v4().simple().to_string().chars().take(5).collect();
    dummy_pod(&format!("{prefix}{suffix}"), containers)
}

/// Backdate a pod's creation timestamp by `age`.
pub fn created_ago(mut pod: Pod, age: Duration) -> Pod {
    pod.metadata.creation_timestamp = Utc::now() - age;
    pod
}

/// A Running status with every declared container running.
pub fn running_status(pod: &Pod) -> PodStatus {
    let started = Utc::now();
    PodStatus {
        phase: PodPhase::Running,
        reason: None,
        message: None,
        pod_ip: Some("10.0.0.2".to_string()),
        start_time: Some(started),
        container_statuses: pod
            .spec
            .containers
            .iter()
            .map(|c| ContainerStatus {
                name: c.name.clone(),
                state: ContainerState::Running(ContainerStateRunning {
                    started_at: Some(started),
                }),
                ready: true,
                restart_count: 0,
                image: c.image.clone(),
                container_id: Some(format!("test://{}/{}", pod.name(), c.name)),
            })
            .collect(),
    }
}
