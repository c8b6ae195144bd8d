//! Node, pod and container statistics.
//!
//! A [`Summary`] describes the node this agent represents and every pod the
//! provider currently runs. It is a point-in-time view: pods appear once the
//! provider tracks them and disappear as soon as it stops.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pod::Pod;

/// Ways a summary can break the reporting contract.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StatsError {
    /// The summary describes a different node.
    #[error("summary is for node '{actual}', expected '{expected}'")]
    NodeMismatch { expected: String, actual: String },

    /// The same pod is reported more than once.
    #[error("pod {0} is reported more than once")]
    DuplicatePod(String),
}

/// Stats summary for a node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub node: NodeStats,
    #[serde(default)]
    pub pods: Vec<PodStats>,
}

impl Summary {
    /// Find the stats entry for a pod by namespaced name.
    pub fn pod(&self, namespace: &str, name: &str) -> Option<&PodStats> {
        self.pods
            .iter()
            .find(|p| p.pod_ref.namespace == namespace && p.pod_ref.name == name)
    }

    /// Verify the summary is for `node_name` and lists every pod at most once.
    pub fn check(&self, node_name: &str) -> Result<(), StatsError> {
        if self.node.node_name != node_name {
            return Err(StatsError::NodeMismatch {
                expected: node_name.to_string(),
                actual: self.node.node_name.clone(),
            });
        }

        // Two incarnations of one name may overlap while a pod is replaced.
        let mut seen = HashSet::with_capacity(self.pods.len());
        for pod in &self.pods {
            if !seen.insert(&pod.pod_ref) {
                return Err(StatsError::DuplicatePod(pod.pod_ref.to_string()));
            }
        }

        Ok(())
    }
}

/// Node-level stats.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStats {
    pub node_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<CpuStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemoryStats>,
}

/// Reference from a stats entry back to its pod.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodReference {
    pub namespace: String,
    pub name: String,
    pub uid: String,
}

impl fmt::Display for PodReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} (uid {})", self.namespace, self.name, self.uid)
    }
}

impl From<&Pod> for PodReference {
    fn from(pod: &Pod) -> Self {
        Self {
            namespace: pod.metadata.namespace.clone(),
            name: pod.metadata.name.clone(),
            uid: pod.metadata.uid.clone(),
        }
    }
}

/// Pod-level stats.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodStats {
    pub pod_ref: PodReference,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub containers: Vec<ContainerStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<CpuStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemoryStats>,
}

/// Container-level stats.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerStats {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<CpuStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemoryStats>,
}

/// CPU usage sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CpuStats {
    pub time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage_nano_cores: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage_core_nano_seconds: Option<u64>,
}

/// Memory usage sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStats {
    pub time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_set_bytes: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pod_stats(namespace: &str, name: &str, uid: &str, containers: &[&str]) -> PodStats {
        PodStats {
            pod_ref: PodReference {
                namespace: namespace.to_string(),
                name: name.to_string(),
                uid: uid.to_string(),
            },
            containers: containers
                .iter()
                .map(|c| ContainerStats {
                    name: c.to_string(),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }

    fn summary(node_name: &str, pods: Vec<PodStats>) -> Summary {
        Summary {
            node: NodeStats {
                node_name: node_name.to_string(),
                ..Default::default()
            },
            pods,
        }
    }

    #[test]
    fn test_check_accepts_well_formed_summary() {
        let summary = summary(
            "vnode-0",
            vec![
                pod_stats("default", "nginx-0-x", "u0", &["bar", "baz"]),
                pod_stats("default", "nginx-1-y", "u1", &["bar"]),
            ],
        );

        assert_eq!(summary.check("vnode-0"), Ok(()));
        assert_eq!(summary.pod("default", "nginx-0-x").unwrap().containers.len(), 2);
        assert!(summary.pod("default", "nginx-2-z").is_none());
    }

    #[test]
    fn test_check_rejects_wrong_node() {
        let summary = summary("other", vec![]);

        assert_eq!(
            summary.check("vnode-0"),
            Err(StatsError::NodeMismatch {
                expected: "vnode-0".to_string(),
                actual: "other".to_string(),
            })
        );
    }

    #[test]
    fn test_check_rejects_duplicate_pod() {
        let summary = summary(
            "vnode-0",
            vec![
                pod_stats("default", "nginx-0-x", "u0", &["bar"]),
                pod_stats("default", "nginx-0-x", "u0", &["bar"]),
            ],
        );

        assert_eq!(
            summary.check("vnode-0"),
            Err(StatsError::DuplicatePod("default/nginx-0-x (uid u0)".to_string()))
        );
    }

    #[test]
    fn test_check_accepts_two_incarnations_of_one_name() {
        let summary = summary(
            "vnode-0",
            vec![
                pod_stats("default", "nginx-0-a", "old", &["bar"]),
                pod_stats("default", "nginx-0-a", "new", &["bar"]),
            ],
        );

        assert_eq!(summary.check("vnode-0"), Ok(()));
    }

    #[test]
    fn test_summary_wire_shape() {
        let summary = summary("vnode-0", vec![pod_stats("ns", "p", "u", &["c"])]);
        let json = serde_json::to_value(&summary).unwrap();

        assert_eq!(json["node"]["nodeName"], "vnode-0");
        assert_eq!(json["pods"][0]["podRef"]["uid"], "u");
        assert_eq!(json["pods"][0]["containers"][0]["name"], "c");
    }
}
