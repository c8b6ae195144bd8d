//! REST client for the orchestrator's pod records.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, error};
use vnode_model::Pod;

use super::{Orchestrator, OrchestratorError};

/// Orchestrator API client.
pub struct HttpOrchestrator {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct PodList {
    #[serde(default)]
    items: Vec<Pod>,
}

impl HttpOrchestrator {
    /// Create a new client for the orchestrator at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Result<Self, OrchestratorError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn pod_url(&self, namespace: &str, name: &str) -> String {
        format!(
            "{}/api/v1/namespaces/{}/pods/{}",
            self.base_url, namespace, name
        )
    }

    /// Turn a non-success response into a typed error.
    async fn error_for(response: reqwest::Response, what: String) -> OrchestratorError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        match status {
            StatusCode::NOT_FOUND => OrchestratorError::NotFound(what),
            StatusCode::CONFLICT => OrchestratorError::Conflict(what),
            _ => {
                error!(status = %status, body = %body, pod = %what, "Orchestrator request failed");
                OrchestratorError::Status {
                    status: status.as_u16(),
                    body,
                }
            }
        }
    }
}

#[async_trait]
impl Orchestrator for HttpOrchestrator {
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, OrchestratorError> {
        let url = self.pod_url(namespace, name);
        debug!(url = %url, "Fetching pod");

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(Self::error_for(response, format!("{namespace}/{name}")).await);
        }

        Ok(response.json().await?)
    }

    async fn update_status(&self, pod: &Pod) -> Result<Pod, OrchestratorError> {
        let url = format!("{}/status", self.pod_url(pod.namespace(), pod.name()));
        debug!(
            url = %url,
            phase = %pod.status.phase,
            "Updating pod status"
        );

        let response = self.client.put(&url).json(pod).send().await?;
        if !response.status().is_success() {
            return Err(Self::error_for(response, pod.key().to_string()).await);
        }

        Ok(response.json().await?)
    }

    async fn delete_pod(
        &self,
        namespace: &str,
        name: &str,
        grace_period_seconds: i64,
    ) -> Result<(), OrchestratorError> {
        let url = self.pod_url(namespace, name);
        debug!(url = %url, grace_period_seconds, "Deleting pod");

        let response = self
            .client
            .delete(&url)
            .query(&[("gracePeriodSeconds", grace_period_seconds)])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::error_for(response, format!("{namespace}/{name}")).await);
        }

        Ok(())
    }

    async fn list_node_pods(&self, node_name: &str) -> Result<Vec<Pod>, OrchestratorError> {
        let url = format!("{}/api/v1/pods", self.base_url);
        let selector = format!("spec.nodeName={node_name}");

        let response = self
            .client
            .get(&url)
            .query(&[("fieldSelector", selector.as_str())])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::error_for(response, format!("pods on {node_name}")).await);
        }

        let list: PodList = response.json().await?;
        debug!(node = %node_name, pod_count = list.items.len(), "Listed node pods");
        Ok(list.items)
    }
}
