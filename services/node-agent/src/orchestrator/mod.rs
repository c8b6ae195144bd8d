//! Access to the orchestrator's pod records.
//!
//! The orchestrator owns the authoritative pod record. The agent reads it,
//! writes back observed status, and deletes it once the provider is done
//! with the pod.
//!
//! - `http`: REST client used in production
//! - `memory`: in-process record table for tests and local development

mod http;
mod memory;

pub use http::HttpOrchestrator;
pub use memory::InMemoryOrchestrator;

use async_trait::async_trait;
use thiserror::Error;
use vnode_model::Pod;

/// Errors from orchestrator record operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OrchestratorError {
    /// The record does not exist.
    #[error("pod {0} not found in orchestrator")]
    NotFound(String),

    /// The record changed since it was read.
    #[error("conflict writing pod {0}: record has been modified")]
    Conflict(String),

    /// The orchestrator answered with an unexpected status.
    #[error("orchestrator returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The request never got an answer.
    #[error("orchestrator request failed: {0}")]
    Request(String),
}

impl OrchestratorError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, OrchestratorError::NotFound(_))
    }
}

impl From<reqwest::Error> for OrchestratorError {
    fn from(err: reqwest::Error) -> Self {
        OrchestratorError::Request(err.to_string())
    }
}

/// The orchestrator's pod record API.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Read a pod record.
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, OrchestratorError>;

    /// Write the status half of `pod`. A non-empty resource version must
    /// match the stored record. Returns the record as stored.
    async fn update_status(&self, pod: &Pod) -> Result<Pod, OrchestratorError>;

    /// Delete a pod record.
    async fn delete_pod(
        &self,
        namespace: &str,
        name: &str,
        grace_period_seconds: i64,
    ) -> Result<(), OrchestratorError>;

    /// Every pod record assigned to `node_name`.
    async fn list_node_pods(&self, node_name: &str) -> Result<Vec<Pod>, OrchestratorError>;
}
