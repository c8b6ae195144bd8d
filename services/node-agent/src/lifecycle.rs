//! Pod lifecycle controller.
//!
//! The controller:
//! - Creates pods at the provider and records creation failures
//! - Deletes pods at the provider, then deletes the orchestrator record
//! - Syncs provider status into the orchestrator record
//!
//! Terminal statuses are never rewritten. Every provider and orchestrator call
//! races the caller's cancellation token.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use vnode_model::{
    ContainerState, ContainerStateTerminated, ContainerStatus, Pod, PodPhase, PodStatus,
    RestartPolicy, StatsError, Summary, EXIT_CODE_NOT_FOUND, REASON_NOT_FOUND,
    REASON_PROVIDER_FAILED,
};

use crate::env::{resolve_environment, EnvError};
use crate::orchestrator::{Orchestrator, OrchestratorError};
use crate::provider::{Provider, ProviderError};
use crate::store::TrackedPodStore;

/// Seconds a pod may stay unknown to the provider before it is failed.
pub const STATUS_GRACE_PERIOD_SECS: i64 = 60;

const POD_NOT_FOUND_MESSAGE: &str =
    "The pod status was not found and may have been deleted from the provider";
const CONTAINER_NOT_FOUND_MESSAGE: &str = "Container was not found and was likely deleted";

/// Errors from lifecycle operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    #[error("invalid environment: {0}")]
    Environment(#[from] EnvError),

    #[error("invalid stats summary: {0}")]
    Stats(#[from] StatsError),

    #[error("operation cancelled")]
    Cancelled,
}

impl LifecycleError {
    /// True if the provider or the orchestrator reported the pod absent.
    pub fn is_not_found(&self) -> bool {
        match self {
            LifecycleError::Provider(e) => e.is_not_found(),
            LifecycleError::Orchestrator(e) => e.is_not_found(),
            _ => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, LifecycleError::Cancelled)
    }
}

/// What a status sync did to a pod.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusSync {
    /// The pod is terminal; nothing was asked or written.
    Terminal,
    /// The status was written back unchanged.
    Unchanged,
    /// A different status was written back.
    Updated,
}

/// Per-sweep counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Pods a sync was started for.
    pub visited: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped_terminal: usize,
    pub failed: usize,
    /// The sweep stopped early because the token fired.
    pub cancelled: bool,
}

/// Compute the status to record for `pod` given what the provider reported.
///
/// `observed` replaces the status wholesale. With no observation the pod is
/// only failed if it was already running or has outlived the grace period;
/// every declared container is then marked lost.
pub fn next_status(pod: &Pod, observed: Option<PodStatus>, now: DateTime<Utc>) -> PodStatus {
    if let Some(status) = observed {
        return status;
    }

    let was_running = pod.status.phase == PodPhase::Running;
    let past_grace =
        now - pod.metadata.creation_timestamp > Duration::seconds(STATUS_GRACE_PERIOD_SECS);
    if !was_running && !past_grace {
        return pod.status.clone();
    }

    let container_statuses = pod
        .spec
        .containers
        .iter()
        .map(|container| {
            let previous = pod.status.container(&container.name);
            let container_id = previous.and_then(|c| c.container_id.clone());
            ContainerStatus {
                name: container.name.clone(),
                state: ContainerState::Terminated(ContainerStateTerminated {
                    exit_code: EXIT_CODE_NOT_FOUND,
                    reason: Some(REASON_NOT_FOUND.to_string()),
                    message: Some(CONTAINER_NOT_FOUND_MESSAGE.to_string()),
                    started_at: previous.and_then(ContainerStatus::started_at),
                    finished_at: Some(now),
                    container_id: container_id.clone(),
                }),
                ready: false,
                restart_count: previous.map(|c| c.restart_count).unwrap_or(0),
                image: container.image.clone(),
                container_id,
            }
        })
        .collect();

    PodStatus {
        phase: PodPhase::Failed,
        reason: Some(REASON_NOT_FOUND.to_string()),
        message: Some(POD_NOT_FOUND_MESSAGE.to_string()),
        pod_ip: pod.status.pod_ip.clone(),
        start_time: pod.status.start_time,
        container_statuses,
    }
}

/// Status recorded when the provider refuses to create a pod.
fn provider_failed_status(pod: &Pod, err: &ProviderError) -> PodStatus {
    let phase = match pod.spec.restart_policy {
        RestartPolicy::Never => PodPhase::Failed,
        RestartPolicy::Always | RestartPolicy::OnFailure => PodPhase::Pending,
    };

    PodStatus {
        phase,
        reason: Some(REASON_PROVIDER_FAILED.to_string()),
        message: Some(err.to_string()),
        ..pod.status.clone()
    }
}

/// Await `fut` unless `cancel` fires first.
async fn cancellable<T, E, F>(cancel: &CancellationToken, fut: F) -> Result<T, LifecycleError>
where
    F: Future<Output = Result<T, E>>,
    LifecycleError: From<E>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(LifecycleError::Cancelled),
        result = fut => result.map_err(LifecycleError::from),
    }
}

/// Drives pods through the provider and mirrors outcomes into the
/// orchestrator.
pub struct PodLifecycleController {
    node_name: String,
    provider: Arc<dyn Provider>,
    orchestrator: Arc<dyn Orchestrator>,
    store: Arc<TrackedPodStore>,
}

impl PodLifecycleController {
    pub fn new(
        node_name: impl Into<String>,
        provider: Arc<dyn Provider>,
        orchestrator: Arc<dyn Orchestrator>,
        store: Arc<TrackedPodStore>,
    ) -> Self {
        Self {
            node_name: node_name.into(),
            provider,
            orchestrator,
            store,
        }
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    pub fn store(&self) -> &Arc<TrackedPodStore> {
        &self.store
    }

    /// Create `pod` at the provider.
    ///
    /// A provider failure is recorded on the orchestrator record (best
    /// effort) and then returned.
    #[instrument(skip(self, cancel, pod), fields(namespace = %pod.namespace(), pod = %pod.name(), uid = %pod.uid()))]
    pub async fn create_pod(
        &self,
        cancel: &CancellationToken,
        pod: &Pod,
    ) -> Result<(), LifecycleError> {
        let resolved = resolve_environment(pod)?;

        let provider_err = match cancellable(cancel, self.provider.create_pod(&resolved)).await {
            Ok(()) => {
                info!("Pod created");
                return Ok(());
            }
            Err(LifecycleError::Provider(e)) => e,
            Err(other) => return Err(other),
        };

        warn!(error = %provider_err, "Provider failed to create pod");

        let mut failed = pod.with_status(provider_failed_status(pod, &provider_err));
        // The write must not trip over a record the orchestrator has moved on.
        failed.metadata.resource_version.clear();

        match cancellable(cancel, self.orchestrator.update_status(&failed)).await {
            Ok(stored) => {
                debug!(phase = %stored.status.phase, "Recorded provider failure");
                self.store.replace_if_tracked(stored).await;
            }
            Err(e) => warn!(error = %e, "Failed to update pod status"),
        }

        Err(provider_err.into())
    }

    /// Delete `pod` at the provider and then its orchestrator record.
    ///
    /// A provider NotFound is returned to the caller even though the record
    /// is still deleted: there was nothing left to delete at the provider.
    #[instrument(skip(self, cancel, pod), fields(namespace = %pod.namespace(), pod = %pod.name(), uid = %pod.uid()))]
    pub async fn delete_pod(
        &self,
        cancel: &CancellationToken,
        pod: &Pod,
    ) -> Result<(), LifecycleError> {
        let provider_result = match cancellable(cancel, self.provider.delete_pod(pod)).await {
            Ok(()) => Ok(()),
            Err(LifecycleError::Provider(e)) if e.is_not_found() => {
                debug!("Pod already absent from provider");
                Err(LifecycleError::Provider(e))
            }
            Err(other) => return Err(other),
        };

        match cancellable(
            cancel,
            self.orchestrator.delete_pod(pod.namespace(), pod.name(), 0),
        )
        .await
        {
            Ok(()) => info!("Pod deleted"),
            Err(e) if e.is_not_found() => {
                debug!("Pod does not exist in orchestrator, nothing to delete");
            }
            Err(e) => {
                error!(error = %e, "Failed to delete orchestrator pod");
                return Err(e);
            }
        }

        provider_result
    }

    /// Delete `pod` at the provider only, leaving the orchestrator record alone.
    ///
    /// Used when a newer incarnation already owns the record's name.
    #[instrument(skip(self, cancel, pod), fields(namespace = %pod.namespace(), pod = %pod.name(), uid = %pod.uid()))]
    pub async fn release_pod(
        &self,
        cancel: &CancellationToken,
        pod: &Pod,
    ) -> Result<(), LifecycleError> {
        match cancellable(cancel, self.provider.delete_pod(pod)).await {
            Ok(()) => {
                info!("Released previous pod incarnation");
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Replace the tracked copy of `pod` with the orchestrator's current
    /// record. Returns false if the record belongs to another incarnation or
    /// `pod` is no longer tracked.
    #[instrument(skip(self, cancel, pod), fields(namespace = %pod.namespace(), pod = %pod.name(), uid = %pod.uid()))]
    pub async fn refresh_pod(
        &self,
        cancel: &CancellationToken,
        pod: &Pod,
    ) -> Result<bool, LifecycleError> {
        let current = cancellable(
            cancel,
            self.orchestrator.get_pod(pod.namespace(), pod.name()),
        )
        .await?;
        if current.uid() != pod.uid() {
            return Ok(false);
        }

        let refreshed = self.store.replace_if_tracked(current).await;
        debug!(refreshed, "Refreshed tracked pod");
        Ok(refreshed)
    }

    /// Sync the provider's view of `pod` into the orchestrator record.
    ///
    /// A conflicting write refreshes the tracked copy before the error is
    /// returned, so the next sync writes against the current record.
    #[instrument(skip(self, cancel, pod), fields(namespace = %pod.namespace(), pod = %pod.name(), phase = %pod.status.phase))]
    pub async fn update_pod_status(
        &self,
        cancel: &CancellationToken,
        pod: &Pod,
    ) -> Result<StatusSync, LifecycleError> {
        if pod.status.is_terminal() {
            return Ok(StatusSync::Terminal);
        }

        let observed = cancellable(
            cancel,
            self.provider.get_pod_status(pod.namespace(), pod.name()),
        )
        .await?;

        let status = next_status(pod, observed, Utc::now());
        let sync = if status == pod.status {
            StatusSync::Unchanged
        } else {
            StatusSync::Updated
        };

        let stored = match cancellable(
            cancel,
            self.orchestrator.update_status(&pod.with_status(status)),
        )
        .await
        {
            Ok(stored) => stored,
            Err(e @ LifecycleError::Orchestrator(OrchestratorError::Conflict(_))) => {
                if let Err(refresh_err) = self.refresh_pod(cancel, pod).await {
                    warn!(error = %refresh_err, "Failed to refresh pod after conflict");
                }
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        debug!(
            new_phase = %stored.status.phase,
            new_reason = stored.status.reason.as_deref().unwrap_or(""),
            "Updated pod status"
        );
        self.store.replace_if_tracked(stored).await;

        Ok(sync)
    }

    /// Sync every tracked pod, stopping between pods if `cancel` fires.
    pub async fn update_pod_statuses(&self, cancel: &CancellationToken) -> SweepReport {
        let pods = self.store.get_pods().await;
        let mut report = SweepReport::default();
        debug!(pod_count = pods.len(), "Syncing pod statuses");

        for pod in pods {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            report.visited += 1;
            match self.update_pod_status(cancel, &pod).await {
                Ok(StatusSync::Terminal) => report.skipped_terminal += 1,
                Ok(StatusSync::Unchanged) => report.unchanged += 1,
                Ok(StatusSync::Updated) => report.updated += 1,
                Err(LifecycleError::Cancelled) => {
                    report.cancelled = true;
                    break;
                }
                Err(e) => {
                    report.failed += 1;
                    error!(
                        namespace = %pod.namespace(),
                        pod = %pod.name(),
                        status = %pod.status.phase,
                        reason = pod.status.reason.as_deref().unwrap_or(""),
                        error = %e,
                        "Failed to sync pod status"
                    );
                }
            }
        }

        report
    }

    /// Stats summary from the provider, checked against this node.
    pub async fn get_stats_summary(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Summary, LifecycleError> {
        let summary = cancellable(cancel, self.provider.get_stats_summary()).await?;
        summary.check(&self.node_name)?;
        Ok(summary)
    }
}
