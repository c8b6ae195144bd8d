//! vnode Node Agent Library
//!
//! The node agent presents a pluggable provider as a node of an orchestrated
//! cluster. Pods assigned to the node are created and deleted at the provider,
//! and the provider's view of each pod is mirrored back into the
//! orchestrator's record.
//!
//! ## Architecture
//!
//! ```text
//! pod poller ──► PodEventDispatcher ──► PodLifecycleController ──► Provider
//!                                          │          ▲
//! StatusSweeper (every tick) ──────────────┘          │
//!                                                      └──► Orchestrator
//! ```
//!
//! ## Modules
//!
//! - `lifecycle`: create, delete and status sync for single pods
//! - `store`: the set of pods this node is responsible for
//! - `events`: per-pod event dispatch and the assigned-pod poller
//! - `reconciler`: periodic status sweep
//! - `provider`, `orchestrator`: the two external collaborators
//! - `api`: stats and health endpoints

pub mod api;
pub mod config;
pub mod env;
pub mod events;
pub mod lifecycle;
pub mod orchestrator;
pub mod provider;
pub mod reconciler;
pub mod store;

// Re-export commonly used types
pub use events::{PodEvent, PodEventDispatcher, PodEventHandler};
pub use lifecycle::{LifecycleError, PodLifecycleController, StatusSync, SweepReport};
pub use orchestrator::{HttpOrchestrator, InMemoryOrchestrator, Orchestrator, OrchestratorError};
pub use provider::{MockProvider, Provider, ProviderError};
pub use reconciler::{StatusSweeper, SweepConfig};
pub use store::TrackedPodStore;
