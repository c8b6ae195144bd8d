//! # vnode-model
//!
//! Pod and statistics types exchanged between the vnode agent, the
//! orchestrator that assigns pods to it, and the provider that runs them.
//!
//! ## Design Principles
//!
//! - Wire shape follows the orchestrator (camelCase JSON, RFC 3339 timestamps)
//! - (namespace, name, uid) permanently identifies a pod
//! - Terminal statuses are recognisable from the status value alone
//!
//! ## Modules
//!
//! - `pod`: Pod records, specs and statuses
//! - `stats`: The node/pod/container statistics summary

mod pod;
mod stats;

pub use pod::*;
pub use stats::*;
