//! Configuration for the node agent.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context, Result};

/// Which provider backs this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Mock,
}

impl std::str::FromStr for ProviderKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "mock" => Ok(ProviderKind::Mock),
            other => bail!("unknown provider '{other}'"),
        }
    }
}

/// Where pod records live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorKind {
    /// The orchestrator's HTTP API at `orchestrator_url`.
    Http,
    /// An in-process table that starts empty. For local development.
    Memory,
}

impl std::str::FromStr for OrchestratorKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "http" => Ok(OrchestratorKind::Http),
            "memory" => Ok(OrchestratorKind::Memory),
            other => bail!("unknown orchestrator '{other}'"),
        }
    }
}

/// Node agent configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Name of the node this agent presents.
    pub node_name: String,

    pub orchestrator: OrchestratorKind,

    /// Orchestrator API URL. Ignored by the in-memory orchestrator.
    pub orchestrator_url: String,

    /// Address of the stats/health HTTP server.
    pub listen_addr: SocketAddr,

    /// Status sweep interval in seconds.
    pub status_sync_interval_secs: u64,

    /// Assigned-pod poll interval in seconds.
    pub pod_poll_interval_secs: u64,

    pub provider: ProviderKind,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let node_name = lookup("VNODE_NODE_NAME").unwrap_or_else(|| "vnode".to_string());
        if node_name.is_empty() {
            bail!("VNODE_NODE_NAME must not be empty");
        }

        let orchestrator = lookup("VNODE_ORCHESTRATOR")
            .as_deref()
            .unwrap_or("http")
            .parse()?;

        let orchestrator_url = lookup("VNODE_ORCHESTRATOR_URL")
            .unwrap_or_else(|| "http://127.0.0.1:8080".to_string());

        let listen_addr = lookup("VNODE_LISTEN_ADDR")
            .unwrap_or_else(|| "0.0.0.0:10250".to_string())
            .parse()
            .context("invalid VNODE_LISTEN_ADDR")?;

        let status_sync_interval_secs =
            parse_secs(lookup("VNODE_STATUS_SYNC_INTERVAL"), 5, "VNODE_STATUS_SYNC_INTERVAL")?;
        let pod_poll_interval_secs =
            parse_secs(lookup("VNODE_POD_POLL_INTERVAL"), 5, "VNODE_POD_POLL_INTERVAL")?;

        let provider = lookup("VNODE_PROVIDER")
            .as_deref()
            .unwrap_or("mock")
            .parse()?;

        let log_level = lookup("VNODE_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        Ok(Self {
            node_name,
            orchestrator,
            orchestrator_url,
            listen_addr,
            status_sync_interval_secs,
            pod_poll_interval_secs,
            provider,
            log_level,
        })
    }

    pub fn status_sync_interval(&self) -> Duration {
        Duration::from_secs(self.status_sync_interval_secs)
    }

    pub fn pod_poll_interval(&self) -> Duration {
        Duration::from_secs(self.pod_poll_interval_secs)
    }
}

fn parse_secs(value: Option<String>, default: u64, key: &str) -> Result<u64> {
    let Some(value) = value else {
        return Ok(default);
    };
    let secs: u64 = value
        .parse()
        .with_context(|| format!("invalid {key}: '{value}'"))?;
    if secs == 0 {
        bail!("{key} must be at least 1 second");
    }
    Ok(secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();

        assert_eq!(config.node_name, "vnode");
        assert_eq!(config.orchestrator, OrchestratorKind::Http);
        assert_eq!(config.orchestrator_url, "http://127.0.0.1:8080");
        assert_eq!(config.listen_addr, "0.0.0.0:10250".parse().unwrap());
        assert_eq!(config.status_sync_interval(), Duration::from_secs(5));
        assert_eq!(config.pod_poll_interval(), Duration::from_secs(5));
        assert_eq!(config.provider, ProviderKind::Mock);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("VNODE_NODE_NAME", "edge-1"),
            ("VNODE_LISTEN_ADDR", "127.0.0.1:9000"),
            ("VNODE_STATUS_SYNC_INTERVAL", "30"),
            ("VNODE_LOG_LEVEL", "debug"),
            ("VNODE_ORCHESTRATOR", "memory"),
        ])
        .unwrap();

        assert_eq!(config.orchestrator, OrchestratorKind::Memory);

        assert_eq!(config.node_name, "edge-1");
        assert_eq!(config.listen_addr.port(), 9000);
        assert_eq!(config.status_sync_interval_secs, 30);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(load(&[("VNODE_LISTEN_ADDR", "nowhere")]).is_err());
        assert!(load(&[("VNODE_STATUS_SYNC_INTERVAL", "soon")]).is_err());
        assert!(load(&[("VNODE_POD_POLL_INTERVAL", "0")]).is_err());
        assert!(load(&[("VNODE_PROVIDER", "firecracker")]).is_err());
        assert!(load(&[("VNODE_NODE_NAME", "")]).is_err());
        assert!(load(&[("VNODE_ORCHESTRATOR", "etcd")]).is_err());
    }
}
