//! Agent configuration.
//!
//! Loaded from a TOML file; every section and field falls back to a
//! default so a partial file (or none at all) is enough to start.

use crate::task::Capability;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Unique agent identifier, defaults to the hostname.
    #[serde(default = "default_agent_id")]
    pub id: String,

    /// Port for the task handoff API.
    #[serde(default = "default_port")]
    pub port: u16,

    /// URL the coordinator should use to reach this agent. Derived from
    /// the hostname and port when not set.
    #[serde(default)]
    pub advertise_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Base URL of the coordinator.
    #[serde(default = "default_coordinator_url")]
    pub url: String,

    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Sync tool executable.
    #[serde(default = "default_sync_program")]
    pub program: String,

    /// How long to wait after SIGTERM before killing the subprocess.
    #[serde(default = "default_grace_period")]
    pub grace_period_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_capabilities")]
    pub capabilities: Vec<Capability>,

    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_tasks: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_agent_id() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "backup-agent-01".to_string())
}

fn default_port() -> u16 {
    9990
}

fn default_coordinator_url() -> String {
    "http://localhost:8888".to_string()
}

fn default_heartbeat_interval() -> u64 {
    10
}

fn default_sync_program() -> String {
    "rsync".to_string()
}

fn default_grace_period() -> u64 {
    5
}

fn default_capabilities() -> Vec<Capability> {
    vec![Capability::Backup, Capability::Verify]
}

fn default_max_concurrent() -> usize {
    2
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            id: default_agent_id(),
            port: default_port(),
            advertise_url: None,
        }
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            url: default_coordinator_url(),
            heartbeat_interval_secs: default_heartbeat_interval(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            program: default_sync_program(),
            grace_period_secs: default_grace_period(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            capabilities: default_capabilities(),
            max_concurrent_tasks: default_max_concurrent(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// URL other processes should use to reach this agent.
    pub fn endpoint(&self) -> String {
        self.agent.advertise_url.clone().unwrap_or_else(|| {
            format!("http://{}:{}", default_agent_id(), self.agent.port)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let config = Config::default();
        assert_eq!(config.agent.port, 9990);
        assert_eq!(config.worker.max_concurrent_tasks, 2);
        assert!(config.worker.capabilities.contains(&Capability::Backup));
        assert_eq!(config.sync.program, "rsync");
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let config: Config = toml::from_str(
            "[agent]\nid = \"worker-7\"\nport = 9991\n\
             [coordinator]\nurl = \"http://coord:8888\"\n",
        )
        .unwrap();

        assert_eq!(config.agent.id, "worker-7");
        assert_eq!(config.coordinator.url, "http://coord:8888");
        assert_eq!(config.coordinator.heartbeat_interval_secs, 10);
        assert_eq!(config.sync.program, "rsync");
    }

    #[test]
    fn advertise_url_overrides_endpoint() {
        let mut config = Config::default();
        config.agent.advertise_url = Some("http://10.0.0.5:9990".to_string());
        assert_eq!(config.endpoint(), "http://10.0.0.5:9990");
    }
}
