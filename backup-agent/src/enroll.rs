//! Registration and heartbeat against the coordinator.
//!
//! The agent announces itself (identity, endpoint, capability set,
//! concurrency limit) and then pushes a periodic heartbeat carrying its
//! current load. A coordinator restart is handled by re-registering
//! whenever a heartbeat comes back 404.

use crate::api::AgentState;
use crate::task::Capability;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const REGISTER_RETRY_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize)]
struct RegisterBody<'a> {
    id: &'a str,
    endpoint: String,
    capabilities: &'a [Capability],
    max_concurrent_tasks: usize,
}

#[derive(Debug, Serialize)]
struct HeartbeatBody<'a> {
    agent_id: &'a str,
    current_tasks: usize,
    load: f32,
    timestamp: String,
}

pub struct Enrollment {
    client: reqwest::Client,
    state: Arc<AgentState>,
}

impl Enrollment {
    pub fn new(state: Arc<AgentState>) -> Self {
        Self {
            client: reqwest::Client::new(),
            state,
        }
    }

    async fn register_once(&self) -> crate::Result<()> {
        let config = &self.state.config;
        let body = RegisterBody {
            id: &config.agent.id,
            endpoint: config.endpoint(),
            capabilities: &config.worker.capabilities,
            max_concurrent_tasks: config.worker.max_concurrent_tasks,
        };

        let url = format!("{}/api/agents/register", config.coordinator.url);
        let resp = self.client.post(&url).json(&body).send().await?;
        if !resp.status().is_success() {
            return Err(crate::AgentError::Config(format!(
                "coordinator refused registration: {}",
                resp.status()
            )));
        }
        info!(agent_id = %config.agent.id, "registered with coordinator");
        Ok(())
    }

    /// Keep trying to register until it succeeds or shutdown is
    /// requested.
    pub async fn register_with_retry(&self, cancel: &CancellationToken) {
        loop {
            match self.register_once().await {
                Ok(()) => return,
                Err(e) => warn!("registration failed, retrying: {e}"),
            }
            tokio::select! {
                _ = tokio::time::sleep(REGISTER_RETRY_INTERVAL) => {}
                _ = cancel.cancelled() => return,
            }
        }
    }

    /// Periodic heartbeat loop. Runs until shutdown.
    pub async fn heartbeat_loop(self, cancel: CancellationToken) {
        let interval = Duration::from_secs(
            self.state.config.coordinator.heartbeat_interval_secs.max(1),
        );
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = cancel.cancelled() => return,
            }

            let config = &self.state.config;
            let current = self.state.tracker.running_count().await;
            let max = config.worker.max_concurrent_tasks.max(1);
            let body = HeartbeatBody {
                agent_id: &config.agent.id,
                current_tasks: current,
                load: (current as f32 / max as f32).clamp(0.0, 1.0),
                timestamp: chrono::Utc::now().to_rfc3339(),
            };

            let url = format!("{}/api/agents/heartbeat", config.coordinator.url);
            match self.client.post(&url).json(&body).send().await {
                Ok(resp) if resp.status() == reqwest::StatusCode::NOT_FOUND => {
                    // Coordinator restarted and lost us.
                    warn!("coordinator does not know this agent, re-registering");
                    self.register_with_retry(&cancel).await;
                }
                Ok(resp) if !resp.status().is_success() => {
                    warn!(status = %resp.status(), "heartbeat rejected");
                }
                Ok(_) => {}
                Err(e) => warn!("heartbeat failed: {e}"),
            }
        }
    }
}
