//! Status reporting seam between the executor and whoever is tracking
//! the task.
//!
//! The executor is transport-agnostic: the coordinator's in-process
//! worker reports straight into its task store, while the standalone
//! agent binary reports over HTTP with [`HttpReporter`].

use crate::task::{CompletionReport, ProgressUpdate};
use async_trait::async_trait;
use serde::Serialize;
use tracing::warn;

/// Receives progress and completion for running tasks.
#[async_trait]
pub trait StatusReporter: Send + Sync {
    async fn progress(&self, task_id: &str, update: ProgressUpdate);
    async fn completed(&self, task_id: &str, report: CompletionReport);
}

#[derive(Serialize)]
struct ProgressBody<'a> {
    agent_id: &'a str,
    #[serde(flatten)]
    update: ProgressUpdate,
}

#[derive(Serialize)]
struct CompletionBody<'a> {
    agent_id: &'a str,
    #[serde(flatten)]
    report: CompletionReport,
}

/// Reports task status to the coordinator as one-way HTTP posts.
/// Failures are logged and dropped: a missed progress update is
/// harmless, and a missed completion is recovered by heartbeat
/// eviction on the coordinator side.
pub struct HttpReporter {
    client: reqwest::Client,
    coordinator_url: String,
    agent_id: String,
}

impl HttpReporter {
    pub fn new(coordinator_url: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            coordinator_url: coordinator_url.into(),
            agent_id: agent_id.into(),
        }
    }

    async fn post<T: Serialize>(&self, path: &str, body: &T) {
        let url = format!("{}{}", self.coordinator_url, path);
        match self.client.post(&url).json(body).send().await {
            Ok(resp) if resp.status().is_success() => {}
            Ok(resp) => warn!(%url, status = %resp.status(), "coordinator rejected report"),
            Err(e) => warn!(%url, "failed to deliver report: {e}"),
        }
    }
}

#[async_trait]
impl StatusReporter for HttpReporter {
    async fn progress(&self, task_id: &str, update: ProgressUpdate) {
        let body = ProgressBody {
            agent_id: &self.agent_id,
            update,
        };
        self.post(&format!("/api/tasks/{task_id}/progress"), &body)
            .await;
    }

    async fn completed(&self, task_id: &str, report: CompletionReport) {
        let body = CompletionBody {
            agent_id: &self.agent_id,
            report,
        };
        self.post(&format!("/api/tasks/{task_id}/complete"), &body)
            .await;
    }
}
