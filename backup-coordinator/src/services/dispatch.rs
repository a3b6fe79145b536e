//! Polymorphic agent handles.
//!
//! The scheduler sees one handoff interface regardless of where an
//! agent runs: [`LocalAgentHandle`] executes in-process on the
//! coordinator's runtime, [`RemoteAgentHandle`] offers the task to a
//! separate agent process over HTTP. Acceptance is explicit; a rejected
//! or undeliverable handoff releases the claim back to pending.

use crate::error::CoordinationError;
use async_trait::async_trait;
use backup_agent::api::job_tracker::JobTracker;
use backup_agent::executor::Executor;
use backup_agent::report::StatusReporter;
use backup_agent::task::TaskDescriptor;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const REMOTE_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[async_trait]
pub trait AgentHandle: Send + Sync {
    fn id(&self) -> &str;

    /// Offer a claimed unit. `Ok(true)` means the agent accepted and
    /// will drive the task to a terminal report; `Ok(false)` is a
    /// rejection (no capacity, capability withdrawn). Transport
    /// failures are `AgentUnreachable`.
    async fn assign(&self, task: TaskDescriptor) -> Result<bool, CoordinationError>;

    /// Ask the agent to stop a running task; it reports `cancelled`
    /// through the normal completion path.
    async fn cancel(&self, task_id: &str);
}

/// Handle table keyed by agent id.
#[derive(Default)]
pub struct Dispatch {
    handles: DashMap<String, Arc<dyn AgentHandle>>,
}

impl Dispatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, handle: Arc<dyn AgentHandle>) {
        self.handles.insert(handle.id().to_string(), handle);
    }

    pub fn get(&self, agent_id: &str) -> Option<Arc<dyn AgentHandle>> {
        self.handles.get(agent_id).map(|h| h.value().clone())
    }
}

/// In-process worker: runs the executor on the coordinator's own
/// runtime, reporting straight into the task store.
pub struct LocalAgentHandle {
    id: String,
    executor: Arc<Executor>,
    reporter: Arc<dyn StatusReporter>,
    tracker: JobTracker,
    max_concurrent: usize,
}

impl LocalAgentHandle {
    pub fn new(
        id: impl Into<String>,
        executor: Arc<Executor>,
        reporter: Arc<dyn StatusReporter>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            id: id.into(),
            executor,
            reporter,
            tracker: JobTracker::new(),
            max_concurrent,
        }
    }
}

#[async_trait]
impl AgentHandle for LocalAgentHandle {
    fn id(&self) -> &str {
        &self.id
    }

    async fn assign(&self, task: TaskDescriptor) -> Result<bool, CoordinationError> {
        let token = CancellationToken::new();
        if !self
            .tracker
            .try_register(&task.id, token.clone(), self.max_concurrent)
            .await
        {
            return Ok(false);
        }

        let executor = self.executor.clone();
        let reporter = self.reporter.clone();
        let tracker = self.tracker.clone();
        tokio::spawn(async move {
            let outcome = executor.execute(&task, reporter.as_ref(), token).await;
            tracker.finish(&task.id).await;
            debug!(task = %task.name, ?outcome, "local worker finished task");
        });

        Ok(true)
    }

    async fn cancel(&self, task_id: &str) {
        self.tracker.cancel(task_id).await;
    }
}

/// Remote agent reached over its handoff API.
pub struct RemoteAgentHandle {
    id: String,
    endpoint: String,
    client: reqwest::Client,
}

impl RemoteAgentHandle {
    pub fn new(id: impl Into<String>, endpoint: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REMOTE_REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            id: id.into(),
            endpoint: endpoint.into(),
            client,
        }
    }
}

#[async_trait]
impl AgentHandle for RemoteAgentHandle {
    fn id(&self) -> &str {
        &self.id
    }

    async fn assign(&self, task: TaskDescriptor) -> Result<bool, CoordinationError> {
        let url = format!("{}/api/task", self.endpoint);
        let resp = self
            .client
            .post(&url)
            .json(&task)
            .send()
            .await
            .map_err(|e| CoordinationError::AgentUnreachable {
                agent: self.id.clone(),
                detail: e.to_string(),
            })?;

        if resp.status().is_success() {
            Ok(true)
        } else {
            debug!(agent = %self.id, status = %resp.status(), "handoff rejected");
            Ok(false)
        }
    }

    async fn cancel(&self, task_id: &str) {
        let url = format!("{}/api/tasks/{task_id}/cancel", self.endpoint);
        if let Err(e) = self.client.post(&url).send().await {
            warn!(agent = %self.id, "failed to deliver cancel: {e}");
        }
    }
}
