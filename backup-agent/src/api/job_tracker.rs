//! Tracking of tasks currently running on this agent.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// Tracks running tasks and their cancellation tokens. Admission is
/// atomic with the capacity check so concurrent handoffs cannot
/// oversubscribe the agent.
#[derive(Clone, Default)]
pub struct JobTracker {
    jobs: Arc<RwLock<HashMap<String, CancellationToken>>>,
}

impl JobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a task if the agent has capacity left. Returns false when
    /// the task would exceed `max_concurrent` or is already running.
    pub async fn try_register(
        &self,
        task_id: &str,
        token: CancellationToken,
        max_concurrent: usize,
    ) -> bool {
        let mut jobs = self.jobs.write().await;
        if jobs.len() >= max_concurrent || jobs.contains_key(task_id) {
            return false;
        }
        jobs.insert(task_id.to_string(), token);
        true
    }

    /// Cancel a running task by its ID.
    pub async fn cancel(&self, task_id: &str) -> bool {
        let jobs = self.jobs.read().await;
        if let Some(token) = jobs.get(task_id) {
            token.cancel();
            true
        } else {
            false
        }
    }

    /// Cancel everything, used on shutdown.
    pub async fn cancel_all(&self) {
        let jobs = self.jobs.read().await;
        for token in jobs.values() {
            token.cancel();
        }
    }

    /// Remove a task from tracking once it reaches a terminal outcome.
    pub async fn finish(&self, task_id: &str) {
        let mut jobs = self.jobs.write().await;
        jobs.remove(task_id);
    }

    pub async fn running_count(&self) -> usize {
        let jobs = self.jobs.read().await;
        jobs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn capacity_is_enforced_at_admission() {
        let tracker = JobTracker::new();
        assert!(tracker.try_register("a", CancellationToken::new(), 2).await);
        assert!(tracker.try_register("b", CancellationToken::new(), 2).await);
        assert!(!tracker.try_register("c", CancellationToken::new(), 2).await);

        tracker.finish("a").await;
        assert!(tracker.try_register("c", CancellationToken::new(), 2).await);
    }

    #[tokio::test]
    async fn duplicate_task_ids_are_rejected() {
        let tracker = JobTracker::new();
        assert!(tracker.try_register("a", CancellationToken::new(), 4).await);
        assert!(!tracker.try_register("a", CancellationToken::new(), 4).await);
    }

    #[tokio::test]
    async fn cancel_fires_the_token() {
        let tracker = JobTracker::new();
        let token = CancellationToken::new();
        tracker.try_register("a", token.clone(), 1).await;

        assert!(tracker.cancel("a").await);
        assert!(token.is_cancelled());
        assert!(!tracker.cancel("missing").await);
    }
}
