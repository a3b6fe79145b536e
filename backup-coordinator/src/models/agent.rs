//! Execution agent records as tracked by the registry.

use backup_agent::task::Capability;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentLiveness {
    Active,
    Stopped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRecord {
    pub id: String,
    pub capabilities: Vec<Capability>,
    pub max_concurrent_tasks: usize,
    pub current_tasks: usize,
    /// Unix timestamp of the last heartbeat.
    pub last_heartbeat: i64,
    pub status: AgentLiveness,
    /// Base URL for remote agents; `None` for the in-process worker.
    pub endpoint: Option<String>,
}

impl AgentRecord {
    pub fn new(
        id: impl Into<String>,
        capabilities: Vec<Capability>,
        max_concurrent_tasks: usize,
        endpoint: Option<String>,
    ) -> Self {
        Self {
            id: id.into(),
            capabilities,
            max_concurrent_tasks,
            current_tasks: 0,
            last_heartbeat: chrono::Utc::now().timestamp(),
            status: AgentLiveness::Active,
            endpoint,
        }
    }

    /// Ratio of assigned units to capacity, clamped to [0, 1].
    pub fn load_score(&self) -> f32 {
        if self.max_concurrent_tasks == 0 {
            return 1.0;
        }
        (self.current_tasks as f32 / self.max_concurrent_tasks as f32).clamp(0.0, 1.0)
    }

    pub fn offers(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    pub fn has_capacity(&self) -> bool {
        self.current_tasks < self.max_concurrent_tasks
    }

    pub fn is_active(&self) -> bool {
        self.status == AgentLiveness::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_score_is_clamped() {
        let mut agent = AgentRecord::new("a1", vec![Capability::Backup], 2, None);
        assert_eq!(agent.load_score(), 0.0);

        agent.current_tasks = 1;
        assert_eq!(agent.load_score(), 0.5);

        agent.current_tasks = 5;
        assert_eq!(agent.load_score(), 1.0);

        agent.max_concurrent_tasks = 0;
        assert_eq!(agent.load_score(), 1.0);
    }

    #[test]
    fn capacity_and_capability_checks() {
        let mut agent = AgentRecord::new("a1", vec![Capability::Backup], 1, None);
        assert!(agent.offers(Capability::Backup));
        assert!(!agent.offers(Capability::Cleanup));
        assert!(agent.has_capacity());

        agent.current_tasks = 1;
        assert!(!agent.has_capacity());
    }
}
