//! Registry of execution agents and their liveness.
//!
//! Owns agent records exclusively: the scheduler reads eligibility and
//! adjusts load only through the bound-checked operations here. Agents
//! that stop heartbeating are evicted so their units can be reassigned.

use crate::error::CoordinationError;
use crate::models::agent::{AgentLiveness, AgentRecord};
use backup_agent::task::Capability;
use dashmap::DashMap;
use std::cmp::Ordering;
use std::time::Duration;
use tracing::{info, warn};

pub struct AgentRegistry {
    agents: DashMap<String, AgentRecord>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            agents: DashMap::new(),
        }
    }

    /// Register or replace an agent. Re-registration resets its load:
    /// a restarted agent has no running tasks.
    pub fn register(&self, record: AgentRecord) {
        info!(
            agent_id = %record.id,
            capabilities = ?record.capabilities,
            max_concurrent = record.max_concurrent_tasks,
            "agent registered"
        );
        self.agents.insert(record.id.clone(), record);
    }

    pub fn get(&self, agent_id: &str) -> Option<AgentRecord> {
        self.agents.get(agent_id).map(|r| r.value().clone())
    }

    /// Record a heartbeat: refreshes last-seen, updates the reported
    /// load, and revives a previously evicted agent.
    pub fn heartbeat(&self, agent_id: &str, current_tasks: usize) -> bool {
        self.heartbeat_at(agent_id, current_tasks, chrono::Utc::now().timestamp())
    }

    pub fn heartbeat_at(&self, agent_id: &str, current_tasks: usize, timestamp: i64) -> bool {
        match self.agents.get_mut(agent_id) {
            Some(mut record) => {
                record.last_heartbeat = timestamp;
                record.current_tasks = current_tasks.min(record.max_concurrent_tasks);
                record.status = AgentLiveness::Active;
                true
            }
            None => false,
        }
    }

    /// Refresh liveness without touching load; used by the coordinator
    /// for its in-process worker, which has no heartbeat transport.
    pub fn touch(&self, agent_id: &str) {
        if let Some(mut record) = self.agents.get_mut(agent_id) {
            record.last_heartbeat = chrono::Utc::now().timestamp();
        }
    }

    /// Mark agents whose last heartbeat exceeds the timeout as stopped
    /// and zero their load. Returns the evicted ids so the caller can
    /// reassign the units they held; this runs on every coordination
    /// tick.
    pub fn evict_stale(&self, timeout: Duration) -> Vec<String> {
        let cutoff = chrono::Utc::now().timestamp() - timeout.as_secs() as i64;
        let mut evicted = Vec::new();

        for mut entry in self.agents.iter_mut() {
            if entry.status == AgentLiveness::Active && entry.last_heartbeat < cutoff {
                warn!(
                    agent_id = %entry.id,
                    last_heartbeat = entry.last_heartbeat,
                    "agent missed heartbeats, evicting"
                );
                entry.status = AgentLiveness::Stopped;
                entry.current_tasks = 0;
                evicted.push(entry.id.clone());
            }
        }

        evicted
    }

    /// Active, under-capacity agents offering the capability, sorted
    /// ascending by load score with the agent id as a deterministic
    /// tie-break.
    pub fn find_eligible(&self, capability: Capability) -> Vec<AgentRecord> {
        let mut eligible: Vec<AgentRecord> = self
            .agents
            .iter()
            .filter(|r| r.is_active() && r.offers(capability) && r.has_capacity())
            .map(|r| r.value().clone())
            .collect();

        eligible.sort_by(|a, b| {
            a.load_score()
                .partial_cmp(&b.load_score())
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        eligible
    }

    /// Reserve one slot on an agent. Fails when the agent is unknown or
    /// already at its concurrency limit.
    pub fn increment_load(&self, agent_id: &str) -> Result<(), CoordinationError> {
        let mut record = self
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| CoordinationError::UnknownAgent(agent_id.to_string()))?;
        if record.current_tasks >= record.max_concurrent_tasks {
            return Err(CoordinationError::CapacityExceeded(agent_id.to_string()));
        }
        record.current_tasks += 1;
        Ok(())
    }

    /// Release one slot. Fails on underflow, which would mean load
    /// accounting went through some path other than this registry.
    pub fn decrement_load(&self, agent_id: &str) -> Result<(), CoordinationError> {
        let mut record = self
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| CoordinationError::UnknownAgent(agent_id.to_string()))?;
        if record.current_tasks == 0 {
            return Err(CoordinationError::CapacityExceeded(agent_id.to_string()));
        }
        record.current_tasks -= 1;
        Ok(())
    }

    pub fn snapshot(&self) -> Vec<AgentRecord> {
        let mut agents: Vec<AgentRecord> = self.agents.iter().map(|r| r.value().clone()).collect();
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        agents
    }

    pub fn restore(&self, records: Vec<AgentRecord>) {
        self.agents.clear();
        for record in records {
            self.agents.insert(record.id.clone(), record);
        }
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(id: &str, max: usize) -> AgentRecord {
        AgentRecord::new(id, vec![Capability::Backup], max, None)
    }

    #[test]
    fn eligible_agents_sorted_by_load_then_id() {
        let registry = AgentRegistry::new();
        registry.register(agent("bravo", 2));
        registry.register(agent("alpha", 2));
        registry.register(agent("charlie", 2));
        registry.increment_load("bravo").unwrap();

        let eligible = registry.find_eligible(Capability::Backup);
        let ids: Vec<&str> = eligible.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["alpha", "charlie", "bravo"]);
    }

    #[test]
    fn capability_filter_applies() {
        let registry = AgentRegistry::new();
        registry.register(agent("a1", 2));
        assert!(registry.find_eligible(Capability::Cleanup).is_empty());
    }

    #[test]
    fn full_agents_are_not_eligible() {
        let registry = AgentRegistry::new();
        registry.register(agent("a1", 1));
        registry.increment_load("a1").unwrap();
        assert!(registry.find_eligible(Capability::Backup).is_empty());
    }

    #[test]
    fn load_is_bound_checked() {
        let registry = AgentRegistry::new();
        registry.register(agent("a1", 1));

        registry.increment_load("a1").unwrap();
        assert!(matches!(
            registry.increment_load("a1"),
            Err(CoordinationError::CapacityExceeded(_))
        ));

        registry.decrement_load("a1").unwrap();
        assert!(matches!(
            registry.decrement_load("a1"),
            Err(CoordinationError::CapacityExceeded(_))
        ));

        assert!(matches!(
            registry.increment_load("ghost"),
            Err(CoordinationError::UnknownAgent(_))
        ));
    }

    #[test]
    fn stale_agents_are_evicted_and_load_zeroed() {
        let registry = AgentRegistry::new();
        registry.register(agent("fresh", 2));
        registry.register(agent("silent", 2));
        registry.increment_load("silent").unwrap();

        // "silent" last heartbeated 60s ago.
        let old = chrono::Utc::now().timestamp() - 60;
        registry.heartbeat_at("silent", 1, old);

        let evicted = registry.evict_stale(Duration::from_secs(30));
        assert_eq!(evicted, vec!["silent".to_string()]);

        let silent = registry.get("silent").unwrap();
        assert_eq!(silent.status, AgentLiveness::Stopped);
        assert_eq!(silent.current_tasks, 0, "load score decreased on eviction");

        // A fresh agent is untouched, and eviction is not repeated.
        assert!(registry.get("fresh").unwrap().is_active());
        assert!(registry.evict_stale(Duration::from_secs(30)).is_empty());
    }

    #[test]
    fn heartbeat_revives_evicted_agent() {
        let registry = AgentRegistry::new();
        registry.register(agent("a1", 2));
        registry.heartbeat_at("a1", 0, chrono::Utc::now().timestamp() - 120);
        registry.evict_stale(Duration::from_secs(30));
        assert!(!registry.get("a1").unwrap().is_active());

        assert!(registry.heartbeat("a1", 1));
        let record = registry.get("a1").unwrap();
        assert!(record.is_active());
        assert_eq!(record.current_tasks, 1);
    }

    #[test]
    fn unknown_heartbeat_is_reported() {
        let registry = AgentRegistry::new();
        assert!(!registry.heartbeat("ghost", 0));
    }
}
