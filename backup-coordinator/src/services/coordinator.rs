//! The scheduling loop.
//!
//! On a fixed cadence: reclaim units held by dead agents, then match
//! pending work to eligible agents by capability and load. Claims are
//! atomic through the task store, so no tick iteration (or concurrent
//! control action) can double-assign a unit.

use crate::models::session::{Session, SessionState};
use crate::services::dispatch::Dispatch;
use crate::services::registry::AgentRegistry;
use crate::services::resource::ResourceGate;
use crate::services::store::TaskStore;
use crate::utils::log_buffer::LogBuffer;
use crate::ws::ui::UiBroadcaster;
use serde_json::json;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct Coordinator {
    store: Arc<TaskStore>,
    registry: Arc<AgentRegistry>,
    dispatch: Arc<Dispatch>,
    gate: Arc<dyn ResourceGate>,
    session: Arc<RwLock<Session>>,
    logs: LogBuffer,
    ui: UiBroadcaster,
    destination_root: PathBuf,
    tick_interval: Duration,
    eviction_timeout: Duration,
    /// The in-process worker has no heartbeat transport; the tick loop
    /// refreshes its liveness itself.
    local_agent_id: Option<String>,
}

#[allow(clippy::too_many_arguments)]
impl Coordinator {
    pub fn new(
        store: Arc<TaskStore>,
        registry: Arc<AgentRegistry>,
        dispatch: Arc<Dispatch>,
        gate: Arc<dyn ResourceGate>,
        session: Arc<RwLock<Session>>,
        logs: LogBuffer,
        ui: UiBroadcaster,
        destination_root: PathBuf,
        tick_interval: Duration,
        eviction_timeout: Duration,
        local_agent_id: Option<String>,
    ) -> Self {
        Self {
            store,
            registry,
            dispatch,
            gate,
            session,
            logs,
            ui,
            destination_root,
            tick_interval,
            eviction_timeout,
            local_agent_id,
        }
    }

    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.tick_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => self.tick().await,
                    _ = cancel.cancelled() => break,
                }
            }
        })
    }

    /// One coordination cycle: liveness first, then assignment, then
    /// run-completion reconciliation.
    pub async fn tick(&self) {
        if let Some(local) = &self.local_agent_id {
            self.registry.touch(local);
        }

        self.reclaim_orphaned_units();

        let (running, dry_run) = {
            let session = self.session.read().unwrap();
            (session.state == SessionState::Running, session.dry_run)
        };
        if running {
            self.assign_pending(dry_run).await;
            self.reconcile_run_completion();
        }
    }

    /// Evict silent agents and return their units to the pending queue.
    /// Runs every tick regardless of session state, so a crashed
    /// worker's unit is never stuck past one eviction cycle.
    fn reclaim_orphaned_units(&self) {
        for agent_id in self.registry.evict_stale(self.eviction_timeout) {
            let released = self.store.release_units_for(&agent_id);
            if released.is_empty() {
                continue;
            }
            warn!(
                agent_id = %agent_id,
                units = ?released,
                "reassigned units from evicted agent"
            );
            self.logs.add(
                "warning",
                format!(
                    "Agent {agent_id} timed out; re-queued {}",
                    released.join(", ")
                ),
                None,
            );
            self.ui.broadcast(
                "agent:evicted",
                json!({ "agentId": agent_id, "released": released }),
            );
        }
    }

    async fn assign_pending(&self, dry_run: bool) {
        let mut attempted: HashSet<String> = HashSet::new();

        loop {
            let Some(unit) = self.store.claim_next_pending() else {
                break;
            };

            // A unit that comes back around was already offered this
            // tick; leave it pending and stop.
            if !attempted.insert(unit.id.clone()) {
                let _ = self.store.release_claim(&unit.id);
                break;
            }

            // Back-pressure: constrained resources defer assignment to
            // a later tick, they do not fail the unit.
            if !self.gate.can_start(unit.required_capability) {
                debug!(unit = %unit.name, "resource gate closed, deferring assignment");
                let _ = self.store.release_claim(&unit.id);
                break;
            }

            let eligible = self.registry.find_eligible(unit.required_capability);
            let Some((record, handle)) = eligible
                .into_iter()
                .find_map(|r| self.dispatch.get(&r.id).map(|h| (r, h)))
            else {
                debug!(unit = %unit.name, "no eligible agent, leaving pending");
                let _ = self.store.release_claim(&unit.id);
                break;
            };

            // Reserve the slot before the handoff so a concurrent tick
            // cannot oversubscribe the agent.
            if self.registry.increment_load(&record.id).is_err() {
                let _ = self.store.release_claim(&unit.id);
                continue;
            }

            let descriptor = unit.descriptor(&self.destination_root, dry_run);
            match handle.assign(descriptor).await {
                Ok(true) => {
                    let _ = self.store.assign_to(&unit.id, &record.id);
                    info!(unit = %unit.name, agent_id = %record.id, "unit assigned");
                    self.ui.broadcast(
                        "unit:assigned",
                        json!({ "name": unit.name, "agentId": record.id }),
                    );
                }
                Ok(false) => {
                    let _ = self.registry.decrement_load(&record.id);
                    let _ = self.store.release_claim(&unit.id);
                    self.logs.add(
                        "warning",
                        format!("Agent {} rejected handoff of {}", record.id, unit.name),
                        Some(unit.name.clone()),
                    );
                }
                Err(e) => {
                    let _ = self.registry.decrement_load(&record.id);
                    let _ = self.store.release_claim(&unit.id);
                    warn!(unit = %unit.name, "handoff failed: {e}");
                    self.logs.add("warning", e.to_string(), Some(unit.name.clone()));
                }
            }
        }
    }

    /// When every selected unit is terminal the run is over: archive it
    /// and stop the session.
    fn reconcile_run_completion(&self) {
        if !self.store.all_selected_terminal() {
            return;
        }

        let units = self.store.snapshot();
        {
            let mut session = self.session.write().unwrap();
            session.archive_run(&units);
        }
        info!("backup run finished");
        self.logs.add("info", "Backup run finished".to_string(), None);
        self.ui.broadcast("session:completed", json!({}));
    }
}
