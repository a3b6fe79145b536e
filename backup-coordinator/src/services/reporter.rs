//! The coordinator's implementation of the agent status-reporter seam.
//!
//! Both execution paths converge here: the in-process worker calls it
//! directly through the `StatusReporter` trait, and the HTTP report
//! routes call the same `apply_*` methods after validating the sender.
//! One update API, one source of truth.

use crate::error::CoordinationError;
use crate::models::session::Session;
use crate::models::unit::UnitStatus;
use crate::services::registry::AgentRegistry;
use crate::services::store::TaskStore;
use crate::utils::log_buffer::LogBuffer;
use crate::utils::speed_history::SpeedHistory;
use crate::ws::ui::UiBroadcaster;
use async_trait::async_trait;
use backup_agent::report::StatusReporter;
use backup_agent::task::{CompletionReport, ProgressUpdate, TaskOutcome};
use serde_json::json;
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

pub struct CoordinatorReporter {
    store: Arc<TaskStore>,
    registry: Arc<AgentRegistry>,
    session: Arc<RwLock<Session>>,
    logs: LogBuffer,
    speeds: SpeedHistory,
    ui: UiBroadcaster,
}

impl CoordinatorReporter {
    pub fn new(
        store: Arc<TaskStore>,
        registry: Arc<AgentRegistry>,
        session: Arc<RwLock<Session>>,
        logs: LogBuffer,
        speeds: SpeedHistory,
        ui: UiBroadcaster,
    ) -> Self {
        Self {
            store,
            registry,
            session,
            logs,
            speeds,
            ui,
        }
    }

    /// Whether `agent_id` is the agent currently recorded on the unit.
    /// Reports from anyone else are stale by definition: the unit was
    /// reassigned after an eviction, and eviction takes precedence.
    pub fn agent_holds(&self, unit_id: &str, agent_id: &str) -> bool {
        self.store
            .get(unit_id)
            .map(|u| u.status.is_claimed() && u.assigned_agent.as_deref() == Some(agent_id))
            .unwrap_or(false)
    }

    pub fn apply_progress(&self, unit_id: &str, update: &ProgressUpdate) {
        let applied = self.store.update_progress(
            unit_id,
            update.percent,
            update.bytes_copied,
            update.file_count,
        );
        if !applied {
            return;
        }

        if let Some(speed) = update.bytes_per_sec {
            self.speeds.push(speed);
        }

        if let Some(unit) = self.store.get(unit_id) {
            self.ui.broadcast(
                "unit:progress",
                json!({
                    "name": unit.name,
                    "percent": unit.progress,
                    "sizeCopied": unit.size_copied,
                    "fileCount": unit.file_count,
                    "bytesPerSec": update.bytes_per_sec,
                }),
            );
        }
    }

    pub fn apply_completion(&self, unit_id: &str, report: &CompletionReport) {
        let Some(unit) = self.store.get(unit_id) else {
            warn!(unit_id, "completion report for unknown unit");
            return;
        };
        if !unit.status.is_claimed() {
            warn!(unit = %unit.name, status = ?unit.status, "dropping stale completion report");
            return;
        }
        let holder = unit.assigned_agent.clone();

        let transition = match report.outcome {
            TaskOutcome::Success => self.store.complete(unit_id, true, None, report.file_count),
            TaskOutcome::Failed => {
                self.store
                    .complete(unit_id, false, report.error.clone(), report.file_count)
            }
            TaskOutcome::Cancelled => self.store.cancel(unit_id),
        };
        let Ok(new_status) = transition else {
            return;
        };

        if let Some(agent_id) = holder {
            if let Err(e) = self.registry.decrement_load(&agent_id) {
                warn!(agent_id, "load accounting mismatch on completion: {e}");
            }
        }

        match new_status {
            UnitStatus::Completed => {
                info!(unit = %unit.name, "unit completed");
                self.logs.add_classified(
                    format!("Completed backup of {}", unit.name),
                    Some(unit.name.clone()),
                );
                self.ui
                    .broadcast("unit:completed", json!({ "name": unit.name }));
            }
            UnitStatus::Pending => {
                let detail = report.error.as_deref().unwrap_or("unknown error");
                self.logs.add(
                    "warning",
                    format!("Backup of {} failed ({detail}), queued for retry", unit.name),
                    Some(unit.name.clone()),
                );
                self.ui
                    .broadcast("unit:retrying", json!({ "name": unit.name }));
            }
            UnitStatus::Failed => {
                let failure = CoordinationError::SyncToolFailure(
                    report
                        .error
                        .clone()
                        .unwrap_or_else(|| "unknown error".to_string()),
                );
                self.session
                    .write()
                    .unwrap()
                    .push_error(unit.name.clone(), failure.to_string());
                self.logs.add_classified(
                    format!("Backup of {} failed permanently: {failure}", unit.name),
                    Some(unit.name.clone()),
                );
                self.ui.broadcast(
                    "unit:failed",
                    json!({ "name": unit.name, "error": failure.to_string() }),
                );
            }
            UnitStatus::Cancelled => {
                self.logs.add(
                    "info",
                    format!("Backup of {} cancelled", unit.name),
                    Some(unit.name.clone()),
                );
                self.ui
                    .broadcast("unit:cancelled", json!({ "name": unit.name }));
            }
            _ => {}
        }
    }
}

#[async_trait]
impl StatusReporter for CoordinatorReporter {
    async fn progress(&self, task_id: &str, update: ProgressUpdate) {
        self.apply_progress(task_id, &update);
    }

    async fn completed(&self, task_id: &str, report: CompletionReport) {
        self.apply_completion(task_id, &report);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::agent::AgentRecord;
    use crate::models::unit::BackupUnit;
    use backup_agent::task::Capability;
    use std::path::PathBuf;

    fn reporter_fixture() -> (Arc<TaskStore>, Arc<AgentRegistry>, CoordinatorReporter, String) {
        let store = Arc::new(TaskStore::new());
        store
            .add_unit(BackupUnit::new("Docs", PathBuf::from("/h/Docs"), 100, 1))
            .unwrap();
        let registry = Arc::new(AgentRegistry::new());
        registry.register(AgentRecord::new("a1", vec![Capability::Backup], 2, None));

        let session = Arc::new(RwLock::new(Session::new()));
        let reporter = CoordinatorReporter::new(
            store.clone(),
            registry.clone(),
            session,
            LogBuffer::new(16),
            SpeedHistory::new(),
            UiBroadcaster::new(),
        );

        let unit = store.claim_next_pending().unwrap();
        store.assign_to(&unit.id, "a1").unwrap();
        registry.increment_load("a1").unwrap();

        (store, registry, reporter, unit.id)
    }

    #[test]
    fn completion_releases_agent_load() {
        let (store, registry, reporter, unit_id) = reporter_fixture();

        reporter.apply_completion(
            &unit_id,
            &CompletionReport {
                outcome: TaskOutcome::Success,
                error: None,
                file_count: Some(7),
            },
        );

        assert_eq!(store.get(&unit_id).unwrap().status, UnitStatus::Completed);
        assert_eq!(registry.get("a1").unwrap().current_tasks, 0);
    }

    #[test]
    fn stale_completion_does_not_touch_load() {
        let (store, registry, reporter, unit_id) = reporter_fixture();

        // The agent dies and the unit is reassigned.
        store.release_units_for("a1");
        registry.decrement_load("a1").unwrap();

        reporter.apply_completion(
            &unit_id,
            &CompletionReport {
                outcome: TaskOutcome::Failed,
                error: Some("late report".into()),
                file_count: None,
            },
        );

        // The stale failure is suppressed: the unit stays pending with
        // no retry-count bump and load is untouched.
        let unit = store.get(&unit_id).unwrap();
        assert_eq!(unit.status, UnitStatus::Pending);
        assert_eq!(unit.retry_count, 0);
        assert_eq!(registry.get("a1").unwrap().current_tasks, 0);
    }

    #[test]
    fn agent_holds_tracks_assignment() {
        let (store, _registry, reporter, unit_id) = reporter_fixture();
        assert!(reporter.agent_holds(&unit_id, "a1"));
        assert!(!reporter.agent_holds(&unit_id, "a2"));

        store.release_units_for("a1");
        assert!(!reporter.agent_holds(&unit_id, "a1"));
    }
}
