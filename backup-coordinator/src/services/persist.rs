//! JSON snapshot persistence.
//!
//! A snapshot of session + task store + agent registry is enough to
//! resume after a process restart. Writes are atomic (temp file +
//! rename) and debounced behind the store's change hook so a burst of
//! progress updates produces one write.

use crate::models::agent::{AgentLiveness, AgentRecord};
use crate::models::session::{Session, SessionState};
use crate::models::unit::{BackupUnit, UnitStatus};
use crate::services::registry::AgentRegistry;
use crate::services::store::TaskStore;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const SAVE_DEBOUNCE: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub session: Session,
    pub units: Vec<BackupUnit>,
    pub agents: Vec<AgentRecord>,
    pub saved_at: i64,
}

impl Snapshot {
    pub fn capture(session: &Session, store: &TaskStore, registry: &AgentRegistry) -> Self {
        Self {
            session: session.clone(),
            units: store.snapshot(),
            agents: registry.snapshot(),
            saved_at: chrono::Utc::now().timestamp(),
        }
    }

    /// Atomic write: serialize to a sibling temp file, then rename over
    /// the target.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(self)?)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn load(path: &Path) -> anyhow::Result<Option<Snapshot>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    /// Prepare a snapshot for restoration into a fresh process. The
    /// process that held claims and ran agents is gone, so orphaned
    /// claims go back to pending, agents are stopped until they
    /// heartbeat again, and a live run is demoted to paused for the
    /// operator to resume.
    pub fn normalize_for_restore(&mut self) {
        for unit in &mut self.units {
            if unit.status.is_claimed() {
                unit.status = UnitStatus::Pending;
                unit.assigned_agent = None;
                unit.progress = 0;
                unit.size_copied = 0;
            }
        }
        for agent in &mut self.agents {
            agent.status = AgentLiveness::Stopped;
            agent.current_tasks = 0;
        }
        if self.session.state == SessionState::Running {
            self.session.state = SessionState::Paused;
        }
    }
}

/// Debounced background writer driven by the store's change hook.
pub struct SnapshotSaver {
    path: PathBuf,
    notify: Notify,
}

impl SnapshotSaver {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            notify: Notify::new(),
        }
    }

    /// Mark state dirty; the background task coalesces requests.
    pub fn request_save(&self) {
        self.notify.notify_one();
    }

    pub async fn run(
        self: Arc<Self>,
        store: Arc<TaskStore>,
        registry: Arc<AgentRegistry>,
        session: Arc<RwLock<Session>>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = cancel.cancelled() => return,
            }
            tokio::time::sleep(SAVE_DEBOUNCE).await;

            let snapshot = {
                let session = session.read().unwrap().clone();
                Snapshot::capture(&session, &store, &registry)
            };

            let path = self.path.clone();
            let result =
                tokio::task::spawn_blocking(move || snapshot.save(&path)).await;
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("failed to persist snapshot: {e}"),
                Err(e) => warn!("snapshot writer task failed: {e}"),
            }
        }
    }
}

/// Restore persisted state into the live structures.
pub fn restore(
    snapshot: Snapshot,
    store: &TaskStore,
    registry: &AgentRegistry,
    session: &RwLock<Session>,
) {
    info!(
        units = snapshot.units.len(),
        agents = snapshot.agents.len(),
        "restoring persisted state"
    );
    store.replace_units(snapshot.units);
    registry.restore(snapshot.agents);
    *session.write().unwrap() = snapshot.session;
}
