//! Session lifecycle operations: start, pause, stop, selection,
//! dry-run toggling.
//!
//! Start enforces the session-level preconditions (destination mounted,
//! enough free space for the selected units) before any unit runs;
//! precondition failures abort the whole run and are attributed to no
//! directory. Stop is idempotent and terminates in-flight work as
//! cancelled, never failed.

use crate::error::AppError;
use crate::models::session::SessionState;
use crate::services::catalog::DirectoryCatalog;
use crate::services::disk;
use crate::state::AppState;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

pub async fn start_run(state: &Arc<AppState>) -> Result<(), AppError> {
    {
        let session = state.session.read().unwrap();
        match session.state {
            SessionState::Running => return Ok(()),
            SessionState::Paused => {}
            SessionState::Stopped => {}
        }
    }

    // Resuming a paused run keeps the existing unit set and simply
    // continues from the first non-terminal unit in catalog order.
    let resuming = state.session.read().unwrap().state == SessionState::Paused;
    if resuming {
        state.session.write().unwrap().state = SessionState::Running;
        info!("backup run resumed");
        state.logs.add("info", "Backup run resumed".to_string(), None);
        state.ui.broadcast("session:resumed", json!({}));
        state.saver.request_save();
        return Ok(());
    }

    // Preconditions: the mount that holds the destination must be
    // there before anything starts.
    let config = &state.config;
    let mount_base = config
        .backup_dest
        .parent()
        .unwrap_or(&config.backup_dest);
    disk::verify_destination(mount_base).await?;
    tokio::fs::create_dir_all(&config.backup_dest)
        .await
        .map_err(|e| AppError::Internal(e.into()))?;

    let catalog = DirectoryCatalog::new(
        config.home_dir.clone(),
        config.hidden_allow_list.clone(),
        config.max_retries,
    );
    let units = catalog.discover().await.map_err(AppError::Internal)?;
    let required: u64 = units.iter().map(|u| u.size).sum();
    disk::ensure_capacity(&config.backup_dest, required).await?;

    let unit_count = units.len();
    state.store.replace_units(units);

    {
        let mut session = state.session.write().unwrap();
        session.id = uuid::Uuid::new_v4().to_string();
        session.state = SessionState::Running;
        session.start_time = Some(chrono::Utc::now().timestamp());
        session.errors.clear();
    }

    info!(units = unit_count, required_bytes = required, "backup run started");
    state.logs.add(
        "info",
        format!("Backup run started: {unit_count} directories, {required} bytes"),
        None,
    );
    state.ui.broadcast(
        "session:started",
        json!({ "units": unit_count, "totalSize": required }),
    );
    state.saver.request_save();
    Ok(())
}

pub fn pause_run(state: &Arc<AppState>) {
    {
        let mut session = state.session.write().unwrap();
        if session.state != SessionState::Running {
            return;
        }
        session.state = SessionState::Paused;
    }
    info!("backup run paused");
    state.logs.add("info", "Backup run paused".to_string(), None);
    state.ui.broadcast("session:paused", json!({}));
    state.saver.request_save();
}

/// Stop the run: cancel everything non-terminal, terminate in-flight
/// subprocesses via their agents, archive the run. Calling stop on an
/// already-stopped session is a no-op that does not duplicate a
/// history entry.
pub async fn stop_run(state: &Arc<AppState>) {
    {
        let session = state.session.read().unwrap();
        if session.state == SessionState::Stopped {
            return;
        }
    }

    for unit in state.store.snapshot() {
        if unit.status.is_claimed() {
            if let Some(agent_id) = &unit.assigned_agent {
                if let Some(handle) = state.dispatch.get(agent_id) {
                    handle.cancel(&unit.id).await;
                }
                let _ = state.registry.decrement_load(agent_id);
            }
            let _ = state.store.cancel(&unit.id);
        } else if unit.selected && unit.status == crate::models::unit::UnitStatus::Pending {
            let _ = state.store.cancel(&unit.id);
        }
    }

    {
        let units = state.store.snapshot();
        let mut session = state.session.write().unwrap();
        session.archive_run(&units);
    }

    info!("backup run stopped");
    state.logs.add("info", "Backup run stopped".to_string(), None);
    state.ui.broadcast("session:stopped", json!({}));
    state.saver.request_save();
}

pub fn select_units(state: &Arc<AppState>, names: &[String]) {
    state.store.select_units(names);
    state
        .ui
        .broadcast("session:selection", json!({ "selected": names }));
    state.saver.request_save();
}

pub fn set_dry_run(state: &Arc<AppState>, enabled: bool) {
    state.session.write().unwrap().dry_run = enabled;
    state
        .ui
        .broadcast("session:dryrun", json!({ "enabled": enabled }));
    state.saver.request_save();
}
