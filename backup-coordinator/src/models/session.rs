//! Session aggregate over one backup run.
//!
//! The ordered unit list itself lives in the task store; the session
//! only carries run-level state. The "current/next/last-completed"
//! conveniences are derived from the store's ordered list at read time,
//! never stored here.

use crate::models::unit::{BackupUnit, UnitStatus};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Stopped,
    Running,
    Paused,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionError {
    pub directory: String,
    pub message: String,
    pub timestamp: i64,
}

/// One archived run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub id: String,
    pub started_at: Option<i64>,
    pub finished_at: i64,
    pub completed_units: usize,
    pub failed_units: usize,
    pub cancelled_units: usize,
    pub bytes_copied: u64,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub state: SessionState,
    pub start_time: Option<i64>,
    pub dry_run: bool,
    pub errors: Vec<SessionError>,
    pub history: Vec<RunRecord>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            state: SessionState::Stopped,
            start_time: None,
            dry_run: false,
            errors: Vec::new(),
            history: Vec::new(),
        }
    }

    pub fn push_error(&mut self, directory: impl Into<String>, message: impl Into<String>) {
        self.errors.push(SessionError {
            directory: directory.into(),
            message: message.into(),
            timestamp: chrono::Utc::now().timestamp(),
        });
    }

    /// Close the current run and append it to history. Idempotent: a
    /// session that is already stopped is left untouched so repeated
    /// stops never duplicate a history entry.
    pub fn archive_run(&mut self, units: &[BackupUnit]) {
        if self.state == SessionState::Stopped {
            return;
        }

        let completed = units
            .iter()
            .filter(|u| u.status == UnitStatus::Completed)
            .count();
        let failed = units
            .iter()
            .filter(|u| u.status == UnitStatus::Failed)
            .count();
        let cancelled = units
            .iter()
            .filter(|u| u.status == UnitStatus::Cancelled)
            .count();
        let bytes_copied = units.iter().map(|u| u.size_copied).sum();

        self.history.push(RunRecord {
            id: self.id.clone(),
            started_at: self.start_time,
            finished_at: chrono::Utc::now().timestamp(),
            completed_units: completed,
            failed_units: failed,
            cancelled_units: cancelled,
            bytes_copied,
            dry_run: self.dry_run,
        });

        self.state = SessionState::Stopped;
        self.start_time = None;
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// First assigned/in-progress unit, in catalog order.
pub fn current_unit(units: &[BackupUnit]) -> Option<&BackupUnit> {
    units.iter().find(|u| u.status.is_claimed())
}

/// First selected pending unit, in catalog order.
pub fn next_unit(units: &[BackupUnit]) -> Option<&BackupUnit> {
    units
        .iter()
        .find(|u| u.selected && u.status == UnitStatus::Pending)
}

/// Most recently completed unit.
pub fn last_completed_unit(units: &[BackupUnit]) -> Option<&BackupUnit> {
    units
        .iter()
        .filter(|u| u.status == UnitStatus::Completed)
        .max_by_key(|u| u.end_time.unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn unit(name: &str, status: UnitStatus) -> BackupUnit {
        let mut unit = BackupUnit::new(name, PathBuf::from("/tmp").join(name), 100, 3);
        unit.status = status;
        unit
    }

    #[test]
    fn archive_is_idempotent() {
        let mut session = Session::new();
        session.state = SessionState::Running;

        let units = vec![
            unit("a", UnitStatus::Completed),
            unit("b", UnitStatus::Failed),
        ];

        session.archive_run(&units);
        assert_eq!(session.state, SessionState::Stopped);
        assert_eq!(session.history.len(), 1);
        assert_eq!(session.history[0].completed_units, 1);
        assert_eq!(session.history[0].failed_units, 1);

        // A second stop on an already-stopped session is a no-op.
        session.archive_run(&units);
        assert_eq!(session.history.len(), 1);
    }

    #[test]
    fn derived_pointers_follow_catalog_order() {
        let mut units = vec![
            unit("zeta", UnitStatus::Completed),
            unit("mid", UnitStatus::InProgress),
            unit("alpha", UnitStatus::Pending),
        ];
        units[0].end_time = Some(10);

        assert_eq!(current_unit(&units).unwrap().name, "mid");
        assert_eq!(next_unit(&units).unwrap().name, "alpha");
        assert_eq!(last_completed_unit(&units).unwrap().name, "zeta");

        units[2].selected = false;
        assert!(next_unit(&units).is_none());
    }
}
