//! The backup unit: one directory slated for copying, the scheduling
//! granule.

use backup_agent::task::{Capability, TaskDescriptor};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Lifecycle of a backup unit.
///
/// `pending → assigned → in_progress → {completed | failed}`; a failed
/// unit goes back to `pending` while retries remain. `cancelled` is
/// reachable from any non-terminal state on explicit cancellation, and
/// eviction of a dead agent moves `assigned`/`in_progress` back to
/// `pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Pending,
    Assigned,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl UnitStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UnitStatus::Completed | UnitStatus::Failed | UnitStatus::Cancelled
        )
    }

    /// States in which an agent legitimately holds the unit.
    pub fn is_claimed(&self) -> bool {
        matches!(self, UnitStatus::Assigned | UnitStatus::InProgress)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupUnit {
    pub id: String,
    pub name: String,
    pub path: PathBuf,
    /// Declared size from the catalog probe; 0 when measurement failed.
    pub size: u64,
    pub status: UnitStatus,
    pub assigned_agent: Option<String>,
    /// 0-100.
    pub progress: u8,
    pub size_copied: u64,
    pub file_count: Option<u64>,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    pub duration_secs: Option<u64>,
    /// Bytes/sec, frozen at completion.
    pub average_speed: Option<u64>,
    pub error_message: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub priority: u8,
    pub required_capability: Capability,
    pub selected: bool,
}

impl BackupUnit {
    pub fn new(name: impl Into<String>, path: PathBuf, size: u64, max_retries: u32) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            path,
            size,
            status: UnitStatus::Pending,
            assigned_agent: None,
            progress: 0,
            size_copied: 0,
            file_count: None,
            start_time: None,
            end_time: None,
            duration_secs: None,
            average_speed: None,
            error_message: None,
            retry_count: 0,
            max_retries,
            priority: priority_for_size(size),
            required_capability: Capability::Backup,
            selected: true,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Wire descriptor for handing this unit to an agent.
    pub fn descriptor(&self, destination_root: &Path, dry_run: bool) -> TaskDescriptor {
        TaskDescriptor {
            id: self.id.clone(),
            name: self.name.clone(),
            source: self.path.clone(),
            destination: destination_root.join(&self.name),
            declared_size: self.size,
            priority: self.priority,
            required_capability: self.required_capability,
            dry_run,
        }
    }
}

/// Smaller directories get higher priority for quick wins; large ones
/// run later.
pub fn priority_for_size(size: u64) -> u8 {
    if size < 1_000_000 {
        100
    } else if size < 100_000_000 {
        80
    } else if size < 1_000_000_000 {
        60
    } else {
        40
    }
}
