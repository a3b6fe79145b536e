//! Task wire types exchanged between the coordinator and execution agents.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// What an agent is able to run. Advertised at registration and matched
/// by the coordinator when assigning work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Backup,
    Verify,
    Cleanup,
}

impl Capability {
    /// Heavy capabilities compete for CPU/IO and go through the
    /// coordinator's resource gate before assignment.
    pub fn is_heavy(&self) -> bool {
        matches!(self, Capability::Backup | Capability::Verify)
    }
}

/// One unit of work as handed off to an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDescriptor {
    pub id: String,
    /// Directory name, unique within a session.
    pub name: String,
    pub source: PathBuf,
    pub destination: PathBuf,
    /// Size reported by the directory catalog; 0 when measurement failed.
    pub declared_size: u64,
    pub priority: u8,
    pub required_capability: Capability,
    pub dry_run: bool,
}

/// Terminal outcome of a task execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    Success,
    Failed,
    Cancelled,
}

/// Incremental progress for a running task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    /// 0-100.
    pub percent: u8,
    pub bytes_copied: u64,
    /// Running transfer counter from the sync tool, when it reported one.
    pub file_count: Option<u64>,
    /// Present at most once per second.
    pub bytes_per_sec: Option<u64>,
}

/// Final report for a finished task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionReport {
    pub outcome: TaskOutcome,
    pub error: Option<String>,
    /// Total transferred-file count from the end-of-run summary,
    /// best-effort.
    pub file_count: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&Capability::Backup).unwrap(),
            "\"backup\""
        );
        let parsed: Capability = serde_json::from_str("\"verify\"").unwrap();
        assert_eq!(parsed, Capability::Verify);
    }

    #[test]
    fn heavy_capabilities() {
        assert!(Capability::Backup.is_heavy());
        assert!(Capability::Verify.is_heavy());
        assert!(!Capability::Cleanup.is_heavy());
    }
}
