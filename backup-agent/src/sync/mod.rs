//! External sync-tool invocation.
//!
//! The actual file copy is delegated to rsync, invoked per directory
//! with a fixed exclusion list and flags requesting line-oriented
//! progress plus end-of-run statistics.

pub mod progress;

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::warn;

/// Patterns excluded from every backup: build artifacts, dependency
/// caches, version-control internals, temp files.
pub const EXCLUDE_PATTERNS: &[&str] = &[
    "venv",
    ".venv",
    "env",
    ".env",
    "node_modules",
    "__pycache__",
    "*.pyc",
    ".git/objects",
    "dist",
    "build",
    ".next",
    ".cache",
    "*.log",
    "*.tmp",
    "*.swp",
];

/// Builds and manages sync-tool subprocesses.
#[derive(Debug, Clone)]
pub struct SyncTool {
    program: String,
    grace_period: Duration,
}

impl SyncTool {
    pub fn new(program: impl Into<String>, grace_period: Duration) -> Self {
        Self {
            program: program.into(),
            grace_period,
        }
    }

    /// Argument list for one directory transfer. Trailing slashes make
    /// the tool copy directory contents rather than nesting the source
    /// under the destination.
    pub fn build_args(source: &Path, destination: &Path, dry_run: bool) -> Vec<String> {
        let mut args = vec![
            "-avz".to_string(),
            "--no-perms".to_string(),
            "--no-owner".to_string(),
            "--no-group".to_string(),
            "--info=progress2".to_string(),
            "--stats".to_string(),
        ];
        for pattern in EXCLUDE_PATTERNS {
            args.push(format!("--exclude={pattern}"));
        }
        if dry_run {
            args.push("--dry-run".to_string());
        }
        args.push(format!("{}/", source.display()));
        args.push(format!("{}/", destination.display()));
        args
    }

    /// Spawn the tool with piped stdout/stderr.
    pub fn spawn(&self, source: &Path, destination: &Path, dry_run: bool) -> std::io::Result<Child> {
        Command::new(&self.program)
            .args(Self::build_args(source, destination, dry_run))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
    }

    /// Terminate a running subprocess: SIGTERM first, SIGKILL if it has
    /// not exited within the grace period.
    pub async fn terminate(&self, child: &mut Child) {
        if let Some(pid) = child.id() {
            let pid = nix::unistd::Pid::from_raw(pid as i32);
            if let Err(e) = nix::sys::signal::kill(pid, nix::sys::signal::Signal::SIGTERM) {
                warn!("failed to signal sync process {pid}: {e}");
            }
        }

        match tokio::time::timeout(self.grace_period, child.wait()).await {
            Ok(_) => {}
            Err(_) => {
                warn!("sync process did not exit within grace period, killing");
                let _ = child.kill().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn args_carry_excludes_and_trailing_slashes() {
        let args = SyncTool::build_args(
            &PathBuf::from("/home/user/Documents"),
            &PathBuf::from("/mnt/backup/Documents"),
            false,
        );

        assert_eq!(args[0], "-avz");
        assert!(args.contains(&"--info=progress2".to_string()));
        assert!(args.contains(&"--stats".to_string()));
        assert!(args.contains(&"--exclude=node_modules".to_string()));
        assert!(args.contains(&"--exclude=*.tmp".to_string()));
        assert!(!args.iter().any(|a| a == "--dry-run"));
        assert_eq!(args[args.len() - 2], "/home/user/Documents/");
        assert_eq!(args[args.len() - 1], "/mnt/backup/Documents/");
    }

    #[test]
    fn dry_run_adds_flag_before_paths() {
        let args = SyncTool::build_args(
            &PathBuf::from("/home/user/Music"),
            &PathBuf::from("/mnt/backup/Music"),
            true,
        );
        let dry_pos = args.iter().position(|a| a == "--dry-run").unwrap();
        assert!(dry_pos < args.len() - 2);
    }
}
