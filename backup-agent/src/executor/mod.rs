//! Single-task executor.
//!
//! Runs one assigned backup unit by invoking the external sync tool and
//! streaming its merged output through the progress parser. Progress is
//! pushed through the [`StatusReporter`] seam; cancellation is observed
//! within one line read and terminates the subprocess gracefully.

use crate::report::StatusReporter;
use crate::sync::{progress, SyncTool};
use crate::task::{CompletionReport, ProgressUpdate, TaskDescriptor, TaskOutcome};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Minimum interval between recorded speed samples.
const SPEED_SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// Executes backup tasks one subprocess at a time. Concurrency across
/// tasks is bounded by the caller (the handoff API rejects work beyond
/// the agent's declared capacity).
pub struct Executor {
    sync: SyncTool,
}

impl Executor {
    pub fn new(sync: SyncTool) -> Self {
        Self { sync }
    }

    /// Run one task to a terminal outcome. The outcome is both reported
    /// through `reporter` and returned to the caller.
    pub async fn execute(
        &self,
        task: &TaskDescriptor,
        reporter: &dyn StatusReporter,
        cancel: CancellationToken,
    ) -> TaskOutcome {
        info!(
            task = %task.name,
            source = %task.source.display(),
            dry_run = task.dry_run,
            "starting backup task"
        );

        // An initial zero-progress update marks the transition from
        // assigned to in-progress on the coordinator side.
        reporter
            .progress(
                &task.id,
                ProgressUpdate {
                    percent: 0,
                    bytes_copied: 0,
                    file_count: None,
                    bytes_per_sec: None,
                },
            )
            .await;

        if let Err(e) = tokio::fs::create_dir_all(&task.destination).await {
            return self
                .fail(
                    task,
                    reporter,
                    format!("cannot create destination {}: {e}", task.destination.display()),
                    None,
                )
                .await;
        }

        let mut child = match self.sync.spawn(&task.source, &task.destination, task.dry_run) {
            Ok(child) => child,
            Err(e) => {
                return self
                    .fail(task, reporter, format!("failed to launch sync tool: {e}"), None)
                    .await;
            }
        };

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            return self
                .fail(task, reporter, "sync tool output streams unavailable".into(), None)
                .await;
        };

        let mut stdout_lines = BufReader::new(stdout).lines();
        let mut stderr_lines = BufReader::new(stderr).lines();
        let mut tracker = OutputTracker::new(task.declared_size);
        let mut stdout_done = false;
        let mut stderr_done = false;

        while !(stdout_done && stderr_done) {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(task = %task.name, "cancellation requested, terminating sync tool");
                    self.sync.terminate(&mut child).await;
                    reporter
                        .completed(&task.id, CompletionReport {
                            outcome: TaskOutcome::Cancelled,
                            error: None,
                            file_count: tracker.summary_count(),
                        })
                        .await;
                    return TaskOutcome::Cancelled;
                }
                line = stdout_lines.next_line(), if !stdout_done => match line {
                    Ok(Some(line)) => {
                        if let Some(update) = tracker.observe_stdout(&line) {
                            reporter.progress(&task.id, update).await;
                        }
                    }
                    Ok(None) => stdout_done = true,
                    Err(e) => {
                        warn!(task = %task.name, "error reading sync stdout: {e}");
                        stdout_done = true;
                    }
                },
                line = stderr_lines.next_line(), if !stderr_done => match line {
                    Ok(Some(line)) => {
                        warn!(task = %task.name, "sync stderr: {line}");
                        tracker.observe_stderr(&line);
                    }
                    Ok(None) | Err(_) => stderr_done = true,
                },
            }
        }

        let status = match child.wait().await {
            Ok(status) => status,
            Err(e) => {
                return self
                    .fail(
                        task,
                        reporter,
                        format!("failed to collect sync tool exit status: {e}"),
                        tracker.summary_count(),
                    )
                    .await;
            }
        };

        if status.success() {
            info!(
                task = %task.name,
                file_count = ?tracker.summary_count(),
                "backup task completed"
            );
            reporter
                .completed(&task.id, CompletionReport {
                    outcome: TaskOutcome::Success,
                    error: None,
                    file_count: tracker.summary_count(),
                })
                .await;
            TaskOutcome::Success
        } else {
            let code = status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            let detail = tracker
                .last_error()
                .map(|l| format!(": {l}"))
                .unwrap_or_default();
            self.fail(
                task,
                reporter,
                format!("sync tool exited with code {code}{detail}"),
                tracker.summary_count(),
            )
            .await
        }
    }

    async fn fail(
        &self,
        task: &TaskDescriptor,
        reporter: &dyn StatusReporter,
        error: String,
        file_count: Option<u64>,
    ) -> TaskOutcome {
        warn!(task = %task.name, error = %error, "backup task failed");
        reporter
            .completed(&task.id, CompletionReport {
                outcome: TaskOutcome::Failed,
                error: Some(error),
                file_count,
            })
            .await;
        TaskOutcome::Failed
    }
}

/// Folds the sync tool's output lines into progress updates: percent
/// and transfer-index signals become updates, speed samples are
/// throttled to one per second, the stats block is captured for the
/// final file count, and the last stderr line is kept for error
/// reporting.
struct OutputTracker {
    declared_size: u64,
    last_percent: u8,
    file_count: Option<u64>,
    summary_count: Option<u64>,
    last_error_line: Option<String>,
    last_speed_at: Option<Instant>,
}

impl OutputTracker {
    fn new(declared_size: u64) -> Self {
        Self {
            declared_size,
            last_percent: 0,
            file_count: None,
            summary_count: None,
            last_error_line: None,
            last_speed_at: None,
        }
    }

    fn observe_stdout(&mut self, line: &str) -> Option<ProgressUpdate> {
        if let Some(count) = progress::parse_summary(line) {
            self.summary_count = Some(count);
        }

        let event = progress::parse_line(line)?;

        if let Some(index) = event.transfer_index {
            self.file_count = Some(index);
        }
        if let Some(percent) = event.percent {
            self.last_percent = percent;
        }

        let speed = event.bytes_per_sec.filter(|_| {
            self.last_speed_at
                .map(|t| t.elapsed() >= SPEED_SAMPLE_INTERVAL)
                .unwrap_or(true)
        });
        if speed.is_some() {
            self.last_speed_at = Some(Instant::now());
        }

        if event.percent.is_none() && event.transfer_index.is_none() && speed.is_none() {
            return None;
        }

        Some(ProgressUpdate {
            percent: self.last_percent,
            bytes_copied: self.bytes_copied(),
            file_count: self.file_count,
            bytes_per_sec: speed,
        })
    }

    fn observe_stderr(&mut self, line: &str) {
        if !line.trim().is_empty() {
            self.last_error_line = Some(line.trim().to_string());
        }
    }

    /// Bytes derived from the declared size, so they can never exceed it.
    fn bytes_copied(&self) -> u64 {
        (self.declared_size as u128 * self.last_percent as u128 / 100) as u64
    }

    fn summary_count(&self) -> Option<u64> {
        self.summary_count
    }

    fn last_error(&self) -> Option<&str> {
        self.last_error_line.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Capability;
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingReporter {
        updates: Mutex<Vec<ProgressUpdate>>,
        completion: Mutex<Option<CompletionReport>>,
    }

    #[async_trait]
    impl StatusReporter for RecordingReporter {
        async fn progress(&self, _task_id: &str, update: ProgressUpdate) {
            self.updates.lock().unwrap().push(update);
        }

        async fn completed(&self, _task_id: &str, report: CompletionReport) {
            *self.completion.lock().unwrap() = Some(report);
        }
    }

    fn write_script(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("fake-sync.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    fn task(dir: &Path) -> TaskDescriptor {
        TaskDescriptor {
            id: "task-1".to_string(),
            name: "Documents".to_string(),
            source: dir.join("src"),
            destination: dir.join("dest"),
            declared_size: 1000,
            priority: 80,
            required_capability: Capability::Backup,
            dry_run: false,
        }
    }

    #[test]
    fn tracker_derives_bytes_from_percent() {
        let mut tracker = OutputTracker::new(1000);
        let update = tracker.observe_stdout("  512 50% 1.0MB/s xfr#3").unwrap();
        assert_eq!(update.percent, 50);
        assert_eq!(update.bytes_copied, 500);
        assert_eq!(update.file_count, Some(3));
    }

    #[test]
    fn tracker_throttles_speed_samples() {
        let mut tracker = OutputTracker::new(100);
        let first = tracker.observe_stdout("10% 1.0MB/s").unwrap();
        assert!(first.bytes_per_sec.is_some());

        let second = tracker.observe_stdout("20% 2.0MB/s").unwrap();
        assert!(second.bytes_per_sec.is_none());
        assert_eq!(second.percent, 20);
    }

    #[test]
    fn tracker_ignores_noise_but_captures_summary() {
        let mut tracker = OutputTracker::new(100);
        assert!(tracker.observe_stdout("sending incremental file list").is_none());
        assert!(tracker
            .observe_stdout("Number of regular files transferred: 42")
            .is_none());
        assert_eq!(tracker.summary_count(), Some(42));
    }

    #[test]
    fn tracker_keeps_last_stderr_line() {
        let mut tracker = OutputTracker::new(100);
        tracker.observe_stderr("rsync: opendir failed");
        tracker.observe_stderr("   ");
        assert_eq!(tracker.last_error(), Some("rsync: opendir failed"));
    }

    #[tokio::test]
    async fn execute_reports_success_with_progress() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(
            dir.path(),
            "echo '  100 10% 1.2MB/s xfr#1'\n\
             echo '  1000 100% 1.2MB/s xfr#2'\n\
             echo 'Number of regular files transferred: 2'\n\
             exit 0",
        );

        let executor = Executor::new(SyncTool::new(
            script.display().to_string(),
            Duration::from_secs(1),
        ));
        let reporter = RecordingReporter::default();
        let outcome = executor
            .execute(&task(dir.path()), &reporter, CancellationToken::new())
            .await;

        assert_eq!(outcome, TaskOutcome::Success);

        let updates = reporter.updates.lock().unwrap();
        assert_eq!(updates[0].percent, 0);
        assert_eq!(updates.last().unwrap().percent, 100);
        assert_eq!(updates.last().unwrap().bytes_copied, 1000);

        let completion = reporter.completion.lock().unwrap();
        let completion = completion.as_ref().unwrap();
        assert_eq!(completion.outcome, TaskOutcome::Success);
        assert_eq!(completion.file_count, Some(2));
    }

    #[tokio::test]
    async fn execute_reports_failure_with_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "echo 'rsync: some files vanished' 1>&2\nexit 23");

        let executor = Executor::new(SyncTool::new(
            script.display().to_string(),
            Duration::from_secs(1),
        ));
        let reporter = RecordingReporter::default();
        let outcome = executor
            .execute(&task(dir.path()), &reporter, CancellationToken::new())
            .await;

        assert_eq!(outcome, TaskOutcome::Failed);

        let completion = reporter.completion.lock().unwrap();
        let error = completion.as_ref().unwrap().error.as_ref().unwrap().clone();
        assert!(error.contains("23"), "error was: {error}");
        assert!(error.contains("vanished"), "error was: {error}");
    }

    #[tokio::test]
    async fn execute_observes_cancellation() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "sleep 30");

        let executor = Executor::new(SyncTool::new(
            script.display().to_string(),
            Duration::from_secs(1),
        ));
        let reporter = RecordingReporter::default();
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            canceller.cancel();
        });

        let outcome = executor.execute(&task(dir.path()), &reporter, cancel).await;
        assert_eq!(outcome, TaskOutcome::Cancelled);

        let completion = reporter.completion.lock().unwrap();
        assert_eq!(
            completion.as_ref().unwrap().outcome,
            TaskOutcome::Cancelled
        );
    }
}
