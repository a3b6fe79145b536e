//! In-memory ring buffer of recent log lines for the dashboard.

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp: i64,
    pub level: String,
    pub message: String,
    pub directory: Option<String>,
}

#[derive(Clone)]
pub struct LogBuffer {
    buffer: Arc<Mutex<VecDeque<LogEntry>>>,
    max_entries: usize,
}

impl LogBuffer {
    pub fn new(max_entries: usize) -> Self {
        Self {
            buffer: Arc::new(Mutex::new(VecDeque::with_capacity(max_entries))),
            max_entries,
        }
    }

    pub fn add(&self, level: &str, message: String, directory: Option<String>) {
        let entry = LogEntry {
            timestamp: chrono::Utc::now().timestamp(),
            level: level.to_string(),
            message,
            directory,
        };

        let mut buffer = self.buffer.lock().unwrap();
        if buffer.len() >= self.max_entries {
            buffer.pop_front();
        }
        buffer.push_back(entry);
    }

    /// Add a raw line, deriving its level from message keywords.
    pub fn add_classified(&self, message: String, directory: Option<String>) {
        let level = classify_level(&message);
        self.add(level, message, directory);
    }

    /// Most recent entries, oldest first, optionally filtered by level.
    pub fn tail(&self, limit: usize, level: Option<&str>) -> Vec<LogEntry> {
        let buffer = self.buffer.lock().unwrap();
        buffer
            .iter()
            .filter(|e| level.map(|l| e.level == l).unwrap_or(true))
            .rev()
            .take(limit)
            .cloned()
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect()
    }
}

/// Keyword-based level classification of sync-tool output lines.
pub fn classify_level(message: &str) -> &'static str {
    let lower = message.to_lowercase();
    if ["error", "fail", "cannot", "unable"]
        .iter()
        .any(|w| lower.contains(w))
    {
        "error"
    } else if ["warning", "warn", "skip"].iter().any(|w| lower.contains(w)) {
        "warning"
    } else {
        "info"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_by_keywords() {
        assert_eq!(classify_level("rsync: cannot open directory"), "error");
        assert_eq!(classify_level("Backup FAILED for Music"), "error");
        assert_eq!(classify_level("skipping non-regular file"), "warning");
        assert_eq!(classify_level("sent 1,024 bytes"), "info");
    }

    #[test]
    fn buffer_is_bounded() {
        let logs = LogBuffer::new(3);
        for i in 0..5 {
            logs.add("info", format!("line {i}"), None);
        }
        let tail = logs.tail(10, None);
        assert_eq!(tail.len(), 3);
        assert_eq!(tail[0].message, "line 2");
        assert_eq!(tail[2].message, "line 4");
    }

    #[test]
    fn tail_filters_by_level() {
        let logs = LogBuffer::new(10);
        logs.add_classified("all good".into(), None);
        logs.add_classified("rsync error: broken pipe".into(), Some("Music".into()));

        let errors = logs.tail(10, Some("error"));
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].directory.as_deref(), Some("Music"));
    }
}
