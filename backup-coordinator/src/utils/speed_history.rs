//! Sliding window of transfer-rate samples for the dashboard graph.

use backup_agent::sync::progress::format_speed;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Samples older than this fall out of the window.
const WINDOW_SECS: i64 = 60;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeedSample {
    pub timestamp: i64,
    pub bytes_per_sec: u64,
    pub speed: String,
}

#[derive(Clone, Default)]
pub struct SpeedHistory {
    samples: Arc<Mutex<VecDeque<SpeedSample>>>,
}

impl SpeedHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, bytes_per_sec: u64) {
        self.push_at(bytes_per_sec, chrono::Utc::now().timestamp());
    }

    fn push_at(&self, bytes_per_sec: u64, timestamp: i64) {
        let mut samples = self.samples.lock().unwrap();
        samples.push_back(SpeedSample {
            timestamp,
            bytes_per_sec,
            speed: format_speed(bytes_per_sec),
        });

        let cutoff = timestamp - WINDOW_SECS;
        while samples.front().map(|s| s.timestamp <= cutoff).unwrap_or(false) {
            samples.pop_front();
        }
    }

    pub fn recent(&self) -> Vec<SpeedSample> {
        self.samples.lock().unwrap().iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn old_samples_fall_out_of_the_window() {
        let history = SpeedHistory::new();
        let now = chrono::Utc::now().timestamp();
        history.push_at(1_000, now - 120);
        history.push_at(2_000, now - 30);
        history.push_at(3_000, now);

        let recent = history.recent();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].bytes_per_sec, 2_000);
        assert_eq!(recent[1].speed, "2.93 KB/s");
    }
}
