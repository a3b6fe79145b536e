//! Coordinator configuration, environment-driven.

use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub port: u16,
    /// Root scanned for backup-eligible directories.
    pub home_dir: PathBuf,
    /// Where directory backups land, one subdirectory per unit.
    pub backup_dest: PathBuf,
    pub snapshot_path: PathBuf,
    pub tick_interval_secs: u64,
    pub eviction_timeout_secs: u64,
    pub max_retries: u32,
    pub max_cpu_percent: f32,
    pub max_memory_percent: f32,
    /// 0 disables the in-process worker entirely (remote agents only).
    pub local_worker_concurrency: usize,
    pub sync_program: String,
    pub sync_grace_secs: u64,
    pub hidden_allow_list: Vec<String>,
    /// Optional cron expression for scheduled runs.
    pub schedule: Option<String>,
}

impl CoordinatorConfig {
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        let home_dir = std::env::var("BACKUP_HOME_DIR")
            .or_else(|_| std::env::var("HOME"))
            .unwrap_or_else(|_| "/home".into());

        Self {
            port: env_parse("PORT", 8888),
            home_dir: PathBuf::from(home_dir),
            backup_dest: PathBuf::from(
                std::env::var("BACKUP_DEST").unwrap_or_else(|_| "/mnt/backup/home".into()),
            ),
            snapshot_path: PathBuf::from(
                std::env::var("SNAPSHOT_PATH")
                    .unwrap_or_else(|_| "data/backup-state.json".into()),
            ),
            tick_interval_secs: env_parse("TICK_INTERVAL_SECS", 2),
            eviction_timeout_secs: env_parse("EVICTION_TIMEOUT_SECS", 30),
            max_retries: env_parse("MAX_RETRIES", 3),
            max_cpu_percent: env_parse("MAX_CPU_PERCENT", 80.0),
            max_memory_percent: env_parse("MAX_MEMORY_PERCENT", 85.0),
            local_worker_concurrency: env_parse("LOCAL_WORKER_CONCURRENCY", 2),
            sync_program: std::env::var("SYNC_PROGRAM").unwrap_or_else(|_| "rsync".into()),
            sync_grace_secs: env_parse("SYNC_GRACE_SECS", 5),
            hidden_allow_list: std::env::var("HIDDEN_ALLOW_LIST")
                .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or_else(|_| {
                    crate::services::catalog::DEFAULT_HIDDEN_ALLOW_LIST
                        .iter()
                        .map(|s| s.to_string())
                        .collect()
                }),
            schedule: std::env::var("BACKUP_SCHEDULE").ok().filter(|s| !s.is_empty()),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
