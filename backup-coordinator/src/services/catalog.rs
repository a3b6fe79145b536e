//! Directory catalog: discovers backup-eligible directories.
//!
//! Every non-hidden immediate subdirectory of the scan root becomes a
//! backup unit, sized through an external `du` probe. Probe failures
//! never drop a unit (it is kept with size 0) and never abort discovery
//! of siblings. A fixed allow-list of sensitive hidden directories is
//! appended after the sorted set.

use crate::error::CoordinationError;
use crate::models::unit::BackupUnit;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Hidden directories still worth backing up: credentials and config.
pub const DEFAULT_HIDDEN_ALLOW_LIST: &[&str] = &[".ssh", ".config", ".gnupg"];

pub struct DirectoryCatalog {
    root: PathBuf,
    hidden_allow_list: Vec<String>,
    max_retries: u32,
}

impl DirectoryCatalog {
    pub fn new(root: PathBuf, hidden_allow_list: Vec<String>, max_retries: u32) -> Self {
        Self {
            root,
            hidden_allow_list,
            max_retries,
        }
    }

    /// Scan the root and produce the ordered unit set: visible
    /// subdirectories sorted by name descending, then the hidden
    /// allow-list in list order. Re-invoking re-scans from disk.
    pub async fn discover(&self) -> anyhow::Result<Vec<BackupUnit>> {
        if !self.root.is_dir() {
            anyhow::bail!("scan root does not exist: {}", self.root.display());
        }

        info!("scanning directories in {}", self.root.display());
        let mut units = Vec::new();

        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }

            let Some(name) = path.file_name().map(|n| n.to_string_lossy().to_string()) else {
                continue;
            };
            if name.starts_with('.') {
                debug!("skipping hidden directory: {name}");
                continue;
            }

            let size = self.probe_or_zero(&path).await;
            units.push(BackupUnit::new(name, path, size, self.max_retries));
        }

        // Name descending, byte-wise: a deliberate, stable ordering.
        units.sort_by(|a, b| b.name.cmp(&a.name));

        for name in &self.hidden_allow_list {
            let path = self.root.join(name);
            if path.is_dir() {
                let size = self.probe_or_zero(&path).await;
                units.push(BackupUnit::new(name.clone(), path, size, self.max_retries));
            }
        }

        info!("found {} directories", units.len());
        Ok(units)
    }

    /// Measurement failure is non-fatal: the unit is still included
    /// with size 0 rather than silently dropped.
    async fn probe_or_zero(&self, path: &Path) -> u64 {
        match probe_size(path).await {
            Ok(size) => size,
            Err(e) => {
                warn!("{e}, using size 0");
                0
            }
        }
    }
}

/// Directory size in bytes via `du -sb`.
pub async fn probe_size(path: &Path) -> Result<u64, CoordinationError> {
    let output = Command::new("du")
        .arg("-sb")
        .arg(path)
        .output()
        .await
        .map_err(|_| CoordinationError::MeasurementFailure(path.display().to_string()))?;

    if !output.status.success() {
        return Err(CoordinationError::MeasurementFailure(
            path.display().to_string(),
        ));
    }

    parse_du_output(&String::from_utf8_lossy(&output.stdout))
        .ok_or_else(|| CoordinationError::MeasurementFailure(path.display().to_string()))
}

/// First whitespace-separated field of `du` output.
pub fn parse_du_output(output: &str) -> Option<u64> {
    output.split_whitespace().next()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn du_output_parses_first_field() {
        assert_eq!(parse_du_output("4096\t/home/user/Documents\n"), Some(4096));
        assert_eq!(parse_du_output("12345 /tmp"), Some(12345));
        assert_eq!(parse_du_output(""), None);
        assert_eq!(parse_du_output("not-a-number /tmp"), None);
    }

    #[tokio::test]
    async fn probe_fails_on_missing_path() {
        let err = probe_size(Path::new("/definitely/not/a/real/path"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinationError::MeasurementFailure(_)));
    }

    #[tokio::test]
    async fn discover_orders_descending_and_appends_allow_list() {
        let root = tempfile::tempdir().unwrap();
        for name in ["alpha", "zeta", "beta", ".hidden", ".ssh"] {
            std::fs::create_dir(root.path().join(name)).unwrap();
        }
        std::fs::write(root.path().join("a-file.txt"), "not a dir").unwrap();
        std::fs::write(root.path().join("zeta/payload"), vec![0u8; 2048]).unwrap();

        let catalog = DirectoryCatalog::new(
            root.path().to_path_buf(),
            vec![".ssh".to_string(), ".gnupg".to_string()],
            3,
        );
        let units = catalog.discover().await.unwrap();

        let names: Vec<&str> = units.iter().map(|u| u.name.as_str()).collect();
        // Visible dirs by name descending, then allow-listed hidden
        // dirs that exist (.gnupg does not).
        assert_eq!(names, vec!["zeta", "beta", "alpha", ".ssh"]);

        // Sizes come from the probe; zeta holds a 2 KB payload.
        let zeta = &units[0];
        assert!(zeta.size >= 2048, "zeta size was {}", zeta.size);
    }

    #[tokio::test]
    async fn discover_rejects_missing_root() {
        let catalog = DirectoryCatalog::new(PathBuf::from("/no/such/root"), Vec::new(), 3);
        assert!(catalog.discover().await.is_err());
    }
}
