//! Destination preflight checks.
//!
//! Session-level preconditions: the backup destination must exist (and
//! ideally be a real mount point) and have room for the selected units
//! before any unit starts. Failures here abort the run as system-level
//! errors, attributed to no directory.

use crate::error::CoordinationError;
use std::path::Path;
use tokio::process::Command;
use tracing::warn;

/// Verify the destination exists and looks mounted. On systems without
/// a `mountpoint` binary the check degrades to "exists and is
/// readable", with a warning.
pub async fn verify_destination(path: &Path) -> Result<(), CoordinationError> {
    if !path.exists() {
        return Err(CoordinationError::DestinationUnavailable(format!(
            "{} does not exist",
            path.display()
        )));
    }
    if !path.is_dir() {
        return Err(CoordinationError::DestinationUnavailable(format!(
            "{} is not a directory",
            path.display()
        )));
    }

    match Command::new("mountpoint").arg("-q").arg(path).output().await {
        Ok(output) if output.status.success() => Ok(()),
        Ok(_) => {
            // Removable media on some platforms is not a classic mount
            // point; readability is the fallback signal.
            match std::fs::read_dir(path) {
                Ok(_) => {
                    warn!("{} is not a mount point, proceeding anyway", path.display());
                    Ok(())
                }
                Err(e) => Err(CoordinationError::DestinationUnavailable(format!(
                    "{}: {e}",
                    path.display()
                ))),
            }
        }
        Err(_) => {
            warn!("mountpoint tool unavailable, skipping mount check");
            Ok(())
        }
    }
}

/// Free bytes on the filesystem holding `path`, via `df -B1`.
pub async fn available_space(path: &Path) -> Result<u64, CoordinationError> {
    let output = Command::new("df")
        .arg("-B1")
        .arg(path)
        .output()
        .await
        .map_err(|_| CoordinationError::MeasurementFailure(path.display().to_string()))?;

    if !output.status.success() {
        return Err(CoordinationError::MeasurementFailure(
            path.display().to_string(),
        ));
    }

    parse_df_available(&String::from_utf8_lossy(&output.stdout))
        .ok_or_else(|| CoordinationError::MeasurementFailure(path.display().to_string()))
}

/// The "Available" column of the data row in `df` table output.
pub fn parse_df_available(output: &str) -> Option<u64> {
    let line = output.lines().nth(1)?;
    let fields: Vec<&str> = line.split_whitespace().collect();
    fields.get(3)?.parse().ok()
}

/// Abort-before-start capacity check.
pub async fn ensure_capacity(path: &Path, required: u64) -> Result<(), CoordinationError> {
    let available = available_space(path).await?;
    if available < required {
        return Err(CoordinationError::InsufficientDestinationSpace {
            required,
            available,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const DF_OUTPUT: &str = "\
Filesystem        1B-blocks         Used    Available Use% Mounted on
/dev/sda1      250790436864 105226342400 132741occupied 45% /
";

    #[test]
    fn df_available_column_is_parsed() {
        let output = "\
Filesystem        1B-blocks         Used    Available Use% Mounted on
/dev/sda1      250790436864 105226342400 132741234688  45% /
";
        assert_eq!(parse_df_available(output), Some(132_741_234_688));
    }

    #[test]
    fn malformed_df_output_yields_none() {
        assert_eq!(parse_df_available(""), None);
        assert_eq!(parse_df_available("Filesystem only header\n"), None);
        assert_eq!(parse_df_available(DF_OUTPUT), None);
    }

    #[tokio::test]
    async fn missing_destination_is_rejected() {
        let err = verify_destination(Path::new("/no/such/destination"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinationError::DestinationUnavailable(_)));
    }

    #[tokio::test]
    async fn capacity_check_against_real_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        // Zero bytes always fit.
        ensure_capacity(dir.path(), 0).await.unwrap();
        // More bytes than any disk holds never do.
        let err = ensure_capacity(dir.path(), u64::MAX).await.unwrap_err();
        assert!(matches!(
            err,
            CoordinationError::InsufficientDestinationSpace { .. }
        ));
    }
}
