//! Stateless parser for the sync tool's line-oriented progress output.
//!
//! The output format is not contractually stable, so unrecognized lines
//! are dropped rather than treated as errors. Three independent signals
//! may co-occur on one line: a percentage token (`NN%`), a transfer-rate
//! token (`<number><unit>/s`), and a transfer-index token (`xfr#N`).

use regex::Regex;
use std::sync::OnceLock;

/// Signals extracted from a single output line. At least one field is
/// set whenever `parse_line` returns `Some`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub percent: Option<u8>,
    pub bytes_per_sec: Option<u64>,
    pub transfer_index: Option<u64>,
}

fn percent_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+)%").unwrap())
}

fn speed_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d[\d,]*(?:\.\d+)?)(B|KB|MB|GB)/s").unwrap())
}

fn transfer_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"xfr#(\d+)").unwrap())
}

/// Parse one line of sync-tool output. Returns `None` when the line
/// carries no recognizable signal.
pub fn parse_line(line: &str) -> Option<ProgressEvent> {
    let percent = percent_re()
        .captures(line)
        .and_then(|c| c[1].parse::<u8>().ok())
        .map(|p| p.min(100));

    let bytes_per_sec = speed_re().captures(line).and_then(|c| {
        let value: f64 = c[1].replace(',', "").parse().ok()?;
        let multiplier = match &c[2] {
            "B" => 1.0,
            "KB" => 1024.0,
            "MB" => 1_048_576.0,
            "GB" => 1_073_741_824.0,
            _ => return None,
        };
        Some((value * multiplier) as u64)
    });

    let transfer_index = transfer_re()
        .captures(line)
        .and_then(|c| c[1].parse::<u64>().ok());

    if percent.is_none() && bytes_per_sec.is_none() && transfer_index.is_none() {
        return None;
    }

    Some(ProgressEvent {
        percent,
        bytes_per_sec,
        transfer_index,
    })
}

/// Extract the total transferred-file count from the end-of-run stats
/// block. The tool has printed this under two different labels over the
/// years, so both are accepted; the count is best-effort and callers
/// must tolerate `None`.
pub fn parse_summary(text: &str) -> Option<u64> {
    static TRANSFERRED: OnceLock<Regex> = OnceLock::new();
    static TOTAL: OnceLock<Regex> = OnceLock::new();

    let transferred = TRANSFERRED.get_or_init(|| {
        Regex::new(r"Number of regular files transferred:\s*([\d,]+)").unwrap()
    });
    let total = TOTAL.get_or_init(|| Regex::new(r"Number of files:\s*([\d,]+)").unwrap());

    let captures = transferred.captures(text).or_else(|| total.captures(text))?;
    captures[1].replace(',', "").parse().ok()
}

/// Format bytes as a human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

/// Format a transfer rate as a human-readable string.
pub fn format_speed(bytes_per_second: u64) -> String {
    format!("{}/s", format_bytes(bytes_per_second))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_three_signals() {
        let event = parse_line("   42%  1.2MB/s xfr#7").unwrap();
        assert_eq!(event.percent, Some(42));
        assert_eq!(event.bytes_per_sec, Some((1.2 * 1_048_576.0) as u64));
        assert_eq!(event.transfer_index, Some(7));
    }

    #[test]
    fn parses_typical_progress_line() {
        let event = parse_line("  1,024,000  37%  456KB/s    0:00:12 (xfr#3, to-chk=120/500)")
            .unwrap();
        assert_eq!(event.percent, Some(37));
        assert_eq!(event.bytes_per_sec, Some(456 * 1024));
        assert_eq!(event.transfer_index, Some(3));
    }

    #[test]
    fn signals_are_independent() {
        let event = parse_line("copied 85% so far").unwrap();
        assert_eq!(event.percent, Some(85));
        assert_eq!(event.bytes_per_sec, None);
        assert_eq!(event.transfer_index, None);

        let event = parse_line("rate: 789B/s").unwrap();
        assert_eq!(event.bytes_per_sec, Some(789));
        assert_eq!(event.percent, None);
    }

    #[test]
    fn speed_units_use_binary_multipliers() {
        assert_eq!(
            parse_line("2GB/s").unwrap().bytes_per_sec,
            Some(2 * 1_073_741_824)
        );
        assert_eq!(
            parse_line("456KB/s").unwrap().bytes_per_sec,
            Some(456 * 1024)
        );
    }

    #[test]
    fn percent_is_clamped() {
        assert_eq!(parse_line("243%").unwrap().percent, Some(100));
    }

    #[test]
    fn unrecognized_lines_yield_no_event() {
        assert_eq!(parse_line("sending incremental file list"), None);
        assert_eq!(parse_line("Documents/notes.txt"), None);
        assert_eq!(parse_line(""), None);
    }

    #[test]
    fn summary_accepts_both_labels() {
        assert_eq!(
            parse_summary("Number of regular files transferred: 1,234"),
            Some(1234)
        );
        assert_eq!(
            parse_summary("Number of files: 2,048 (reg: 1,900, dir: 148)"),
            Some(2048)
        );
        assert_eq!(parse_summary("Total bytes sent: 99"), None);
    }

    #[test]
    fn summary_prefers_transferred_count() {
        let stats = "Number of files: 500 (reg: 450, dir: 50)\n\
                     Number of regular files transferred: 123";
        assert_eq!(parse_summary(stats), Some(123));
    }

    #[test]
    fn formats_speed() {
        assert_eq!(format_speed(1024), "1.00 KB/s");
        assert_eq!(format_speed(1_048_576), "1.00 MB/s");
        assert_eq!(format_bytes(1023), "1023.00 B");
    }
}
