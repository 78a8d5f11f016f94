//! Duration and progress formatting for timer displays

/// Format a second count as `MM:SS`, or `H:MM:SS` once it reaches an hour.
pub fn format_duration(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{:02}:{:02}", minutes, secs)
    }
}

/// Percentage of `total` covered by `elapsed`, clamped to `0.0..=100.0`.
///
/// A zero-length phase counts as fully complete.
pub fn progress_percent(elapsed: u64, total: u64) -> f64 {
    if total == 0 {
        return 100.0;
    }
    let ratio = elapsed as f64 / total as f64 * 100.0;
    ratio.clamp(0.0, 100.0)
}

/// Remaining seconds after `elapsed` of `total`, never below zero
pub fn remaining_seconds(elapsed: u64, total: u64) -> u64 {
    total.saturating_sub(elapsed)
}
