//! Compact human formatting for elapsed times in CLI output.

use std::time::Duration;

/// Format a millisecond count the way the CLI reports durations: whole
/// milliseconds under a second, tenths of a second under a minute,
/// minutes and zero-padded seconds beyond.
pub fn format_millis(millis: u64) -> String {
    if millis < 1_000 {
        format!("{millis}ms")
    } else if millis < 60_000 {
        format!("{:.1}s", millis as f64 / 1000.0)
    } else {
        let minutes = millis / 60_000;
        let seconds = (millis % 60_000) / 1_000;
        format!("{minutes}m{seconds:02}s")
    }
}

pub fn format_duration(duration: Duration) -> String {
    format_millis(duration.as_millis() as u64)
}
