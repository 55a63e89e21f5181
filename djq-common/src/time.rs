//! Duration helpers

use std::time::Duration;

/// Convert whole minutes to a duration
pub fn minutes_to_duration(minutes: u64) -> Duration {
    Duration::from_secs(minutes * 60)
}

/// Format a track length as `M:SS` (or `H:MM:SS` past one hour)
pub fn format_track_length(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{}:{:02}", minutes, secs)
    }
}
