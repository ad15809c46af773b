use chrono::{DateTime, Duration, Utc};

use super::history::CheckHistory;
use super::incident::IncidentTracker;
use super::{CurrentStatus, MonitorStats};
use crate::config::{DEGRADED_UPTIME_PERCENT, RECENT_INCIDENTS};

/// Windowed uptime and latency for one monitor.
///
/// Uptime is optimistic: a window with no checks reports 100%.
pub fn compute_stats(
    monitor_id: &str,
    history: &CheckHistory,
    tracker: &IncidentTracker,
    now: DateTime<Utc>,
    window: Duration,
) -> MonitorStats {
    let cutoff = now
        .checked_sub_signed(window)
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    let in_window: Vec<_> = history.iter().filter(|c| c.timestamp >= cutoff).collect();

    let total = in_window.len();
    let successful: Vec<_> = in_window.iter().filter(|c| c.success).collect();

    let uptime = if total == 0 {
        100.0
    } else {
        successful.len() as f64 / total as f64 * 100.0
    };
    let avg_latency = if successful.is_empty() {
        0.0
    } else {
        successful.iter().map(|c| c.elapsed_ms).sum::<f64>() / successful.len() as f64
    };

    let current_status = if tracker.ongoing().is_some() {
        CurrentStatus::Down
    } else if uptime < DEGRADED_UPTIME_PERCENT {
        CurrentStatus::Degraded
    } else {
        CurrentStatus::Up
    };

    let mut recent_incidents = tracker.incidents();
    recent_incidents.truncate(RECENT_INCIDENTS);

    MonitorStats {
        monitor_id: monitor_id.to_string(),
        window_hours: window.num_hours(),
        total_checks: total,
        successful_checks: successful.len(),
        uptime_percent: uptime,
        avg_response_time_ms: avg_latency,
        current_status,
        last_checked: history.latest().map(|c| c.timestamp),
        recent_incidents,
    }
}
