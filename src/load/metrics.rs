//! Aggregation of request outcomes into run statistics.
//!
//! Everything here is a pure function over the outcome list. Final metrics
//! are computed once at run end from the full list; the progress reporter
//! reuses the same formulas on a trailing window.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use super::{RequestOutcome, RunMetrics, TimelineSample};
use crate::config::TIMELINE_WINDOW_SECS;

/// Nearest-rank percentile over an ascending slice.
///
/// Picks the value at `ceil(p/100 * n) - 1`, clamped to the slice bounds.
/// Returns 0 for an empty slice.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return 0.0;
    }
    let rank = (p / 100.0 * n as f64).ceil() as i64 - 1;
    let index = rank.clamp(0, n as i64 - 1) as usize;
    sorted[index]
}

pub fn error_rate(failed: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        failed as f64 / total as f64 * 100.0
    }
}

pub fn throughput(count: u64, elapsed_ms: f64) -> f64 {
    if elapsed_ms <= 0.0 {
        0.0
    } else {
        count as f64 / (elapsed_ms / 1000.0)
    }
}

pub fn compute_metrics(
    outcomes: &[RequestOutcome],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> RunMetrics {
    let total = outcomes.len() as u64;
    let successful = outcomes.iter().filter(|o| o.success).count() as u64;
    let failed = total - successful;

    let mut latencies: Vec<f64> = outcomes.iter().map(|o| o.elapsed_ms).collect();
    latencies.sort_by(|a, b| a.total_cmp(b));

    let min = latencies.first().copied().unwrap_or(0.0);
    let max = latencies.last().copied().unwrap_or(0.0);
    let avg = if latencies.is_empty() {
        0.0
    } else {
        // Float summation can drift past the extremes for identical values.
        (latencies.iter().sum::<f64>() / latencies.len() as f64).clamp(min, max)
    };

    let mut status_codes = BTreeMap::new();
    for code in outcomes.iter().filter_map(|o| o.status_code) {
        *status_codes.entry(code).or_insert(0) += 1;
    }

    let wall_ms = (end - start).num_milliseconds() as f64;

    RunMetrics {
        total_requests: total,
        successful_requests: successful,
        failed_requests: failed,
        min_response_time_ms: min,
        avg_response_time_ms: avg,
        max_response_time_ms: max,
        p50_response_time_ms: percentile(&latencies, 50.0),
        p95_response_time_ms: percentile(&latencies, 95.0),
        p99_response_time_ms: percentile(&latencies, 99.0),
        throughput: throughput(total, wall_ms),
        error_rate: error_rate(failed, total),
        bytes_transferred: outcomes.iter().map(|o| o.bytes).sum(),
        status_codes,
        start_time: Some(start),
        end_time: Some(end),
    }
}

/// Snapshot over outcomes timestamped within the trailing window ending at `now`.
pub fn timeline_sample(
    outcomes: &[RequestOutcome],
    now: DateTime<Utc>,
    active_workers: usize,
) -> TimelineSample {
    let window = chrono::Duration::seconds(TIMELINE_WINDOW_SECS);
    let cutoff = now - window;
    let recent: Vec<&RequestOutcome> = outcomes
        .iter()
        .filter(|o| o.timestamp > cutoff && o.timestamp <= now)
        .collect();

    let count = recent.len() as u64;
    let failed = recent.iter().filter(|o| !o.success).count() as u64;
    let avg = if recent.is_empty() {
        0.0
    } else {
        recent.iter().map(|o| o.elapsed_ms).sum::<f64>() / recent.len() as f64
    };

    TimelineSample {
        timestamp: now,
        active_workers,
        rps: throughput(count, window.num_milliseconds() as f64),
        avg_response_time_ms: avg,
        error_rate: error_rate(failed, count),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(at: DateTime<Utc>, elapsed_ms: f64, success: bool) -> RequestOutcome {
        RequestOutcome {
            timestamp: at,
            elapsed_ms,
            status_code: if success { Some(200) } else { None },
            success,
            error: if success { None } else { Some("boom".into()) },
            bytes: 100,
        }
    }

    #[test]
    fn nearest_rank_picks_observed_values() {
        let sorted: Vec<f64> = (1..=10).map(|v| v as f64).collect();
        assert_eq!(percentile(&sorted, 50.0), 5.0);
        assert_eq!(percentile(&sorted, 95.0), 10.0);
        assert_eq!(percentile(&sorted, 10.0), 1.0);
        assert_eq!(percentile(&sorted, 0.0), 1.0);
        assert_eq!(percentile(&sorted, 100.0), 10.0);
    }

    #[test]
    fn percentile_of_identical_values_is_that_value() {
        let sorted = vec![42.5; 17];
        for p in 1..=100 {
            assert_eq!(percentile(&sorted, p as f64), 42.5, "p{}", p);
        }
    }

    #[test]
    fn empty_run_reports_zeroes() {
        let now = Utc::now();
        let m = compute_metrics(&[], now, now);
        assert_eq!(m.total_requests, 0);
        assert_eq!(m.error_rate, 0.0);
        assert_eq!(m.throughput, 0.0);
        assert_eq!(m.p99_response_time_ms, 0.0);
        assert_eq!(m.avg_response_time_ms, 0.0);
    }

    #[test]
    fn ordering_properties_hold() {
        let start = Utc::now();
        let latencies = [120.0, 3.5, 48.0, 48.0, 900.0, 15.25, 77.0, 2.0, 61.0, 300.0, 5.0];
        let outcomes: Vec<_> = latencies
            .iter()
            .enumerate()
            .map(|(i, l)| outcome(start, *l, i % 4 != 0))
            .collect();
        let m = compute_metrics(&outcomes, start, start + chrono::Duration::seconds(2));

        assert!(m.p50_response_time_ms <= m.p95_response_time_ms);
        assert!(m.p95_response_time_ms <= m.p99_response_time_ms);
        assert!(m.p99_response_time_ms <= m.max_response_time_ms);
        assert!(m.min_response_time_ms <= m.avg_response_time_ms);
        assert!(m.avg_response_time_ms <= m.max_response_time_ms);
        assert!((0.0..=100.0).contains(&m.error_rate));
        assert_eq!(m.failed_requests, 3);
        assert_eq!(m.throughput, 5.5);
        assert_eq!(m.bytes_transferred, 1100);
        assert_eq!(m.status_codes.get(&200), Some(&8));
    }

    #[test]
    fn avg_of_identical_values_stays_within_bounds() {
        let start = Utc::now();
        let outcomes: Vec<_> = (0..3).map(|_| outcome(start, 0.1, true)).collect();
        let m = compute_metrics(&outcomes, start, start + chrono::Duration::seconds(1));
        assert!(m.avg_response_time_ms >= m.min_response_time_ms);
        assert!(m.avg_response_time_ms <= m.max_response_time_ms);
    }

    #[test]
    fn all_failures_is_full_error_rate() {
        let start = Utc::now();
        let outcomes: Vec<_> = (0..4).map(|_| outcome(start, 10.0, false)).collect();
        let m = compute_metrics(&outcomes, start, start + chrono::Duration::seconds(1));
        assert_eq!(m.error_rate, 100.0);
    }

    #[test]
    fn timeline_only_counts_trailing_window() {
        let now = Utc::now();
        let outcomes = vec![
            outcome(now - chrono::Duration::seconds(10), 500.0, false),
            outcome(now - chrono::Duration::seconds(4), 20.0, true),
            outcome(now - chrono::Duration::seconds(1), 40.0, false),
        ];
        let sample = timeline_sample(&outcomes, now, 3);
        assert_eq!(sample.active_workers, 3);
        assert_eq!(sample.rps, 2.0 / TIMELINE_WINDOW_SECS as f64);
        assert_eq!(sample.avg_response_time_ms, 30.0);
        assert_eq!(sample.error_rate, 50.0);
    }
}
