//! Load shaping: turns a profile into the set of worker activity windows.
//!
//! Every strategy is expressed as a list of `WorkerWindow`s, one per worker.
//! A worker waits until its window opens and keeps issuing requests until
//! the window closes, so concurrency at any instant is the number of open
//! windows.

use std::time::Duration;

use super::{TestProfile, TestType};
use crate::config::{
    SPIKE_BASELINE_FACTOR, SPIKE_DURATION_FRACTION, SPIKE_MAX_SECS, STRESS_PHASES,
    STRESS_PHASE_FACTOR,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerWindow {
    pub start: Duration,
    pub end: Duration,
}

#[derive(Debug, Clone)]
pub struct LoadPlan {
    pub duration: Duration,
    pub windows: Vec<WorkerWindow>,
}

impl LoadPlan {
    pub fn for_profile(profile: &TestProfile) -> Self {
        let duration = Duration::from_secs(profile.duration_secs);
        let concurrency = profile.concurrency.max(1) as usize;

        let windows = match profile.test_type {
            TestType::Load => {
                let ramp = Duration::from_secs(profile.ramp_up_secs.unwrap_or(0)).min(duration);
                ramp_up(concurrency, ramp, duration)
            }
            TestType::Stress => stress_phases(concurrency, duration),
            TestType::Spike => spike(concurrency, duration),
            TestType::Volume | TestType::Endurance => {
                flat(concurrency, Duration::ZERO, duration)
            }
        };

        Self { duration, windows }
    }

    /// Number of workers whose window covers `at`.
    pub fn concurrency_at(&self, at: Duration) -> usize {
        self.windows
            .iter()
            .filter(|w| w.start <= at && at < w.end)
            .count()
    }

    pub fn peak_concurrency(&self) -> usize {
        // Concurrency only changes at window starts.
        self.windows
            .iter()
            .map(|w| self.concurrency_at(w.start))
            .max()
            .unwrap_or(0)
    }
}

fn flat(count: usize, start: Duration, end: Duration) -> Vec<WorkerWindow> {
    (0..count).map(|_| WorkerWindow { start, end }).collect()
}

/// Worker `i` starts at `ramp * i / concurrency`, all run until the end.
fn ramp_up(concurrency: usize, ramp: Duration, duration: Duration) -> Vec<WorkerWindow> {
    if ramp.is_zero() {
        return flat(concurrency, Duration::ZERO, duration);
    }
    let step = ramp.as_secs_f64() / concurrency as f64;
    (0..concurrency)
        .map(|i| WorkerWindow {
            start: Duration::from_secs_f64(step * i as f64),
            end: duration,
        })
        .collect()
}

/// Equal phases, phase `p` (1-based) running `concurrency * p * 0.5` workers.
fn stress_phases(concurrency: usize, duration: Duration) -> Vec<WorkerWindow> {
    let phase_len = duration.as_secs_f64() / STRESS_PHASES as f64;
    let mut windows = Vec::new();
    for phase in 1..=STRESS_PHASES {
        let workers = phase_workers(concurrency, phase);
        let start = Duration::from_secs_f64(phase_len * (phase - 1) as f64);
        let end = if phase == STRESS_PHASES {
            duration
        } else {
            Duration::from_secs_f64(phase_len * phase as f64)
        };
        windows.extend(flat(workers, start, end));
    }
    windows
}

pub fn phase_workers(concurrency: usize, phase: u32) -> usize {
    ((concurrency as f64 * phase as f64 * STRESS_PHASE_FACTOR).ceil() as usize).max(1)
}

/// Baseline load for the whole run plus a centred burst at full
/// concurrency lasting `min(30s, 20% of duration)`.
fn spike(concurrency: usize, duration: Duration) -> Vec<WorkerWindow> {
    let baseline = spike_baseline(concurrency);
    let (spike_start, spike_end) = spike_span(duration);

    let mut windows = flat(baseline, Duration::ZERO, duration);
    windows.extend(flat(concurrency - baseline, spike_start, spike_end));
    windows
}

pub fn spike_baseline(concurrency: usize) -> usize {
    ((concurrency as f64 * SPIKE_BASELINE_FACTOR).round() as usize).clamp(1, concurrency)
}

pub fn spike_span(duration: Duration) -> (Duration, Duration) {
    let total = duration.as_secs_f64();
    let len = SPIKE_MAX_SECS.min(total * SPIKE_DURATION_FRACTION);
    let start = (total - len) / 2.0;
    (
        Duration::from_secs_f64(start),
        Duration::from_secs_f64(start + len),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load::Thresholds;
    use std::collections::BTreeMap;

    fn profile(test_type: TestType, duration_secs: u64, concurrency: u32) -> TestProfile {
        TestProfile {
            id: "p".into(),
            name: "p".into(),
            url: "http://localhost/".into(),
            method: "GET".into(),
            headers: BTreeMap::new(),
            body: None,
            test_type,
            duration_secs,
            concurrency,
            ramp_up_secs: None,
            target_rps: None,
            max_requests: None,
            request_timeout_secs: 5,
            thresholds: Thresholds {
                avg_response_time_ms: 100.0,
                p95_response_time_ms: 200.0,
                error_rate: 1.0,
                min_throughput: 1.0,
            },
        }
    }

    fn secs(s: f64) -> Duration {
        Duration::from_secs_f64(s)
    }

    #[test]
    fn load_without_ramp_is_flat() {
        let plan = LoadPlan::for_profile(&profile(TestType::Load, 10, 5));
        assert_eq!(plan.windows.len(), 5);
        assert_eq!(plan.concurrency_at(secs(0.0)), 5);
        assert_eq!(plan.concurrency_at(secs(9.9)), 5);
        assert_eq!(plan.concurrency_at(secs(10.0)), 0);
    }

    #[test]
    fn load_ramp_staggers_starts_evenly() {
        let mut p = profile(TestType::Load, 20, 4);
        p.ramp_up_secs = Some(8);
        let plan = LoadPlan::for_profile(&p);

        let starts: Vec<_> = plan.windows.iter().map(|w| w.start).collect();
        assert_eq!(starts, vec![secs(0.0), secs(2.0), secs(4.0), secs(6.0)]);
        assert_eq!(plan.concurrency_at(secs(1.0)), 1);
        assert_eq!(plan.concurrency_at(secs(5.0)), 3);
        assert_eq!(plan.concurrency_at(secs(8.0)), 4);
        assert!(plan.windows.iter().all(|w| w.end == secs(20.0)));
    }

    #[test]
    fn stress_escalates_in_five_steps() {
        let plan = LoadPlan::for_profile(&profile(TestType::Stress, 50, 4));
        // 4 * p * 0.5 => 2, 4, 6, 8, 10
        let levels: Vec<_> = (0..5)
            .map(|phase| plan.concurrency_at(secs(phase as f64 * 10.0 + 5.0)))
            .collect();
        assert_eq!(levels, vec![2, 4, 6, 8, 10]);
        assert_eq!(plan.peak_concurrency(), 10);
    }

    #[test]
    fn stress_phase_never_drops_to_zero_workers() {
        assert_eq!(phase_workers(1, 1), 1);
        assert_eq!(phase_workers(3, 1), 2);
    }

    #[test]
    fn spike_is_short_and_centred() {
        let plan = LoadPlan::for_profile(&profile(TestType::Spike, 100, 10));
        // spike = min(30, 20) = 20s centred => [40, 60)
        assert_eq!(plan.concurrency_at(secs(10.0)), 3);
        assert_eq!(plan.concurrency_at(secs(45.0)), 10);
        assert_eq!(plan.concurrency_at(secs(60.0)), 3);
        assert_eq!(plan.concurrency_at(secs(99.0)), 3);
    }

    #[test]
    fn long_spike_is_capped_at_thirty_seconds() {
        let (start, end) = spike_span(secs(600.0));
        assert_eq!(end - start, secs(30.0));
    }

    #[test]
    fn volume_and_endurance_share_flat_mechanics() {
        let volume = LoadPlan::for_profile(&profile(TestType::Volume, 30, 6));
        let endurance = LoadPlan::for_profile(&profile(TestType::Endurance, 30, 6));
        assert_eq!(volume.windows, endurance.windows);
        assert_eq!(volume.concurrency_at(secs(15.0)), 6);
    }
}
