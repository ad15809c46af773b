pub mod generator;
pub mod metrics;
pub mod shaping;
pub mod thresholds;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{DEFAULT_REQUEST_TIMEOUT_SECS, MAX_CONCURRENCY, MAX_DURATION_SECS};

// ============================================================================
// Data model
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TestType {
    Load,
    Stress,
    Spike,
    Volume,
    Endurance,
}

/// Pass/fail contract for a run. Latencies in milliseconds, error rate in
/// percent, throughput in requests per second.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Thresholds {
    pub avg_response_time_ms: f64,
    pub p95_response_time_ms: f64,
    pub error_rate: f64,
    pub min_throughput: f64,
}

/// Immutable description of one load test run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestProfile {
    #[serde(default = "new_id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
    pub test_type: TestType,
    pub duration_secs: u64,
    pub concurrency: u32,
    #[serde(default)]
    pub ramp_up_secs: Option<u64>,
    #[serde(default)]
    pub target_rps: Option<f64>,
    #[serde(default)]
    pub max_requests: Option<u64>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    pub thresholds: Thresholds,
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_request_timeout() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

impl TestProfile {
    pub fn validate(&self) -> Result<(), String> {
        if self.duration_secs == 0 {
            return Err("duration must be at least one second".into());
        }
        if self.duration_secs > MAX_DURATION_SECS {
            return Err(format!(
                "duration must not exceed {} seconds",
                MAX_DURATION_SECS
            ));
        }
        if self.concurrency == 0 {
            return Err("concurrency must be at least 1".into());
        }
        if self.concurrency > MAX_CONCURRENCY {
            return Err(format!("concurrency must not exceed {}", MAX_CONCURRENCY));
        }
        if self.request_timeout_secs == 0 {
            return Err("request timeout must be at least one second".into());
        }
        if let Some(rps) = self.target_rps {
            if !rps.is_finite() || rps <= 0.0 {
                return Err(format!("target rps must be positive, got {}", rps));
            }
        }
        if self.max_requests == Some(0) {
            return Err("max requests must be at least 1 when set".into());
        }
        url::Url::parse(&self.url).map_err(|e| format!("invalid url {:?}: {}", self.url, e))?;
        Ok(())
    }

    /// Pause each worker takes between requests so the whole run aims at
    /// `target_rps`. Never longer than the run itself.
    pub fn pacing(&self) -> Option<std::time::Duration> {
        let duration = std::time::Duration::from_secs(self.duration_secs);
        self.target_rps.map(|rps| {
            std::time::Duration::try_from_secs_f64(self.concurrency as f64 / rps)
                .unwrap_or(duration)
                .min(duration)
        })
    }
}

/// Result of one request issued by a load test worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestOutcome {
    pub timestamp: DateTime<Utc>,
    pub elapsed_ms: f64,
    pub status_code: Option<u16>,
    pub success: bool,
    pub error: Option<String>,
    pub bytes: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RunMetrics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub min_response_time_ms: f64,
    pub avg_response_time_ms: f64,
    pub max_response_time_ms: f64,
    pub p50_response_time_ms: f64,
    pub p95_response_time_ms: f64,
    pub p99_response_time_ms: f64,
    /// Requests per second over the wall-clock run duration.
    pub throughput: f64,
    /// Percent of failed requests, 0 when nothing was issued.
    pub error_rate: f64,
    pub bytes_transferred: u64,
    pub status_codes: BTreeMap<u16, u64>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

/// Trailing-window snapshot used for progress reporting only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimelineSample {
    pub timestamp: DateTime<Utc>,
    pub active_workers: usize,
    pub rps: f64,
    pub avg_response_time_ms: f64,
    pub error_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub run_id: String,
    pub profile: TestProfile,
    pub metrics: RunMetrics,
    pub outcomes: Vec<RequestOutcome>,
    pub timeline: Vec<TimelineSample>,
    pub passed: bool,
    pub failed_thresholds: Vec<String>,
    /// Set when the run was ended early by `stop()`.
    pub stopped: bool,
}

/// Persisted form of a result; raw outcomes and timeline are dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResultSummary {
    pub run_id: String,
    pub profile: TestProfile,
    pub metrics: RunMetrics,
    pub passed: bool,
    pub failed_thresholds: Vec<String>,
    pub stopped: bool,
}

impl TestResult {
    pub fn summary(&self) -> TestResultSummary {
        TestResultSummary {
            run_id: self.run_id.clone(),
            profile: self.profile.clone(),
            metrics: self.metrics.clone(),
            passed: self.passed,
            failed_thresholds: self.failed_thresholds.clone(),
            stopped: self.stopped,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoadEvent {
    RunStarted {
        run_id: String,
        profile_name: String,
        test_type: TestType,
    },
    Progress {
        run_id: String,
        percent: f64,
        metrics: RunMetrics,
        sample: TimelineSample,
    },
    Outcome {
        run_id: String,
        outcome: RequestOutcome,
    },
    RunFinished {
        run_id: String,
        passed: bool,
        stopped: bool,
        failed_thresholds: Vec<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStatus {
    pub running: bool,
    pub run_id: Option<String>,
    pub profile_name: Option<String>,
    pub percent: f64,
    pub active_workers: usize,
    pub outcomes: usize,
    pub stop_requested: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn profile_json() -> serde_json::Value {
        json!({
            "url": "http://localhost:8080/api",
            "test_type": "stress",
            "duration_secs": 10,
            "concurrency": 4,
            "thresholds": {
                "avg_response_time_ms": 100.0,
                "p95_response_time_ms": 200.0,
                "error_rate": 5.0,
                "min_throughput": 1.0
            }
        })
    }

    #[test]
    fn profile_defaults_fill_in() {
        let profile: TestProfile = serde_json::from_value(profile_json()).unwrap();
        assert_eq!(profile.method, "GET");
        assert_eq!(profile.request_timeout_secs, DEFAULT_REQUEST_TIMEOUT_SECS);
        assert_eq!(profile.test_type, TestType::Stress);
        assert!(!profile.id.is_empty());
        assert!(profile.validate().is_ok());
    }

    #[test]
    fn profile_validation_rejects_bad_values() {
        let mut profile: TestProfile = serde_json::from_value(profile_json()).unwrap();
        profile.concurrency = 0;
        assert!(profile.validate().is_err());

        profile.concurrency = 2;
        profile.target_rps = Some(0.0);
        assert!(profile.validate().is_err());

        profile.target_rps = None;
        profile.url = "not a url".into();
        assert!(profile.validate().is_err());
    }

    #[test]
    fn profile_validation_caps_duration_and_concurrency() {
        let mut profile: TestProfile = serde_json::from_value(profile_json()).unwrap();
        profile.duration_secs = MAX_DURATION_SECS;
        assert!(profile.validate().is_ok());
        profile.duration_secs = u64::MAX;
        assert!(profile.validate().unwrap_err().contains("duration"));

        profile.duration_secs = 10;
        profile.concurrency = MAX_CONCURRENCY + 1;
        assert!(profile.validate().unwrap_err().contains("concurrency"));
    }

    #[test]
    fn pacing_is_capped_at_the_run_duration() {
        let mut profile: TestProfile = serde_json::from_value(profile_json()).unwrap();
        assert_eq!(profile.pacing(), None);

        profile.target_rps = Some(8.0);
        assert_eq!(profile.pacing(), Some(std::time::Duration::from_millis(500)));

        // 4 / 1e-300 does not fit in a Duration.
        profile.target_rps = Some(1e-300);
        assert!(profile.validate().is_ok());
        assert_eq!(profile.pacing(), Some(std::time::Duration::from_secs(10)));
    }
}
