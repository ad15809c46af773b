pub mod alerts;
pub mod history;
pub mod incident;
pub mod schedule;
pub mod service;
pub mod stats;

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{CHECK_HISTORY_CAPACITY, INCIDENT_WINDOW_SECS, MAX_INTERVAL_MINUTES};
use crate::transport::TransportResponse;

// ============================================================================
// Data model
// ============================================================================

/// Long-lived health check configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Monitor {
    #[serde(default = "new_id")]
    pub id: String,
    pub name: String,
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
    /// Minutes between checks.
    pub interval_minutes: u64,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Accepted status codes; empty means any 2xx.
    #[serde(default)]
    pub expected_status: Vec<u16>,
    #[serde(default)]
    pub expected_content: Option<String>,
    /// Consecutive failures that open an incident.
    #[serde(default = "default_alert_threshold")]
    pub alert_threshold: u32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub last_checked: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: Vec<String>,
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_alert_threshold() -> u32 {
    3
}

fn default_enabled() -> bool {
    true
}

impl Monitor {
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("name must not be empty".into());
        }
        if self.interval_minutes == 0 {
            return Err("interval must be at least one minute".into());
        }
        if self.interval_minutes > MAX_INTERVAL_MINUTES {
            return Err(format!(
                "interval must not exceed {} minutes",
                MAX_INTERVAL_MINUTES
            ));
        }
        if self.timeout_secs == 0 {
            return Err("timeout must be at least one second".into());
        }
        if self.alert_threshold == 0 {
            return Err("alert threshold must be at least 1".into());
        }
        if self.alert_threshold as usize > CHECK_HISTORY_CAPACITY {
            return Err(format!(
                "alert threshold must not exceed {}",
                CHECK_HISTORY_CAPACITY
            ));
        }
        url::Url::parse(&self.url).map_err(|e| format!("invalid url {:?}: {}", self.url, e))?;
        Ok(())
    }

    /// Time between checks, clamped to the accepted interval range.
    pub fn interval(&self) -> chrono::Duration {
        let minutes = self.interval_minutes.clamp(1, MAX_INTERVAL_MINUTES);
        i64::try_from(minutes)
            .ok()
            .and_then(chrono::Duration::try_minutes)
            .unwrap_or_else(|| chrono::Duration::minutes(1))
    }

    /// Staleness cap for the failure run that opens an incident.
    ///
    /// At least one hour, stretched to `interval * alert_threshold` so a
    /// monitor checked less often than hourly can still reach its threshold.
    pub fn incident_window(&self) -> chrono::Duration {
        let floor = chrono::Duration::seconds(INCIDENT_WINDOW_SECS);
        let threshold = i32::try_from(self.alert_threshold).unwrap_or(i32::MAX);
        let span = self
            .interval()
            .checked_mul(threshold)
            .unwrap_or(chrono::Duration::MAX);
        floor.max(span)
    }

    /// Judge a response against the expected status set and content.
    pub fn judge(&self, response: &TransportResponse) -> (bool, Option<String>) {
        let status_ok = if self.expected_status.is_empty() {
            (200..300).contains(&response.status_code)
        } else {
            self.expected_status.contains(&response.status_code)
        };
        if !status_ok {
            return (
                false,
                Some(format!("Unexpected status code {}", response.status_code)),
            );
        }
        if let Some(expected) = &self.expected_content {
            if !response.body.contains(expected.as_str()) {
                return (
                    false,
                    Some(format!("Expected content {:?} not found in response", expected)),
                );
            }
        }
        (true, None)
    }
}

/// Partial update; only present fields change.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitorUpdate {
    pub name: Option<String>,
    pub url: Option<String>,
    pub method: Option<String>,
    pub headers: Option<BTreeMap<String, String>>,
    pub body: Option<String>,
    pub interval_minutes: Option<u64>,
    pub timeout_secs: Option<u64>,
    pub expected_status: Option<Vec<u16>>,
    pub expected_content: Option<String>,
    pub alert_threshold: Option<u32>,
    pub enabled: Option<bool>,
    pub tags: Option<Vec<String>>,
}

impl MonitorUpdate {
    pub fn apply(self, monitor: &mut Monitor) {
        if let Some(v) = self.name {
            monitor.name = v;
        }
        if let Some(v) = self.url {
            monitor.url = v;
        }
        if let Some(v) = self.method {
            monitor.method = v;
        }
        if let Some(v) = self.headers {
            monitor.headers = v;
        }
        if let Some(v) = self.body {
            monitor.body = Some(v);
        }
        if let Some(v) = self.interval_minutes {
            monitor.interval_minutes = v;
        }
        if let Some(v) = self.timeout_secs {
            monitor.timeout_secs = v;
        }
        if let Some(v) = self.expected_status {
            monitor.expected_status = v;
        }
        if let Some(v) = self.expected_content {
            monitor.expected_content = Some(v);
        }
        if let Some(v) = self.alert_threshold {
            monitor.alert_threshold = v;
        }
        if let Some(v) = self.enabled {
            monitor.enabled = v;
        }
        if let Some(v) = self.tags {
            monitor.tags = v;
        }
    }
}

/// Outcome of one health check.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Check {
    pub monitor_id: String,
    pub timestamp: DateTime<Utc>,
    pub elapsed_ms: f64,
    pub status_code: Option<u16>,
    pub success: bool,
    pub error: Option<String>,
    pub bytes: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IncidentStatus {
    Ongoing,
    Resolved,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Incident {
    pub id: String,
    pub monitor_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub status: IncidentStatus,
    pub failure_count: u32,
    /// Failed checks of this incident, oldest first, capped at the check
    /// history capacity.
    pub checks: VecDeque<Check>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CurrentStatus {
    Up,
    Degraded,
    Down,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorStats {
    pub monitor_id: String,
    pub window_hours: i64,
    pub total_checks: usize,
    pub successful_checks: usize,
    pub uptime_percent: f64,
    pub avg_response_time_ms: f64,
    pub current_status: CurrentStatus,
    pub last_checked: Option<DateTime<Utc>>,
    pub recent_incidents: Vec<Incident>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AlertChannel {
    Webhook {
        url: String,
        #[serde(default)]
        headers: BTreeMap<String, String>,
    },
    Email {
        to: Vec<String>,
        /// HTTP mail relay that accepts the JSON event.
        #[serde(default)]
        relay_url: Option<String>,
    },
    Slack {
        webhook_url: String,
        #[serde(default)]
        channel: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlertConfig {
    #[serde(default = "new_id")]
    pub id: String,
    #[serde(default)]
    pub monitor_id: String,
    pub channel: AlertChannel,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MonitorEvent {
    Check { check: Check },
    IncidentOpened { incident: Incident },
    IncidentResolved { incident: Incident },
    MonitorAdded { monitor: Monitor },
    MonitorUpdated { monitor: Monitor },
    MonitorRemoved { monitor_id: String },
}
