use std::collections::VecDeque;

use chrono::Duration;
use tracing::info;

use super::history::CheckHistory;
use super::{Check, Incident, IncidentStatus};
use crate::config::{CHECK_HISTORY_CAPACITY, INCIDENT_LOG_CAPACITY};

#[derive(Debug, Clone, PartialEq)]
pub enum IncidentTransition {
    Opened(Incident),
    Resolved(Incident),
}

/// Open/resolve state machine for one monitor.
///
/// Holds at most one ongoing incident; resolved incidents are kept in a
/// bounded log.
#[derive(Debug, Clone, Default)]
pub struct IncidentTracker {
    ongoing: Option<Incident>,
    resolved: VecDeque<Incident>,
}

impl IncidentTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ongoing(&self) -> Option<&Incident> {
        self.ongoing.as_ref()
    }

    /// All incidents, newest first.
    pub fn incidents(&self) -> Vec<Incident> {
        self.ongoing
            .iter()
            .chain(self.resolved.iter().rev())
            .cloned()
            .collect()
    }

    /// Feed the newest check. `history` must already contain it.
    pub fn observe(
        &mut self,
        history: &CheckHistory,
        check: &Check,
        alert_threshold: u32,
        window: Duration,
    ) -> Option<IncidentTransition> {
        if !check.success {
            if let Some(incident) = self.ongoing.as_mut() {
                incident.failure_count += 1;
                if incident.checks.len() >= CHECK_HISTORY_CAPACITY {
                    incident.checks.pop_front();
                }
                incident.checks.push_back(check.clone());
                return None;
            }

            let run = recent_failures(history, check, alert_threshold, window);
            if run.len() < alert_threshold as usize {
                return None;
            }
            let start_time = run.first()?.timestamp;
            let incident = Incident {
                id: uuid::Uuid::new_v4().to_string(),
                monitor_id: check.monitor_id.clone(),
                start_time,
                end_time: None,
                duration_ms: None,
                status: IncidentStatus::Ongoing,
                failure_count: run.len() as u32,
                checks: run.into(),
            };
            info!(
                monitor_id = %incident.monitor_id,
                incident_id = %incident.id,
                failures = incident.failure_count,
                "Incident opened"
            );
            self.ongoing = Some(incident.clone());
            return Some(IncidentTransition::Opened(incident));
        }

        let mut incident = self.ongoing.take()?;
        incident.end_time = Some(check.timestamp);
        incident.duration_ms = Some((check.timestamp - incident.start_time).num_milliseconds());
        incident.status = IncidentStatus::Resolved;
        info!(
            monitor_id = %incident.monitor_id,
            incident_id = %incident.id,
            duration_ms = incident.duration_ms,
            "Incident resolved"
        );
        if self.resolved.len() >= INCIDENT_LOG_CAPACITY {
            self.resolved.pop_front();
        }
        self.resolved.push_back(incident.clone());
        Some(IncidentTransition::Resolved(incident))
    }
}

/// The contiguous trailing run of failed checks ending at `check`, at most
/// `limit` long, ignoring checks older than `window`. Oldest first.
pub fn recent_failures(
    history: &CheckHistory,
    check: &Check,
    limit: u32,
    window: Duration,
) -> Vec<Check> {
    let cutoff = check.timestamp - window;
    let mut run: Vec<Check> = history
        .iter()
        .rev()
        .take_while(|c| !c.success && c.timestamp >= cutoff)
        .take(limit as usize)
        .cloned()
        .collect();
    run.reverse();
    run
}
