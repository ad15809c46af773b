use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, Mutex, Notify, RwLock};
use tracing::{debug, info, warn};

use super::alerts::{AlertDispatcher, AlertEvent, AlertKind};
use super::history::CheckHistory;
use super::incident::{IncidentTracker, IncidentTransition};
use super::schedule::Schedule;
use super::stats::compute_stats;
use super::{AlertConfig, Check, Incident, Monitor, MonitorEvent, MonitorStats, MonitorUpdate};
use crate::clock::SharedClock;
use crate::config::{ALERTS_KEY, MONITORS_KEY, SCHEDULER_IDLE_POLL_SECS};
use crate::error::EngineError;
use crate::events::EventBus;
use crate::store::SharedStore;
use crate::transport::{SharedTransport, TransportError, TransportRequest};

/// Owns every monitor, its check history and incident state, and the
/// single schedule that decides when each monitor fires next.
pub struct HealthScheduler {
    transport: SharedTransport,
    clock: SharedClock,
    store: SharedStore,
    alerts: AlertDispatcher,
    events: EventBus<MonitorEvent>,
    monitors: RwLock<HashMap<String, Arc<Mutex<MonitorEntry>>>>,
    schedule: Mutex<Schedule>,
    wake: Notify,
    idle_poll: Duration,
}

/// Per-monitor state. Only this monitor's own check sequence mutates it.
struct MonitorEntry {
    monitor: Monitor,
    history: CheckHistory,
    tracker: IncidentTracker,
    alerts: Vec<AlertConfig>,
    in_flight: bool,
}

impl MonitorEntry {
    fn new(monitor: Monitor) -> Self {
        Self {
            monitor,
            history: CheckHistory::new(),
            tracker: IncidentTracker::new(),
            alerts: Vec::new(),
            in_flight: false,
        }
    }
}

impl HealthScheduler {
    pub fn new(
        transport: SharedTransport,
        clock: SharedClock,
        store: SharedStore,
        alerts: AlertDispatcher,
    ) -> Self {
        Self {
            transport,
            clock,
            store,
            alerts,
            events: EventBus::new(),
            monitors: RwLock::new(HashMap::new()),
            schedule: Mutex::new(Schedule::new()),
            wake: Notify::new(),
            idle_poll: Duration::from_secs(SCHEDULER_IDLE_POLL_SECS),
        }
    }

    /// Longest the coordinating loop sleeps before re-reading the clock.
    pub fn with_idle_poll(mut self, idle_poll: Duration) -> Self {
        self.idle_poll = idle_poll;
        self
    }

    pub fn events(&self) -> &EventBus<MonitorEvent> {
        &self.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.events.subscribe()
    }

    // ========================================================================
    // Monitor lifecycle
    // ========================================================================

    /// Register a monitor. Enabled monitors are checked immediately and then
    /// every `interval_minutes`.
    pub async fn add_monitor(self: &Arc<Self>, monitor: Monitor) -> Result<Monitor, EngineError> {
        monitor.validate().map_err(EngineError::InvalidMonitor)?;

        {
            let mut monitors = self.monitors.write().await;
            if monitors.contains_key(&monitor.id) {
                return Err(EngineError::InvalidMonitor(format!(
                    "monitor {} already exists",
                    monitor.id
                )));
            }
            monitors.insert(
                monitor.id.clone(),
                Arc::new(Mutex::new(MonitorEntry::new(monitor.clone()))),
            );
        }

        info!(monitor_id = %monitor.id, name = %monitor.name, enabled = monitor.enabled, "Monitor added");

        if monitor.enabled {
            self.arm(&monitor).await;
            self.spawn_check(monitor.id.clone());
        }

        self.persist_monitors().await;
        self.events
            .publish(MonitorEvent::MonitorAdded {
                monitor: monitor.clone(),
            })
            .await;
        Ok(monitor)
    }

    /// Apply a partial update. Changing `enabled` or the interval re-arms
    /// the schedule; re-enabling also runs an immediate check.
    pub async fn update_monitor(
        self: &Arc<Self>,
        id: &str,
        update: MonitorUpdate,
    ) -> Result<Monitor, EngineError> {
        let entry = self.entry(id).await?;
        let (before, after) = {
            let mut entry = entry.lock().await;
            let before = entry.monitor.clone();
            let mut candidate = before.clone();
            update.apply(&mut candidate);
            candidate.id = before.id.clone();
            candidate.validate().map_err(EngineError::InvalidMonitor)?;
            entry.monitor = candidate.clone();
            (before, candidate)
        };

        let schedule_changed =
            before.enabled != after.enabled || before.interval_minutes != after.interval_minutes;
        if schedule_changed {
            self.schedule.lock().await.cancel(id);
            if after.enabled {
                self.arm(&after).await;
            }
            debug!(monitor_id = %id, enabled = after.enabled, interval_minutes = after.interval_minutes, "Monitor rescheduled");
        }
        if after.enabled && !before.enabled {
            self.spawn_check(id.to_string());
        }

        info!(monitor_id = %id, "Monitor updated");
        self.persist_monitors().await;
        self.events
            .publish(MonitorEvent::MonitorUpdated {
                monitor: after.clone(),
            })
            .await;
        Ok(after)
    }

    /// Remove a monitor, cancelling its schedule and discarding its history.
    pub async fn remove_monitor(&self, id: &str) -> Result<(), EngineError> {
        let removed = self.monitors.write().await.remove(id);
        if removed.is_none() {
            return Err(EngineError::MonitorNotFound(id.to_string()));
        }
        self.schedule.lock().await.cancel(id);
        self.wake.notify_one();

        info!(monitor_id = %id, "Monitor removed");
        self.persist_monitors().await;
        self.persist_alerts().await;
        self.events
            .publish(MonitorEvent::MonitorRemoved {
                monitor_id: id.to_string(),
            })
            .await;
        Ok(())
    }

    pub async fn get_monitor(&self, id: &str) -> Result<Monitor, EngineError> {
        let entry = self.entry(id).await?;
        let monitor = entry.lock().await.monitor.clone();
        Ok(monitor)
    }

    pub async fn list_monitors(&self) -> Vec<Monitor> {
        let entries: Vec<_> = self.monitors.read().await.values().cloned().collect();
        let mut monitors = Vec::with_capacity(entries.len());
        for entry in entries {
            monitors.push(entry.lock().await.monitor.clone());
        }
        monitors.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        monitors
    }

    pub async fn is_scheduled(&self, id: &str) -> bool {
        self.schedule.lock().await.is_armed(id)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub async fn history(&self, id: &str, limit: usize) -> Result<Vec<Check>, EngineError> {
        let entry = self.entry(id).await?;
        let checks = entry.lock().await.history.recent(limit);
        Ok(checks)
    }

    pub async fn history_len(&self, id: &str) -> Result<usize, EngineError> {
        let entry = self.entry(id).await?;
        let len = entry.lock().await.history.len();
        Ok(len)
    }

    pub async fn incidents(&self, id: &str) -> Result<Vec<Incident>, EngineError> {
        let entry = self.entry(id).await?;
        let incidents = entry.lock().await.tracker.incidents();
        Ok(incidents)
    }

    pub async fn stats(&self, id: &str, window: chrono::Duration) -> Result<MonitorStats, EngineError> {
        let entry = self.entry(id).await?;
        let entry = entry.lock().await;
        Ok(compute_stats(
            id,
            &entry.history,
            &entry.tracker,
            self.clock.now(),
            window,
        ))
    }

    // ========================================================================
    // Alerts
    // ========================================================================

    pub async fn add_alert(&self, monitor_id: &str, mut alert: AlertConfig) -> Result<AlertConfig, EngineError> {
        let entry = self.entry(monitor_id).await?;
        alert.monitor_id = monitor_id.to_string();
        entry.lock().await.alerts.push(alert.clone());
        info!(monitor_id = %monitor_id, alert_id = %alert.id, "Alert added");
        self.persist_alerts().await;
        Ok(alert)
    }

    pub async fn remove_alert(&self, monitor_id: &str, alert_id: &str) -> Result<(), EngineError> {
        let entry = self.entry(monitor_id).await?;
        {
            let mut entry = entry.lock().await;
            let before = entry.alerts.len();
            entry.alerts.retain(|a| a.id != alert_id);
            if entry.alerts.len() == before {
                return Err(EngineError::AlertNotFound(alert_id.to_string()));
            }
        }
        self.persist_alerts().await;
        Ok(())
    }

    pub async fn alerts(&self, monitor_id: &str) -> Result<Vec<AlertConfig>, EngineError> {
        let entry = self.entry(monitor_id).await?;
        let alerts = entry.lock().await.alerts.clone();
        Ok(alerts)
    }

    // ========================================================================
    // Checks
    // ========================================================================

    /// Run one check for `id` and feed it through the incident tracker.
    ///
    /// Returns `Ok(None)` when a check for this monitor is already in flight
    /// or the monitor was removed while the request was outstanding.
    pub async fn run_check(&self, id: &str) -> Result<Option<Check>, EngineError> {
        let entry = self.entry(id).await?;
        let monitor = {
            let mut guard = entry.lock().await;
            if guard.in_flight {
                debug!(monitor_id = %id, "Check already in flight, skipping");
                return Ok(None);
            }
            guard.in_flight = true;
            guard.monitor.clone()
        };

        let timeout = Duration::from_secs(monitor.timeout_secs);
        let request = TransportRequest {
            method: monitor.method.clone(),
            url: monitor.url.clone(),
            headers: monitor.headers.clone(),
            body: monitor.body.clone(),
            timeout,
        };
        let started = tokio::time::Instant::now();
        let result = match tokio::time::timeout(timeout, self.transport.request(request)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(timeout)),
        };
        let timestamp = self.clock.now();

        let check = match result {
            Ok(response) => {
                let (success, error) = monitor.judge(&response);
                Check {
                    monitor_id: monitor.id.clone(),
                    timestamp,
                    elapsed_ms: response.elapsed.as_secs_f64() * 1000.0,
                    status_code: Some(response.status_code),
                    success,
                    error,
                    bytes: response.body_size,
                }
            }
            Err(e) => {
                let elapsed = match &e {
                    TransportError::Timeout(limit) => *limit,
                    _ => started.elapsed().min(timeout),
                };
                Check {
                    monitor_id: monitor.id.clone(),
                    timestamp,
                    elapsed_ms: elapsed.as_secs_f64() * 1000.0,
                    status_code: None,
                    success: false,
                    error: Some(e.to_string()),
                    bytes: 0,
                }
            }
        };

        if !check.success {
            warn!(
                monitor_id = %monitor.id,
                status = ?check.status_code,
                error = check.error.as_deref().unwrap_or(""),
                "Health check failed"
            );
        }

        let (transition, alerts, current) = {
            let mut guard = entry.lock().await;
            guard.in_flight = false;

            let still_registered = self
                .monitors
                .read()
                .await
                .get(id)
                .is_some_and(|current| Arc::ptr_eq(current, &entry));
            if !still_registered {
                debug!(monitor_id = %id, "Monitor removed during check, discarding result");
                return Ok(None);
            }

            guard.history.push(check.clone());
            guard.monitor.last_checked = Some(check.timestamp);
            let threshold = guard.monitor.alert_threshold;
            let window = guard.monitor.incident_window();
            let MonitorEntry {
                history, tracker, ..
            } = &mut *guard;
            let transition = tracker.observe(history, &check, threshold, window);
            (transition, guard.alerts.clone(), guard.monitor.clone())
        };

        if let Some(transition) = transition {
            self.announce(&current, transition, alerts).await;
        }

        self.events
            .publish(MonitorEvent::Check {
                check: check.clone(),
            })
            .await;
        Ok(Some(check))
    }

    async fn announce(&self, monitor: &Monitor, transition: IncidentTransition, alerts: Vec<AlertConfig>) {
        let (kind, incident, event) = match transition {
            IncidentTransition::Opened(incident) => (
                AlertKind::IncidentOpened,
                incident.clone(),
                MonitorEvent::IncidentOpened { incident },
            ),
            IncidentTransition::Resolved(incident) => (
                AlertKind::IncidentResolved,
                incident.clone(),
                MonitorEvent::IncidentResolved { incident },
            ),
        };

        self.events.publish(event).await;
        self.alerts.dispatch(
            alerts,
            AlertEvent {
                kind,
                monitor_id: monitor.id.clone(),
                monitor_name: monitor.name.clone(),
                url: monitor.url.clone(),
                incident,
                sent_at: self.clock.now(),
            },
        );
    }

    fn spawn_check(self: &Arc<Self>, id: String) {
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(e) = this.run_check(&id).await {
                debug!(monitor_id = %id, "Scheduled check skipped: {}", e);
            }
        });
    }

    // ========================================================================
    // Scheduling
    // ========================================================================

    async fn arm(&self, monitor: &Monitor) {
        let at = next_fire_after(self.clock.now(), monitor);
        self.schedule.lock().await.arm(&monitor.id, at);
        self.wake.notify_one();
    }

    /// Fire every monitor whose next check is due, re-arming each one
    /// interval ahead. Checks run concurrently across monitors.
    pub async fn tick(self: &Arc<Self>) -> Vec<String> {
        let now = self.clock.now();
        let due = self.schedule.lock().await.pop_due(now);

        for id in &due {
            let monitor = match self.get_monitor(id).await {
                Ok(monitor) => monitor,
                Err(_) => continue,
            };
            if !monitor.enabled {
                continue;
            }
            self.schedule
                .lock()
                .await
                .arm(id, next_fire_after(now, &monitor));
            self.spawn_check(id.clone());
        }
        due
    }

    /// Coordinating loop: sleeps until the earliest due monitor (or a
    /// schedule change) and fires what is due.
    pub fn spawn_loop(self: &Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> tokio::task::JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            info!("Health scheduler started");
            let idle = this.idle_poll;
            loop {
                let wait = {
                    let next = this.schedule.lock().await.next_fire();
                    match next {
                        Some(at) => (at - this.clock.now()).to_std().unwrap_or(Duration::ZERO).min(idle),
                        None => idle,
                    }
                };

                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = this.wake.notified() => continue,
                    _ = shutdown.recv() => break,
                }

                let fired = this.tick().await;
                if !fired.is_empty() {
                    debug!(count = fired.len(), "Scheduled checks fired");
                }
            }
            info!("Health scheduler stopped");
        })
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Reload monitors and alerts saved by a previous process.
    pub async fn restore(self: &Arc<Self>) -> Result<usize, EngineError> {
        let monitors: Vec<Monitor> = match self
            .store
            .get(MONITORS_KEY)
            .map_err(|e| EngineError::Store(e.to_string()))?
        {
            Some(value) => serde_json::from_value(value).map_err(|e| EngineError::Store(e.to_string()))?,
            None => Vec::new(),
        };
        let alerts: Vec<AlertConfig> = match self
            .store
            .get(ALERTS_KEY)
            .map_err(|e| EngineError::Store(e.to_string()))?
        {
            Some(value) => serde_json::from_value(value).map_err(|e| EngineError::Store(e.to_string()))?,
            None => Vec::new(),
        };

        let mut restored = 0;
        for monitor in monitors {
            let id = monitor.id.clone();
            match self.add_monitor(monitor).await {
                Ok(_) => restored += 1,
                Err(e) => {
                    warn!(monitor_id = %id, "Skipping saved monitor: {}", e);
                    continue;
                }
            }
            if let Ok(entry) = self.entry(&id).await {
                entry
                    .lock()
                    .await
                    .alerts
                    .extend(alerts.iter().filter(|a| a.monitor_id == id).cloned());
            }
        }
        info!(count = restored, "Monitors restored");
        Ok(restored)
    }

    async fn persist_monitors(&self) {
        let monitors = self.list_monitors().await;
        match serde_json::to_value(&monitors) {
            Ok(value) => {
                if let Err(e) = self.store.set(MONITORS_KEY, &value) {
                    warn!("Failed to save monitors: {}", e);
                }
            }
            Err(e) => warn!("Failed to serialize monitors: {}", e),
        }
    }

    async fn persist_alerts(&self) {
        let entries: Vec<_> = self.monitors.read().await.values().cloned().collect();
        let mut alerts = Vec::new();
        for entry in entries {
            alerts.extend(entry.lock().await.alerts.iter().cloned());
        }
        match serde_json::to_value(&alerts) {
            Ok(value) => {
                if let Err(e) = self.store.set(ALERTS_KEY, &value) {
                    warn!("Failed to save alerts: {}", e);
                }
            }
            Err(e) => warn!("Failed to serialize alerts: {}", e),
        }
    }

    async fn entry(&self, id: &str) -> Result<Arc<Mutex<MonitorEntry>>, EngineError> {
        self.monitors
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::MonitorNotFound(id.to_string()))
    }
}

fn next_fire_after(now: DateTime<Utc>, monitor: &Monitor) -> DateTime<Utc> {
    now.checked_add_signed(monitor.interval())
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
