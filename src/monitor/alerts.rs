use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use super::{AlertChannel, AlertConfig, Incident};

const ALERT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    IncidentOpened,
    IncidentResolved,
}

/// The JSON event delivered to every channel.
#[derive(Debug, Clone, Serialize)]
pub struct AlertEvent {
    pub kind: AlertKind,
    pub monitor_id: String,
    pub monitor_name: String,
    pub url: String,
    pub incident: Incident,
    pub sent_at: DateTime<Utc>,
}

impl AlertEvent {
    pub fn summary(&self) -> String {
        match self.kind {
            AlertKind::IncidentOpened => format!(
                "{} is DOWN ({} consecutive failures since {})",
                self.monitor_name,
                self.incident.failure_count,
                self.incident.start_time.to_rfc3339()
            ),
            AlertKind::IncidentResolved => format!(
                "{} has RECOVERED after {}s",
                self.monitor_name,
                self.incident.duration_ms.unwrap_or(0) / 1000
            ),
        }
    }
}

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("alert request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("alert endpoint returned status {0}")]
    Status(u16),
    #[error("channel not configured: {0}")]
    NotConfigured(String),
}

#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn deliver(&self, alert: &AlertConfig, event: &AlertEvent) -> Result<(), AlertError>;
}

/// Posts the JSON event over HTTP. Email goes through an HTTP mail relay.
pub struct HttpAlertSink {
    client: reqwest::Client,
}

impl HttpAlertSink {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn post(
        &self,
        url: &str,
        headers: &std::collections::BTreeMap<String, String>,
        payload: &serde_json::Value,
    ) -> Result<(), AlertError> {
        let mut request = self
            .client
            .post(url)
            .timeout(Duration::from_secs(ALERT_TIMEOUT_SECS))
            .json(payload);
        for (name, value) in headers {
            request = request.header(name, value);
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(AlertError::Status(response.status().as_u16()));
        }
        Ok(())
    }
}

#[async_trait]
impl AlertSink for HttpAlertSink {
    async fn deliver(&self, alert: &AlertConfig, event: &AlertEvent) -> Result<(), AlertError> {
        let no_headers = std::collections::BTreeMap::new();
        match &alert.channel {
            AlertChannel::Webhook { url, headers } => {
                self.post(url, headers, &serde_json::json!(event)).await
            }
            AlertChannel::Slack {
                webhook_url,
                channel,
            } => {
                let mut payload = serde_json::json!({
                    "text": event.summary(),
                    "event": event,
                });
                if let Some(channel) = channel {
                    payload["channel"] = serde_json::json!(channel);
                }
                self.post(webhook_url, &no_headers, &payload).await
            }
            AlertChannel::Email { to, relay_url } => {
                let relay = relay_url
                    .as_deref()
                    .ok_or_else(|| AlertError::NotConfigured("email relay_url".into()))?;
                let payload = serde_json::json!({
                    "to": to,
                    "subject": event.summary(),
                    "event": event,
                });
                self.post(relay, &no_headers, &payload).await
            }
        }
    }
}

/// Best-effort fan-out of alert events. Deliveries run in the background;
/// failures are logged and dropped.
#[derive(Clone)]
pub struct AlertDispatcher {
    sink: Arc<dyn AlertSink>,
}

impl AlertDispatcher {
    pub fn new(sink: Arc<dyn AlertSink>) -> Self {
        Self { sink }
    }

    pub fn dispatch(&self, alerts: Vec<AlertConfig>, event: AlertEvent) {
        let event = Arc::new(event);
        for alert in alerts.into_iter().filter(|a| a.enabled) {
            let sink = self.sink.clone();
            let event = event.clone();
            tokio::spawn(async move {
                match sink.deliver(&alert, &event).await {
                    Ok(()) => debug!(
                        alert_id = %alert.id,
                        monitor_id = %event.monitor_id,
                        kind = ?event.kind,
                        "Alert delivered"
                    ),
                    Err(e) => warn!(
                        alert_id = %alert.id,
                        monitor_id = %event.monitor_id,
                        kind = ?event.kind,
                        "Alert delivery failed: {}",
                        e
                    ),
                }
            });
        }
    }
}
