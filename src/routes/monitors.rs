use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use futures::stream::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use crate::config::{DEFAULT_STATS_WINDOW_HOURS, MAX_STATS_WINDOW_HOURS};
use crate::error::EngineError;
use crate::monitor::{AlertConfig, Monitor, MonitorUpdate};
use crate::state::SharedState;

#[derive(Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    100
}

#[derive(Deserialize)]
pub struct StatsQuery {
    #[serde(default = "default_hours")]
    pub hours: i64,
}

fn default_hours() -> i64 {
    DEFAULT_STATS_WINDOW_HOURS
}

pub async fn list_monitors(State(state): State<SharedState>) -> impl IntoResponse {
    let monitors = state.scheduler.list_monitors().await;
    let total = monitors.len();
    Json(serde_json::json!({
        "monitors": monitors,
        "total": total,
    }))
}

pub async fn create_monitor(
    State(state): State<SharedState>,
    Json(monitor): Json<Monitor>,
) -> Result<impl IntoResponse, EngineError> {
    let monitor = state.scheduler.add_monitor(monitor).await?;
    Ok((StatusCode::CREATED, Json(monitor)))
}

pub async fn get_monitor(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, EngineError> {
    Ok(Json(state.scheduler.get_monitor(&id).await?))
}

pub async fn update_monitor(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(update): Json<MonitorUpdate>,
) -> Result<impl IntoResponse, EngineError> {
    Ok(Json(state.scheduler.update_monitor(&id, update).await?))
}

pub async fn delete_monitor(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, EngineError> {
    state.scheduler.remove_monitor(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /monitors/{id}/check: run a check now, outside the schedule.
pub async fn check_now(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, EngineError> {
    match state.scheduler.run_check(&id).await? {
        Some(check) => Ok((StatusCode::OK, Json(serde_json::json!({ "check": check })))),
        None => Ok((
            StatusCode::ACCEPTED,
            Json(serde_json::json!({
                "check": null,
                "message": "A check for this monitor is already in flight",
            })),
        )),
    }
}

/// GET /monitors/{id}/checks?limit=: newest first.
pub async fn check_history(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<impl IntoResponse, EngineError> {
    let checks = state.scheduler.history(&id, query.limit).await?;
    let total = state.scheduler.history_len(&id).await?;

    Ok(Json(serde_json::json!({
        "checks": checks,
        "total": total,
        "limit": query.limit,
    })))
}

/// GET /monitors/{id}/stats?hours=: windows below one hour count as one.
pub async fn monitor_stats(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Query(query): Query<StatsQuery>,
) -> Result<impl IntoResponse, EngineError> {
    let hours = query.hours.max(1);
    let window = (hours <= MAX_STATS_WINDOW_HOURS)
        .then(|| chrono::Duration::try_hours(hours))
        .flatten()
        .ok_or_else(|| {
            EngineError::InvalidQuery(format!(
                "hours must not exceed {}, got {}",
                MAX_STATS_WINDOW_HOURS, hours
            ))
        })?;
    Ok(Json(state.scheduler.stats(&id, window).await?))
}

pub async fn monitor_incidents(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, EngineError> {
    let incidents = state.scheduler.incidents(&id).await?;
    Ok(Json(serde_json::json!({ "incidents": incidents })))
}

pub async fn list_alerts(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, EngineError> {
    let alerts = state.scheduler.alerts(&id).await?;
    Ok(Json(serde_json::json!({ "alerts": alerts })))
}

pub async fn create_alert(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(alert): Json<AlertConfig>,
) -> Result<impl IntoResponse, EngineError> {
    let alert = state.scheduler.add_alert(&id, alert).await?;
    Ok((StatusCode::CREATED, Json(alert)))
}

pub async fn delete_alert(
    State(state): State<SharedState>,
    Path((id, alert_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, EngineError> {
    state.scheduler.remove_alert(&id, &alert_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /monitors/events/history: recent events, newest first.
pub async fn event_history(
    State(state): State<SharedState>,
    Query(query): Query<HistoryQuery>,
) -> impl IntoResponse {
    let events = state.scheduler.events().history().await;
    let total = events.len();
    let events: Vec<_> = events.into_iter().rev().take(query.limit).collect();

    Json(serde_json::json!({
        "events": events,
        "total": total,
        "limit": query.limit,
    }))
}

/// GET /monitors/events: SSE stream of checks and incident transitions.
pub async fn event_stream(
    State(state): State<SharedState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.scheduler.subscribe();
    let stream = BroadcastStream::new(rx);

    let event_stream = stream.filter_map(|result| match result {
        Ok(event) => {
            let data = serde_json::to_string(&event).unwrap_or_default();
            Some(Ok(Event::default().event("monitor").data(data)))
        }
        Err(_) => None,
    });

    Sse::new(event_stream).keep_alive(KeepAlive::default())
}
