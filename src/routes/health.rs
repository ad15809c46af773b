use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::state::SharedState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub load_test_running: bool,
    pub monitors: usize,
    pub monitors_enabled: usize,
}

pub async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(build_health_response(&state).await)
}

pub async fn build_health_response(state: &SharedState) -> HealthResponse {
    let status = state.generator.status().await;
    let monitors = state.scheduler.list_monitors().await;

    HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        load_test_running: status.running,
        monitors: monitors.len(),
        monitors_enabled: monitors.iter().filter(|m| m.enabled).count(),
    }
}
