use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Operations the engine rejects synchronously. Per-request and per-check
/// failures are recorded as data and never surface here.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("A load test is already running")]
    RunAlreadyActive,

    #[error("No load test is running")]
    NoActiveRun,

    #[error("Monitor not found: {0}")]
    MonitorNotFound(String),

    #[error("Alert not found: {0}")]
    AlertNotFound(String),

    #[error("Test result not found: {0}")]
    ResultNotFound(String),

    #[error("Invalid test profile: {0}")]
    InvalidProfile(String),

    #[error("Invalid monitor: {0}")]
    InvalidMonitor(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Store error: {0}")]
    Store(String),
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let status = match &self {
            EngineError::RunAlreadyActive => StatusCode::CONFLICT,
            EngineError::NoActiveRun => StatusCode::CONFLICT,
            EngineError::MonitorNotFound(_) => StatusCode::NOT_FOUND,
            EngineError::AlertNotFound(_) => StatusCode::NOT_FOUND,
            EngineError::ResultNotFound(_) => StatusCode::NOT_FOUND,
            EngineError::InvalidProfile(_) => StatusCode::BAD_REQUEST,
            EngineError::InvalidMonitor(_) => StatusCode::BAD_REQUEST,
            EngineError::InvalidQuery(_) => StatusCode::BAD_REQUEST,
            EngineError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = serde_json::json!({
            "error": self.to_string(),
        });

        (status, axum::Json(body)).into_response()
    }
}
