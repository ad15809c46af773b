use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::routes::{health, load_tests, monitors};
use crate::state::SharedState;

pub fn build_router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health
        .route("/health", get(health::health))
        // Load tests
        .route("/load-tests", post(load_tests::start_test))
        .route("/load-tests/stop", post(load_tests::stop_test))
        .route("/load-tests/status", get(load_tests::test_status))
        .route("/load-tests/results", get(load_tests::list_results))
        .route("/load-tests/results/{run_id}", get(load_tests::get_result))
        .route("/load-tests/events", get(load_tests::event_stream))
        .route("/load-tests/events/history", get(load_tests::event_history))
        // Monitors
        .route(
            "/monitors",
            get(monitors::list_monitors).post(monitors::create_monitor),
        )
        .route("/monitors/events", get(monitors::event_stream))
        .route("/monitors/events/history", get(monitors::event_history))
        .route(
            "/monitors/{id}",
            get(monitors::get_monitor)
                .patch(monitors::update_monitor)
                .delete(monitors::delete_monitor),
        )
        .route("/monitors/{id}/check", post(monitors::check_now))
        .route("/monitors/{id}/checks", get(monitors::check_history))
        .route("/monitors/{id}/stats", get(monitors::monitor_stats))
        .route("/monitors/{id}/incidents", get(monitors::monitor_incidents))
        .route(
            "/monitors/{id}/alerts",
            get(monitors::list_alerts).post(monitors::create_alert),
        )
        .route(
            "/monitors/{id}/alerts/{alert_id}",
            delete(monitors::delete_alert),
        )
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
