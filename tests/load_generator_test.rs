use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use loadwatch::clock::SystemClock;
use loadwatch::error::EngineError;
use loadwatch::load::generator::LoadGenerator;
use loadwatch::load::{LoadEvent, TestProfile};
use loadwatch::store::{MemoryStore, Store};
use loadwatch::transport::{Transport, TransportError, TransportRequest, TransportResponse};

/// Answers every request with `status` after `latency`.
struct FixedTransport {
    status: u16,
    latency: Duration,
    calls: AtomicU64,
}

impl FixedTransport {
    fn new(status: u16, latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            status,
            latency,
            calls: AtomicU64::new(0),
        })
    }
}

#[async_trait]
impl Transport for FixedTransport {
    async fn request(&self, _request: TransportRequest) -> Result<TransportResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.latency).await;
        Ok(TransportResponse {
            status_code: self.status,
            body: "ok".into(),
            body_size: 2,
            elapsed: self.latency,
        })
    }
}

/// Refuses every connection after a short delay.
struct RefusingTransport;

#[async_trait]
impl Transport for RefusingTransport {
    async fn request(&self, _request: TransportRequest) -> Result<TransportResponse, TransportError> {
        tokio::time::sleep(Duration::from_millis(10)).await;
        Err(TransportError::Connect("connection refused".into()))
    }
}

fn profile(extra: serde_json::Value) -> TestProfile {
    let mut base = json!({
        "name": "checkout",
        "url": "http://localhost:8080/api",
        "test_type": "load",
        "duration_secs": 2,
        "concurrency": 5,
        "thresholds": {
            "avg_response_time_ms": 100.0,
            "p95_response_time_ms": 200.0,
            "error_rate": 10.0,
            "min_throughput": 1.0
        }
    });
    if let (Some(base), Some(extra)) = (base.as_object_mut(), extra.as_object()) {
        for (k, v) in extra {
            base.insert(k.clone(), v.clone());
        }
    }
    serde_json::from_value(base).unwrap()
}

fn generator(transport: Arc<dyn Transport>) -> (Arc<LoadGenerator>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let generator = Arc::new(LoadGenerator::new(
        transport,
        Arc::new(SystemClock::new()),
        store.clone(),
    ));
    (generator, store)
}

#[tokio::test(start_paused = true)]
async fn healthy_endpoint_passes_thresholds() {
    let transport = FixedTransport::new(200, Duration::from_millis(50));
    let (generator, store) = generator(transport.clone());

    let result = generator.run(profile(json!({}))).await.unwrap();

    assert!(result.passed, "failed: {:?}", result.failed_thresholds);
    assert!(result.failed_thresholds.is_empty());
    assert!(!result.stopped);
    assert_eq!(result.metrics.error_rate, 0.0);
    assert!(result.metrics.throughput >= 1.0);
    assert_eq!(result.metrics.total_requests as usize, result.outcomes.len());
    assert_eq!(result.metrics.successful_requests, result.metrics.total_requests);
    assert_eq!(result.metrics.status_codes.get(&200).copied(), Some(result.metrics.total_requests));
    assert!((result.metrics.avg_response_time_ms - 50.0).abs() < 1e-6);
    assert_eq!(transport.calls.load(Ordering::SeqCst), result.metrics.total_requests);

    // Progress samples were taken roughly once per second.
    assert!(!result.timeline.is_empty());

    // The summary is saved under the run id.
    let saved = store.get(&format!("results/{}", result.run_id)).unwrap();
    assert!(saved.is_some());
    assert_eq!(generator.results().unwrap().len(), 1);
    assert!(generator.result(&result.run_id).unwrap().passed);
}

#[tokio::test(start_paused = true)]
async fn unreachable_endpoint_reports_error_rate_violation() {
    let (generator, _) = generator(Arc::new(RefusingTransport));

    let result = generator.run(profile(json!({}))).await.unwrap();

    assert!(!result.passed);
    assert_eq!(result.metrics.error_rate, 100.0);
    assert!(result
        .failed_thresholds
        .iter()
        .any(|f| f.starts_with("Error rate")));
    assert!(result.outcomes.iter().all(|o| o.status_code.is_none()));
    assert!(result.outcomes[0]
        .error
        .as_deref()
        .unwrap_or("")
        .contains("connection refused"));
}

#[tokio::test(start_paused = true)]
async fn server_errors_count_as_failures() {
    let transport = FixedTransport::new(500, Duration::from_millis(10));
    let (generator, _) = generator(transport);

    let result = generator
        .run(profile(json!({ "duration_secs": 1, "concurrency": 2 })))
        .await
        .unwrap();

    assert!(!result.passed);
    assert_eq!(result.metrics.error_rate, 100.0);
    assert_eq!(result.metrics.successful_requests, 0);
    assert!(result
        .failed_thresholds
        .iter()
        .any(|f| f.starts_with("Error rate 100.00%")));
    assert!(result.outcomes.iter().all(|o| o.error.as_deref() == Some("HTTP 500")));
}

#[tokio::test(start_paused = true)]
async fn redirects_count_as_success() {
    let transport = FixedTransport::new(302, Duration::from_millis(20));
    let (generator, _) = generator(transport);

    let result = generator
        .run(profile(json!({ "duration_secs": 1, "concurrency": 1 })))
        .await
        .unwrap();
    assert_eq!(result.metrics.failed_requests, 0);
}

#[tokio::test(start_paused = true)]
async fn max_requests_bounds_outcomes_across_workers() {
    let transport = FixedTransport::new(200, Duration::from_millis(5));
    let (generator, _) = generator(transport.clone());

    let result = generator
        .run(profile(json!({ "concurrency": 8, "max_requests": 25 })))
        .await
        .unwrap();

    assert_eq!(result.outcomes.len(), 25);
    assert_eq!(transport.calls.load(Ordering::SeqCst), 25);
}

#[tokio::test(start_paused = true)]
async fn target_rps_paces_workers() {
    let transport = FixedTransport::new(200, Duration::from_millis(1));
    let (generator, _) = generator(transport);

    // 2 workers at 4 rps total: each worker waits 0.5s between requests.
    let result = generator
        .run(profile(json!({
            "duration_secs": 2,
            "concurrency": 2,
            "target_rps": 4.0,
            "thresholds": {
                "avg_response_time_ms": 1000.0,
                "p95_response_time_ms": 1000.0,
                "error_rate": 0.0,
                "min_throughput": 0.0
            }
        })))
        .await
        .unwrap();

    let total = result.outcomes.len();
    assert!((6..=10).contains(&total), "got {} requests", total);
}

#[tokio::test(start_paused = true)]
async fn slow_requests_are_cut_at_the_timeout() {
    let transport = FixedTransport::new(200, Duration::from_secs(60));
    let (generator, _) = generator(transport);

    let result = generator
        .run(profile(json!({
            "duration_secs": 1,
            "concurrency": 1,
            "request_timeout_secs": 2
        })))
        .await
        .unwrap();

    assert_eq!(result.outcomes.len(), 1);
    let outcome = &result.outcomes[0];
    assert!(!outcome.success);
    assert_eq!(outcome.elapsed_ms, 2000.0);
    assert!(outcome.error.as_deref().unwrap_or("").contains("timed out"));
}

#[tokio::test(start_paused = true)]
async fn stop_drains_in_flight_requests() {
    let transport = FixedTransport::new(200, Duration::from_millis(300));
    let (generator, _) = generator(transport);

    let run_id = generator
        .start(profile(json!({ "duration_secs": 60, "concurrency": 3 })))
        .await
        .unwrap();
    let mut events = generator.subscribe();

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(generator.status().await.running);
    assert_eq!(generator.stop().await.unwrap(), run_id);

    loop {
        match events.recv().await {
            Ok(LoadEvent::RunFinished { run_id: id, stopped, .. }) => {
                assert_eq!(id, run_id);
                assert!(stopped);
                break;
            }
            Ok(_) => continue,
            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
            Err(e) => panic!("event stream closed: {}", e),
        }
    }

    let status = generator.status().await;
    assert!(!status.running);
    let saved = generator.result(&run_id).unwrap();
    assert!(saved.stopped);
    // Every started request completed and was recorded.
    assert!(saved.metrics.total_requests >= 3);
    assert!(saved.metrics.max_response_time_ms <= 300.0);
}

#[tokio::test(start_paused = true)]
async fn second_run_is_rejected_while_active() {
    let transport = FixedTransport::new(200, Duration::from_millis(100));
    let (generator, _) = generator(transport);

    generator
        .start(profile(json!({ "duration_secs": 30 })))
        .await
        .unwrap();

    let second = generator.start(profile(json!({}))).await;
    assert!(matches!(second, Err(EngineError::RunAlreadyActive)));

    generator.stop().await.unwrap();
}

#[tokio::test]
async fn stop_without_active_run_fails() {
    let (generator, _) = generator(FixedTransport::new(200, Duration::from_millis(1)));
    assert!(matches!(generator.stop().await, Err(EngineError::NoActiveRun)));
}

#[tokio::test]
async fn invalid_profile_is_rejected_before_running() {
    let transport = FixedTransport::new(200, Duration::from_millis(1));
    let (generator, _) = generator(transport.clone());

    let result = generator.run(profile(json!({ "concurrency": 0 }))).await;
    assert!(matches!(result, Err(EngineError::InvalidProfile(_))));
    assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    assert!(!generator.status().await.running);
}

#[tokio::test(start_paused = true)]
async fn spike_run_completes_with_mixed_concurrency() {
    let transport = FixedTransport::new(200, Duration::from_millis(100));
    let (generator, _) = generator(transport);

    let result = generator
        .run(profile(json!({
            "test_type": "spike",
            "duration_secs": 10,
            "concurrency": 10
        })))
        .await
        .unwrap();

    let peak = result
        .timeline
        .iter()
        .map(|s| s.active_workers)
        .max()
        .unwrap_or(0);
    assert_eq!(peak, 10);
    assert!(result.passed);
}

#[tokio::test(start_paused = true)]
async fn vanishing_target_rps_still_finishes_and_frees_the_slot() {
    let transport = FixedTransport::new(200, Duration::from_millis(10));
    let (generator, _) = generator(transport.clone());

    generator
        .start(profile(json!({ "duration_secs": 1, "target_rps": 1e-300 })))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(4)).await;

    let status = generator.status().await;
    assert!(!status.running);
    // The pause outlasts the run, so each worker issues a single request.
    assert_eq!(transport.calls.load(Ordering::SeqCst), 5);

    let next = generator.run(profile(json!({ "duration_secs": 1 }))).await;
    assert!(next.is_ok());
}

#[tokio::test(start_paused = true)]
async fn out_of_range_duration_is_rejected_without_claiming_the_slot() {
    let transport = FixedTransport::new(200, Duration::from_millis(10));
    let (generator, _) = generator(transport.clone());

    let result = generator
        .start(profile(json!({ "duration_secs": u64::MAX })))
        .await;
    assert!(matches!(result, Err(EngineError::InvalidProfile(_))));
    assert!(!generator.status().await.running);
    assert_eq!(transport.calls.load(Ordering::SeqCst), 0);

    assert!(generator.run(profile(json!({ "duration_secs": 1 }))).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn abandoned_run_releases_the_slot() {
    let transport = FixedTransport::new(200, Duration::from_millis(100));
    let (generator, _) = generator(transport);

    let abandoned = tokio::time::timeout(
        Duration::from_secs(1),
        generator.run(profile(json!({ "duration_secs": 30 }))),
    )
    .await;
    assert!(abandoned.is_err());
    assert!(!generator.status().await.running);

    let ticket = generator.reserve(profile(json!({}))).await.unwrap();
    assert!(generator.status().await.running);
    drop(ticket);
    assert!(!generator.status().await.running);
}
