use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinSet;
use tokio::time::{interval, sleep, sleep_until, Instant};
use tracing::{debug, info, warn};

use super::metrics::{compute_metrics, timeline_sample};
use super::shaping::{LoadPlan, WorkerWindow};
use super::thresholds::evaluate;
use super::{
    LoadEvent, RequestOutcome, RunStatus, TestProfile, TestResult, TestResultSummary,
    TimelineSample,
};
use crate::clock::SharedClock;
use crate::config::{PROGRESS_INTERVAL_MS, RESULTS_PREFIX};
use crate::error::EngineError;
use crate::events::EventBus;
use crate::store::SharedStore;
use crate::transport::{SharedTransport, TransportError, TransportRequest};

/// Drives load test runs. At most one run is active at a time.
pub struct LoadGenerator {
    transport: SharedTransport,
    clock: SharedClock,
    store: SharedStore,
    events: Arc<EventBus<LoadEvent>>,
    active: Arc<Mutex<Option<ActiveRun>>>,
}

struct ActiveRun {
    run_id: String,
    profile_name: String,
    stop_tx: watch::Sender<bool>,
    shared: Arc<RunShared>,
}

/// State shared by every worker of one run. The outcome list is
/// append-only while workers are alive.
struct RunShared {
    outcomes: Mutex<Vec<RequestOutcome>>,
    active_workers: AtomicUsize,
    issued: AtomicU64,
    started: Instant,
    duration: Duration,
}

impl RunShared {
    fn percent(&self) -> f64 {
        if self.duration.is_zero() {
            return 100.0;
        }
        let elapsed = Instant::now().duration_since(self.started);
        (elapsed.as_secs_f64() / self.duration.as_secs_f64() * 100.0).min(100.0)
    }

    /// Claim one request slot; false once `max_requests` slots are taken.
    fn try_reserve(&self, max_requests: Option<u64>) -> bool {
        match max_requests {
            None => {
                self.issued.fetch_add(1, Ordering::SeqCst);
                true
            }
            Some(max) => self
                .issued
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                    (n < max).then_some(n + 1)
                })
                .is_ok(),
        }
    }
}

/// A reserved run slot. Holding one means the generator is marked busy.
pub struct RunTicket {
    run_id: String,
    profile: TestProfile,
    stop_rx: watch::Receiver<bool>,
    shared: Arc<RunShared>,
    slot: RunSlot,
}

/// Frees the generator's run slot when dropped, so a run that unwinds
/// part way through cannot leave the generator marked busy.
struct RunSlot {
    active: Arc<Mutex<Option<ActiveRun>>>,
    run_id: String,
    released: bool,
}

impl RunSlot {
    async fn release(mut self) {
        clear_slot(&mut *self.active.lock().await, &self.run_id);
        self.released = true;
    }
}

impl Drop for RunSlot {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        warn!(run_id = %self.run_id, "Load test ended abnormally, releasing run slot");
        if let Ok(mut active) = self.active.try_lock() {
            clear_slot(&mut active, &self.run_id);
            return;
        }
        // Slot lock is busy; finish the release on the runtime.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let active = self.active.clone();
            let run_id = std::mem::take(&mut self.run_id);
            handle.spawn(async move {
                clear_slot(&mut *active.lock().await, &run_id);
            });
        }
    }
}

fn clear_slot(active: &mut Option<ActiveRun>, run_id: &str) {
    if active.as_ref().is_some_and(|run| run.run_id == run_id) {
        *active = None;
    }
}

impl RunTicket {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }
}

struct WorkerContext {
    run_id: String,
    request: TransportRequest,
    timeout: Duration,
    pacing: Option<Duration>,
    max_requests: Option<u64>,
    start_time: DateTime<Utc>,
    transport: SharedTransport,
    clock: SharedClock,
    events: Arc<EventBus<LoadEvent>>,
    shared: Arc<RunShared>,
}

impl LoadGenerator {
    pub fn new(transport: SharedTransport, clock: SharedClock, store: SharedStore) -> Self {
        Self {
            transport,
            clock,
            store,
            events: Arc::new(EventBus::new()),
            active: Arc::new(Mutex::new(None)),
        }
    }

    pub fn events(&self) -> &EventBus<LoadEvent> {
        &self.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LoadEvent> {
        self.events.subscribe()
    }

    /// Run a profile to completion, including the drain of in-flight workers.
    pub async fn run(&self, profile: TestProfile) -> Result<TestResult, EngineError> {
        let ticket = self.reserve(profile).await?;
        Ok(self.execute(ticket).await)
    }

    /// Reserve the run slot and execute in the background. Returns the run id.
    pub async fn start(self: &Arc<Self>, profile: TestProfile) -> Result<String, EngineError> {
        let ticket = self.reserve(profile).await?;
        let run_id = ticket.run_id.clone();
        let this = self.clone();
        tokio::spawn(async move {
            this.execute(ticket).await;
        });
        Ok(run_id)
    }

    /// Ask the active run to wind down. Workers finish their current request.
    pub async fn stop(&self) -> Result<String, EngineError> {
        let active = self.active.lock().await;
        match active.as_ref() {
            Some(run) => {
                let _ = run.stop_tx.send(true);
                info!(run_id = %run.run_id, "Stop requested for load test");
                Ok(run.run_id.clone())
            }
            None => Err(EngineError::NoActiveRun),
        }
    }

    pub async fn status(&self) -> RunStatus {
        let active = self.active.lock().await;
        match active.as_ref() {
            Some(run) => RunStatus {
                running: true,
                run_id: Some(run.run_id.clone()),
                profile_name: Some(run.profile_name.clone()),
                percent: run.shared.percent(),
                active_workers: run.shared.active_workers.load(Ordering::SeqCst),
                outcomes: run.shared.outcomes.lock().await.len(),
                stop_requested: *run.stop_tx.borrow(),
            },
            None => RunStatus {
                running: false,
                run_id: None,
                profile_name: None,
                percent: 0.0,
                active_workers: 0,
                outcomes: 0,
                stop_requested: false,
            },
        }
    }

    /// Saved result summaries, newest first.
    pub fn results(&self) -> Result<Vec<TestResultSummary>, EngineError> {
        let keys = self
            .store
            .keys(RESULTS_PREFIX)
            .map_err(|e| EngineError::Store(e.to_string()))?;
        let mut summaries = Vec::new();
        for key in keys {
            match self.store.get(&key) {
                Ok(Some(value)) => match serde_json::from_value::<TestResultSummary>(value) {
                    Ok(summary) => summaries.push(summary),
                    Err(e) => warn!(key = %key, "Skipping unreadable result: {}", e),
                },
                Ok(None) => {}
                Err(e) => return Err(EngineError::Store(e.to_string())),
            }
        }
        summaries.sort_by(|a, b| b.metrics.start_time.cmp(&a.metrics.start_time));
        Ok(summaries)
    }

    pub fn result(&self, run_id: &str) -> Result<TestResultSummary, EngineError> {
        let key = format!("{}{}", RESULTS_PREFIX, run_id);
        let value = self
            .store
            .get(&key)
            .map_err(|e| EngineError::Store(e.to_string()))?
            .ok_or_else(|| EngineError::ResultNotFound(run_id.to_string()))?;
        serde_json::from_value(value).map_err(|e| EngineError::Store(e.to_string()))
    }

    /// Validate the profile and claim the single run slot. Fails immediately
    /// when a run is already active.
    pub async fn reserve(&self, profile: TestProfile) -> Result<RunTicket, EngineError> {
        profile.validate().map_err(EngineError::InvalidProfile)?;

        let mut active = self.active.lock().await;
        if active.is_some() {
            return Err(EngineError::RunAlreadyActive);
        }

        let run_id = uuid::Uuid::new_v4().to_string();
        let (stop_tx, stop_rx) = watch::channel(false);
        let shared = Arc::new(RunShared {
            outcomes: Mutex::new(Vec::new()),
            active_workers: AtomicUsize::new(0),
            issued: AtomicU64::new(0),
            started: Instant::now(),
            duration: Duration::from_secs(profile.duration_secs),
        });

        *active = Some(ActiveRun {
            run_id: run_id.clone(),
            profile_name: profile.name.clone(),
            stop_tx,
            shared: shared.clone(),
        });

        Ok(RunTicket {
            slot: RunSlot {
                active: self.active.clone(),
                run_id: run_id.clone(),
                released: false,
            },
            run_id,
            profile,
            stop_rx,
            shared,
        })
    }

    /// Run a reserved ticket. Always releases the run slot before returning.
    pub async fn execute(&self, ticket: RunTicket) -> TestResult {
        let RunTicket {
            run_id,
            profile,
            stop_rx,
            shared,
            slot,
        } = ticket;

        let plan = LoadPlan::for_profile(&profile);
        let start_time = self.clock.now();

        info!(
            run_id = %run_id,
            test_type = ?profile.test_type,
            concurrency = profile.concurrency,
            duration_secs = profile.duration_secs,
            workers = plan.windows.len(),
            "Load test started"
        );
        self.events
            .publish(LoadEvent::RunStarted {
                run_id: run_id.clone(),
                profile_name: profile.name.clone(),
                test_type: profile.test_type,
            })
            .await;

        let timeout = Duration::from_secs(profile.request_timeout_secs);
        let ctx = Arc::new(WorkerContext {
            run_id: run_id.clone(),
            request: TransportRequest {
                method: profile.method.clone(),
                url: profile.url.clone(),
                headers: profile.headers.clone(),
                body: profile.body.clone(),
                timeout,
            },
            timeout,
            pacing: profile.pacing(),
            max_requests: profile.max_requests,
            start_time,
            transport: self.transport.clone(),
            clock: self.clock.clone(),
            events: self.events.clone(),
            shared: shared.clone(),
        });

        let mut workers = JoinSet::new();
        for window in plan.windows.iter().copied() {
            workers.spawn(run_worker(ctx.clone(), window, stop_rx.clone()));
        }

        let (done_tx, done_rx) = watch::channel(false);
        let reporter = tokio::spawn(report_progress(ctx.clone(), done_rx));

        // Drain barrier: every worker must finish its in-flight request.
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                warn!(run_id = %run_id, "Load test worker task failed: {}", e);
            }
        }
        debug!(run_id = %run_id, "All load test workers drained");

        let _ = done_tx.send(true);
        let timeline = reporter.await.unwrap_or_default();

        let end_time = self.clock.now();
        let outcomes = std::mem::take(&mut *shared.outcomes.lock().await);
        let metrics = compute_metrics(&outcomes, start_time, end_time);
        let report = evaluate(&profile.thresholds, &metrics);
        let stopped = *stop_rx.borrow();

        let result = TestResult {
            run_id: run_id.clone(),
            profile,
            metrics,
            outcomes,
            timeline,
            passed: report.passed,
            failed_thresholds: report.failed_thresholds,
            stopped,
        };

        slot.release().await;

        info!(
            run_id = %run_id,
            requests = result.metrics.total_requests,
            error_rate = result.metrics.error_rate,
            throughput = result.metrics.throughput,
            p95_ms = result.metrics.p95_response_time_ms,
            passed = result.passed,
            stopped,
            "Load test finished"
        );

        self.persist(&result);
        self.events
            .publish(LoadEvent::RunFinished {
                run_id,
                passed: result.passed,
                stopped,
                failed_thresholds: result.failed_thresholds.clone(),
            })
            .await;

        result
    }

    fn persist(&self, result: &TestResult) {
        let key = format!("{}{}", RESULTS_PREFIX, result.run_id);
        match serde_json::to_value(result.summary()) {
            Ok(value) => {
                if let Err(e) = self.store.set(&key, &value) {
                    warn!(run_id = %result.run_id, "Failed to save test result: {}", e);
                }
            }
            Err(e) => warn!(run_id = %result.run_id, "Failed to serialize test result: {}", e),
        }
    }
}

async fn run_worker(ctx: Arc<WorkerContext>, window: WorkerWindow, mut stop_rx: watch::Receiver<bool>) {
    let (Some(opens), Some(closes)) = (
        ctx.shared.started.checked_add(window.start),
        ctx.shared.started.checked_add(window.end),
    ) else {
        warn!(run_id = %ctx.run_id, "Worker window is out of range, skipping worker");
        return;
    };

    if !window.start.is_zero() {
        tokio::select! {
            _ = sleep_until(opens) => {}
            _ = stop_rx.wait_for(|stop| *stop) => return,
        }
    }

    ctx.shared.active_workers.fetch_add(1, Ordering::SeqCst);
    loop {
        if *stop_rx.borrow() || Instant::now() >= closes {
            break;
        }
        if !ctx.shared.try_reserve(ctx.max_requests) {
            break;
        }

        let outcome = ctx.issue().await;
        ctx.record(outcome).await;

        match ctx.pacing {
            Some(pause) => {
                tokio::select! {
                    _ = sleep(pause) => {}
                    _ = stop_rx.wait_for(|stop| *stop) => break,
                }
            }
            None => tokio::task::yield_now().await,
        }
    }
    ctx.shared.active_workers.fetch_sub(1, Ordering::SeqCst);
}

impl WorkerContext {
    async fn issue(&self) -> RequestOutcome {
        let started = Instant::now();
        let result =
            tokio::time::timeout(self.timeout, self.transport.request(self.request.clone())).await;

        let (elapsed, status_code, success, error, bytes) = match result {
            Ok(Ok(response)) => {
                let ok = (200..400).contains(&response.status_code);
                let error = (!ok).then(|| format!("HTTP {}", response.status_code));
                (
                    response.elapsed,
                    Some(response.status_code),
                    ok,
                    error,
                    response.body_size,
                )
            }
            Ok(Err(e)) => (started.elapsed(), None, false, Some(e.to_string()), 0),
            Err(_) => (
                self.timeout,
                None,
                false,
                Some(TransportError::Timeout(self.timeout).to_string()),
                0,
            ),
        };

        RequestOutcome {
            timestamp: self.clock.now(),
            elapsed_ms: elapsed.min(self.timeout).as_secs_f64() * 1000.0,
            status_code,
            success,
            error,
            bytes,
        }
    }

    async fn record(&self, outcome: RequestOutcome) {
        self.shared.outcomes.lock().await.push(outcome.clone());
        self.events
            .publish(LoadEvent::Outcome {
                run_id: self.run_id.clone(),
                outcome,
            })
            .await;
    }
}

async fn report_progress(ctx: Arc<WorkerContext>, mut done_rx: watch::Receiver<bool>) -> Vec<TimelineSample> {
    let mut ticker = interval(Duration::from_millis(PROGRESS_INTERVAL_MS));
    // First tick completes immediately.
    ticker.tick().await;

    let mut timeline = Vec::new();
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = done_rx.changed() => break,
        }

        let now = ctx.clock.now();
        let active = ctx.shared.active_workers.load(Ordering::SeqCst);
        let (sample, metrics) = {
            let outcomes = ctx.shared.outcomes.lock().await;
            (
                timeline_sample(&outcomes, now, active),
                compute_metrics(&outcomes, ctx.start_time, now),
            )
        };

        timeline.push(sample.clone());
        ctx.events
            .publish(LoadEvent::Progress {
                run_id: ctx.run_id.clone(),
                percent: ctx.shared.percent(),
                metrics,
                sample,
            })
            .await;
    }
    timeline
}
