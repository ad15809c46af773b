use std::sync::Arc;

use tokio::sync::broadcast;

use crate::clock::SharedClock;
use crate::config::EngineConfig;
use crate::load::generator::LoadGenerator;
use crate::monitor::alerts::{AlertDispatcher, HttpAlertSink};
use crate::monitor::service::HealthScheduler;
use crate::store::SharedStore;
use crate::transport::SharedTransport;

pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub config: EngineConfig,
    pub generator: Arc<LoadGenerator>,
    pub scheduler: Arc<HealthScheduler>,
    pub store: SharedStore,
    pub shutdown_tx: broadcast::Sender<()>,
}

impl AppState {
    /// Wire both engines to one transport, clock and store. Alerts are
    /// delivered over plain HTTP with their own client.
    pub fn new(
        config: EngineConfig,
        transport: SharedTransport,
        clock: SharedClock,
        store: SharedStore,
    ) -> Self {
        let alerts = AlertDispatcher::new(Arc::new(HttpAlertSink::new(reqwest::Client::new())));
        Self::with_alerts(config, transport, clock, store, alerts)
    }

    pub fn with_alerts(
        config: EngineConfig,
        transport: SharedTransport,
        clock: SharedClock,
        store: SharedStore,
        alerts: AlertDispatcher,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let generator = Arc::new(LoadGenerator::new(
            transport.clone(),
            clock.clone(),
            store.clone(),
        ));
        let scheduler = Arc::new(HealthScheduler::new(
            transport,
            clock,
            store.clone(),
            alerts,
        ));
        Self {
            config,
            generator,
            scheduler,
            store,
            shutdown_tx,
        }
    }

    /// Stop any active load test and signal background loops to exit.
    pub async fn shutdown(&self) {
        if let Ok(run_id) = self.generator.stop().await {
            tracing::info!(run_id = %run_id, "Stopping load test for shutdown");
        }
        let _ = self.shutdown_tx.send(());
    }
}
