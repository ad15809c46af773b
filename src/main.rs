use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;

use loadwatch::clock::SystemClock;
use loadwatch::config::{CliArgs, EngineConfig};
use loadwatch::server;
use loadwatch::state::AppState;
use loadwatch::store::SqliteStore;
use loadwatch::transport::HttpTransport;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    let config = EngineConfig::from_args(args);

    // Initialize tracing; the guard flushes the file writer on exit.
    let (file_layer, _log_guard) = match &config.log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| ".".into());
            let prefix = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "loadwatch.log".into());
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, prefix));
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "loadwatch=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    info!("Starting loadwatch v{}", env!("CARGO_PKG_VERSION"));
    info!("Data dir: {:?}", config.data_dir);

    let store = match SqliteStore::open(&config.store_path()) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("Failed to open store at {:?}: {:#}", config.store_path(), e);
            std::process::exit(1);
        }
    };
    let transport = Arc::new(HttpTransport::new()?);
    let clock = Arc::new(SystemClock::new());

    let addr = SocketAddr::new(config.bind, config.port);
    let restore = config.restore_monitors;
    let state = Arc::new(AppState::new(config, transport, clock, store));

    if restore {
        if let Err(e) = state.scheduler.restore().await {
            warn!("Failed to restore monitors: {}", e);
        }
    }

    let scheduler_handle = state.scheduler.spawn_loop(state.shutdown_tx.subscribe());

    // Build and start HTTP server
    let router = server::build_router(state.clone());
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Loadwatch listening on http://{}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(state.clone()))
        .await?;

    info!("Loadwatch shutting down");
    if let Err(e) = scheduler_handle.await {
        warn!("Scheduler task ended abnormally: {}", e);
    }

    Ok(())
}

async fn shutdown_signal(state: Arc<AppState>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal");
    state.shutdown().await;
}
