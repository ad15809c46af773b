use clap::Parser;
use std::net::IpAddr;
use std::path::PathBuf;

/// Loadwatch: synthetic load testing and endpoint health monitoring.
#[derive(Parser, Debug, Clone)]
#[command(name = "loadwatch")]
pub struct CliArgs {
    /// HTTP control API port
    #[arg(long = "port", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Address to bind the control API to
    #[arg(long = "bind", default_value = "127.0.0.1")]
    pub bind: IpAddr,

    /// Directory holding the key-value store
    #[arg(short = 'd', long = "data-dir")]
    pub data_dir: Option<PathBuf>,

    /// Also write logs to this file (rotated daily)
    #[arg(short = 'l', long = "log-file")]
    pub log_file: Option<PathBuf>,

    /// Do not reload saved monitors on startup
    #[arg(long = "no-restore")]
    pub no_restore: bool,
}

pub struct EngineConfig {
    pub port: u16,
    pub bind: IpAddr,
    pub data_dir: PathBuf,
    pub log_file: Option<PathBuf>,
    pub restore_monitors: bool,
}

pub const DEFAULT_PORT: u16 = 9880;

// Load generator constants
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const MAX_DURATION_SECS: u64 = 30 * 24 * 3600; // 30 days
pub const MAX_CONCURRENCY: u32 = 10_000;
pub const PROGRESS_INTERVAL_MS: u64 = 1_000;
pub const TIMELINE_WINDOW_SECS: i64 = 5;
pub const STRESS_PHASES: u32 = 5;
pub const STRESS_PHASE_FACTOR: f64 = 0.5;
pub const SPIKE_BASELINE_FACTOR: f64 = 0.3;
pub const SPIKE_MAX_SECS: f64 = 30.0;
pub const SPIKE_DURATION_FRACTION: f64 = 0.2;

// Health monitoring constants
pub const CHECK_HISTORY_CAPACITY: usize = 1000;
pub const INCIDENT_WINDOW_SECS: i64 = 3600; // 1 hour
pub const INCIDENT_LOG_CAPACITY: usize = 100;
pub const RECENT_INCIDENTS: usize = 10;
pub const MAX_INTERVAL_MINUTES: u64 = 7 * 24 * 60; // 1 week
pub const DEFAULT_STATS_WINDOW_HOURS: i64 = 24;
pub const MAX_STATS_WINDOW_HOURS: i64 = 366 * 24;
pub const DEGRADED_UPTIME_PERCENT: f64 = 99.0;
pub const SCHEDULER_IDLE_POLL_SECS: u64 = 60;

// Event constants
pub const EVENT_BUFFER_SIZE: usize = 500;
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

// Store keys
pub const STORE_FILE_NAME: &str = "loadwatch.db";
pub const MONITORS_KEY: &str = "monitors";
pub const ALERTS_KEY: &str = "alerts";
pub const RESULTS_PREFIX: &str = "results/";

impl EngineConfig {
    pub fn from_args(args: CliArgs) -> Self {
        let data_dir = args.data_dir.unwrap_or_else(|| {
            dirs::data_dir()
                .map(|d| d.join("loadwatch"))
                .unwrap_or_else(|| PathBuf::from(".loadwatch"))
        });

        EngineConfig {
            port: args.port,
            bind: args.bind,
            data_dir,
            log_file: args.log_file,
            restore_monitors: !args.no_restore,
        }
    }

    /// Path to the SQLite key-value store.
    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join(STORE_FILE_NAME)
    }
}
