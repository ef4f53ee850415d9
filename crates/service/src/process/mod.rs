mod utils;

use std::time::Duration;

use futures::future::join_all;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt;
use tracing_subscriber::{EnvFilter, Layer};

const FINAL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

use crate::http;
use crate::{Config, ServiceState};

/// Handle for gracefully shutting down the service.
pub struct ShutdownHandle {
    graceful_waiter: tokio::task::JoinHandle<()>,
    handles: Vec<tokio::task::JoinHandle<()>>,
    shutdown_tx: watch::Sender<()>,
}

impl ShutdownHandle {
    /// Block until the service shuts down (via signal or explicit shutdown).
    pub async fn wait(self) {
        shutdown_and_join(self.graceful_waiter, self.handles).await;
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

const LOG_FILE_NAME: &str = "beacon-mdm.log";

fn env_filter(level: tracing::Level) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy()
}

fn init_logging(config: &Config) -> Vec<WorkerGuard> {
    let level = config.log_level();
    let mut guards = Vec::new();

    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
    guards.push(stdout_guard);
    let stdout_layer = fmt::layer()
        .compact()
        .with_writer(stdout_writer)
        .with_filter(env_filter(level));

    let file_layer = config.log_dir.as_ref().map(|log_dir| {
        if let Err(e) = std::fs::create_dir_all(log_dir) {
            eprintln!("warning: cannot create log directory {}: {}", log_dir.display(), e);
        }
        let appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_NAME);
        let (file_writer, file_guard) = tracing_appender::non_blocking(appender);
        guards.push(file_guard);
        fmt::layer()
            .with_writer(file_writer)
            .with_ansi(false)
            .with_filter(env_filter(level))
    });

    tracing_subscriber::registry()
        .with(stdout_layer)
        .with(file_layer)
        .init();

    utils::register_panic_logger();
    utils::report_build_info();
    guards
}

async fn create_state(config: &Config) -> ServiceState {
    match ServiceState::from_config(config).await {
        Ok(state) => state,
        Err(e) => {
            tracing::error!("error creating service state: {}", e);
            std::process::exit(3);
        }
    }
}

async fn shutdown_and_join(
    graceful_waiter: tokio::task::JoinHandle<()>,
    handles: Vec<tokio::task::JoinHandle<()>>,
) {
    let _ = graceful_waiter.await;

    if timeout(FINAL_SHUTDOWN_TIMEOUT, join_all(handles))
        .await
        .is_err()
    {
        tracing::error!(
            "Failed to shut down within {} seconds",
            FINAL_SHUTDOWN_TIMEOUT.as_secs()
        );
        std::process::exit(4);
    }
}

/// Create state and start the HTTP server. The returned `ShutdownHandle`
/// must be kept alive.
pub async fn start_service(config: &Config) -> (ServiceState, ShutdownHandle) {
    let (graceful_waiter, shutdown_tx, shutdown_rx) = utils::graceful_shutdown_blocker();
    let state = create_state(config).await;

    let http_config = http::Config::from(config);
    let api_state = state.clone();
    let api_handle = tokio::spawn(async move {
        if let Err(e) = http::run_api(http_config, api_state, shutdown_rx).await {
            tracing::error!("API server error: {}", e);
        }
    });

    let handle = ShutdownHandle {
        graceful_waiter,
        handles: vec![api_handle],
        shutdown_tx,
    };

    (state, handle)
}

/// Runs the service until a shutdown signal arrives.
pub async fn spawn_service(config: &Config) {
    let _guards = init_logging(config);
    let (_, handle) = start_service(config).await;
    handle.wait().await;
}
