pub mod utils;

use std::time::Duration;

use futures::future::join_all;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::{self, format::FmtSpan};
use tracing_subscriber::{EnvFilter, Layer};

const FINAL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

use common::prelude::{DEFAULT_ATTEMPTS, DEFAULT_DELAY};
use common::retry;

use crate::http_server;
use crate::{ServiceConfig, ServiceState};

/// Handle for gracefully shutting down the agent.
pub struct ShutdownHandle {
    graceful_waiter: tokio::task::JoinHandle<()>,
    handles: Vec<tokio::task::JoinHandle<()>>,
    shutdown_tx: watch::Sender<()>,
}

impl ShutdownHandle {
    /// Block until the agent shuts down (via signal or explicit shutdown).
    pub async fn wait(self) {
        shutdown_and_join(self.graceful_waiter, self.handles).await;
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

const LOG_FILE_NAME: &str = "beacon.log";

fn env_filter(level: tracing::Level) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy()
}

/// Install stdout logging, plus a daily-rolling file when `log_dir` is set,
/// then the panic logger. The returned guards flush the non-blocking writers
/// and must outlive every log call.
fn init_logging(service_config: &ServiceConfig) -> Vec<WorkerGuard> {
    let level = service_config.log_level;
    let mut guards = Vec::new();

    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
    guards.push(stdout_guard);
    let stdout_layer = fmt::layer()
        .compact()
        .with_writer(stdout_writer)
        .with_filter(env_filter(level));

    let file_layer = service_config.log_dir.as_ref().map(|log_dir| {
        if let Err(e) = std::fs::create_dir_all(log_dir) {
            eprintln!("warning: cannot create log directory {}: {}", log_dir.display(), e);
        }
        let appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_NAME);
        let (file_writer, file_guard) = tracing_appender::non_blocking(appender);
        guards.push(file_guard);
        fmt::layer()
            .with_writer(file_writer)
            .with_ansi(false)
            .with_span_events(FmtSpan::CLOSE)
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

/// Create agent state from config, exiting on error. An unusable store or
/// identity is a startup failure; a missing node key is not.
async fn create_state(service_config: &ServiceConfig) -> ServiceState {
    match ServiceState::from_config(service_config).await {
        Ok(state) => state,
        Err(e) => {
            tracing::error!("error creating agent state: {}", e);
            std::process::exit(3);
        }
    }
}

/// Wait for shutdown and join all handles with timeout.
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

/// Spawn the agent's tasks over an existing state: the local plugin API,
/// the log flush loop and a bounded run of startup enrollment attempts.
pub fn start_tasks(
    service_config: &ServiceConfig,
    state: ServiceState,
    shutdown_rx: watch::Receiver<()>,
) -> Vec<tokio::task::JoinHandle<()>> {
    let mut handles = Vec::new();

    let api_state = state.clone();
    let api_config = http_server::Config::loopback(service_config.api_port);
    let api_rx = shutdown_rx.clone();
    handles.push(tokio::spawn(async move {
        if let Err(e) = http_server::run_api(api_config, api_state, api_rx).await {
            tracing::error!("API server error: {}", e);
        }
    }));

    let flusher = state.logs().start();
    let mut flush_rx = shutdown_rx.clone();
    handles.push(tokio::spawn(async move {
        let _ = flush_rx.changed().await;
        flusher.shutdown().await;
    }));

    let enrollment = state.enrollment().clone();
    let mut enroll_rx = shutdown_rx;
    handles.push(tokio::spawn(async move {
        let attempts = retry::run(DEFAULT_ATTEMPTS, DEFAULT_DELAY, || enrollment.enroll());
        tokio::select! {
            result = attempts => match result {
                Ok(_) => tracing::info!("agent enrolled"),
                Err(e) => tracing::warn!(error = %e, "initial enrollment failed, will retry on next server call"),
            },
            _ = enroll_rx.changed() => {}
        }
    }));

    tracing::info!(port = service_config.api_port, "Running: plugin API + log flusher");
    handles
}

/// Create state and spawn background tasks, returning the state handle.
/// The returned `ShutdownHandle` must be kept alive; dropping it does not
/// stop the agent.
pub async fn start_service(service_config: &ServiceConfig) -> (ServiceState, ShutdownHandle) {
    let (graceful_waiter, shutdown_tx, shutdown_rx) = utils::graceful_shutdown_blocker();
    let state = create_state(service_config).await;
    let handles = start_tasks(service_config, state.clone(), shutdown_rx);

    let handle = ShutdownHandle {
        graceful_waiter,
        handles,
        shutdown_tx,
    };

    (state, handle)
}

/// Runs the agent until a shutdown signal arrives. Use for CLI binary usage.
pub async fn spawn_service(service_config: &ServiceConfig) {
    let _guards = init_logging(service_config);
    let (_, handle) = start_service(service_config).await;
    handle.wait().await;
}
