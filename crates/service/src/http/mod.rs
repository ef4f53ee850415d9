//! HTTP surface of the MDM service.

use axum::Router;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tower_http::trace::{DefaultOnFailure, DefaultOnResponse};
use tower_http::LatencyUnit;

mod android;
mod auth;
mod config;
mod error;
mod health;
mod not_found;

pub use android::{
    EnrollmentTokenResponseBody, EnterpriseResponse, SignupUrlResponse, SIGNUP_SSE_SUCCESS,
};
pub use auth::AuthUser;
pub use config::Config;
pub use error::{error_response, ApiError};

use crate::ServiceState;

const ANDROID_ENTERPRISE_PREFIX: &str = "/api/v1/fleet/android_enterprise";
const STATUS_PREFIX: &str = "/_status";

/// All service routes without tracing or a listener attached.
pub fn router(state: ServiceState) -> Router {
    Router::new()
        .nest(STATUS_PREFIX, health::router(state.clone()))
        .nest(ANDROID_ENTERPRISE_PREFIX, android::router(state.clone()))
        .fallback(not_found::not_found_handler)
        .with_state(state)
}

pub async fn run_api(
    config: Config,
    state: ServiceState,
    mut shutdown_rx: watch::Receiver<()>,
) -> Result<(), HttpServerError> {
    let listen_addr = config.listen_addr;
    let trace_layer = TraceLayer::new_for_http()
        .on_response(
            DefaultOnResponse::new()
                .include_headers(false)
                .level(config.log_level)
                .latency_unit(LatencyUnit::Micros),
        )
        .on_failure(DefaultOnFailure::new().latency_unit(LatencyUnit::Micros));

    let router = router(state).layer(trace_layer);

    tracing::info!(addr = ?listen_addr, "MDM API listening");
    let listener = tokio::net::TcpListener::bind(listen_addr).await?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
        })
        .await?;

    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum HttpServerError {
    #[error("an error occurred running the HTTP server: {0}")]
    ServingFailed(#[from] std::io::Error),
}
