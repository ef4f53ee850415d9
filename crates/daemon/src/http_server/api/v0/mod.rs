use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};

pub mod config;
pub mod distributed;
pub mod log;

use crate::enroll::AgentError;
use crate::ServiceState;

pub fn router(state: ServiceState) -> Router<ServiceState> {
    Router::new()
        .route("/config", post(config::handler))
        .route("/log", post(log::handler))
        .route("/distributed/read", post(distributed::read_handler))
        .route("/distributed/write", post(distributed::write_handler))
        .with_state(state)
}

/// Render a failed server round trip. Anything the server or enrollment
/// rejected is an upstream failure from the plugin's point of view.
pub(crate) fn agent_error_response(err: &AgentError) -> Response {
    let status = match err {
        AgentError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        AgentError::Transport { .. }
        | AgentError::ReenrollmentInvalid
        | AgentError::ReenrollmentErrored(_) => StatusCode::BAD_GATEWAY,
    };
    let body = serde_json::json!({"message": err.to_string()});
    (status, Json(body)).into_response()
}
