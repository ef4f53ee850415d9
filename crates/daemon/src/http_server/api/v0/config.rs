use std::collections::BTreeMap;

use axum::extract::{Json, State};
use axum::response::{IntoResponse, Response};
use reqwest::{Client, RequestBuilder, Url};
use serde::{Deserialize, Serialize};

use crate::enroll::AgentError;
use crate::http_server::api::client::{ApiError, ApiRequest};
use crate::ServiceState;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigRequest {}

/// Config sources by name. The management server's blob is under `config`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigResponse {
    #[serde(flatten)]
    pub configs: BTreeMap<String, String>,
}

#[tracing::instrument(skip(state))]
pub async fn handler(
    State(state): State<ServiceState>,
    Json(_req): Json<ConfigRequest>,
) -> Result<impl IntoResponse, ConfigError> {
    let configs = state.enrollment().generate_configs().await?;
    Ok(Json(ConfigResponse { configs }))
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("generating config: {0}")]
    Agent(#[from] AgentError),
}

impl IntoResponse for ConfigError {
    fn into_response(self) -> Response {
        match self {
            ConfigError::Agent(e) => {
                tracing::warn!(error = %e, "config request failed");
                super::agent_error_response(&e)
            }
        }
    }
}

impl ApiRequest for ConfigRequest {
    type Response = ConfigResponse;

    fn build_request(self, base_url: &Url, client: &Client) -> Result<RequestBuilder, ApiError> {
        let full_url = base_url.join("/api/v0/config")?;
        Ok(client.post(full_url).json(&self))
    }
}
