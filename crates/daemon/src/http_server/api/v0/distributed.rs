use std::collections::BTreeMap;

use axum::extract::{Json, State};
use axum::response::{IntoResponse, Response};
use reqwest::{Client, RequestBuilder, Url};
use serde::{Deserialize, Serialize};

use crate::enroll::AgentError;
use crate::http_server::api::client::{ApiError, ApiRequest};
use crate::server::{DistributedResult, PublishReceipt};
use crate::ServiceState;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DistributedReadRequest {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributedReadResponse {
    /// Query name to SQL
    pub queries: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributedWriteRequest {
    pub results: Vec<DistributedResult>,
}

#[tracing::instrument(skip(state))]
pub async fn read_handler(
    State(state): State<ServiceState>,
    Json(_req): Json<DistributedReadRequest>,
) -> Result<impl IntoResponse, DistributedError> {
    let queries = state.enrollment().get_queries().await?;
    Ok(Json(DistributedReadResponse { queries }))
}

#[tracing::instrument(skip(state, req), fields(results = req.results.len()))]
pub async fn write_handler(
    State(state): State<ServiceState>,
    Json(req): Json<DistributedWriteRequest>,
) -> Result<impl IntoResponse, DistributedError> {
    let receipt = state.enrollment().write_results(&req.results).await?;
    Ok(Json(receipt))
}

#[derive(Debug, thiserror::Error)]
pub enum DistributedError {
    #[error("distributed query exchange failed: {0}")]
    Agent(#[from] AgentError),
}

impl IntoResponse for DistributedError {
    fn into_response(self) -> Response {
        let DistributedError::Agent(e) = self;
        tracing::warn!(error = %e, "distributed request failed");
        super::agent_error_response(&e)
    }
}

impl ApiRequest for DistributedReadRequest {
    type Response = DistributedReadResponse;

    fn build_request(self, base_url: &Url, client: &Client) -> Result<RequestBuilder, ApiError> {
        let full_url = base_url.join("/api/v0/distributed/read")?;
        Ok(client.post(full_url).json(&self))
    }
}

impl ApiRequest for DistributedWriteRequest {
    type Response = PublishReceipt;

    fn build_request(self, base_url: &Url, client: &Client) -> Result<RequestBuilder, ApiError> {
        let full_url = base_url.join("/api/v0/distributed/write")?;
        Ok(client.post(full_url).json(&self))
    }
}
