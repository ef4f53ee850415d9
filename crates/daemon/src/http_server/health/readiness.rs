use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use reqwest::{Client, RequestBuilder, Url};
use serde::{Deserialize, Serialize};
use tokio::time::timeout;

use super::data_source::*;
use crate::http_server::api::client::{ApiError, ApiRequest};

const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

#[tracing::instrument]
pub async fn handler(data_src: StateDataSource) -> Response {
    let failure = match timeout(HEALTH_CHECK_TIMEOUT, data_src.is_ready()).await {
        Ok(Ok(())) => {
            let msg = serde_json::json!({"status": "ok"});
            return (StatusCode::OK, Json(msg)).into_response();
        }
        Ok(Err(e)) => e.to_string(),
        Err(_) => "health check timed out".to_string(),
    };

    let msg = serde_json::json!({"status": "failure", "message": failure});
    (StatusCode::SERVICE_UNAVAILABLE, Json(msg)).into_response()
}

#[derive(Debug, Clone, Default)]
pub struct ReadinessRequest;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub status: String,
}

impl ApiRequest for ReadinessRequest {
    type Response = ReadinessResponse;

    fn build_request(self, base_url: &Url, client: &Client) -> Result<RequestBuilder, ApiError> {
        let full_url = base_url.join("/_status/readyz")?;
        Ok(client.get(full_url))
    }
}
