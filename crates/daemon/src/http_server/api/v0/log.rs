use axum::extract::{Json, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use reqwest::{Client, RequestBuilder, Url};
use serde::{Deserialize, Serialize};

use crate::http_server::api::client::{ApiError, ApiRequest};
use crate::logbuf::{LogError, LogType};
use crate::ServiceState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushLogRequest {
    /// One of `status`, `string`, `snapshot` or `init`
    pub log_type: String,
    pub line: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushLogResponse {
    pub status: String,
}

pub async fn handler(
    State(state): State<ServiceState>,
    Json(req): Json<PushLogRequest>,
) -> Result<impl IntoResponse, PushLogError> {
    let log_type: LogType = req.log_type.parse()?;
    state.logs().log_string(log_type, &req.line).await?;
    Ok(Json(PushLogResponse {
        status: "ok".to_string(),
    }))
}

#[derive(Debug, thiserror::Error)]
pub enum PushLogError {
    #[error("{0}")]
    Buffer(#[from] LogError),
}

impl IntoResponse for PushLogError {
    fn into_response(self) -> Response {
        let PushLogError::Buffer(err) = self;
        let status = match err {
            LogError::UnknownType(_) => StatusCode::BAD_REQUEST,
            LogError::Store(_) | LogError::Publish(_) => {
                tracing::error!(error = %err, "buffering log failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = serde_json::json!({"message": err.to_string()});
        (status, axum::Json(body)).into_response()
    }
}

impl ApiRequest for PushLogRequest {
    type Response = PushLogResponse;

    fn build_request(self, base_url: &Url, client: &Client) -> Result<RequestBuilder, ApiError> {
        let full_url = base_url.join("/api/v0/log")?;
        Ok(client.post(full_url).json(&self))
    }
}
