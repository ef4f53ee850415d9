use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use http::StatusCode;
use reqwest::{Client, RequestBuilder, Url};
use serde::{Deserialize, Serialize};

use crate::http_server::api::client::{ApiError, ApiRequest};
use crate::ServiceState;

#[derive(Debug, Serialize, Deserialize)]
pub struct IdentityResponse {
    /// Stable per-install host identifier
    pub host_identifier: String,
    /// SHA-256 fingerprint of the host public key
    pub fingerprint: String,
    /// Whether a node key is currently held
    pub enrolled: bool,
}

#[tracing::instrument(skip(state))]
pub async fn handler(State(state): State<ServiceState>) -> Response {
    let identity = state.enrollment().identity();
    let result = async {
        Ok::<_, common::identity::IdentityError>(IdentityResponse {
            host_identifier: identity.host_identifier().await?,
            fingerprint: identity.fingerprint().await?,
            enrolled: !state.enrollment().node_key().is_empty(),
        })
    }
    .await;

    match result {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "reading host identity failed");
            let msg = serde_json::json!({"message": e.to_string()});
            (StatusCode::INTERNAL_SERVER_ERROR, Json(msg)).into_response()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct IdentityRequest;

impl ApiRequest for IdentityRequest {
    type Response = IdentityResponse;

    fn build_request(self, base_url: &Url, client: &Client) -> Result<RequestBuilder, ApiError> {
        let full_url = base_url.join("/_status/identity")?;
        Ok(client.get(full_url))
    }
}
