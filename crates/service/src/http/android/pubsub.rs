use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::android::PushEnvelope;
use crate::http::ApiError;
use crate::ServiceState;

#[derive(Debug, Deserialize)]
pub struct PushQuery {
    token: Option<String>,
}

#[tracing::instrument(skip_all, fields(subscription = %envelope.subscription))]
pub async fn handler(
    State(state): State<ServiceState>,
    Query(query): Query<PushQuery>,
    Json(envelope): Json<PushEnvelope>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .android()
        .process_pubsub_push(query.token.as_deref(), &envelope.message)
        .await?;
    Ok(Json(json!({})))
}
