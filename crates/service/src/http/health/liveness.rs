use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

#[tracing::instrument]
pub async fn handler() -> Response {
    (StatusCode::OK, Json(serde_json::json!({"status": "ok"}))).into_response()
}
