use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::android::{EnterpriseError, PubSubError};

/// Error body shared by every endpoint:
/// `{"message": <summary>, "errors": [{"name": "base", "reason": <detail>}]}`.
pub fn error_response(status: StatusCode, reason: &str) -> Response {
    let message = match status {
        StatusCode::BAD_REQUEST => "Bad request",
        StatusCode::UNAUTHORIZED => "Authentication required",
        StatusCode::FORBIDDEN => "Permission denied",
        StatusCode::NOT_FOUND => "Resource Not Found",
        StatusCode::CONFLICT => "Conflict",
        StatusCode::UNPROCESSABLE_ENTITY => "Validation Failed",
        StatusCode::BAD_GATEWAY => "Upstream request failed",
        _ => "Internal Server Error",
    };
    let body = json!({
        "message": message,
        "errors": [{"name": "base", "reason": reason}],
    });
    (status, Json(body)).into_response()
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Authentication required")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error(transparent)]
    Enterprise(#[from] EnterpriseError),

    #[error(transparent)]
    PubSub(#[from] PubSubError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::Enterprise(err) => match err {
                EnterpriseError::AlreadyConfigured => StatusCode::CONFLICT,
                EnterpriseError::LocalhostServerUrl | EnterpriseError::MissingEnterpriseToken => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                EnterpriseError::InvalidSignupToken | EnterpriseError::InvalidEnrollSecret => {
                    StatusCode::UNAUTHORIZED
                }
                EnterpriseError::NotFound | EnterpriseError::DeletedUpstream => {
                    StatusCode::NOT_FOUND
                }
                EnterpriseError::Upstream { .. } => StatusCode::BAD_GATEWAY,
                EnterpriseError::MissingPrivateKey
                | EnterpriseError::Random(_)
                | EnterpriseError::Asset(_)
                | EnterpriseError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::PubSub(err) => match err {
                PubSubError::NotConfigured | PubSubError::InvalidEnrollSecret => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                PubSubError::AuthFailed => StatusCode::UNAUTHORIZED,
                PubSubError::InvalidData(_) => StatusCode::BAD_REQUEST,
                PubSubError::Asset(_) | PubSubError::Database(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            ApiError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        error_response(status, &self.to_string())
    }
}
