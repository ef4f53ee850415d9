use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::android::EnrollmentTokenResponse;
use crate::http::{ApiError, AuthUser};
use crate::ServiceState;

pub const SIGNUP_SSE_SUCCESS: &str = "Android Enterprise successfully connected";
const SIGNUP_SSE_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignupUrlResponse {
    pub android_enterprise_signup_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnterpriseResponse {
    pub android_enterprise_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollmentTokenResponseBody {
    pub android_enrollment_token: EnrollmentTokenResponse,
}

#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    #[serde(rename = "enterpriseToken", default)]
    enterprise_token: String,
}

#[derive(Debug, Deserialize)]
pub struct EnrollmentTokenQuery {
    #[serde(default)]
    enroll_secret: String,
}

#[tracing::instrument(skip_all, fields(user = user.0.id))]
pub async fn signup_url_handler(
    State(state): State<ServiceState>,
    user: AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    let user = user.require_admin()?;
    let signup = state.android().enterprise_signup(user.id).await?;
    Ok(Json(SignupUrlResponse {
        android_enterprise_signup_url: signup.url,
    }))
}

/// Redirect target of the upstream signup page. Authorized by the signup
/// token in the path alone.
#[tracing::instrument(skip_all)]
pub async fn connect_handler(
    State(state): State<ServiceState>,
    Path(signup_token): Path<String>,
    Query(query): Query<ConnectQuery>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .android()
        .enterprise_signup_callback(&signup_token, &query.enterprise_token)
        .await?;
    Ok(Json(json!({})))
}

/// Server-sent events for a browser waiting on signup: one message once
/// Android MDM turns on, then the stream ends. Any signed-in user may listen.
#[tracing::instrument(skip_all, fields(user = user.0.id))]
pub async fn signup_sse_handler(
    State(state): State<ServiceState>,
    user: AuthUser,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let android = state.android().clone();
    let done = stream::once(async move {
        let data = match android.wait_until_configured(SIGNUP_SSE_POLL_INTERVAL).await {
            Ok(()) => SIGNUP_SSE_SUCCESS.to_string(),
            Err(e) => {
                tracing::error!(error = %e, "checking android signup status");
                format!("Error checking Android Enterprise status: {e}")
            }
        };
        Ok::<_, Infallible>(Event::default().data(data))
    });
    Sse::new(done).keep_alive(KeepAlive::default())
}

#[tracing::instrument(skip_all, fields(user = user.0.id))]
pub async fn get_handler(
    State(state): State<ServiceState>,
    user: AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    let enterprise = state.android().get_enterprise().await?;
    Ok(Json(EnterpriseResponse {
        android_enterprise_id: enterprise.enterprise_id,
    }))
}

#[tracing::instrument(skip_all, fields(user = user.0.id))]
pub async fn delete_handler(
    State(state): State<ServiceState>,
    user: AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    let user = user.require_admin()?;
    state.android().delete_enterprise(user.id).await?;
    Ok(Json(json!({})))
}

#[tracing::instrument(skip_all, fields(enterprise_id = %enterprise_id))]
pub async fn enrollment_token_handler(
    State(state): State<ServiceState>,
    Path(enterprise_id): Path<String>,
    Query(query): Query<EnrollmentTokenQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let token = state
        .android()
        .enrollment_token(&enterprise_id, &query.enroll_secret)
        .await?;
    Ok(Json(EnrollmentTokenResponseBody {
        android_enrollment_token: token,
    }))
}
