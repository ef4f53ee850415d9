use axum::routing::{get, post};
use axum::Router;

use crate::ServiceState;

mod enterprise;
mod pubsub;

pub use enterprise::{
    EnrollmentTokenResponseBody, EnterpriseResponse, SignupUrlResponse, SIGNUP_SSE_SUCCESS,
};

pub fn router(state: ServiceState) -> Router<ServiceState> {
    Router::new()
        .route(
            "/",
            get(enterprise::get_handler).delete(enterprise::delete_handler),
        )
        .route("/signup_url", get(enterprise::signup_url_handler))
        .route("/signup_sse", get(enterprise::signup_sse_handler))
        .route("/connect/:token", get(enterprise::connect_handler))
        .route(
            "/:enterprise_id/enrollment_token",
            get(enterprise::enrollment_token_handler),
        )
        .route("/pubsub", post(pubsub::handler))
        .with_state(state)
}
