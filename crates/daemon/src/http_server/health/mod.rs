use axum::routing::get;
use axum::Router;

use crate::ServiceState;

mod data_source;
pub mod identity;
mod liveness;
pub mod readiness;
mod version;

pub fn router(state: ServiceState) -> Router<ServiceState> {
    Router::new()
        .route("/identity", get(identity::handler))
        .route("/livez", get(liveness::handler))
        .route("/readyz", get(readiness::handler))
        .route("/version", get(version::handler))
        .with_state(state)
}
