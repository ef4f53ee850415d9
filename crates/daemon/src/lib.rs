/**
 * Management server client: the osquery remote API
 *  spoken over HTTPS, with node-key rejection
 *  normalized into a single error variant.
 */
pub mod server;
/**
 * Enrollment coordinator: owns the node key and
 *  re-enrolls at most once when the server rejects it.
 */
pub mod enroll;
/**
 * Durable log buffer and its flush loop.
 */
pub mod logbuf;
/**
 * Adapter to the local query runtime.
 */
pub mod querier;
pub mod http_server;
pub mod process;
pub mod service_config;
pub mod service_state;
pub mod state;
/**
 * In-process fakes for the server and query runtime,
 *  shared by unit and integration tests.
 */
pub mod testkit;

pub use process::{spawn_service, start_service, ShutdownHandle};
pub use service_config::Config as ServiceConfig;
pub use service_state::State as ServiceState;
pub use state::{AppConfig, AppState, StateError};
