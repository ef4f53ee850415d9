/**
 * Android enterprise MDM: the single-enterprise signup
 *  state machine and the authenticated pub/sub receiver.
 */
pub mod android;
pub mod config;
/**
 * SQLite tables backing the MDM flow: enterprises, config
 *  assets, the feature flag, users, sessions and hosts.
 */
pub mod database;
pub mod http;
pub mod process;
/**
 * Client for the upstream Android management proxy.
 */
pub mod provider;
pub mod state;
/**
 * Recording fake of the upstream provider, shared by
 *  unit and integration tests.
 */
pub mod testkit;

pub use config::Config;
pub use database::{Database, DatabaseSetupError};
pub use process::{spawn_service, start_service, ShutdownHandle};
pub use state::{State as ServiceState, StateSetupError};
