/**
 * Bucketed key/value store backed by a single
 *  SQLite file. Owns every byte the agent keeps
 *  on disk.
 */
pub mod kv;
/**
 * Device identity: the host UUID and the RSA
 *  key pair, created lazily and kept in the
 *  `config` bucket.
 */
pub mod identity;
/**
 * Bounded retry helpers for startup waits.
 */
pub mod retry;
/**
 * Helper for setting build version information
 *  at compile time.
 */
pub mod version;

pub mod prelude {
    pub use crate::identity::{Identity, IdentityError};
    pub use crate::kv::{Bucket, ReadTx, Store, StoreError, WriteTx};
    pub use crate::retry::{RetryError, DEFAULT_ATTEMPTS, DEFAULT_DELAY};
    pub use crate::version::{build_info, BuildInfo};
}
