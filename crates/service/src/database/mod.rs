pub mod models;

use std::ops::Deref;
use std::path::Path;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

/// Handle to the MDM database: enterprises, config assets, users and
/// android hosts.
#[derive(Clone, Debug)]
pub struct Database(SqlitePool);

impl Database {
    /// Open (creating if needed) the database file at `path` and run migrations.
    pub async fn connect(path: &Path) -> Result<Self, DatabaseSetupError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(DatabaseSetupError::CreateDir)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(DatabaseSetupError::Unavailable)?;

        Self::migrate(pool).await
    }

    /// Private in-memory database. Pinned to one connection so every query
    /// sees the same schema.
    pub async fn in_memory() -> Result<Self, DatabaseSetupError> {
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(DatabaseSetupError::Unavailable)?;

        Self::migrate(pool).await
    }

    async fn migrate(pool: SqlitePool) -> Result<Self, DatabaseSetupError> {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(DatabaseSetupError::MigrationFailed)?;
        Ok(Self(pool))
    }

    pub async fn ping(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.0).await?;
        Ok(())
    }
}

impl Deref for Database {
    type Target = SqlitePool;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DatabaseSetupError {
    #[error("unable to create database directory: {0}")]
    CreateDir(std::io::Error),

    #[error("error occurred while attempting database migration: {0}")]
    MigrationFailed(sqlx::migrate::MigrateError),

    #[error("unable to perform initial connection and check of the database: {0}")]
    Unavailable(sqlx::Error),
}
