//! Bucketed key/value store on a single SQLite file.
//!
//! Keys inside a bucket are compared as raw bytes, so iteration order is
//! lexicographic. Log buckets use [`key_from_u64`] on a bucket sequence
//! number, which makes byte order equal insertion order.

use std::collections::VecDeque;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
};
use sqlx::{Row, Sqlite, Transaction};
use tokio::sync::{Mutex, OwnedMutexGuard};

const CURSOR_PAGE_SIZE: i64 = 256;

/// The fixed set of buckets created whenever the store is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
    Config,
    StatusLogs,
    ResultLogs,
    InitialResults,
    ServerProvidedData,
}

impl Bucket {
    pub const ALL: [Bucket; 5] = [
        Bucket::Config,
        Bucket::StatusLogs,
        Bucket::ResultLogs,
        Bucket::InitialResults,
        Bucket::ServerProvidedData,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Bucket::Config => "config",
            Bucket::StatusLogs => "status_logs",
            Bucket::ResultLogs => "result_logs",
            Bucket::InitialResults => "initial_results",
            Bucket::ServerProvidedData => "server_provided_data",
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(#[source] sqlx::Error),

    #[error("store migration failed: {0}")]
    MigrationFailed(#[from] sqlx::migrate::MigrateError),

    #[error("bucket not found: {0}")]
    BucketNotFound(Bucket),

    #[error("invalid sequence key: expected 8 bytes, got {0}")]
    InvalidKey(usize),

    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// Big-endian encoding of a sequence number.
pub fn key_from_u64(seq: u64) -> [u8; 8] {
    seq.to_be_bytes()
}

/// Inverse of [`key_from_u64`]. Rejects keys that are not exactly 8 bytes.
pub fn u64_from_key(key: &[u8]) -> Result<u64, StoreError> {
    let bytes: [u8; 8] = key
        .try_into()
        .map_err(|_| StoreError::InvalidKey(key.len()))?;
    Ok(u64::from_be_bytes(bytes))
}

/// Handle to the on-disk store. Cheap to clone.
///
/// Read transactions run concurrently. Write transactions are serialized
/// through an async mutex held for the lifetime of the [`WriteTx`].
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
    write_lock: Arc<Mutex<()>>,
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store").finish()
    }
}

impl Store {
    /// Open (or create) the store at `path`.
    ///
    /// Fails with [`StoreError::Unavailable`] if the file cannot be opened
    /// for writing; the store never runs read-only.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5))
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(StoreError::Unavailable)?;

        Self::setup(pool).await
    }

    /// An in-memory store, used by tests.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .foreign_keys(true);

        // a single connection that never expires, otherwise the data goes with it
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(StoreError::Unavailable)?;

        Self::setup(pool).await
    }

    async fn setup(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::migrate!("./migrations").run(&pool).await?;

        let store = Self {
            pool,
            write_lock: Arc::new(Mutex::new(())),
        };
        store.prepare_buckets().await.map_err(|e| match e {
            StoreError::Sqlx(e) => StoreError::Unavailable(e),
            other => other,
        })?;

        Ok(store)
    }

    async fn prepare_buckets(&self) -> Result<(), StoreError> {
        let mut tx = self.update().await?;
        for bucket in Bucket::ALL {
            tx.ensure_bucket(bucket).await?;
        }
        // touch a row so a read-only file fails here rather than on first use
        sqlx::query("UPDATE buckets SET sequence = sequence WHERE name = ?")
            .bind(Bucket::Config.as_str())
            .execute(&mut *tx.tx)
            .await?;
        tx.commit().await
    }

    /// Begin a read-only transaction.
    pub async fn view(&self) -> Result<ReadTx, StoreError> {
        Ok(ReadTx {
            tx: self.pool.begin().await?,
        })
    }

    /// Begin a write transaction. Dropping it without [`WriteTx::commit`]
    /// rolls every change back.
    pub async fn update(&self) -> Result<WriteTx, StoreError> {
        let guard = self.write_lock.clone().lock_owned().await;
        let tx = self.pool.begin().await?;
        Ok(WriteTx { tx, _guard: guard })
    }

    pub async fn get(&self, bucket: Bucket, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        get(&mut conn, bucket, key).await
    }

    pub async fn put(&self, bucket: Bucket, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        let mut tx = self.update().await?;
        tx.put(bucket, key, value).await?;
        tx.commit().await
    }

    pub async fn delete(&self, bucket: Bucket, key: &[u8]) -> Result<(), StoreError> {
        let mut tx = self.update().await?;
        tx.delete(bucket, key).await?;
        tx.commit().await
    }

    /// Number of keys currently held in `bucket`.
    pub async fn bucket_count(&self, bucket: Bucket) -> Result<u64, StoreError> {
        let mut conn = self.pool.acquire().await?;
        count(&mut conn, bucket).await
    }

    /// Cheap liveness probe for health checks.
    pub async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// A snapshot read transaction.
pub struct ReadTx {
    tx: Transaction<'static, Sqlite>,
}

impl ReadTx {
    pub async fn get(&mut self, bucket: Bucket, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        get(&mut self.tx, bucket, key).await
    }

    pub async fn count(&mut self, bucket: Bucket) -> Result<u64, StoreError> {
        count(&mut self.tx, bucket).await
    }

    /// Iterate `bucket` in key order.
    pub fn cursor(&mut self, bucket: Bucket) -> Cursor<'_> {
        Cursor::new(&mut self.tx, bucket)
    }
}

/// A serialized write transaction.
pub struct WriteTx {
    tx: Transaction<'static, Sqlite>,
    _guard: OwnedMutexGuard<()>,
}

impl WriteTx {
    pub async fn get(&mut self, bucket: Bucket, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        get(&mut self.tx, bucket, key).await
    }

    pub async fn count(&mut self, bucket: Bucket) -> Result<u64, StoreError> {
        count(&mut self.tx, bucket).await
    }

    pub fn cursor(&mut self, bucket: Bucket) -> Cursor<'_> {
        Cursor::new(&mut self.tx, bucket)
    }

    pub async fn ensure_bucket(&mut self, bucket: Bucket) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO buckets (name, sequence) VALUES (?, 0) ON CONFLICT(name) DO NOTHING")
            .bind(bucket.as_str())
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    pub async fn put(&mut self, bucket: Bucket, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO entries (bucket, key, value)
            SELECT name, ?, ? FROM buckets WHERE name = ?
            ON CONFLICT(bucket, key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(bucket.as_str())
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::BucketNotFound(bucket));
        }
        Ok(())
    }

    pub async fn delete(&mut self, bucket: Bucket, key: &[u8]) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM entries WHERE bucket = ? AND key = ?")
            .bind(bucket.as_str())
            .bind(key)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    /// Delete the `n` lowest keys of `bucket`. Returns how many were removed.
    pub async fn delete_first(&mut self, bucket: Bucket, n: u64) -> Result<u64, StoreError> {
        let limit = i64::try_from(n).unwrap_or(i64::MAX);
        let result = sqlx::query(
            r#"
            DELETE FROM entries
            WHERE bucket = ?1 AND key IN (
                SELECT key FROM entries WHERE bucket = ?1 ORDER BY key LIMIT ?2
            )
            "#,
        )
        .bind(bucket.as_str())
        .bind(limit)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected())
    }

    /// Allocate the next value of the bucket's sequence counter. The first
    /// value handed out is 1.
    pub async fn next_sequence(&mut self, bucket: Bucket) -> Result<u64, StoreError> {
        let row = sqlx::query(
            "UPDATE buckets SET sequence = sequence + 1 WHERE name = ? RETURNING sequence",
        )
        .bind(bucket.as_str())
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or(StoreError::BucketNotFound(bucket))?;

        let seq: i64 = row.try_get("sequence")?;
        Ok(seq as u64)
    }

    pub async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }
}

/// Forward iterator over a bucket, fetched a page at a time.
pub struct Cursor<'t> {
    conn: &'t mut SqliteConnection,
    bucket: Bucket,
    last_key: Option<Vec<u8>>,
    page: VecDeque<(Vec<u8>, Vec<u8>)>,
    exhausted: bool,
}

impl<'t> Cursor<'t> {
    fn new(conn: &'t mut SqliteConnection, bucket: Bucket) -> Self {
        Self {
            conn,
            bucket,
            last_key: None,
            page: VecDeque::new(),
            exhausted: false,
        }
    }

    /// The next `(key, value)` pair in key order, or `None` at the end.
    pub async fn next(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>, StoreError> {
        if self.page.is_empty() && !self.exhausted {
            self.fill().await?;
        }

        let Some(entry) = self.page.pop_front() else {
            return Ok(None);
        };
        self.last_key = Some(entry.0.clone());
        Ok(Some(entry))
    }

    async fn fill(&mut self) -> Result<(), StoreError> {
        let rows = match &self.last_key {
            Some(after) => {
                sqlx::query(
                    "SELECT key, value FROM entries WHERE bucket = ? AND key > ? ORDER BY key LIMIT ?",
                )
                .bind(self.bucket.as_str())
                .bind(after.as_slice())
                .bind(CURSOR_PAGE_SIZE)
                .fetch_all(&mut *self.conn)
                .await?
            }
            None => {
                sqlx::query("SELECT key, value FROM entries WHERE bucket = ? ORDER BY key LIMIT ?")
                    .bind(self.bucket.as_str())
                    .bind(CURSOR_PAGE_SIZE)
                    .fetch_all(&mut *self.conn)
                    .await?
            }
        };

        if (rows.len() as i64) < CURSOR_PAGE_SIZE {
            self.exhausted = true;
        }
        for row in rows {
            self.page
                .push_back((row.try_get("key")?, row.try_get("value")?));
        }
        Ok(())
    }
}

async fn get(
    conn: &mut SqliteConnection,
    bucket: Bucket,
    key: &[u8],
) -> Result<Option<Vec<u8>>, StoreError> {
    let row = sqlx::query("SELECT value FROM entries WHERE bucket = ? AND key = ?")
        .bind(bucket.as_str())
        .bind(key)
        .fetch_optional(&mut *conn)
        .await?;

    match row {
        Some(row) => Ok(Some(row.try_get("value")?)),
        None => Ok(None),
    }
}

async fn count(conn: &mut SqliteConnection, bucket: Bucket) -> Result<u64, StoreError> {
    let row = sqlx::query("SELECT COUNT(*) AS n FROM entries WHERE bucket = ?")
        .bind(bucket.as_str())
        .fetch_one(&mut *conn)
        .await?;
    let n: i64 = row.try_get("n")?;
    Ok(n as u64)
}
