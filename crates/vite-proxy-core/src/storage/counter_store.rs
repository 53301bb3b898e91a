use super::{
    connect,
    expiry_log::{decode_log, encode_log, ExpiryEntry, ENTRY_KEY_LEN},
    StoreError,
};
use md5::{Digest, Md5};
use sqlx::{Row, SqlitePool};
use tokio::sync::Mutex;

const SCHEMA: &str = r"
    CREATE TABLE IF NOT EXISTS rate_limit_counts (
        key BLOB PRIMARY KEY NOT NULL,
        count INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS rate_limit_expiry (
        name TEXT PRIMARY KEY NOT NULL,
        data BLOB NOT NULL
    );
";

const EXPIRY_LOG_NAME: &str = "pending";

/// 16-byte limiter key, `md5(namespace ‖ client_key)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RateLimitKey(pub [u8; ENTRY_KEY_LEN]);

impl RateLimitKey {
    #[must_use]
    pub fn derive(namespace: &str, client_key: &str) -> Self {
        let mut hasher = Md5::new();
        hasher.update(namespace.as_bytes());
        hasher.update(client_key.as_bytes());
        Self(hasher.finalize().into())
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

/// Durable per-key counters plus the ordered log of pending expiries.
///
/// Every mutation runs as one `SQLite` transaction while holding the log mutex, so
/// `count(key)` always equals the number of pending entries for `key`. A zero count is stored
/// as the absence of a row.
///
/// The log is read from disk once in [`open`](Self::open) and mirrored in memory afterwards;
/// the mirror only changes after the matching transaction has committed.
pub struct PersistentCounterStore {
    pool: SqlitePool,
    log: Mutex<Vec<ExpiryEntry>>,
}

impl PersistentCounterStore {
    /// Opens (or creates) the store and loads the expiry log.
    ///
    /// # Errors
    /// Returns `StoreError` if the database cannot be opened or the persisted log is corrupt.
    pub async fn open(database_url: &str) -> Result<Self, StoreError> {
        let pool = connect(database_url).await?;
        Self::with_pool(pool).await
    }

    /// Builds the store on an existing pool, creating the tables when missing.
    ///
    /// # Errors
    /// Returns `StoreError` if the schema cannot be created or the log is corrupt.
    pub async fn with_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::raw_sql(SCHEMA).execute(&pool).await?;

        let blob: Option<Vec<u8>> =
            sqlx::query_scalar("SELECT data FROM rate_limit_expiry WHERE name = ?")
                .bind(EXPIRY_LOG_NAME)
                .fetch_optional(&pool)
                .await?;
        let entries = blob.as_deref().map(decode_log).transpose()?.unwrap_or_default();

        tracing::debug!(pending = entries.len(), "loaded rate limit expiry log");

        Ok(Self { pool, log: Mutex::new(entries) })
    }

    /// Current count for `key`, zero when absent.
    ///
    /// # Errors
    /// Returns `StoreError::Database` on query failure.
    pub async fn count(&self, key: &RateLimitKey) -> Result<u64, StoreError> {
        let count: Option<i64> =
            sqlx::query_scalar("SELECT count FROM rate_limit_counts WHERE key = ?")
                .bind(&key.0[..])
                .fetch_optional(&self.pool)
                .await?;
        Ok(count.map_or(0, |c| u64::try_from(c).unwrap_or(0)))
    }

    /// Admits one unit for `key` if its count is below `max`.
    ///
    /// On admission the count increment and the new expiry entry are committed together and
    /// the entry is returned. `Ok(None)` means the key is at its limit and nothing changed.
    ///
    /// # Errors
    /// Returns `StoreError::Database` if the transaction fails; nothing is applied in that case.
    pub async fn admit(
        &self,
        key: &RateLimitKey,
        max: u64,
        expire_at: i64,
    ) -> Result<Option<ExpiryEntry>, StoreError> {
        let mut log = self.log.lock().await;
        let mut tx = self.pool.begin().await?;

        let current: Option<i64> =
            sqlx::query_scalar("SELECT count FROM rate_limit_counts WHERE key = ?")
                .bind(&key.0[..])
                .fetch_optional(&mut *tx)
                .await?;
        let current = current.map_or(0, |c| u64::try_from(c).unwrap_or(0));
        if current >= max {
            tx.rollback().await?;
            return Ok(None);
        }

        let entry = ExpiryEntry::new(key.0, expire_at);
        let mut next_log = log.clone();
        next_log.push(entry);

        sqlx::query(
            r"
            INSERT INTO rate_limit_counts (key, count) VALUES (?, 1)
            ON CONFLICT(key) DO UPDATE SET count = count + 1
            ",
        )
        .bind(&key.0[..])
        .execute(&mut *tx)
        .await?;
        Self::write_log(&mut tx, &next_log).await?;

        tx.commit().await?;
        *log = next_log;

        Ok(Some(entry))
    }

    /// Releases the pending entry with `id`: removes it from the log and decrements its key,
    /// deleting the row when the count reaches zero.
    ///
    /// Returns `Ok(false)` when the entry is already gone, which is a normal race outcome.
    ///
    /// # Errors
    /// Returns `StoreError::Database` if the transaction fails; nothing is applied in that case.
    pub async fn release(&self, id: &[u8; 8]) -> Result<bool, StoreError> {
        let mut log = self.log.lock().await;
        let Some(position) = log.iter().position(|entry| &entry.id == id) else {
            return Ok(false);
        };
        let key = log[position].key;

        let mut next_log = log.clone();
        next_log.remove(position);

        let mut tx = self.pool.begin().await?;
        let current: Option<i64> =
            sqlx::query_scalar("SELECT count FROM rate_limit_counts WHERE key = ?")
                .bind(&key[..])
                .fetch_optional(&mut *tx)
                .await?;

        match current {
            Some(count) if count > 1 => {
                sqlx::query("UPDATE rate_limit_counts SET count = count - 1 WHERE key = ?")
                    .bind(&key[..])
                    .execute(&mut *tx)
                    .await?;
            }
            Some(_) => {
                sqlx::query("DELETE FROM rate_limit_counts WHERE key = ?")
                    .bind(&key[..])
                    .execute(&mut *tx)
                    .await?;
            }
            None => {
                tracing::warn!(key = %hex::encode(key), "expiry entry without a counter row");
            }
        }
        Self::write_log(&mut tx, &next_log).await?;

        tx.commit().await?;
        *log = next_log;

        Ok(true)
    }

    /// Snapshot of the pending expiry log, in admission order.
    pub async fn pending_entries(&self) -> Vec<ExpiryEntry> {
        self.log.lock().await.clone()
    }

    /// Every persisted counter row.
    ///
    /// # Errors
    /// Returns `StoreError::Database` on query failure.
    pub async fn counts(&self) -> Result<Vec<(RateLimitKey, u64)>, StoreError> {
        let rows = sqlx::query("SELECT key, count FROM rate_limit_counts ORDER BY key")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                let raw: Vec<u8> = row.try_get("key")?;
                let count: i64 = row.try_get("count")?;
                let key: [u8; ENTRY_KEY_LEN] = raw.as_slice().try_into().map_err(|_| {
                    StoreError::Database(format!("counter key has {} bytes", raw.len()))
                })?;
                Ok((RateLimitKey(key), u64::try_from(count).unwrap_or(0)))
            })
            .collect()
    }

    async fn write_log(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        entries: &[ExpiryEntry],
    ) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO rate_limit_expiry (name, data) VALUES (?, ?)
            ON CONFLICT(name) DO UPDATE SET data = excluded.data
            ",
        )
        .bind(EXPIRY_LOG_NAME)
        .bind(encode_log(entries))
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}
