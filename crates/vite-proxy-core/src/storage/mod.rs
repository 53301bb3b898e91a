//! `SQLite`-backed persistence.
//!
//! Two stores live here:
//!
//! - [`PersistentCounterStore`]: rate-limit counts plus the ordered expiry log that lets the
//!   limiter resume pending releases after a restart.
//! - [`SqliteWalletStore`]: encrypted entropy records keyed by primary address.
//!
//! Each database is owned by a single process. Opening the same file from two proxies is not
//! supported.

pub mod counter_store;
pub mod expiry_log;
pub mod wallet_store;

pub use counter_store::{PersistentCounterStore, RateLimitKey};
pub use expiry_log::ExpiryEntry;
pub use wallet_store::{SqliteWalletStore, WalletRecord, WalletRepository};

use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Corrupt expiry log: {0}")]
    CorruptExpiryLog(String),

    #[error("Wallet already exists")]
    AlreadyExists,
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

/// Opens a connection pool, creating the database file when it does not exist.
///
/// In-memory databases are pinned to a single long-lived connection so the data survives for
/// the lifetime of the pool.
///
/// # Errors
/// Returns `StoreError::Database` if the URL is malformed or the connection fails.
pub async fn connect(database_url: &str) -> Result<SqlitePool, StoreError> {
    let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

    let pool = if is_in_memory(database_url) {
        SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?
    } else {
        SqlitePoolOptions::new().max_connections(4).connect_with(options).await?
    };

    Ok(pool)
}

fn is_in_memory(database_url: &str) -> bool {
    database_url.contains(":memory:") || database_url.contains("mode=memory")
}
