use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use super::{connect, StoreError};
use crate::utils::ViteAddress;

const SCHEMA: &str = r"
    CREATE TABLE IF NOT EXISTS wallets (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        primary_address BLOB NOT NULL UNIQUE,
        encrypted BLOB NOT NULL
    );
";

/// One encrypted entropy store, keyed by the 21-byte form of its primary address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletRecord {
    pub primary_address: ViteAddress,
    pub encrypted: Vec<u8>,
}

#[async_trait]
pub trait WalletRepository: Send + Sync {
    /// Stores a new record.
    ///
    /// # Errors
    /// Returns [`StoreError::AlreadyExists`] when a record for the address is already stored.
    async fn insert(&self, record: &WalletRecord) -> Result<(), StoreError>;

    /// # Errors
    /// Returns `StoreError::Database` on query failure.
    async fn find(&self, address: &ViteAddress) -> Result<Option<WalletRecord>, StoreError>;

    /// Every record, oldest first.
    ///
    /// # Errors
    /// Returns `StoreError::Database` on query failure.
    async fn list(&self) -> Result<Vec<WalletRecord>, StoreError>;
}

pub struct SqliteWalletStore {
    pool: SqlitePool,
}

impl SqliteWalletStore {
    /// # Errors
    /// Returns `StoreError::Database` if the database cannot be opened or migrated.
    pub async fn open(database_url: &str) -> Result<Self, StoreError> {
        let pool = connect(database_url).await?;
        Self::with_pool(pool).await
    }

    /// # Errors
    /// Returns `StoreError::Database` if the schema cannot be created.
    pub async fn with_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        Ok(Self { pool })
    }
}

fn record_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<WalletRecord, StoreError> {
    let address: Vec<u8> = row.try_get("primary_address")?;
    let encrypted: Vec<u8> = row.try_get("encrypted")?;
    let primary_address = ViteAddress::from_original(&address)
        .map_err(|e| StoreError::Database(format!("stored wallet address is invalid: {e}")))?;
    Ok(WalletRecord { primary_address, encrypted })
}

#[async_trait]
impl WalletRepository for SqliteWalletStore {
    async fn insert(&self, record: &WalletRecord) -> Result<(), StoreError> {
        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO wallets (primary_address, encrypted) VALUES (?, ?)",
        )
        .bind(&record.primary_address.original()[..])
        .bind(&record.encrypted)
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() == 0 {
            return Err(StoreError::AlreadyExists);
        }
        tracing::debug!(address = %record.primary_address, "stored wallet");
        Ok(())
    }

    async fn find(&self, address: &ViteAddress) -> Result<Option<WalletRecord>, StoreError> {
        let row = sqlx::query("SELECT primary_address, encrypted FROM wallets WHERE primary_address = ?")
            .bind(&address.original()[..])
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn list(&self) -> Result<Vec<WalletRecord>, StoreError> {
        let rows = sqlx::query("SELECT primary_address, encrypted FROM wallets ORDER BY seq")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(record_from_row).collect()
    }
}
