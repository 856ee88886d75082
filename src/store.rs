//! Dedup store: the persistent record of published images
//!
//! Each record ties a perceptual hash and a content hash to the channel
//! message an account published. At most one record exists per
//! (perceptual hash, account); both operations are single statements so
//! concurrent accounts never observe a half-applied change.

use crate::config::DatabaseSettings;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Errors that can occur during store operations
#[derive(Error, Debug)]
pub enum StoreError {
    /// Query or connection failure
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Result of an add
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// A new record was written
    Inserted,
    /// The account already has a record for this perceptual hash
    Duplicate,
}

/// Interface for dedup store providers
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DedupStore: Send + Sync {
    /// Insert a record unless one exists for `(image_hash, account_id)`.
    async fn add(
        &self,
        image_hash: u64,
        file_hash: &str,
        account_id: i64,
        message_id: i32,
    ) -> Result<AddOutcome, StoreError>;
    /// Remove one record matching `(file_hash, account_id)`, returning its
    /// message ID.
    async fn delete(&self, file_hash: &str, account_id: i64) -> Result<Option<i32>, StoreError>;
    /// Remove the record that points at `message_id`, if any. Used to undo
    /// an add whose placeholder is being deleted.
    async fn remove_message(&self, account_id: i64, message_id: i32) -> Result<bool, StoreError>;
    /// Release the underlying connections
    async fn close(&self);
}

/// SQLite-backed dedup store.
pub struct SqliteDedupStore {
    pool: SqlitePool,
}

impl SqliteDedupStore {
    /// Wrap an existing pool. Call [`Self::init`] before use.
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect using the configured URL and create the schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated.
    pub async fn connect(settings: &DatabaseSettings) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(&settings.url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(settings.max_connections.max(1))
            .acquire_timeout(Duration::from_secs(settings.acquire_timeout_secs))
            .connect_with(options)
            .await?;

        let store = Self::new(pool);
        store.init().await?;
        info!(url = %settings.url, "Dedup store ready");
        Ok(store)
    }

    /// Create the images table and its indexes if missing.
    ///
    /// # Errors
    ///
    /// Returns an error if a schema statement fails.
    pub async fn init(&self) -> Result<(), StoreError> {
        sqlx::query(
            r"CREATE TABLE IF NOT EXISTS images (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                image_hash  INTEGER NOT NULL,
                file_hash   TEXT    NOT NULL,
                account_id  INTEGER NOT NULL,
                message_id  INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS images_image_account ON images (image_hash, account_id)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS images_file_account ON images (file_hash, account_id)",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Drop every record.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub async fn reset(&self) -> Result<u64, StoreError> {
        let done = sqlx::query("DELETE FROM images").execute(&self.pool).await?;
        Ok(done.rows_affected())
    }

    /// Number of stored records
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn count(&self) -> Result<i64, StoreError> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM images")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }
}

#[async_trait]
impl DedupStore for SqliteDedupStore {
    async fn add(
        &self,
        image_hash: u64,
        file_hash: &str,
        account_id: i64,
        message_id: i32,
    ) -> Result<AddOutcome, StoreError> {
        let done = sqlx::query(
            r"INSERT INTO images (image_hash, file_hash, account_id, message_id)
               VALUES (?, ?, ?, ?)
               ON CONFLICT(image_hash, account_id) DO NOTHING",
        )
        .bind(image_hash.cast_signed())
        .bind(file_hash)
        .bind(account_id)
        .bind(message_id)
        .execute(&self.pool)
        .await?;

        Ok(if done.rows_affected() == 0 {
            AddOutcome::Duplicate
        } else {
            AddOutcome::Inserted
        })
    }

    async fn delete(&self, file_hash: &str, account_id: i64) -> Result<Option<i32>, StoreError> {
        let removed: Option<i32> = sqlx::query_scalar(
            r"DELETE FROM images WHERE id = (
                 SELECT id FROM images WHERE file_hash = ? AND account_id = ? LIMIT 1
               )
               RETURNING message_id",
        )
        .bind(file_hash)
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(removed)
    }

    async fn remove_message(&self, account_id: i64, message_id: i32) -> Result<bool, StoreError> {
        let done = sqlx::query("DELETE FROM images WHERE account_id = ? AND message_id = ?")
            .bind(account_id)
            .bind(message_id)
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected() > 0)
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
