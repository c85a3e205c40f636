//! # SQLite Watermark Store
//!
//! Keeps the watermark as one row of a `sync_watermarks` table, keyed by a
//! store key so several pipelines can share a database.

use crate::{
    store::{WatermarkBootstrap, WatermarkStore},
    Result, SyncError, Watermark,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{FromRow, SqlitePool};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Key used when a database holds a single pipeline.
pub const DEFAULT_STORE_KEY: &str = "orders";

/// SQLite implementation of [`WatermarkStore`].
pub struct SqliteWatermarkStore {
    pool: SqlitePool,
    key: String,
    bootstrap: WatermarkBootstrap,
}

/// Database row representation of a watermark
#[derive(Debug, FromRow)]
struct WatermarkRow {
    last_timestamp: String,
    last_id: i64,
    last_updated_at: String,
    total_processed: i64,
}

impl TryFrom<WatermarkRow> for Watermark {
    type Error = String;

    fn try_from(row: WatermarkRow) -> std::result::Result<Self, Self::Error> {
        let parse = |value: &str| {
            DateTime::parse_from_rfc3339(value)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| format!("invalid timestamp '{}': {}", value, e))
        };

        Ok(Watermark {
            last_timestamp: parse(&row.last_timestamp)?,
            last_id: row.last_id,
            last_updated_at: parse(&row.last_updated_at)?,
            total_processed: u64::try_from(row.total_processed)
                .map_err(|_| format!("negative total_processed {}", row.total_processed))?,
        })
    }
}

impl SqliteWatermarkStore {
    /// Wrap an existing pool. Call [`migrate`](Self::migrate) before use.
    pub fn new(pool: SqlitePool, key: impl Into<String>, bootstrap: WatermarkBootstrap) -> Self {
        Self {
            pool,
            key: key.into(),
            bootstrap,
        }
    }

    /// Open (creating if missing) the database at `database_url` and ensure
    /// the table exists.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Storage`] if the URL is invalid or the database
    /// cannot be opened.
    pub async fn connect(database_url: &str, bootstrap: WatermarkBootstrap) -> Result<Self> {
        info!("Opening SQLite watermark store");

        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| SyncError::Storage(format!("Invalid database URL: {}", e)))?
            .journal_mode(SqliteJournalMode::Wal)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(|e| SyncError::Storage(format!("Failed to open database: {}", e)))?;

        let store = Self::new(pool, DEFAULT_STORE_KEY, bootstrap);
        store.migrate().await?;
        Ok(store)
    }

    /// Create the `sync_watermarks` table if it does not exist.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sync_watermarks (
                store_key TEXT PRIMARY KEY NOT NULL,
                last_timestamp TEXT NOT NULL,
                last_id INTEGER NOT NULL,
                last_updated_at TEXT NOT NULL,
                total_processed INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| SyncError::Storage(e.to_string()))?;

        Ok(())
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

#[async_trait]
impl WatermarkStore for SqliteWatermarkStore {
    async fn read(&self) -> Result<Watermark> {
        let row = sqlx::query_as::<_, WatermarkRow>(
            r#"
            SELECT last_timestamp, last_id, last_updated_at, total_processed
            FROM sync_watermarks
            WHERE store_key = ?
            "#,
        )
        .bind(&self.key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| SyncError::Storage(e.to_string()))?;

        match row.map(Watermark::try_from) {
            Some(Ok(watermark)) => return Ok(watermark),
            Some(Err(reason)) => {
                warn!(key = %self.key, reason = %reason, "Stored watermark is invalid, recreating default");
            }
            None => {
                info!(key = %self.key, "No watermark row found, bootstrapping default");
            }
        }

        let initial = self.bootstrap.initial();
        self.write(&initial).await?;
        Ok(initial)
    }

    async fn write(&self, watermark: &Watermark) -> Result<()> {
        let total = i64::try_from(watermark.total_processed).unwrap_or(i64::MAX);

        sqlx::query(
            r#"
            INSERT INTO sync_watermarks (
                store_key, last_timestamp, last_id, last_updated_at, total_processed
            ) VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(store_key) DO UPDATE SET
                last_timestamp = excluded.last_timestamp,
                last_id = excluded.last_id,
                last_updated_at = excluded.last_updated_at,
                total_processed = excluded.total_processed
            "#,
        )
        .bind(&self.key)
        .bind(watermark.last_timestamp.to_rfc3339())
        .bind(watermark.last_id)
        .bind(watermark.last_updated_at.to_rfc3339())
        .bind(total)
        .execute(&self.pool)
        .await
        .map_err(|e| SyncError::Storage(e.to_string()))?;

        debug!(key = %self.key, last_id = watermark.last_id, "Watermark row upserted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::FixedClock;
    use chrono::TimeZone;
    use std::sync::Arc;

    async fn create_test_store() -> (SqliteWatermarkStore, DateTime<Utc>) {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();

        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let bootstrap = WatermarkBootstrap::new(
            Arc::new(FixedClock::new(now)),
            chrono::Duration::hours(1),
        );
        let store = SqliteWatermarkStore::new(pool, DEFAULT_STORE_KEY, bootstrap);
        store.migrate().await.unwrap();
        (store, now)
    }

    #[tokio::test]
    async fn test_bootstrap_inserts_default_row() {
        let (store, now) = create_test_store().await;

        let w = store.read().await.unwrap();
        assert_eq!(w.last_timestamp, now - chrono::Duration::hours(1));
        assert_eq!(w.last_id, 0);

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sync_watermarks")
            .fetch_one(&store.pool)
            .await
            .unwrap();
        assert_eq!(count.0, 1);
    }

    #[tokio::test]
    async fn test_upsert_replaces_row() {
        let (store, now) = create_test_store().await;
        store.read().await.unwrap();

        let w = Watermark {
            last_timestamp: now,
            last_id: 9,
            last_updated_at: now,
            total_processed: 4,
        };
        store.write(&w).await.unwrap();
        store.write(&w).await.unwrap();

        assert_eq!(store.read().await.unwrap(), w);
    }

    #[tokio::test]
    async fn test_invalid_row_is_recreated() {
        let (store, now) = create_test_store().await;
        sqlx::query(
            "INSERT INTO sync_watermarks VALUES ('orders', 'yesterday', 3, 'today', 1)",
        )
        .execute(&store.pool)
        .await
        .unwrap();

        let w = store.read().await.unwrap();
        assert_eq!(w.last_id, 0);
        assert_eq!(w.last_timestamp, now - chrono::Duration::hours(1));
    }

    #[tokio::test]
    async fn test_keys_are_isolated() {
        let (store, now) = create_test_store().await;
        let other = SqliteWatermarkStore::new(
            store.pool.clone(),
            "returns",
            WatermarkBootstrap::new(Arc::new(FixedClock::new(now)), chrono::Duration::hours(2)),
        );

        let w = Watermark {
            last_timestamp: now,
            last_id: 50,
            last_updated_at: now,
            total_processed: 1,
        };
        store.write(&w).await.unwrap();

        let other_w = other.read().await.unwrap();
        assert_eq!(other_w.last_id, 0);
        assert_eq!(other_w.last_timestamp, now - chrono::Duration::hours(2));
        assert_eq!(store.read().await.unwrap().last_id, 50);
    }
}
