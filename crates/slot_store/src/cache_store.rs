use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::Row;
use sqlx::sqlite::SqlitePool;
use tracing::{debug, info};

use crate::database::{create_connection_pool, create_memory_pool, test_connection};
use crate::types::StoreError;

/// Persistent key-value cache with per-entry expiry.
///
/// Every write replaces the previous value for its key. Entries whose expiry has passed are
/// invisible to [`CacheStore::get`] and are physically removed by [`CacheStore::expire`].
#[derive(Debug, Clone)]
pub struct CacheStore {
    pool: SqlitePool,
}

impl CacheStore {
    /// Open (or create) a cache stored in the SQLite file at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let pool = create_connection_pool(path).await?;
        test_connection(&pool).await?;
        init_schema(&pool).await?;

        info!("Opened availability cache at {}", path.display());
        Ok(Self { pool })
    }

    /// Open a cache that lives only as long as this handle.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let pool = create_memory_pool().await?;
        init_schema(&pool).await?;
        Ok(Self { pool })
    }

    /// Fetch the value stored under `key`, or `None` if it is missing or expired.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let now = Utc::now().timestamp_millis();

        let row = sqlx::query("SELECT value FROM cache_entries WHERE key = ?1 AND expires_at > ?2")
            .bind(key)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let raw: String = row.try_get("value")?;
                Ok(Some(serde_json::from_str(&raw)?))
            }
            None => Ok(None),
        }
    }

    /// Store `value` under `key`, replacing any previous value, valid for `ttl`.
    pub async fn set_with_ttl<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let ttl_delta = chrono::Duration::from_std(ttl).map_err(|_| StoreError::InvalidTtl(ttl))?;
        let now = Utc::now();
        let expires_at = now
            .checked_add_signed(ttl_delta)
            .ok_or(StoreError::InvalidTtl(ttl))?;

        let raw = serde_json::to_string(value)?;

        sqlx::query(
            r#"
            INSERT INTO cache_entries (key, value, stored_at, expires_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (key)
            DO UPDATE SET
                value = EXCLUDED.value,
                stored_at = EXCLUDED.stored_at,
                expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(key)
        .bind(raw)
        .bind(now.timestamp_millis())
        .bind(expires_at.timestamp_millis())
        .execute(&self.pool)
        .await?;

        debug!("Cached {} until {}", key, expires_at);
        Ok(())
    }

    /// Delete every expired entry and return how many were removed.
    pub async fn expire(&self) -> Result<u64, StoreError> {
        let now = Utc::now().timestamp_millis();

        let result = sqlx::query("DELETE FROM cache_entries WHERE expires_at <= ?1")
            .bind(now)
            .execute(&self.pool)
            .await?;

        let removed = result.rows_affected();
        if removed > 0 {
            debug!("Evicted {} expired cache entries", removed);
        }
        Ok(removed)
    }

    /// Number of entries still stored, expired or not.
    pub async fn len(&self) -> Result<i64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM cache_entries")
            .fetch_one(&self.pool)
            .await?;

        Ok(row.try_get("count")?)
    }

    /// Flush and close the underlying database.
    pub async fn close(&self) {
        self.pool.close().await;
        info!("Availability cache closed");
    }
}

async fn init_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS cache_entries (
            key TEXT PRIMARY KEY NOT NULL,
            value TEXT NOT NULL,
            stored_at INTEGER NOT NULL,
            expires_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_cache_entries_expires_at ON cache_entries(expires_at)")
        .execute(pool)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: Duration = Duration::from_secs(60 * 60);

    #[tokio::test]
    async fn test_get_missing_key() {
        let store = CacheStore::open_in_memory().await.unwrap();
        let value: Option<Vec<u32>> = store.get("missing").await.unwrap();
        assert!(value.is_none());
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let store = CacheStore::open_in_memory().await.unwrap();
        store.set_with_ttl("k", &vec![1u32, 2, 3], HOUR).await.unwrap();

        let value: Option<Vec<u32>> = store.get("k").await.unwrap();
        assert_eq!(value, Some(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn test_set_overwrites_existing_key() {
        let store = CacheStore::open_in_memory().await.unwrap();
        store.set_with_ttl("k", &"old", HOUR).await.unwrap();
        store.set_with_ttl("k", &"new", HOUR).await.unwrap();

        let value: Option<String> = store.get("k").await.unwrap();
        assert_eq!(value.as_deref(), Some("new"));
        assert_eq!(store.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_expired_entry_is_absent_and_swept() {
        let store = CacheStore::open_in_memory().await.unwrap();
        store.set_with_ttl("stale", &1u8, Duration::ZERO).await.unwrap();
        store.set_with_ttl("fresh", &2u8, HOUR).await.unwrap();

        let stale: Option<u8> = store.get("stale").await.unwrap();
        assert!(stale.is_none());
        assert_eq!(store.len().await.unwrap(), 2);

        assert_eq!(store.expire().await.unwrap(), 1);
        assert_eq!(store.len().await.unwrap(), 1);

        let fresh: Option<u8> = store.get("fresh").await.unwrap();
        assert_eq!(fresh, Some(2));
    }

    #[tokio::test]
    async fn test_oversized_ttl_rejected() {
        let store = CacheStore::open_in_memory().await.unwrap();
        let result = store.set_with_ttl("k", &1u8, Duration::MAX).await;
        assert!(matches!(result, Err(StoreError::InvalidTtl(_))));
    }

    #[tokio::test]
    async fn test_entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("previous.db");

        let store = CacheStore::open(&path).await.unwrap();
        store.set_with_ttl("k", &"kept", HOUR).await.unwrap();
        store.close().await;

        let reopened = CacheStore::open(&path).await.unwrap();
        let value: Option<String> = reopened.get("k").await.unwrap();
        assert_eq!(value.as_deref(), Some("kept"));
    }
}
