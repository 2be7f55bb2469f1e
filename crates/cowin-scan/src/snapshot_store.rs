use std::time::Duration;

use async_trait::async_trait;
use slot_store::{CacheStore, StoreError};

use crate::scan_types::QueryKey;
use crate::snapshot::Snapshot;

/// How long a stored snapshot stays valid without being refreshed (6 hours)
pub const DEFAULT_SNAPSHOT_TTL: Duration = Duration::from_secs(6 * 60 * 60);

/// Persistent mapping from query to the last snapshot observed for it
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Stored snapshot for `key`, or `None` if missing or expired.
    async fn get(&self, key: &QueryKey) -> Result<Option<Snapshot>, StoreError>;

    /// Store `snapshot` under `key`, replacing any previous value.
    async fn set_with_ttl(
        &self,
        key: &QueryKey,
        snapshot: &Snapshot,
        ttl: Duration,
    ) -> Result<(), StoreError>;

    /// Drop expired entries, returning how many were removed.
    async fn expire_sweep(&self) -> Result<u64, StoreError>;

    /// Release the underlying resources.
    async fn close(&self);
}

#[async_trait]
impl SnapshotStore for CacheStore {
    async fn get(&self, key: &QueryKey) -> Result<Option<Snapshot>, StoreError> {
        CacheStore::get(self, &key.storage_key()).await
    }

    async fn set_with_ttl(
        &self,
        key: &QueryKey,
        snapshot: &Snapshot,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        CacheStore::set_with_ttl(self, &key.storage_key(), snapshot, ttl).await
    }

    async fn expire_sweep(&self) -> Result<u64, StoreError> {
        self.expire().await
    }

    async fn close(&self) {
        CacheStore::close(self).await
    }
}

#[cfg(test)]
pub(crate) use memory::MemorySnapshotStore;


#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::scan_types::{Location, SearchCriteria};
    use crate::snapshot::fixtures::record;

    fn key(age_group: u32) -> QueryKey {
        let criteria = SearchCriteria {
            location: Location::Pincode("560001".to_string()),
            age_group,
            vaccine: None,
            dose: None,
            fee_mode: None,
        };
        QueryKey::new(NaiveDate::from_ymd_opt(2021, 5, 20).unwrap(), &criteria)
    }

    fn snapshot() -> Snapshot {
        vec![record(1, 5), record(2, 3)].into_iter().collect()
    }

    async fn check_store(store: &dyn SnapshotStore) {
        assert_eq!(store.get(&key(18)).await.unwrap(), None);

        store
            .set_with_ttl(&key(18), &snapshot(), DEFAULT_SNAPSHOT_TTL)
            .await
            .unwrap();
        store
            .set_with_ttl(&key(45), &Snapshot::new(), Duration::ZERO)
            .await
            .unwrap();

        assert_eq!(store.get(&key(18)).await.unwrap(), Some(snapshot()));
        assert_eq!(store.get(&key(45)).await.unwrap(), None);

        assert_eq!(store.expire_sweep().await.unwrap(), 1);
        assert_eq!(store.expire_sweep().await.unwrap(), 0);
        assert_eq!(store.get(&key(18)).await.unwrap(), Some(snapshot()));
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemorySnapshotStore::new();
        check_store(&store).await;

        assert_eq!(store.len().await, 1);
        store.close().await;
        assert!(store.is_closed());
    }

    #[tokio::test]
    async fn test_sqlite_store() {
        let store = CacheStore::open_in_memory().await.unwrap();
        check_store(&store).await;
        SnapshotStore::close(&store).await;
    }

    #[tokio::test]
    async fn test_sqlite_store_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".previous.db");

        let store = CacheStore::open(&path).await.unwrap();
        SnapshotStore::set_with_ttl(&store, &key(18), &snapshot(), DEFAULT_SNAPSHOT_TTL)
            .await
            .unwrap();
        SnapshotStore::close(&store).await;

        let reopened = CacheStore::open(&path).await.unwrap();
        assert_eq!(
            SnapshotStore::get(&reopened, &key(18)).await.unwrap(),
            Some(snapshot())
        );
    }
}
