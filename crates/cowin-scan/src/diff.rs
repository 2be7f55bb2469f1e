use std::time::Duration;

use serde::Serialize;
use slot_store::StoreError;
use tracing::debug;

use crate::scan_types::QueryKey;
use crate::snapshot::{CenterRecord, Snapshot};
use crate::snapshot_store::SnapshotStore;

/// Why a session made it into a diff
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Change {
    /// The center was not in the previous snapshot
    New,
    /// The center was known but not with this date, age limit and vaccine
    IdentityChanged,
    /// Same session with strictly more capacity than before
    Increased {
        /// Capacity seen in the previous snapshot
        previous: u32,
    },
}

/// One reported session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffEntry {
    /// Current record for the session
    pub record: CenterRecord,
    /// Reason it was reported
    pub change: Change,
}

/// Sessions of a new snapshot that are worth notifying about
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffResult {
    entries: Vec<DiffEntry>,
}

impl DiffResult {
    /// Reported sessions in center id order.
    pub fn entries(&self) -> &[DiffEntry] {
        &self.entries
    }

    /// Number of reported sessions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always false for a result handed out by [`compute_diff`].
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The reported sessions as a snapshot.
    pub fn snapshot(&self) -> Snapshot {
        self.entries.iter().map(|e| e.record.clone()).collect()
    }
}

/// Compare `current` against the previously stored snapshot for the same query.
///
/// Returns `None` when nothing is new, so callers never see an empty diff.
pub fn compute_diff(previous: Option<&Snapshot>, current: &Snapshot) -> Option<DiffResult> {
    let entries: Vec<DiffEntry> = current
        .records()
        .filter_map(|record| {
            let change = match previous {
                None => Change::New,
                Some(previous) => match previous.get(&record.session_key()) {
                    Some(old) if record.capacity() > old.capacity() => Change::Increased {
                        previous: old.capacity(),
                    },
                    Some(_) => return None,
                    None if previous.contains_center(record.center_id) => {
                        Change::IdentityChanged
                    }
                    None => Change::New,
                },
            };

            Some(DiffEntry {
                record: record.clone(),
                change,
            })
        })
        .collect();

    if entries.is_empty() {
        None
    } else {
        Some(DiffResult { entries })
    }
}

/// Diff `current` against the stored snapshot for `key`, then store `current` under
/// `key` for `ttl`.
///
/// The write happens whether or not anything changed. Store failures are returned
/// before any comparison is made.
pub async fn diff(
    current: Snapshot,
    store: &dyn SnapshotStore,
    key: &QueryKey,
    ttl: Duration,
) -> Result<Option<DiffResult>, StoreError> {
    let previous = store.get(key).await?;
    store.set_with_ttl(key, &current, ttl).await?;

    let result = compute_diff(previous.as_ref(), &current);

    debug!(
        "Diff for {}: {} sessions now, {} previously, {} reported",
        key.storage_key(),
        current.len(),
        previous.as_ref().map_or(0, Snapshot::len),
        result.as_ref().map_or(0, DiffResult::len)
    );

    Ok(result)
}
