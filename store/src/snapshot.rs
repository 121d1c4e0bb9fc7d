use crate::{PersistenceError, Result, SnapshotInfo};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

/// At-most-once-per-version snapshot persistence for aggregate-style
/// consumers sitting on top of a [`crate::PersistenceEngine`].
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Returns the snapshot at, or most recently below, `version`.
    async fn get(&self, aggregate_id: &str, version: i64) -> Result<Option<SnapshotInfo>>;

    /// Persists `info`. Fails with `StaleSnapshot` if `info.aggregate_version`
    /// is not strictly greater than the latest version stored for
    /// `aggregate_id`.
    async fn add(&self, aggregate_id: &str, info: SnapshotInfo) -> Result<bool>;

    /// Removes snapshots for `aggregate_id` with version in
    /// `[from_version, to_version]`. Never fails, even if nothing matched.
    async fn remove(&self, aggregate_id: &str, from_version: i64, to_version: i64) -> Result<()>;
}

/// Reference implementation, keyed the same way the backend would be:
/// `aggregate_id -> version -> SnapshotInfo`.
#[derive(Default)]
pub struct InMemorySnapshotStore {
    snapshots: Mutex<HashMap<String, BTreeMap<i64, SnapshotInfo>>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn get(&self, aggregate_id: &str, version: i64) -> Result<Option<SnapshotInfo>> {
        let snapshots = self.snapshots.lock().expect("snapshot store mutex poisoned");
        Ok(snapshots
            .get(aggregate_id)
            .and_then(|versions| versions.range(..=version).next_back())
            .map(|(_, info)| info.clone()))
    }

    async fn add(&self, aggregate_id: &str, info: SnapshotInfo) -> Result<bool> {
        let mut snapshots = self.snapshots.lock().expect("snapshot store mutex poisoned");
        let versions = snapshots.entry(aggregate_id.to_string()).or_default();

        if let Some((&latest, _)) = versions.last_key_value() {
            if info.aggregate_version <= latest {
                return Err(PersistenceError::StaleSnapshot {
                    aggregate_id: aggregate_id.to_string(),
                    version: info.aggregate_version,
                });
            }
        }

        versions.insert(info.aggregate_version, info);
        Ok(true)
    }

    async fn remove(&self, aggregate_id: &str, from_version: i64, to_version: i64) -> Result<()> {
        let mut snapshots = self.snapshots.lock().expect("snapshot store mutex poisoned");
        if let Some(versions) = snapshots.get_mut(aggregate_id) {
            versions.retain(|version, _| *version < from_version || *version > to_version);
        }
        Ok(())
    }
}
