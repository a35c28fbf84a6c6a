//! SQLite implementation of the [`MemoryStore`] trait
//!
//! Wraps [`Storage`] and delegates to the functions in `queries.rs`.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::backend::MemoryStore;
use super::connection::Storage;
use super::queries;
use crate::error::Result;
use crate::types::{
    BatchWriteOutcome, LifecycleUpdate, MaintenanceCheckpoint, Memory, MemoryId, PageCursor,
    PopulationStats,
};

/// SQLite-backed memory store
#[derive(Clone)]
pub struct SqliteStore {
    storage: Storage,
}

impl SqliteStore {
    /// Open (or create) the database at `db_path`
    pub fn open(db_path: &str) -> Result<Self> {
        Ok(Self {
            storage: Storage::open(db_path)?,
        })
    }

    /// In-memory SQLite store (useful for testing)
    pub fn in_memory() -> Result<Self> {
        Ok(Self {
            storage: Storage::open_in_memory()?,
        })
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Fresh identifier for a newly captured memory
    pub fn allocate_id(&self) -> MemoryId {
        Uuid::new_v4().to_string()
    }
}

impl MemoryStore for SqliteStore {
    fn read(&self, id: &str) -> Result<Option<Memory>> {
        self.storage
            .with_connection(|conn| queries::get_memory(conn, id))
    }

    fn write(&self, memory: &Memory) -> Result<()> {
        self.storage
            .with_transaction(|conn| queries::upsert_memory(conn, memory))
    }

    fn page_older_than(&self, cursor: Option<&PageCursor>, limit: usize) -> Result<Vec<Memory>> {
        self.storage
            .with_connection(|conn| queries::page_after(conn, cursor, limit))
    }

    fn soft_deleted_before(&self, cutoff: DateTime<Utc>, limit: usize) -> Result<Vec<Memory>> {
        self.storage
            .with_connection(|conn| queries::soft_deleted_before(conn, cutoff, limit))
    }

    fn purge(&self, id: &str) -> Result<bool> {
        self.storage
            .with_transaction(|conn| queries::delete_memory(conn, id))
    }

    fn touch(&self, id: &str, now: DateTime<Utc>) -> Result<Option<Memory>> {
        self.storage.with_transaction(|conn| {
            if !queries::touch_memory(conn, id, now)? {
                return Ok(None);
            }
            queries::get_memory(conn, id)
        })
    }

    fn count_after(&self, cursor: Option<&PageCursor>) -> Result<u64> {
        self.storage
            .with_connection(|conn| queries::count_after(conn, cursor))
    }

    fn population_stats(&self) -> Result<PopulationStats> {
        self.storage.with_connection(queries::population_stats)
    }

    fn load_checkpoint(&self) -> Result<MaintenanceCheckpoint> {
        self.storage.with_connection(queries::load_checkpoint)
    }

    fn save_checkpoint(&self, checkpoint: &MaintenanceCheckpoint) -> Result<()> {
        self.storage
            .with_transaction(|conn| queries::save_checkpoint(conn, checkpoint))
    }

    /// One transaction per batch; the conditional UPDATE rejects stale rows
    fn apply_batch(&self, updates: &[LifecycleUpdate]) -> Result<BatchWriteOutcome> {
        self.storage.with_transaction(|conn| {
            let mut outcome = BatchWriteOutcome::default();
            for update in updates {
                if queries::apply_lifecycle_update(conn, update)? {
                    outcome.applied += 1;
                } else {
                    outcome.stale.push(update.id.clone());
                }
            }
            Ok(outcome)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{LifecycleState, RunStatus};
    use chrono::{Duration, TimeZone};

    fn at(day: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(day)
    }

    #[test]
    fn test_write_and_read_roundtrip() {
        let store = SqliteStore::in_memory().unwrap();
        let mut memory = Memory::new(store.allocate_id(), at(0), 4, 2);
        memory.access_count = 7;
        memory.decay_score = 0.25;
        store.write(&memory).unwrap();

        let loaded = store.read(&memory.id).unwrap().unwrap();
        assert_eq!(loaded, memory);
        assert!(store.read("missing").unwrap().is_none());
    }

    #[test]
    fn test_keyset_paging_breaks_ties_by_id() {
        let store = SqliteStore::in_memory().unwrap();
        for id in ["b", "a", "c"] {
            store.write(&Memory::new(id, at(0), 3, 3)).unwrap();
        }
        store.write(&Memory::new("z", at(-1), 3, 3)).unwrap();

        let first = store.page_older_than(None, 2).unwrap();
        let ids: Vec<_> = first.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["z", "a"]);

        let cursor = first.last().unwrap().cursor();
        let second = store.page_older_than(Some(&cursor), 10).unwrap();
        let ids: Vec<_> = second.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
        assert_eq!(store.count_after(Some(&cursor)).unwrap(), 2);
        assert_eq!(store.count_after(None).unwrap(), 4);
    }

    #[test]
    fn test_apply_batch_skips_reactivated_rows() {
        let store = SqliteStore::in_memory().unwrap();
        let original = Memory::new("a", at(0), 3, 3);
        store.write(&original).unwrap();
        store.write(&Memory::new("b", at(0), 3, 3)).unwrap();

        let mut touched = original.clone();
        touched.last_accessed_at = at(50);
        store.write(&touched).unwrap();

        let updates: Vec<_> = ["a", "b"]
            .iter()
            .map(|id| LifecycleUpdate {
                id: id.to_string(),
                observed_last_accessed_at: at(0),
                lifecycle_state: LifecycleState::Dormant,
                decay_score: 0.5,
                soft_deleted_at: None,
            })
            .collect();

        let outcome = store.apply_batch(&updates).unwrap();
        assert_eq!(outcome.applied, 1);
        assert_eq!(outcome.stale, vec!["a".to_string()]);
        assert_eq!(
            store.read("a").unwrap().unwrap().lifecycle_state,
            LifecycleState::Active
        );
        assert_eq!(
            store.read("b").unwrap().unwrap().lifecycle_state,
            LifecycleState::Dormant
        );
    }

    #[test]
    fn test_touch_keeps_newest_access() {
        let store = SqliteStore::in_memory().unwrap();
        store.write(&Memory::new("a", at(0), 3, 3)).unwrap();

        let first = store.touch("a", at(5)).unwrap().unwrap();
        assert_eq!(first.last_accessed_at, at(5));
        assert_eq!(first.access_count, 1);

        let stale = store.touch("a", at(2)).unwrap().unwrap();
        assert_eq!(stale.last_accessed_at, at(5));
        assert_eq!(stale.access_count, 2);
        assert!(store.touch("missing", at(5)).unwrap().is_none());
    }

    #[test]
    fn test_soft_deleted_and_purge() {
        let store = SqliteStore::in_memory().unwrap();
        let mut m = Memory::new("gone", at(0), 1, 1);
        m.lifecycle_state = LifecycleState::SoftDeleted;
        m.soft_deleted_at = Some(at(10));
        m.decay_score = 1.0;
        store.write(&m).unwrap();

        assert_eq!(store.soft_deleted_before(at(10), 10).unwrap().len(), 1);
        assert!(store.soft_deleted_before(at(9), 10).unwrap().is_empty());

        assert!(store.purge("gone").unwrap());
        assert!(!store.purge("gone").unwrap());
        assert!(store.read("gone").unwrap().is_none());
    }

    #[test]
    fn test_checkpoint_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lifecycle.db");
        let path = path.to_str().unwrap();

        let checkpoint = MaintenanceCheckpoint {
            cursor: Some(PageCursor {
                last_accessed_at: at(3),
                id: "m-3".to_string(),
            }),
            last_run_at: Some(at(100)),
            last_status: Some(RunStatus::Partial),
        };

        {
            let store = SqliteStore::open(path).unwrap();
            assert_eq!(store.load_checkpoint().unwrap(), MaintenanceCheckpoint::default());
            store.save_checkpoint(&checkpoint).unwrap();
        }

        let reopened = SqliteStore::open(path).unwrap();
        assert_eq!(reopened.load_checkpoint().unwrap(), checkpoint);
    }

    #[test]
    fn test_population_stats() {
        let store = SqliteStore::in_memory().unwrap();
        let mut dormant = Memory::new("d", at(0), 5, 1);
        dormant.lifecycle_state = LifecycleState::Dormant;
        dormant.decay_score = 0.6;
        store.write(&dormant).unwrap();
        store.write(&Memory::new("a", at(0), 1, 3)).unwrap();

        let stats = store.population_stats().unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.by_state.get(&LifecycleState::Dormant), Some(&1));
        assert_eq!(stats.by_state.get(&LifecycleState::Active), Some(&1));
        assert!((stats.avg_decay_score - 0.3).abs() < 1e-9);
        assert!((stats.avg_importance - 3.0).abs() < 1e-9);
        assert!((stats.avg_stability - 2.0).abs() < 1e-9);
    }
}
