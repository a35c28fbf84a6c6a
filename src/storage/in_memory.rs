//! In-process memory store
//!
//! Keeps a keyset index on `(last_accessed_at, id)` so paging behaves like
//! the SQL backend. Used by tests, benchmarks and embedders that keep their
//! own persistence.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::backend::MemoryStore;
use crate::error::Result;
use crate::types::{
    BatchWriteOutcome, LifecycleState, LifecycleUpdate, MaintenanceCheckpoint, Memory, MemoryId,
    PageCursor, PopulationStats,
};

#[derive(Default)]
struct Inner {
    memories: HashMap<MemoryId, Memory>,
    by_access: BTreeSet<PageCursor>,
    checkpoint: MaintenanceCheckpoint,
}

impl Inner {
    fn upsert(&mut self, memory: Memory) {
        if let Some(previous) = self.memories.get(&memory.id) {
            self.by_access.remove(&previous.cursor());
        }
        self.by_access.insert(memory.cursor());
        self.memories.insert(memory.id.clone(), memory);
    }

    fn remove(&mut self, id: &str) -> bool {
        match self.memories.remove(id) {
            Some(previous) => {
                self.by_access.remove(&previous.cursor());
                true
            }
            None => false,
        }
    }

    fn after<'a>(&'a self, cursor: Option<&PageCursor>) -> impl Iterator<Item = &'a PageCursor> {
        let lower = match cursor {
            Some(c) => Bound::Excluded(c.clone()),
            None => Bound::Unbounded,
        };
        self.by_access.range((lower, Bound::Unbounded))
    }
}

/// Thread-safe in-memory [`MemoryStore`]
#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store pre-populated with `memories`
    pub fn with_memories(memories: impl IntoIterator<Item = Memory>) -> Self {
        let store = Self::new();
        {
            let mut inner = store.inner.write();
            for memory in memories {
                inner.upsert(memory);
            }
        }
        store
    }

    pub fn len(&self) -> usize {
        self.inner.read().memories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every memory, sorted by id (test helper)
    pub fn snapshot(&self) -> Vec<Memory> {
        let mut all: Vec<Memory> = self.inner.read().memories.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }
}

impl MemoryStore for InMemoryStore {
    fn read(&self, id: &str) -> Result<Option<Memory>> {
        Ok(self.inner.read().memories.get(id).cloned())
    }

    fn write(&self, memory: &Memory) -> Result<()> {
        self.inner.write().upsert(memory.clone());
        Ok(())
    }

    fn page_older_than(&self, cursor: Option<&PageCursor>, limit: usize) -> Result<Vec<Memory>> {
        let inner = self.inner.read();
        Ok(inner
            .after(cursor)
            .take(limit)
            .filter_map(|key| inner.memories.get(&key.id).cloned())
            .collect())
    }

    fn soft_deleted_before(&self, cutoff: DateTime<Utc>, limit: usize) -> Result<Vec<Memory>> {
        let inner = self.inner.read();
        let mut due: Vec<&Memory> = inner
            .memories
            .values()
            .filter(|m| {
                m.lifecycle_state == LifecycleState::SoftDeleted
                    && m.soft_deleted_at.is_some_and(|at| at <= cutoff)
            })
            .collect();
        due.sort_by(|a, b| {
            a.soft_deleted_at
                .cmp(&b.soft_deleted_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(due.into_iter().take(limit).cloned().collect())
    }

    fn purge(&self, id: &str) -> Result<bool> {
        Ok(self.inner.write().remove(id))
    }

    fn touch(&self, id: &str, now: DateTime<Utc>) -> Result<Option<Memory>> {
        let mut inner = self.inner.write();
        let Some(mut memory) = inner.memories.get(id).cloned() else {
            return Ok(None);
        };
        if now > memory.last_accessed_at {
            memory.last_accessed_at = now;
        }
        memory.access_count = memory.access_count.saturating_add(1);
        inner.upsert(memory.clone());
        Ok(Some(memory))
    }

    fn count_after(&self, cursor: Option<&PageCursor>) -> Result<u64> {
        Ok(self.inner.read().after(cursor).count() as u64)
    }

    fn population_stats(&self) -> Result<PopulationStats> {
        let inner = self.inner.read();
        let mut by_state = BTreeMap::new();
        let (mut decay, mut importance, mut stability) = (0.0, 0.0, 0.0);

        for m in inner.memories.values() {
            *by_state.entry(m.lifecycle_state).or_insert(0u64) += 1;
            decay += m.decay_score;
            importance += f64::from(m.importance);
            stability += f64::from(m.stability);
        }

        let total = inner.memories.len() as u64;
        let n = total.max(1) as f64;
        Ok(PopulationStats {
            total,
            by_state,
            avg_decay_score: decay / n,
            avg_importance: importance / n,
            avg_stability: stability / n,
        })
    }

    fn load_checkpoint(&self) -> Result<MaintenanceCheckpoint> {
        Ok(self.inner.read().checkpoint.clone())
    }

    fn save_checkpoint(&self, checkpoint: &MaintenanceCheckpoint) -> Result<()> {
        self.inner.write().checkpoint = checkpoint.clone();
        Ok(())
    }

    fn apply_batch(&self, updates: &[LifecycleUpdate]) -> Result<BatchWriteOutcome> {
        let mut inner = self.inner.write();
        let mut outcome = BatchWriteOutcome::default();

        for update in updates {
            let current = match inner.memories.get(&update.id) {
                Some(m) if m.last_accessed_at <= update.observed_last_accessed_at => m.clone(),
                _ => {
                    outcome.stale.push(update.id.clone());
                    continue;
                }
            };
            let mut memory = current;
            memory.lifecycle_state = update.lifecycle_state;
            memory.decay_score = update.decay_score;
            memory.soft_deleted_at = update.soft_deleted_at;
            inner.upsert(memory);
            outcome.applied += 1;
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn memory(id: &str, days_ago: i64, now: DateTime<Utc>) -> Memory {
        Memory::new(id, now - Duration::days(days_ago), 3, 3)
    }

    #[test]
    fn test_pages_oldest_first() {
        let now = Utc::now();
        let store = InMemoryStore::with_memories(vec![
            memory("c", 1, now),
            memory("a", 10, now),
            memory("b", 5, now),
        ]);

        let first = store.page_older_than(None, 2).unwrap();
        let ids: Vec<_> = first.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);

        let cursor = first.last().unwrap().cursor();
        let second = store.page_older_than(Some(&cursor), 2).unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].id, "c");
        assert_eq!(store.count_after(Some(&cursor)).unwrap(), 1);
    }

    #[test]
    fn test_rewrite_moves_index_entry() {
        let now = Utc::now();
        let store = InMemoryStore::with_memories(vec![memory("a", 10, now), memory("b", 5, now)]);

        let mut a = store.read("a").unwrap().unwrap();
        a.last_accessed_at = now;
        store.write(&a).unwrap();

        let page = store.page_older_than(None, 10).unwrap();
        let ids: Vec<_> = page.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(store.count_after(None).unwrap(), 2);
    }

    #[test]
    fn test_apply_batch_rejects_stale_updates() {
        let now = Utc::now();
        let original = memory("a", 10, now);
        let store = InMemoryStore::with_memories(vec![original.clone()]);

        // Reactivated after maintenance read it
        let mut touched = original.clone();
        touched.last_accessed_at = now;
        store.write(&touched).unwrap();

        let update = LifecycleUpdate {
            id: "a".to_string(),
            observed_last_accessed_at: original.last_accessed_at,
            lifecycle_state: LifecycleState::Dormant,
            decay_score: 0.4,
            soft_deleted_at: None,
        };
        let outcome = store.apply_batch(&[update]).unwrap();
        assert_eq!(outcome.applied, 0);
        assert_eq!(outcome.stale, vec!["a".to_string()]);
        assert_eq!(
            store.read("a").unwrap().unwrap().lifecycle_state,
            LifecycleState::Active
        );
    }

    #[test]
    fn test_soft_deleted_before_is_inclusive() {
        let now = Utc::now();
        let mut m = memory("a", 200, now);
        m.lifecycle_state = LifecycleState::SoftDeleted;
        m.soft_deleted_at = Some(now - Duration::days(90));
        let store = InMemoryStore::with_memories(vec![m]);

        assert_eq!(
            store
                .soft_deleted_before(now - Duration::days(90), 10)
                .unwrap()
                .len(),
            1
        );
        assert!(store
            .soft_deleted_before(now - Duration::days(91), 10)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_population_stats() {
        let now = Utc::now();
        let mut dormant = memory("b", 40, now);
        dormant.lifecycle_state = LifecycleState::Dormant;
        dormant.decay_score = 0.5;
        dormant.importance = 5;
        let store = InMemoryStore::with_memories(vec![memory("a", 1, now), dormant]);

        let stats = store.population_stats().unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.by_state.get(&LifecycleState::Dormant), Some(&1));
        assert!((stats.avg_decay_score - 0.25).abs() < 1e-9);
        assert!((stats.avg_importance - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_touch_never_moves_access_backwards() {
        let now = Utc::now();
        let store = InMemoryStore::with_memories(vec![memory("a", 0, now)]);

        let later = store.touch("a", now + Duration::hours(2)).unwrap().unwrap();
        assert_eq!(later.access_count, 1);

        let earlier = store.touch("a", now + Duration::hours(1)).unwrap().unwrap();
        assert_eq!(earlier.last_accessed_at, now + Duration::hours(2));
        assert_eq!(earlier.access_count, 2);

        let page = store.page_older_than(None, 10).unwrap();
        assert_eq!(page[0].last_accessed_at, now + Duration::hours(2));
        assert!(store.touch("missing", now).unwrap().is_none());
    }
}
