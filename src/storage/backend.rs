//! Storage collaborator trait
//!
//! The lifecycle engine never owns the memory population. It reads pages,
//! writes lifecycle fields back and purges expired soft deletions through
//! this trait, so the graph database behind it can be swapped freely.
//!
//! # Design Principles
//!
//! 1. **Sync Interface**: all methods are synchronous; async callers wrap
//!    them in `tokio::task::spawn_blocking`.
//!
//! 2. **Bounded reads**: every method that returns memories takes a limit,
//!    so maintenance never materializes the whole population.
//!
//! 3. **Last write wins on access**: [`MemoryStore::touch`] only moves
//!    `last_accessed_at` forward, and [`MemoryStore::apply_batch`] rejects an
//!    update whose observed `last_accessed_at` is older than the stored one,
//!    so neither maintenance nor a slower access can revert a newer access.

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::{
    BatchWriteOutcome, LifecycleUpdate, MaintenanceCheckpoint, Memory, PageCursor, PopulationStats,
};

pub trait MemoryStore: Send + Sync {
    /// Get a memory by ID
    fn read(&self, id: &str) -> Result<Option<Memory>>;

    /// Insert or replace a memory
    fn write(&self, memory: &Memory) -> Result<()>;

    /// Next page in `(last_accessed_at, id)` ascending order, strictly after `cursor`
    fn page_older_than(&self, cursor: Option<&PageCursor>, limit: usize) -> Result<Vec<Memory>>;

    /// Soft-deleted memories with `soft_deleted_at <= cutoff`, oldest deletion first
    fn soft_deleted_before(&self, cutoff: DateTime<Utc>, limit: usize) -> Result<Vec<Memory>>;

    /// Delete a memory permanently; returns false if it did not exist
    fn purge(&self, id: &str) -> Result<bool>;

    /// Record an access: `last_accessed_at = max(stored, now)` and `access_count += 1`
    ///
    /// Returns the memory after the update, or `None` if it does not exist.
    /// The default implementation is a read followed by a write; backends
    /// should override it so concurrent accesses cannot overwrite each other.
    fn touch(&self, id: &str, now: DateTime<Utc>) -> Result<Option<Memory>> {
        let Some(mut memory) = self.read(id)? else {
            return Ok(None);
        };
        if now > memory.last_accessed_at {
            memory.last_accessed_at = now;
        }
        memory.access_count = memory.access_count.saturating_add(1);
        self.write(&memory)?;
        Ok(Some(memory))
    }

    /// Number of memories strictly after `cursor` (all memories when `None`)
    fn count_after(&self, cursor: Option<&PageCursor>) -> Result<u64>;

    /// Aggregate counts and averages
    fn population_stats(&self) -> Result<PopulationStats>;

    /// Load the maintenance resume point
    fn load_checkpoint(&self) -> Result<MaintenanceCheckpoint>;

    /// Store the maintenance resume point
    fn save_checkpoint(&self, checkpoint: &MaintenanceCheckpoint) -> Result<()>;

    /// Persist lifecycle fields for a batch of memories
    ///
    /// Default implementation reads and writes one by one; backends with
    /// transactions should override it to make the batch atomic.
    fn apply_batch(&self, updates: &[LifecycleUpdate]) -> Result<BatchWriteOutcome> {
        let mut outcome = BatchWriteOutcome::default();

        for update in updates {
            match self.read(&update.id)? {
                Some(mut memory) if memory.last_accessed_at <= update.observed_last_accessed_at => {
                    memory.lifecycle_state = update.lifecycle_state;
                    memory.decay_score = update.decay_score;
                    memory.soft_deleted_at = update.soft_deleted_at;
                    self.write(&memory)?;
                    outcome.applied += 1;
                }
                _ => outcome.stale.push(update.id.clone()),
            }
        }

        Ok(outcome)
    }
}
