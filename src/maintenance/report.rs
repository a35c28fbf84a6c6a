//! Maintenance run report

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{LifecycleState, RunStatus};

/// Outcome of one maintenance run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceReport {
    pub status: RunStatus,
    /// Memories whose decay score was recomputed
    pub recalculated: u64,
    /// Applied transitions keyed `FROM->TO`
    pub transitions_by_pair: BTreeMap<String, u64>,
    pub purged: u64,
    pub purge_failures: u64,
    /// Batches skipped after a failed retry
    pub failed_batches: u64,
    /// Updates dropped because the memory was accessed while the run evaluated it
    pub stale_skipped: u64,
    pub duration_ms: u64,
    /// Memories not yet visited when the run stopped
    pub remaining: u64,
    pub started_at: DateTime<Utc>,
}

impl MaintenanceReport {
    pub fn new(status: RunStatus, started_at: DateTime<Utc>) -> Self {
        Self {
            status,
            recalculated: 0,
            transitions_by_pair: BTreeMap::new(),
            purged: 0,
            purge_failures: 0,
            failed_batches: 0,
            stale_skipped: 0,
            duration_ms: 0,
            remaining: 0,
            started_at,
        }
    }

    pub fn skipped(started_at: DateTime<Utc>) -> Self {
        Self::new(RunStatus::Skipped, started_at)
    }

    pub fn pair_key(from: LifecycleState, to: LifecycleState) -> String {
        format!("{}->{}", from, to)
    }

    pub fn record_transition(&mut self, from: LifecycleState, to: LifecycleState) {
        *self
            .transitions_by_pair
            .entry(Self::pair_key(from, to))
            .or_insert(0) += 1;
    }

    /// Count for one `(from, to)` pair
    pub fn transitions(&self, from: LifecycleState, to: LifecycleState) -> u64 {
        self.transitions_by_pair
            .get(&Self::pair_key(from, to))
            .copied()
            .unwrap_or(0)
    }

    pub fn total_transitions(&self) -> u64 {
        self.transitions_by_pair.values().sum()
    }
}
