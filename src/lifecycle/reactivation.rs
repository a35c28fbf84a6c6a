//! Access path: touching a memory refreshes it and may reactivate it
//!
//! Any read or search hit sets `last_accessed_at` and bumps `access_count`.
//! A `DORMANT` or `ARCHIVED` memory is re-evaluated on the spot and comes
//! back as `ACTIVE`. `EXPIRED`, `SOFT_DELETED` and `PERMANENT` memories keep
//! their state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::decay::DecayScorer;
use super::transitions::LifecycleStateMachine;
use crate::types::{LifecycleState, Memory};

/// Result of recording an access
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessOutcome {
    /// Memory after the access was applied
    pub memory: Memory,
    /// State before the access
    pub previous_state: LifecycleState,
    /// True when the access moved the memory from DORMANT/ARCHIVED to ACTIVE
    pub reactivated: bool,
}

/// Applies access events using the same scorer and rules as maintenance
#[derive(Debug, Clone)]
pub struct Reactivator {
    scorer: DecayScorer,
    machine: LifecycleStateMachine,
}

impl Reactivator {
    pub fn new(scorer: DecayScorer, machine: LifecycleStateMachine) -> Self {
        Self { scorer, machine }
    }

    /// Record a read/search hit at `now` on an in-memory copy
    pub fn record_access(&self, memory: &Memory, now: DateTime<Utc>) -> AccessOutcome {
        let mut touched = memory.clone();

        // Last write wins on the access timestamp; never move it backwards.
        if now > touched.last_accessed_at {
            touched.last_accessed_at = now;
        }
        touched.access_count = touched.access_count.saturating_add(1);

        self.reevaluate(touched, now)
    }

    /// Re-run the lifecycle rules on a memory whose access was already recorded
    ///
    /// Used after [`MemoryStore::touch`](crate::storage::MemoryStore::touch),
    /// which applies the timestamp and counter atomically in storage.
    pub fn reevaluate(&self, touched: Memory, now: DateTime<Utc>) -> AccessOutcome {
        let previous_state = touched.lifecycle_state;
        let mut updated = touched;

        let reevaluate = matches!(
            previous_state,
            LifecycleState::Active
                | LifecycleState::Dormant
                | LifecycleState::Archived
                | LifecycleState::Permanent
        );

        if reevaluate {
            let breakdown = self.scorer.breakdown(&updated, now);
            let transition = self.machine.transition(
                &updated,
                breakdown.decay_score,
                breakdown.elapsed_days,
                now,
            );
            transition.apply(&mut updated, breakdown.decay_score);
        }

        let reactivated =
            previous_state.is_reactivatable() && updated.lifecycle_state == LifecycleState::Active;

        AccessOutcome {
            memory: updated,
            previous_state,
            reactivated,
        }
    }
}

impl Default for Reactivator {
    fn default() -> Self {
        Self::new(DecayScorer::default(), LifecycleStateMachine::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn stale(state: LifecycleState, days: i64, now: DateTime<Utc>) -> Memory {
        let mut m = Memory::new("m-1", now - Duration::days(days), 2, 3);
        m.lifecycle_state = state;
        m.decay_score = 0.7;
        if state == LifecycleState::SoftDeleted {
            m.soft_deleted_at = Some(now - Duration::days(1));
        }
        m
    }

    #[test]
    fn test_dormant_and_archived_reactivate() {
        let r = Reactivator::default();
        let now = Utc::now();
        for state in [LifecycleState::Dormant, LifecycleState::Archived] {
            let outcome = r.record_access(&stale(state, 100, now), now);
            assert!(outcome.reactivated);
            assert_eq!(outcome.previous_state, state);
            assert_eq!(outcome.memory.lifecycle_state, LifecycleState::Active);
            assert_eq!(outcome.memory.decay_score, 0.0);
            assert_eq!(outcome.memory.last_accessed_at, now);
            assert_eq!(outcome.memory.access_count, 1);
        }
    }

    #[test]
    fn test_soft_deleted_is_not_resurrected() {
        let r = Reactivator::default();
        let now = Utc::now();
        let m = stale(LifecycleState::SoftDeleted, 300, now);
        let outcome = r.record_access(&m, now);
        assert!(!outcome.reactivated);
        assert_eq!(outcome.memory.lifecycle_state, LifecycleState::SoftDeleted);
        assert_eq!(outcome.memory.soft_deleted_at, m.soft_deleted_at);
        assert_eq!(outcome.memory.access_count, 1);
    }

    #[test]
    fn test_active_access_is_not_a_reactivation() {
        let r = Reactivator::default();
        let now = Utc::now();
        let outcome = r.record_access(&stale(LifecycleState::Active, 5, now), now);
        assert!(!outcome.reactivated);
        assert_eq!(outcome.memory.lifecycle_state, LifecycleState::Active);
    }

    #[test]
    fn test_access_timestamp_never_moves_backwards() {
        let r = Reactivator::default();
        let now = Utc::now();
        let mut m = stale(LifecycleState::Active, 0, now);
        m.last_accessed_at = now + Duration::hours(1);
        let outcome = r.record_access(&m, now);
        assert_eq!(outcome.memory.last_accessed_at, now + Duration::hours(1));
    }

    #[test]
    fn test_reevaluate_keeps_recorded_access() {
        let r = Reactivator::default();
        let now = Utc::now();
        let mut touched = stale(LifecycleState::Dormant, 0, now);
        touched.access_count = 4;

        let outcome = r.reevaluate(touched, now);
        assert!(outcome.reactivated);
        assert_eq!(outcome.memory.access_count, 4);
        assert_eq!(outcome.memory.last_accessed_at, now);
    }
}
