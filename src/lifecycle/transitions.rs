//! Lifecycle state machine
//!
//! Rules are evaluated in order and the first match wins:
//!
//! 1. permanent classification -> `PERMANENT` (dominates everything)
//! 2. `SOFT_DELETED` past its retention window -> purge
//! 3. expired tier met and importance low enough -> `EXPIRED` -> `SOFT_DELETED`
//! 4. archived tier met -> `ARCHIVED`
//! 5. dormant tier met -> `DORMANT`
//! 6. otherwise `ACTIVE`
//!
//! Each tier is entered when *either* its day count or its decay score is
//! reached. A `SOFT_DELETED` memory inside its retention window keeps its
//! original `soft_deleted_at`; nothing brings it back.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{LifecycleThresholds, PermanentConfig, RetentionConfig};
use crate::types::{LifecycleState, LifecycleUpdate, Memory};

/// Scores closer than this are treated as unchanged
pub const SCORE_EPSILON: f64 = 1e-12;

/// Where a memory ends up after evaluation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransitionOutcome {
    /// Memory stays in the store with this state
    Retain {
        state: LifecycleState,
        soft_deleted_at: Option<DateTime<Utc>>,
    },
    /// Retention elapsed; the memory must be deleted
    Purge,
}

/// Result of evaluating the lifecycle rules for one memory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub from: LifecycleState,
    pub outcome: TransitionOutcome,
    /// State changes taken, in order (empty when the state is unchanged)
    pub hops: Vec<(LifecycleState, LifecycleState)>,
}

impl Transition {
    fn retain(
        from: LifecycleState,
        state: LifecycleState,
        soft_deleted_at: Option<DateTime<Utc>>,
    ) -> Self {
        let hops = if from == state {
            Vec::new()
        } else {
            vec![(from, state)]
        };
        Self {
            from,
            outcome: TransitionOutcome::Retain {
                state,
                soft_deleted_at,
            },
            hops,
        }
    }

    fn expire(from: LifecycleState, now: DateTime<Utc>) -> Self {
        let mut hops = Vec::with_capacity(2);
        if from != LifecycleState::Expired {
            hops.push((from, LifecycleState::Expired));
        }
        hops.push((LifecycleState::Expired, LifecycleState::SoftDeleted));
        Self {
            from,
            outcome: TransitionOutcome::Retain {
                state: LifecycleState::SoftDeleted,
                soft_deleted_at: Some(now),
            },
            hops,
        }
    }

    pub fn is_purge(&self) -> bool {
        matches!(self.outcome, TransitionOutcome::Purge)
    }

    /// Final state, or `None` for a purge
    pub fn target_state(&self) -> Option<LifecycleState> {
        match self.outcome {
            TransitionOutcome::Retain { state, .. } => Some(state),
            TransitionOutcome::Purge => None,
        }
    }

    /// Whether the lifecycle state changed
    pub fn is_state_change(&self) -> bool {
        !self.hops.is_empty()
    }

    /// Update to persist, or `None` when nothing changed (or the memory is to be purged)
    pub fn update_for(&self, memory: &Memory, decay_score: f64) -> Option<LifecycleUpdate> {
        let TransitionOutcome::Retain {
            state,
            soft_deleted_at,
        } = self.outcome
        else {
            return None;
        };

        let unchanged = state == memory.lifecycle_state
            && soft_deleted_at == memory.soft_deleted_at
            && (decay_score - memory.decay_score).abs() <= SCORE_EPSILON;
        if unchanged {
            return None;
        }

        Some(LifecycleUpdate {
            id: memory.id.clone(),
            observed_last_accessed_at: memory.last_accessed_at,
            lifecycle_state: state,
            decay_score,
            soft_deleted_at,
        })
    }

    /// Apply the retained state to an in-memory copy
    pub fn apply(&self, memory: &mut Memory, decay_score: f64) {
        if let TransitionOutcome::Retain {
            state,
            soft_deleted_at,
        } = self.outcome
        {
            memory.lifecycle_state = state;
            memory.soft_deleted_at = soft_deleted_at;
            memory.decay_score = decay_score;
        }
    }
}

/// Pure transition function over configured thresholds
#[derive(Debug, Clone)]
pub struct LifecycleStateMachine {
    thresholds: LifecycleThresholds,
    retention: RetentionConfig,
    permanent: PermanentConfig,
}

impl LifecycleStateMachine {
    pub fn new(
        thresholds: LifecycleThresholds,
        retention: RetentionConfig,
        permanent: PermanentConfig,
    ) -> Self {
        Self {
            thresholds,
            retention,
            permanent,
        }
    }

    /// Soft deletions at or before this instant have served their retention
    pub fn retention_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let millis = (self.retention.soft_delete_days * 86_400_000.0).round() as i64;
        now - Duration::milliseconds(millis)
    }

    /// Whether a soft-deleted memory may be purged at `now`
    pub fn retention_elapsed(&self, memory: &Memory, now: DateTime<Utc>) -> bool {
        memory.lifecycle_state == LifecycleState::SoftDeleted
            && memory
                .soft_deleted_at
                .is_some_and(|at| at <= self.retention_cutoff(now))
    }

    /// Evaluate the lifecycle rules for one memory
    pub fn transition(
        &self,
        memory: &Memory,
        decay_score: f64,
        elapsed_days: f64,
        now: DateTime<Utc>,
    ) -> Transition {
        let from = memory.lifecycle_state;

        if memory.is_permanent(
            self.permanent.importance_threshold,
            self.permanent.stability_threshold,
        ) {
            return Transition::retain(from, LifecycleState::Permanent, None);
        }

        match from {
            LifecycleState::SoftDeleted => {
                if self.retention_elapsed(memory, now) {
                    return Transition {
                        from,
                        outcome: TransitionOutcome::Purge,
                        hops: Vec::new(),
                    };
                }
                // A missing timestamp would leave the memory unpurgeable; start its window now.
                let at = memory.soft_deleted_at.unwrap_or(now);
                return Transition::retain(from, LifecycleState::SoftDeleted, Some(at));
            }
            LifecycleState::Expired => return Transition::expire(from, now),
            _ => {}
        }

        let t = &self.thresholds;
        if t.expired.is_met(elapsed_days, decay_score, memory.importance) {
            return Transition::expire(from, now);
        }
        if t.archived.is_met(elapsed_days, decay_score, memory.importance) {
            return Transition::retain(from, LifecycleState::Archived, None);
        }
        if t.dormant.is_met(elapsed_days, decay_score, memory.importance) {
            return Transition::retain(from, LifecycleState::Dormant, None);
        }
        Transition::retain(from, LifecycleState::Active, None)
    }
}

impl Default for LifecycleStateMachine {
    fn default() -> Self {
        Self::new(
            LifecycleThresholds::default(),
            RetentionConfig::default(),
            PermanentConfig::default(),
        )
    }
}
