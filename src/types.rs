//! Core types for the memory lifecycle engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Opaque identifier for a memory (assigned by the storage layer)
pub type MemoryId = String;

/// Lowest importance/stability label a classifier may assign
pub const MIN_LABEL: u8 = 1;

/// Highest importance/stability label a classifier may assign
pub const MAX_LABEL: u8 = 5;

/// A knowledge unit under lifecycle management
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    /// Unique identifier
    pub id: MemoryId,
    /// When the memory was created
    pub created_at: DateTime<Utc>,
    /// When the memory was last read or returned by a search
    pub last_accessed_at: DateTime<Utc>,
    /// Number of times accessed
    #[serde(default)]
    pub access_count: u64,
    /// Importance label (1-5)
    pub importance: u8,
    /// Stability label (1-5)
    pub stability: u8,
    /// Retention tier
    #[serde(default)]
    pub lifecycle_state: LifecycleState,
    /// Staleness (0.0 = fresh, 1.0 = fully decayed)
    #[serde(default)]
    pub decay_score: f64,
    /// Set exactly while the memory is soft-deleted
    pub soft_deleted_at: Option<DateTime<Utc>>,
}

impl Memory {
    /// Create a freshly captured memory that has not been accessed since creation
    pub fn new(id: impl Into<MemoryId>, now: DateTime<Utc>, importance: u8, stability: u8) -> Self {
        Self {
            id: id.into(),
            created_at: now,
            last_accessed_at: now,
            access_count: 0,
            importance,
            stability,
            lifecycle_state: LifecycleState::Active,
            decay_score: 0.0,
            soft_deleted_at: None,
        }
    }

    /// Whether the classification exempts this memory from decay
    pub fn is_permanent(&self, importance_threshold: u8, stability_threshold: u8) -> bool {
        self.importance >= importance_threshold && self.stability >= stability_threshold
    }

    /// Keyset position of this memory in oldest-first order
    pub fn cursor(&self) -> PageCursor {
        PageCursor {
            last_accessed_at: self.last_accessed_at,
            id: self.id.clone(),
        }
    }
}

/// Retention tier of a memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    /// Recently used, fully visible
    #[default]
    Active,
    /// Not accessed for a while
    Dormant,
    /// Long unused, kept for reference
    Archived,
    /// Transient marker on the way to soft deletion
    Expired,
    /// Awaiting purge once the retention window elapses
    SoftDeleted,
    /// Exempt from decay
    Permanent,
}

impl LifecycleState {
    /// All states, in tier order
    pub const ALL: [LifecycleState; 6] = [
        LifecycleState::Active,
        LifecycleState::Dormant,
        LifecycleState::Archived,
        LifecycleState::Expired,
        LifecycleState::SoftDeleted,
        LifecycleState::Permanent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Active => "ACTIVE",
            LifecycleState::Dormant => "DORMANT",
            LifecycleState::Archived => "ARCHIVED",
            LifecycleState::Expired => "EXPIRED",
            LifecycleState::SoftDeleted => "SOFT_DELETED",
            LifecycleState::Permanent => "PERMANENT",
        }
    }

    /// States an access event brings back to `Active`
    pub fn is_reactivatable(&self) -> bool {
        matches!(self, LifecycleState::Dormant | LifecycleState::Archived)
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LifecycleState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().replace('-', "_").as_str() {
            "ACTIVE" => Ok(LifecycleState::Active),
            "DORMANT" => Ok(LifecycleState::Dormant),
            "ARCHIVED" => Ok(LifecycleState::Archived),
            "EXPIRED" => Ok(LifecycleState::Expired),
            "SOFT_DELETED" => Ok(LifecycleState::SoftDeleted),
            "PERMANENT" => Ok(LifecycleState::Permanent),
            _ => Err(format!("Unknown lifecycle state: {}", s)),
        }
    }
}

/// Importance/stability labels produced by classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub importance: u8,
    pub stability: u8,
}

impl Classification {
    /// Build a classification, rejecting labels outside 1-5
    pub fn new(importance: u8, stability: u8) -> Result<Self, String> {
        for (name, value) in [("importance", importance), ("stability", stability)] {
            if !(MIN_LABEL..=MAX_LABEL).contains(&value) {
                return Err(format!(
                    "{} {} outside [{}, {}]",
                    name, value, MIN_LABEL, MAX_LABEL
                ));
            }
        }
        Ok(Self {
            importance,
            stability,
        })
    }
}

/// Keyset pagination position: `(last_accessed_at, id)` of the last memory seen
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PageCursor {
    pub last_accessed_at: DateTime<Utc>,
    pub id: MemoryId,
}

impl PageCursor {
    /// True if `memory` sorts strictly after this cursor
    pub fn precedes(&self, memory: &Memory) -> bool {
        (memory.last_accessed_at, memory.id.as_str()) > (self.last_accessed_at, self.id.as_str())
    }
}

/// Lifecycle fields written back by a maintenance pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleUpdate {
    pub id: MemoryId,
    /// `last_accessed_at` the evaluation was based on; a newer stored value wins
    pub observed_last_accessed_at: DateTime<Utc>,
    pub lifecycle_state: LifecycleState,
    pub decay_score: f64,
    pub soft_deleted_at: Option<DateTime<Utc>>,
}

/// Result of applying a batch of lifecycle updates
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchWriteOutcome {
    /// Updates persisted
    pub applied: usize,
    /// Updates rejected because the memory was accessed after evaluation (or vanished)
    pub stale: Vec<MemoryId>,
}

/// Final status of a maintenance run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Full pass completed without failures
    Success,
    /// Stopped at a batch boundary (time budget or operator stop); work remains
    Partial,
    /// At least one batch or purge failed after retry
    Degraded,
    /// Another run held the lease, or decay is disabled
    Skipped,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Partial => "partial",
            RunStatus::Degraded => "degraded",
            RunStatus::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "success" => Ok(RunStatus::Success),
            "partial" => Ok(RunStatus::Partial),
            "degraded" => Ok(RunStatus::Degraded),
            "skipped" => Ok(RunStatus::Skipped),
            _ => Err(format!("Unknown run status: {}", s)),
        }
    }
}

/// Persisted maintenance progress: where the next run resumes and how the last one ended
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceCheckpoint {
    /// Resume position; `None` starts from the oldest memory
    pub cursor: Option<PageCursor>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_status: Option<RunStatus>,
}

/// Aggregate view of the population, used for gauges
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PopulationStats {
    pub total: u64,
    pub by_state: BTreeMap<LifecycleState, u64>,
    pub avg_decay_score: f64,
    pub avg_importance: f64,
    pub avg_stability: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_lifecycle_state_roundtrip_names() {
        for state in LifecycleState::ALL {
            assert_eq!(state.as_str().parse::<LifecycleState>(), Ok(state));
        }
        assert_eq!(
            "soft-deleted".parse::<LifecycleState>(),
            Ok(LifecycleState::SoftDeleted)
        );
        assert!("purged".parse::<LifecycleState>().is_err());
    }

    #[test]
    fn test_state_serializes_screaming_case() {
        let json = serde_json::to_string(&LifecycleState::SoftDeleted).unwrap();
        assert_eq!(json, "\"SOFT_DELETED\"");
    }

    #[test]
    fn test_classification_bounds() {
        assert!(Classification::new(1, 5).is_ok());
        assert!(Classification::new(0, 3).is_err());
        assert!(Classification::new(3, 6).is_err());
    }

    #[test]
    fn test_cursor_ordering() {
        let now = Utc::now();
        let a = Memory::new("a", now, 3, 3);
        let b = Memory::new("b", now, 3, 3);
        let later = Memory::new("0", now + Duration::seconds(1), 3, 3);

        let cursor = a.cursor();
        assert!(!cursor.precedes(&a));
        assert!(cursor.precedes(&b));
        assert!(cursor.precedes(&later));
        assert!(!b.cursor().precedes(&a));
    }

    #[test]
    fn test_is_permanent() {
        let now = Utc::now();
        assert!(Memory::new("x", now, 5, 5).is_permanent(4, 4));
        assert!(!Memory::new("x", now, 3, 5).is_permanent(4, 4));
    }
}
