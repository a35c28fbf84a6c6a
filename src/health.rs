//! Health surface

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::RunStatus;

/// Decay subsystem status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub decay_enabled: bool,
    pub last_maintenance_run: Option<DateTime<Utc>>,
    pub last_status: Option<RunStatus>,
    pub maintenance_running: bool,
    /// 0 when only manual triggers run maintenance
    pub schedule_interval_hours: u64,
    pub total_memories: u64,
}

impl HealthReport {
    /// False when the last run degraded
    pub fn healthy(&self) -> bool {
        self.last_status != Some(RunStatus::Degraded)
    }
}
