//! Engine configuration
//!
//! Loaded from TOML and validated once at startup. Invalid values are
//! rejected with a descriptive [`LifecycleError::Config`]; nothing is
//! renormalized or clamped on the caller's behalf.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{LifecycleError, Result};
use crate::types::{MAX_LABEL, MIN_LABEL};

/// Tolerance when checking that search weights sum to 1.0
pub const WEIGHT_EPSILON: f64 = 1e-6;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub decay: DecayConfig,
    pub lifecycle: LifecycleThresholds,
    pub retention: RetentionConfig,
    pub permanent: PermanentConfig,
    pub maintenance: MaintenanceConfig,
    pub search: SearchWeights,
    pub classification: ClassificationConfig,
}

/// Decay formula parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecayConfig {
    /// Master switch for the decay subsystem
    pub enabled: bool,
    /// Days for a stability-3 memory to reach a decay score of 0.5
    pub base_half_life_days: f64,
    /// Half-life multiplier indexed by stability 1..=5
    pub stability_multipliers: [f64; 5],
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_half_life_days: 30.0,
            stability_multipliers: [0.33, 0.67, 1.0, 1.5, 2.0],
        }
    }
}

impl DecayConfig {
    /// Multiplier for a stability label; labels outside 1-5 use the nearest bound
    pub fn stability_multiplier(&self, stability: u8) -> f64 {
        let idx = stability.clamp(MIN_LABEL, MAX_LABEL) as usize - 1;
        self.stability_multipliers[idx]
    }
}

/// Entry condition for one lifecycle tier
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierThreshold {
    /// Days since last access
    pub days: f64,
    /// Decay score
    pub decay_score: f64,
    /// Only memories at or below this importance enter the tier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_importance: Option<u8>,
}

impl TierThreshold {
    /// Either condition alone is sufficient
    pub fn is_met(&self, elapsed_days: f64, decay_score: f64, importance: u8) -> bool {
        let time_or_decay = elapsed_days >= self.days || decay_score >= self.decay_score;
        let importance_ok = self.max_importance.map_or(true, |max| importance <= max);
        time_or_decay && importance_ok
    }
}

/// Thresholds for the decaying tiers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleThresholds {
    pub dormant: TierThreshold,
    pub archived: TierThreshold,
    pub expired: TierThreshold,
}

impl Default for LifecycleThresholds {
    fn default() -> Self {
        Self {
            dormant: TierThreshold {
                days: 30.0,
                decay_score: 0.3,
                max_importance: None,
            },
            archived: TierThreshold {
                days: 90.0,
                decay_score: 0.6,
                max_importance: None,
            },
            expired: TierThreshold {
                days: 180.0,
                decay_score: 0.9,
                max_importance: Some(3),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Days a soft-deleted memory is kept before purge
    pub soft_delete_days: f64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            soft_delete_days: 90.0,
        }
    }
}

/// Classification levels that exempt a memory from decay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PermanentConfig {
    pub importance_threshold: u8,
    pub stability_threshold: u8,
}

impl Default for PermanentConfig {
    fn default() -> Self {
        Self {
            importance_threshold: 4,
            stability_threshold: 4,
        }
    }
}

/// Batch maintenance bounds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    /// Memories per page
    pub batch_size: usize,
    /// Wall-clock budget per run
    pub max_duration_minutes: u64,
    /// Hours between scheduled runs (0 = manual trigger only)
    pub schedule_interval_hours: u64,
    /// Threads evaluating a page in parallel
    pub workers: usize,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            batch_size: 500,
            max_duration_minutes: 10,
            schedule_interval_hours: 24,
            workers: 1,
        }
    }
}

impl MaintenanceConfig {
    pub fn scheduling_enabled(&self) -> bool {
        self.schedule_interval_hours > 0
    }

    pub fn max_duration(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.max_duration_minutes as i64)
    }
}

/// Weights of the composite search ranking score
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchWeights {
    pub semantic: f64,
    pub recency: f64,
    pub importance: f64,
}

impl Default for SearchWeights {
    fn default() -> Self {
        Self {
            semantic: 0.6,
            recency: 0.25,
            importance: 0.15,
        }
    }
}

impl SearchWeights {
    /// Reject weights that are negative, non-finite, or do not sum to 1.0
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("semantic", self.semantic),
            ("recency", self.recency),
            ("importance", self.importance),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(LifecycleError::Config(format!(
                    "search.{} weight must be a non-negative number, got {}",
                    name, value
                )));
            }
        }
        let sum = self.semantic + self.recency + self.importance;
        if (sum - 1.0).abs() > WEIGHT_EPSILON {
            return Err(LifecycleError::Config(format!(
                "search weights must sum to 1.0, got {:.6} (semantic={}, recency={}, importance={})",
                sum, self.semantic, self.recency, self.importance
            )));
        }
        Ok(())
    }
}

/// Fallback labels and call bounds for the classification gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationConfig {
    pub default_importance: u8,
    pub default_stability: u8,
    pub timeout_ms: u64,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            default_importance: 3,
            default_stability: 3,
            timeout_ms: 5000,
        }
    }
}

impl EngineConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse, and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&raw)
    }

    /// Platform config location (`~/.config/memory-lifecycle/config.toml` on Linux)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("memory-lifecycle").join("config.toml"))
    }

    /// Fail fast on any inconsistent value
    pub fn validate(&self) -> Result<()> {
        self.validate_decay()?;
        self.validate_tiers()?;
        self.validate_labels()?;

        let retention = self.retention.soft_delete_days;
        if !retention.is_finite() || retention < 0.0 {
            return Err(LifecycleError::Config(format!(
                "retention.soft_delete_days must be >= 0, got {}",
                retention
            )));
        }

        let m = &self.maintenance;
        if m.batch_size == 0 {
            return Err(LifecycleError::Config(
                "maintenance.batch_size must be > 0".to_string(),
            ));
        }
        if m.max_duration_minutes == 0 {
            return Err(LifecycleError::Config(
                "maintenance.max_duration_minutes must be > 0".to_string(),
            ));
        }
        if m.workers == 0 {
            return Err(LifecycleError::Config(
                "maintenance.workers must be > 0".to_string(),
            ));
        }

        self.search.validate()
    }

    fn validate_decay(&self) -> Result<()> {
        let half_life = self.decay.base_half_life_days;
        if !half_life.is_finite() || half_life <= 0.0 {
            return Err(LifecycleError::Config(format!(
                "decay.base_half_life_days must be > 0, got {}",
                half_life
            )));
        }
        for (i, m) in self.decay.stability_multipliers.iter().enumerate() {
            if !m.is_finite() || *m <= 0.0 {
                return Err(LifecycleError::Config(format!(
                    "decay.stability_multipliers[{}] (stability {}) must be a finite value > 0, got {}",
                    i,
                    i + 1,
                    m
                )));
            }
        }
        Ok(())
    }

    fn validate_tiers(&self) -> Result<()> {
        let tiers = [
            ("dormant", &self.lifecycle.dormant),
            ("archived", &self.lifecycle.archived),
            ("expired", &self.lifecycle.expired),
        ];

        for (name, tier) in tiers {
            if !tier.days.is_finite() || tier.days < 0.0 {
                return Err(LifecycleError::Config(format!(
                    "lifecycle.{}.days must be >= 0, got {}",
                    name, tier.days
                )));
            }
            if !(0.0..=1.0).contains(&tier.decay_score) {
                return Err(LifecycleError::Config(format!(
                    "lifecycle.{}.decay_score must be within [0, 1], got {}",
                    name, tier.decay_score
                )));
            }
            if let Some(max) = tier.max_importance {
                check_label(&format!("lifecycle.{}.max_importance", name), max)?;
            }
        }

        for pair in tiers.windows(2) {
            let (lower_name, lower) = pair[0];
            let (upper_name, upper) = pair[1];
            if lower.days > upper.days {
                return Err(LifecycleError::Config(format!(
                    "lifecycle.{}.days ({}) must not exceed lifecycle.{}.days ({})",
                    lower_name, lower.days, upper_name, upper.days
                )));
            }
            if lower.decay_score > upper.decay_score {
                return Err(LifecycleError::Config(format!(
                    "lifecycle.{}.decay_score ({}) must not exceed lifecycle.{}.decay_score ({})",
                    lower_name, lower.decay_score, upper_name, upper.decay_score
                )));
            }
        }
        Ok(())
    }

    fn validate_labels(&self) -> Result<()> {
        check_label(
            "permanent.importance_threshold",
            self.permanent.importance_threshold,
        )?;
        check_label(
            "permanent.stability_threshold",
            self.permanent.stability_threshold,
        )?;
        check_label(
            "classification.default_importance",
            self.classification.default_importance,
        )?;
        check_label(
            "classification.default_stability",
            self.classification.default_stability,
        )
    }
}

fn check_label(field: &str, value: u8) -> Result<()> {
    if (MIN_LABEL..=MAX_LABEL).contains(&value) {
        Ok(())
    } else {
        Err(LifecycleError::Config(format!(
            "{} must be within [{}, {}], got {}",
            field, MIN_LABEL, MAX_LABEL, value
        )))
    }
}
