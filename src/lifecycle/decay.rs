//! Decay scoring
//!
//! Staleness grows with time since last access following a half-life curve:
//!
//! ```text
//! decay = 1 - 0.5^(elapsed_days / (base_half_life_days * stability_multiplier))
//! ```
//!
//! Permanent memories never decay.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::elapsed_days;
use crate::config::{DecayConfig, PermanentConfig};
use crate::types::Memory;

/// Decay score with the inputs that produced it
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecayBreakdown {
    /// Days since last access (never negative)
    pub elapsed_days: f64,
    /// Half-life multiplier for the memory's stability
    pub stability_multiplier: f64,
    /// Half-life actually applied, in days
    pub effective_half_life_days: f64,
    /// Final score (0.0 - 1.0)
    pub decay_score: f64,
    /// Exempt from decay
    pub permanent: bool,
}

/// Pure decay calculator; cheap to clone and safe to share across threads
#[derive(Debug, Clone)]
pub struct DecayScorer {
    decay: DecayConfig,
    permanent: PermanentConfig,
}

impl DecayScorer {
    pub fn new(decay: DecayConfig, permanent: PermanentConfig) -> Self {
        Self { decay, permanent }
    }

    /// Whether the memory's classification exempts it from decay
    pub fn is_permanent(&self, memory: &Memory) -> bool {
        memory.is_permanent(
            self.permanent.importance_threshold,
            self.permanent.stability_threshold,
        )
    }

    /// Decay score in [0, 1]
    pub fn score(&self, memory: &Memory, now: DateTime<Utc>) -> f64 {
        self.breakdown(memory, now).decay_score
    }

    /// Decay score with component breakdown
    pub fn breakdown(&self, memory: &Memory, now: DateTime<Utc>) -> DecayBreakdown {
        let elapsed = elapsed_days(memory.last_accessed_at, now);
        let multiplier = self.decay.stability_multiplier(memory.stability);
        let half_life = self.decay.base_half_life_days * multiplier;

        if self.is_permanent(memory) {
            return DecayBreakdown {
                elapsed_days: elapsed,
                stability_multiplier: multiplier,
                effective_half_life_days: half_life,
                decay_score: 0.0,
                permanent: true,
            };
        }

        DecayBreakdown {
            elapsed_days: elapsed,
            stability_multiplier: multiplier,
            effective_half_life_days: half_life,
            decay_score: decay_curve(elapsed, half_life),
            permanent: false,
        }
    }
}

impl Default for DecayScorer {
    fn default() -> Self {
        Self::new(DecayConfig::default(), PermanentConfig::default())
    }
}

/// `1 - 0.5^(elapsed / half_life)`, clamped to [0, 1]
pub fn decay_curve(elapsed_days: f64, half_life_days: f64) -> f64 {
    if half_life_days <= 0.0 || !half_life_days.is_finite() {
        return 0.0;
    }
    let score = 1.0 - 0.5_f64.powf(elapsed_days.max(0.0) / half_life_days);
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}
