//! Decay scoring and retention lifecycle
//!
//! Provides:
//! - Staleness scoring from access history and stability
//! - The ordered lifecycle rule set (ACTIVE -> DORMANT -> ARCHIVED -> EXPIRED -> SOFT_DELETED -> purge)
//! - Reactivation on access

mod decay;
mod reactivation;
mod transitions;

pub use decay::{decay_curve, DecayBreakdown, DecayScorer};
pub use reactivation::{AccessOutcome, Reactivator};
pub use transitions::{LifecycleStateMachine, Transition, TransitionOutcome, SCORE_EPSILON};
