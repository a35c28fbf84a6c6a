//! Memory Lifecycle - decay scoring and retention for knowledge stores
//!
//! Scores memories for staleness, moves them through retention tiers
//! (ACTIVE, DORMANT, ARCHIVED, EXPIRED, SOFT_DELETED, PERMANENT), purges
//! them once retention elapses, and blends freshness into search ranking.

pub mod classification;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod health;
pub mod lifecycle;
pub mod maintenance;
pub mod metrics;
pub mod search;
pub mod storage;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use engine::{CaptureResult, LifecycleEngine};
pub use error::{LifecycleError, Result};
pub use storage::{InMemoryStore, MemoryStore, SqliteStore};
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
