//! Search result ranking
//!
//! Semantic retrieval itself happens outside the engine; this module only
//! re-orders the candidates it returns.

mod ranker;

pub use ranker::{RankComponents, RankedMemory, SearchCandidate, WeightedSearchRanker};
