//! Weighted search ranking
//!
//! Re-orders candidates from an external semantic search by blending
//! similarity with recency (`1 - decay_score`) and importance. The ranker is
//! pure: it reads a snapshot supplied by the caller and never touches storage.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::config::SearchWeights;
use crate::error::Result;
use crate::types::{Memory, MAX_LABEL};

/// A memory returned by semantic search, with its similarity score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchCandidate {
    pub memory: Memory,
    pub semantic_similarity: f64,
}

impl SearchCandidate {
    pub fn new(memory: Memory, semantic_similarity: f64) -> Self {
        Self {
            memory,
            semantic_similarity,
        }
    }
}

/// Individual components of the composite score (each in [0, 1])
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RankComponents {
    pub semantic: f64,
    pub recency: f64,
    pub importance: f64,
}

/// A ranked candidate with explainability info
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedMemory {
    pub memory: Memory,
    pub composite: f64,
    pub components: RankComponents,
    /// 1-based position in the final order
    pub rank: usize,
}

/// Blends semantic similarity, recency and importance with validated weights
#[derive(Debug, Clone)]
pub struct WeightedSearchRanker {
    weights: SearchWeights,
}

impl WeightedSearchRanker {
    /// Fails if the weights do not sum to 1.0; they are never renormalized
    pub fn new(weights: SearchWeights) -> Result<Self> {
        weights.validate()?;
        Ok(Self { weights })
    }

    pub fn weights(&self) -> SearchWeights {
        self.weights
    }

    /// Score components for one candidate
    pub fn components(&self, memory: &Memory, semantic_similarity: f64) -> RankComponents {
        let semantic = if semantic_similarity.is_nan() {
            0.0
        } else {
            semantic_similarity.clamp(0.0, 1.0)
        };
        RankComponents {
            semantic,
            recency: (1.0 - memory.decay_score).clamp(0.0, 1.0),
            importance: f64::from(memory.importance) / f64::from(MAX_LABEL),
        }
    }

    pub fn composite(&self, components: &RankComponents) -> f64 {
        components.semantic * self.weights.semantic
            + components.recency * self.weights.recency
            + components.importance * self.weights.importance
    }

    /// Order candidates by composite score, descending
    ///
    /// Ties go to the more recently accessed memory, then to the smaller id.
    pub fn rank(&self, candidates: Vec<SearchCandidate>) -> Vec<RankedMemory> {
        let mut ranked: Vec<RankedMemory> = candidates
            .into_iter()
            .map(|candidate| {
                let components = self.components(&candidate.memory, candidate.semantic_similarity);
                RankedMemory {
                    composite: self.composite(&components),
                    components,
                    memory: candidate.memory,
                    rank: 0,
                }
            })
            .collect();

        ranked.sort_by(compare_ranked);

        for (i, result) in ranked.iter_mut().enumerate() {
            result.rank = i + 1;
        }
        ranked
    }
}

impl Default for WeightedSearchRanker {
    fn default() -> Self {
        Self {
            weights: SearchWeights::default(),
        }
    }
}

fn compare_ranked(a: &RankedMemory, b: &RankedMemory) -> Ordering {
    b.composite
        .total_cmp(&a.composite)
        .then_with(|| b.memory.last_accessed_at.cmp(&a.memory.last_accessed_at))
        .then_with(|| a.memory.id.cmp(&b.memory.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn memory(id: &str, importance: u8, decay: f64) -> Memory {
        let mut m = Memory::new(id, Utc::now(), importance, 3);
        m.decay_score = decay;
        m
    }

    #[test]
    fn test_rejects_weights_not_summing_to_one() {
        let weights = SearchWeights {
            semantic: 0.5,
            recency: 0.25,
            importance: 0.15,
        };
        assert!(WeightedSearchRanker::new(weights).is_err());
    }

    #[test]
    fn test_blended_order() {
        let ranker = WeightedSearchRanker::new(SearchWeights::default()).unwrap();
        let results = ranker.rank(vec![
            SearchCandidate::new(memory("b", 5, 0.0), 0.5),
            SearchCandidate::new(memory("a", 3, 0.1), 0.9),
        ]);

        assert_eq!(results[0].memory.id, "a");
        assert!((results[0].composite - 0.855).abs() < 1e-9);
        assert!((results[1].composite - 0.70).abs() < 1e-9);
        assert_eq!(results[1].rank, 2);
    }

    #[test]
    fn test_ties_prefer_recent_then_id() {
        let ranker = WeightedSearchRanker::default();
        let now = Utc::now();
        let mut older = memory("a", 3, 0.2);
        older.last_accessed_at = now - Duration::days(1);
        let mut newer_b = memory("b", 3, 0.2);
        newer_b.last_accessed_at = now;
        let mut newer_c = memory("c", 3, 0.2);
        newer_c.last_accessed_at = now;

        let results = ranker.rank(vec![
            SearchCandidate::new(newer_c, 0.4),
            SearchCandidate::new(older, 0.4),
            SearchCandidate::new(newer_b, 0.4),
        ]);
        let ids: Vec<_> = results.iter().map(|r| r.memory.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
    }

    #[test]
    fn test_similarity_is_clamped() {
        let ranker = WeightedSearchRanker::default();
        let m = memory("a", 3, 0.0);
        assert_eq!(ranker.components(&m, -0.2).semantic, 0.0);
        assert_eq!(ranker.components(&m, 1.3).semantic, 1.0);
        assert_eq!(ranker.components(&m, f64::NAN).semantic, 0.0);
    }

    #[test]
    fn test_rank_does_not_mutate_memories() {
        let ranker = WeightedSearchRanker::default();
        let m = memory("a", 4, 0.3);
        let results = ranker.rank(vec![SearchCandidate::new(m.clone(), 0.7)]);
        assert_eq!(results[0].memory, m);
    }
}
