//! Multi-source result fusion. Grounded directly on the teacher's
//! `search::hybrid::rrf_fusion` (`RRF_K = 60.0`, group-by-id-sum-contributions
//! shape) and `search::workflow_executor::merge_results_rrf`, generalized
//! from two hardcoded sources to an arbitrary named multiset of sources.

use std::collections::HashMap;

use crate::planner::FusionMethod;
use crate::store::{Candidate, CandidateSource};

/// Reciprocal Rank Fusion constant, identical to the teacher's.
pub const RRF_K: f32 = 60.0;

/// One source's ranked candidate list, identified by a stable name used
/// only for provenance merging (not semantically meaningful to fusion).
/// `weight` is the plan's per-source weight (`SPEC_FULL.md §4.5`); RRF
/// ignores it, `WeightedSum` multiplies each scaled score by it.
pub struct SourceResults {
    pub name: String,
    pub weight: f32,
    pub candidates: Vec<Candidate>,
}

pub fn fuse(sources: Vec<SourceResults>, method: FusionMethod, max_results: usize) -> Vec<Candidate> {
    match method {
        FusionMethod::None => {
            let mut all: Vec<Candidate> = sources.into_iter().flat_map(|s| s.candidates).collect();
            all.sort_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.id.cmp(&b.id))
            });
            all.truncate(max_results);
            all
        }
        FusionMethod::Rrf => rrf_fusion(sources, max_results),
        FusionMethod::WeightedSum => weighted_sum_fusion(sources, max_results),
    }
}

fn rrf_fusion(sources: Vec<SourceResults>, max_results: usize) -> Vec<Candidate> {
    let mut fused: HashMap<String, (f32, Candidate)> = HashMap::new();

    for source in sources {
        for (rank, candidate) in source.candidates.into_iter().enumerate() {
            let contribution = 1.0 / (RRF_K + rank as f32 + 1.0);
            fused
                .entry(candidate.id.clone())
                .and_modify(|(score, existing)| {
                    *score += contribution;
                    existing
                        .provenance
                        .filters_applied
                        .extend(candidate.provenance.filters_applied.clone());
                })
                .or_insert_with(|| (contribution, candidate));
        }
    }

    let mut results: Vec<Candidate> = fused
        .into_values()
        .map(|(score, mut candidate)| {
            candidate.score = score;
            candidate.source = CandidateSource::Fusion;
            candidate
        })
        .collect();

    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    results.truncate(max_results);
    results
}

fn weighted_sum_fusion(sources: Vec<SourceResults>, max_results: usize) -> Vec<Candidate> {
    let mut fused: HashMap<String, (f32, Candidate)> = HashMap::new();

    for source in sources {
        let weight = source.weight;
        let scaled = min_max_scale(&source.candidates);
        for (candidate, scaled_score) in source.candidates.into_iter().zip(scaled) {
            let weighted_score = scaled_score * weight;
            fused
                .entry(candidate.id.clone())
                .and_modify(|(score, _)| *score += weighted_score)
                .or_insert_with(|| (weighted_score, candidate));
        }
    }

    let mut results: Vec<Candidate> = fused
        .into_values()
        .map(|(score, mut candidate)| {
            candidate.score = score;
            candidate.source = CandidateSource::Fusion;
            candidate
        })
        .collect();

    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    results.truncate(max_results);
    results
}

/// Per-source min-max scaling of raw scores to `[0, 1]`. The source's own
/// weight (`SPEC_FULL.md §4.5`) is applied separately by the caller.
fn min_max_scale(candidates: &[Candidate]) -> Vec<f32> {
    if candidates.is_empty() {
        return vec![];
    }
    let min = candidates.iter().map(|c| c.score).fold(f32::INFINITY, f32::min);
    let max = candidates.iter().map(|c| c.score).fold(f32::NEG_INFINITY, f32::max);
    if (max - min).abs() < f32::EPSILON {
        return vec![1.0; candidates.len()];
    }
    candidates.iter().map(|c| (c.score - min) / (max - min)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{CandidateMetadata, Provenance};

    fn candidate(id: &str, score: f32) -> Candidate {
        Candidate {
            id: id.to_string(),
            source: CandidateSource::Vector,
            score,
            metadata: CandidateMetadata::default(),
            embedding: None,
            provenance: Provenance {
                collection: "tools_semantic".to_string(),
                query_vector_source: None,
                filters_applied: vec![],
                rank_in_source: 0,
            },
        }
    }

    #[test]
    fn rrf_is_deterministic_regardless_of_source_order() {
        let a = vec![
            SourceResults {
                name: "vector".to_string(),
                weight: 1.0,
                candidates: vec![candidate("x", 0.9), candidate("y", 0.8)],
            },
            SourceResults {
                name: "structured".to_string(),
                weight: 1.0,
                candidates: vec![candidate("y", 0.5), candidate("x", 0.5)],
            },
        ];
        let b = vec![
            SourceResults {
                name: "structured".to_string(),
                weight: 1.0,
                candidates: vec![candidate("y", 0.5), candidate("x", 0.5)],
            },
            SourceResults {
                name: "vector".to_string(),
                weight: 1.0,
                candidates: vec![candidate("x", 0.9), candidate("y", 0.8)],
            },
        ];
        let fused_a = fuse(a, FusionMethod::Rrf, 100);
        let fused_b = fuse(b, FusionMethod::Rrf, 100);
        let ids_a: Vec<&str> = fused_a.iter().map(|c| c.id.as_str()).collect();
        let ids_b: Vec<&str> = fused_b.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids_a, ids_b);
    }

    #[test]
    fn rrf_monotonicity_dominant_candidate_scores_at_least_as_high() {
        // "x" ranks first in both sources where it appears; "y" ranks second.
        let sources = vec![
            SourceResults {
                name: "vector".to_string(),
                weight: 1.0,
                candidates: vec![candidate("x", 0.9), candidate("y", 0.1)],
            },
            SourceResults {
                name: "structured".to_string(),
                weight: 1.0,
                candidates: vec![candidate("x", 0.5), candidate("y", 0.4)],
            },
        ];
        let fused = fuse(sources, FusionMethod::Rrf, 100);
        let score_x = fused.iter().find(|c| c.id == "x").unwrap().score;
        let score_y = fused.iter().find(|c| c.id == "y").unwrap().score;
        assert!(score_x >= score_y);
    }

    #[test]
    fn tie_break_is_lexicographic_by_id() {
        let sources = vec![SourceResults {
            name: "vector".to_string(),
            weight: 1.0,
            candidates: vec![candidate("b", 0.5), candidate("a", 0.5)],
        }];
        let fused = fuse(sources, FusionMethod::None, 100);
        assert_eq!(fused[0].id, "a");
    }

    #[test]
    fn truncates_to_max_results() {
        let candidates: Vec<Candidate> = (0..10).map(|i| candidate(&i.to_string(), i as f32)).collect();
        let sources = vec![SourceResults {
            name: "vector".to_string(),
            weight: 1.0,
            candidates,
        }];
        let fused = fuse(sources, FusionMethod::None, 3);
        assert_eq!(fused.len(), 3);
    }

    #[test]
    fn weighted_sum_applies_per_source_weight() {
        // "a" appears only in the heavily-weighted source, "b" only in the
        // unweighted one; "a" must outrank "b" despite an identical raw score.
        let sources = vec![
            SourceResults {
                name: "primary".to_string(),
                weight: 1.0,
                candidates: vec![candidate("a", 0.9)],
            },
            SourceResults {
                name: "secondary".to_string(),
                weight: 0.1,
                candidates: vec![candidate("b", 0.9)],
            },
        ];
        let fused = fuse(sources, FusionMethod::WeightedSum, 100);
        let score_a = fused.iter().find(|c| c.id == "a").unwrap().score;
        let score_b = fused.iter().find(|c| c.id == "b").unwrap().score;
        assert!(score_a > score_b);
    }
}
