//! Approximate nearest neighbor index over cached query embeddings.
//! Grounded on the teacher's `search::ann_index::AnnIndex`: same
//! `instant_distance::HnswMap` build, same brute-force fallback below a
//! minimum-size threshold, same `EmbeddingPoint` wrapper implementing
//! `instant_distance::Point`.

use instant_distance::{Builder, HnswMap, Point, Search};

/// Below this many entries, brute-force cosine scan beats building an HNSW
/// graph. Matches the teacher's `ANN_THRESHOLD`.
pub const ANN_THRESHOLD: usize = 1000;

#[derive(Debug, Clone)]
pub struct EmbeddingPoint(pub Vec<f32>);

impl Point for EmbeddingPoint {
    fn distance(&self, other: &Self) -> f32 {
        // instant-distance treats this as a true distance metric (smaller
        // is closer); convert cosine similarity into a bounded distance.
        1.0 - cosine_similarity(&self.0, &other.0)
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

pub enum AnnIndex {
    Hnsw { map: HnswMap<EmbeddingPoint, String>, },
    BruteForce { entries: Vec<(String, Vec<f32>)> },
}

impl AnnIndex {
    /// Build the index from the full set of `(id, embedding)` pairs
    /// currently stored in the plan cache.
    pub fn build(entries: Vec<(String, Vec<f32>)>) -> Self {
        if entries.len() < ANN_THRESHOLD {
            return AnnIndex::BruteForce { entries };
        }
        let points: Vec<EmbeddingPoint> = entries.iter().map(|(_, v)| EmbeddingPoint(v.clone())).collect();
        let values: Vec<String> = entries.iter().map(|(id, _)| id.clone()).collect();
        let map = Builder::default().build(points, values);
        AnnIndex::Hnsw { map }
    }

    /// Return the single nearest stored entry and its cosine similarity to
    /// `query_vector`, or `None` if the index is empty.
    pub fn nearest(&self, query_vector: &[f32]) -> Option<(String, f32)> {
        match self {
            AnnIndex::BruteForce { entries } => entries
                .iter()
                .map(|(id, v)| (id.clone(), cosine_similarity(query_vector, v)))
                .fold(None, |best: Option<(String, f32)>, (id, sim)| match best {
                    Some((_, best_sim)) if best_sim >= sim => best,
                    _ => Some((id, sim)),
                }),
            AnnIndex::Hnsw { map } => {
                let mut search = Search::default();
                let query_point = EmbeddingPoint(query_vector.to_vec());
                let item = map.search(&query_point, &mut search).next()?;
                let similarity = 1.0 - item.distance;
                Some((item.value.clone(), similarity))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn brute_force_finds_nearest() {
        let index = AnnIndex::build(vec![
            ("a".to_string(), vec![1.0, 0.0]),
            ("b".to_string(), vec![0.0, 1.0]),
        ]);
        let (id, sim) = index.nearest(&[0.9, 0.1]).unwrap();
        assert_eq!(id, "a");
        assert!(sim > 0.9);
    }

    #[test]
    fn empty_index_returns_none() {
        let index = AnnIndex::build(vec![]);
        assert!(index.nearest(&[1.0, 0.0]).is_none());
    }
}
