//! Trait seams for the vector store and document store the executor talks
//! to, plus the unified `Candidate` shape every source is normalized into.
//! Mirrors the teacher's `llm::traits::{Embedder, Reranker, QueryExpander}`
//! pattern of small async trait objects swappable for fakes in tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::planner::StructuredFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CandidateSource {
    Vector,
    Structured,
    Fusion,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CandidateMetadata {
    pub name: String,
    pub category: Option<String>,
    pub pricing: Option<String>,
    pub billing_period: Option<String>,
    pub interface: Option<String>,
    pub deployment: Option<String>,
    pub industry: Option<String>,
    pub user_type: Option<String>,
    pub description: Option<String>,
    pub features: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Provenance {
    pub collection: String,
    pub query_vector_source: Option<String>,
    pub filters_applied: Vec<String>,
    pub rank_in_source: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub id: String,
    pub source: CandidateSource,
    pub score: f32,
    pub metadata: CandidateMetadata,
    pub embedding: Option<Vec<f32>>,
    pub provenance: Provenance,
}

/// A single result row returned by a vector store search, before
/// normalization into a `Candidate`.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub id: String,
    pub score: f32,
    pub metadata: CandidateMetadata,
    pub vector: Option<Vec<f32>>,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn search(
        &self,
        collection: &str,
        query_vector: &[f32],
        top_k: usize,
        filter: &[StructuredFilter],
    ) -> anyhow::Result<Vec<VectorHit>>;
}

/// A single row returned by a document-store structured query.
#[derive(Debug, Clone)]
pub struct DocHit {
    pub id: String,
    pub metadata: CandidateMetadata,
}

#[async_trait]
pub trait DocStore: Send + Sync {
    async fn query(
        &self,
        collection: &str,
        filters: &[StructuredFilter],
        top_k: usize,
    ) -> anyhow::Result<Vec<DocHit>>;
}

/// An in-memory fake store used by tests and by the CLI's offline demo mode.
#[derive(Default)]
pub struct InMemoryStore {
    pub vectors: HashMap<String, Vec<(String, Vec<f32>, CandidateMetadata)>>,
    pub docs: HashMap<String, Vec<DocHit>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_vector(&mut self, collection: &str, id: &str, vector: Vec<f32>, metadata: CandidateMetadata) {
        self.vectors
            .entry(collection.to_string())
            .or_default()
            .push((id.to_string(), vector, metadata));
    }

    pub fn seed_doc(&mut self, collection: &str, hit: DocHit) {
        self.docs.entry(collection.to_string()).or_default().push(hit);
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
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

#[async_trait]
impl VectorStore for InMemoryStore {
    async fn search(
        &self,
        collection: &str,
        query_vector: &[f32],
        top_k: usize,
        _filter: &[StructuredFilter],
    ) -> anyhow::Result<Vec<VectorHit>> {
        let Some(rows) = self.vectors.get(collection) else {
            return Ok(vec![]);
        };
        let mut scored: Vec<VectorHit> = rows
            .iter()
            .map(|(id, vec, meta)| VectorHit {
                id: id.clone(),
                score: cosine_similarity(query_vector, vec),
                metadata: meta.clone(),
                vector: Some(vec.clone()),
            })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored)
    }
}

#[async_trait]
impl DocStore for InMemoryStore {
    async fn query(
        &self,
        collection: &str,
        filters: &[StructuredFilter],
        top_k: usize,
    ) -> anyhow::Result<Vec<DocHit>> {
        let Some(rows) = self.docs.get(collection) else {
            return Ok(vec![]);
        };
        let matches: Vec<DocHit> = rows
            .iter()
            .filter(|hit| matches_filters(hit, filters))
            .take(top_k)
            .cloned()
            .collect();
        Ok(matches)
    }
}

fn matches_filters(hit: &DocHit, filters: &[StructuredFilter]) -> bool {
    use crate::planner::FilterOperator;
    for filter in filters {
        let field_value = match filter.field.as_str() {
            "category" => hit.metadata.category.as_deref(),
            "interface" => hit.metadata.interface.as_deref(),
            "deployment" => hit.metadata.deployment.as_deref(),
            "pricingModel" => hit.metadata.pricing.as_deref(),
            "billingPeriod" => hit.metadata.billing_period.as_deref(),
            "industry" => hit.metadata.industry.as_deref(),
            "userType" => hit.metadata.user_type.as_deref(),
            _ => None,
        };
        let matched = match (filter.operator, field_value) {
            (FilterOperator::Eq, Some(v)) => v == filter.value,
            (FilterOperator::In, Some(v)) => filter.value.split(',').any(|x| x == v),
            (FilterOperator::Contains, Some(v)) => v.to_lowercase().contains(&filter.value.to_lowercase()),
            _ => true,
        };
        if !matched {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_vector_store_ranks_by_cosine() {
        let mut store = InMemoryStore::new();
        store.seed_vector("tools_semantic", "a", vec![1.0, 0.0], CandidateMetadata::default());
        store.seed_vector("tools_semantic", "b", vec![0.0, 1.0], CandidateMetadata::default());
        let hits = store
            .search("tools_semantic", &[1.0, 0.0], 10, &[])
            .await
            .unwrap();
        assert_eq!(hits[0].id, "a");
    }

    #[tokio::test]
    async fn in_memory_doc_store_filters_by_field() {
        let mut store = InMemoryStore::new();
        store.seed_doc(
            "tools",
            DocHit {
                id: "x".to_string(),
                metadata: CandidateMetadata {
                    interface: Some("CLI".to_string()),
                    ..Default::default()
                },
            },
        );
        let filters = vec![StructuredFilter {
            field: "interface".to_string(),
            operator: crate::planner::FilterOperator::Eq,
            value: "CLI".to_string(),
        }];
        let hits = store.query("tools", &filters, 10).await.unwrap();
        assert_eq!(hits.len(), 1);
    }
}
