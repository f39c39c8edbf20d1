//! Stage 3: concurrent fan-out execution of a [`QueryPlan`] against the
//! vector and document stores. Grounded on the teacher's
//! `llm::client::VLLMClient::embed_batch_parallel`'s
//! `futures::stream::buffer_unordered` pattern, and on
//! `search::workflow_executor::execute_step`'s per-step error recovery.

use futures::stream::{self, StreamExt};
use std::sync::Arc;

use crate::error::ToolSearchError;
use crate::intent::IntentState;
use crate::llm::Embedder;
use crate::planner::{QueryPlan, QueryVectorSource};
use crate::store::{Candidate, CandidateMetadata, CandidateSource, DocStore, Provenance, VectorStore};

const MAX_CONCURRENT_SOURCES: usize = 8;

#[derive(Debug, Clone)]
pub struct ExecutedSource {
    pub name: String,
    pub weight: f32,
    pub candidates: Vec<Candidate>,
}

pub struct QueryExecutor {
    vector_store: Arc<dyn VectorStore>,
    doc_store: Arc<dyn DocStore>,
    embedder: Arc<dyn Embedder>,
}

impl QueryExecutor {
    pub fn new(
        vector_store: Arc<dyn VectorStore>,
        doc_store: Arc<dyn DocStore>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            vector_store,
            doc_store,
            embedder,
        }
    }

    /// Run every source in `plan` concurrently. A single source's failure is
    /// recorded in `errors` and contributes zero candidates; it never
    /// aborts the other sources.
    #[tracing::instrument(skip(self, plan, intent, query), fields(sources = plan.vector_sources.len() + plan.structured_sources.len()))]
    pub async fn execute(
        &self,
        query: &str,
        intent: &IntentState,
        plan: &QueryPlan,
    ) -> (Vec<ExecutedSource>, Vec<ToolSearchError>) {
        let mut tasks: Vec<std::pin::Pin<Box<dyn std::future::Future<Output = (String, f32, Result<Vec<Candidate>, ToolSearchError>)> + Send>>> =
            Vec::new();

        for vs in &plan.vector_sources {
            let name = format!("vector:{}", vs.collection);
            let weight = vs.weight;
            let embedder = Arc::clone(&self.embedder);
            let store = Arc::clone(&self.vector_store);
            let vs = vs.clone();
            let query_text = query.to_string();
            let reference_tool = intent.reference_tool.clone();
            let semantic_variants = intent.semantic_variants.clone();

            tasks.push(Box::pin(async move {
                let result = run_vector_source(&embedder, &store, &vs, &query_text, reference_tool.as_deref(), &semantic_variants).await;
                (name, weight, result)
            }));
        }

        for ss in &plan.structured_sources {
            let name = format!("structured:{}", ss.collection);
            let weight = ss.weight;
            let store = Arc::clone(&self.doc_store);
            let ss = ss.clone();

            tasks.push(Box::pin(async move {
                let result = run_structured_source(&store, &ss).await;
                (name, weight, result)
            }));
        }

        let results: Vec<(String, f32, Result<Vec<Candidate>, ToolSearchError>)> =
            stream::iter(tasks).buffer_unordered(MAX_CONCURRENT_SOURCES).collect().await;

        let mut executed = Vec::new();
        let mut errors = Vec::new();
        for (name, weight, result) in results {
            match result {
                Ok(candidates) => executed.push(ExecutedSource { name, weight, candidates }),
                Err(e) => {
                    tracing::warn!(source = %name, error = %e, "source execution recovered");
                    errors.push(ToolSearchError::Source {
                        source: name,
                        message: e.to_string(),
                    });
                }
            }
        }
        (executed, errors)
    }
}

async fn run_vector_source(
    embedder: &Arc<dyn Embedder>,
    store: &Arc<dyn VectorStore>,
    vs: &crate::planner::VectorSourceSpec,
    query_text: &str,
    reference_tool: Option<&str>,
    semantic_variants: &[String],
) -> Result<Vec<Candidate>, ToolSearchError> {
    let text_to_embed: String = match vs.query_vector_source {
        QueryVectorSource::QueryText => query_text.to_string(),
        QueryVectorSource::ReferenceTool => reference_tool
            .ok_or_else(|| ToolSearchError::Embed("referenceTool missing for source".to_string()))?
            .to_string(),
        QueryVectorSource::SemanticVariant(i) => semantic_variants
            .get(i)
            .ok_or_else(|| ToolSearchError::Embed(format!("semanticVariant[{i}] missing")))?
            .clone(),
    };

    let vector = embedder
        .embed(&text_to_embed)
        .await
        .map_err(|e| ToolSearchError::Embed(e.to_string()))?;

    let hits = store
        .search(&vs.collection, &vector, vs.top_k, &vs.filter)
        .await
        .map_err(|e| ToolSearchError::Store(e.to_string()))?;

    Ok(hits
        .into_iter()
        .enumerate()
        .map(|(rank, hit)| Candidate {
            id: hit.id,
            source: CandidateSource::Vector,
            score: hit.score,
            metadata: hit.metadata,
            embedding: hit.vector,
            provenance: Provenance {
                collection: vs.collection.clone(),
                query_vector_source: Some(format!("{:?}", vs.query_vector_source)),
                filters_applied: vec![],
                rank_in_source: rank,
            },
        })
        .collect())
}

async fn run_structured_source(
    store: &Arc<dyn DocStore>,
    ss: &crate::planner::StructuredSourceSpec,
) -> Result<Vec<Candidate>, ToolSearchError> {
    let hits = store
        .query(&ss.collection, &ss.filters, ss.top_k)
        .await
        .map_err(|e| ToolSearchError::Store(e.to_string()))?;

    let n = hits.len().max(1);
    Ok(hits
        .into_iter()
        .enumerate()
        .map(|(rank, hit)| Candidate {
            id: hit.id,
            source: CandidateSource::Structured,
            // Structured hits carry a constant pre-fusion score per SPEC_FULL §4.4;
            // rank-normalization only happens inside RRF's own law.
            score: if ss.filters.is_empty() { 1.0 - (rank as f32 / n as f32) } else { 0.5 },
            metadata: hit.metadata,
            embedding: None,
            provenance: Provenance {
                collection: ss.collection.clone(),
                query_vector_source: None,
                filters_applied: ss.filters.iter().map(|f| f.field.clone()).collect(),
                rank_in_source: rank,
            },
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::IntentState;
    use crate::planner::{FusionMethod, QueryPlan, QueryVectorSource, Strategy, VectorSourceSpec};
    use crate::store::InMemoryStore;

    struct FixedEmbedder(Vec<f32>);

    #[async_trait::async_trait]
    impl Embedder for FixedEmbedder {
        async fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
            Ok(self.0.clone())
        }
        async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            Ok(vec![self.0.clone(); texts.len()])
        }
        fn dimension(&self) -> usize {
            self.0.len()
        }
    }

    #[tokio::test]
    async fn single_source_failure_is_isolated() {
        let mut store = InMemoryStore::new();
        store.seed_vector("tools_semantic", "a", vec![1.0, 0.0], CandidateMetadata::default());
        let store = Arc::new(store);
        let embedder: Arc<dyn Embedder> = Arc::new(FixedEmbedder(vec![1.0, 0.0]));

        let executor = QueryExecutor::new(
            store.clone() as Arc<dyn VectorStore>,
            store as Arc<dyn DocStore>,
            embedder,
        );

        let plan = QueryPlan {
            strategy: Strategy::MultiCollectionHybrid,
            vector_sources: vec![
                VectorSourceSpec {
                    collection: "tools_semantic".to_string(),
                    embedding_field: "description_embedding".to_string(),
                    query_vector_source: QueryVectorSource::QueryText,
                    top_k: 10,
                    weight: 1.0,
                    filter: vec![],
                },
                VectorSourceSpec {
                    collection: "does_not_exist".to_string(),
                    embedding_field: "x".to_string(),
                    query_vector_source: QueryVectorSource::ReferenceTool,
                    top_k: 10,
                    weight: 1.0,
                    filter: vec![],
                },
            ],
            structured_sources: vec![],
            fusion: FusionMethod::Rrf,
            max_refinement_cycles: 0,
            confidence: 0.8,
            explanation: String::new(),
        };

        let intent = IntentState::default();
        let (executed, errors) = executor.execute("query", &intent, &plan).await;

        assert_eq!(errors.len(), 1);
        assert!(errors[0].is_recoverable());
        let ok_source = executed.iter().find(|s| s.name.contains("tools_semantic")).unwrap();
        assert_eq!(ok_source.candidates.len(), 1);
    }
}
