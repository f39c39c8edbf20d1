//! The Pipeline Driver: sequences CacheLookup -> IntentExtractor ->
//! QueryPlanner -> Execute -> Fuse, threading a single [`State`] record
//! through each stage. Grounded on the teacher's
//! `search::orchestrated::orchestrated_search` sequential-with-fallback
//! shape, generalized to five stages with a cache short-circuit and
//! explicit per-stage `tracing::info_span!` timing.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::cache::{query_hash, CacheHitType, CachedPlan, PlanCache};
use crate::error::{Result, ToolSearchError};
use crate::executor::QueryExecutor;
use crate::fusion::{fuse, SourceResults};
use crate::intent::{IntentExtractor, IntentState};
use crate::llm::Embedder;
use crate::planner::{FusionMethod, QueryPlan, QueryPlanner};
use crate::schema::Schema;
use crate::store::Candidate;

const MAX_FUSED_RESULTS: usize = 100;

#[derive(Debug, Clone)]
pub struct StageTiming {
    pub stage: String,
    pub elapsed: Duration,
    pub recovered: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ExecutionStats {
    pub timings: Vec<StageTiming>,
    pub execution_path: Vec<String>,
    pub cache_hit_type: Option<String>,
}

/// The per-request record threaded through every stage. Nodes only append
/// to their own slice; no node mutates another's fields.
#[derive(Debug, Clone)]
pub struct State {
    pub correlation_id: String,
    pub query: String,
    pub intent_state: Option<IntentState>,
    pub execution_plan: Option<QueryPlan>,
    pub candidates: Vec<Candidate>,
    pub execution_stats: ExecutionStats,
    pub errors: Vec<ToolSearchError>,
}

impl State {
    fn new(query: &str, correlation_id: String) -> Self {
        Self {
            correlation_id,
            query: query.to_string(),
            intent_state: None,
            execution_plan: None,
            candidates: Vec::new(),
            execution_stats: ExecutionStats::default(),
            errors: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub enable_checkpoints: bool,
}

#[derive(Debug, Clone)]
pub struct SearchResponse {
    pub candidates: Vec<Candidate>,
    pub reasoning: Option<String>,
    pub execution_stats: ExecutionStats,
    pub errors: Vec<String>,
}

pub struct PipelineDriver {
    schema: Arc<Schema>,
    embedder: Arc<dyn Embedder>,
    intent_extractor: IntentExtractor,
    query_planner: QueryPlanner,
    executor: QueryExecutor,
    plan_cache: Arc<PlanCache>,
    request_budget: Duration,
}

impl PipelineDriver {
    pub fn new(
        schema: Arc<Schema>,
        embedder: Arc<dyn Embedder>,
        intent_extractor: IntentExtractor,
        query_planner: QueryPlanner,
        executor: QueryExecutor,
        plan_cache: Arc<PlanCache>,
        request_budget: Duration,
    ) -> Self {
        Self {
            schema,
            embedder,
            intent_extractor,
            query_planner,
            executor,
            plan_cache,
            request_budget,
        }
    }

    #[tracing::instrument(skip(self, options, cancellation), fields(correlation_id))]
    pub async fn search(
        &self,
        query: &str,
        options: SearchOptions,
        cancellation: CancellationToken,
    ) -> Result<SearchResponse> {
        let correlation_id = uuid::Uuid::new_v4().to_string();
        tracing::Span::current().record("correlation_id", &correlation_id.as_str());

        let trimmed = query.trim();
        if trimmed.is_empty() {
            return Err(ToolSearchError::BadInput);
        }

        let mut state = State::new(trimmed, correlation_id);
        let deadline = tokio::time::sleep(self.request_budget);
        tokio::pin!(deadline);

        let run = self.run_stages(&mut state, options.enable_checkpoints, &cancellation);

        tokio::select! {
            result = run => {
                result?;
            }
            _ = &mut deadline => {
                state.errors.push(ToolSearchError::Deadline(self.request_budget.as_millis() as u64));
                tracing::warn!(correlation_id = %state.correlation_id, "request deadline exceeded");
            }
            _ = cancellation.cancelled() => {
                state.errors.push(ToolSearchError::Cancelled);
            }
        }

        let reasoning = state.intent_state.as_ref().map(|intent| {
            format!(
                "goal={:?} strategy={:?}",
                intent.primary_goal,
                state.execution_plan.as_ref().map(|p| p.strategy)
            )
        });

        Ok(SearchResponse {
            candidates: state.candidates,
            reasoning,
            execution_stats: state.execution_stats,
            errors: state.errors.iter().map(|e| e.to_string()).collect(),
        })
    }

    async fn run_stages(
        &self,
        state: &mut State,
        enable_checkpoints: bool,
        cancellation: &CancellationToken,
    ) -> Result<()> {
        let cache_result = self.stage_cache_lookup(state).await?;

        let (intent, plan) = if let Some(cached) = cache_result {
            state.execution_stats.cache_hit_type = Some(format!("{:?}", cached.0));
            (cached.1, cached.2)
        } else {
            state.execution_stats.cache_hit_type = Some("Miss".to_string());
            if cancellation.is_cancelled() {
                return Err(ToolSearchError::Cancelled);
            }
            let intent = self.stage_intent(state).await?;
            if cancellation.is_cancelled() {
                return Err(ToolSearchError::Cancelled);
            }
            let plan = self.stage_plan(state, &intent)?;
            (intent, plan)
        };

        state.intent_state = Some(intent.clone());
        state.execution_plan = Some(plan.clone());

        if cancellation.is_cancelled() {
            return Err(ToolSearchError::Cancelled);
        }

        let is_fresh_plan = state.execution_stats.cache_hit_type.as_deref() == Some("Miss");
        self.stage_execute_and_fuse(state, &intent, &plan, is_fresh_plan)
            .await?;

        if enable_checkpoints {
            tracing::info!(checkpoint = "pipeline_complete", correlation_id = %state.correlation_id);
        }
        Ok(())
    }

    async fn stage_cache_lookup(
        &self,
        state: &mut State,
    ) -> Result<Option<(CacheHitType, IntentState, QueryPlan)>> {
        let start = Instant::now();
        let embedding = self
            .embedder
            .embed(&state.query)
            .await
            .map_err(|e| ToolSearchError::Embed(e.to_string()))?;

        let lookup = self.plan_cache.lookup(&state.query, &embedding)?;
        let recovered = false;
        record_timing(state, "cache-lookup", start.elapsed(), recovered);

        match lookup.hit_type {
            CacheHitType::Miss => Ok(None),
            hit_type => {
                let plan = lookup.plan.expect("hit implies plan present");
                Ok(Some((hit_type, plan.intent_state, plan.execution_plan)))
            }
        }
    }

    async fn stage_intent(&self, state: &mut State) -> Result<IntentState> {
        let start = Instant::now();
        let result = self.intent_extractor.extract(&state.query, &self.schema).await;
        record_timing(state, "intent-extractor", start.elapsed(), false);
        state.execution_stats.execution_path.push("intent-extractor".to_string());
        result
    }

    fn stage_plan(&self, state: &mut State, intent: &IntentState) -> Result<QueryPlan> {
        let start = Instant::now();
        let plan = self.query_planner.plan(intent, &self.schema);
        record_timing(state, "query-planner", start.elapsed(), false);
        state.execution_stats.execution_path.push("query-planner".to_string());
        Ok(plan)
    }

    async fn stage_execute_and_fuse(
        &self,
        state: &mut State,
        intent: &IntentState,
        plan: &QueryPlan,
        is_fresh_plan: bool,
    ) -> Result<()> {
        let start = Instant::now();
        let (executed, errors) = self.executor.execute(&state.query, intent, plan).await;
        let any_recovered = !errors.is_empty();
        state.errors.extend(errors);
        record_timing(state, "query-executor", start.elapsed(), any_recovered);
        state.execution_stats.execution_path.push("query-executor".to_string());

        if executed.is_empty() && !state.errors.is_empty() {
            return Err(ToolSearchError::Fusion);
        }

        let start = Instant::now();
        let sources: Vec<SourceResults> = executed
            .into_iter()
            .map(|e| SourceResults {
                name: e.name,
                weight: e.weight,
                candidates: e.candidates,
            })
            .collect();
        let fusion_method = if sources.len() <= 1 {
            FusionMethod::None
        } else {
            plan.fusion
        };
        state.candidates = fuse(sources, fusion_method, MAX_FUSED_RESULTS);
        record_timing(state, "fusion", start.elapsed(), false);
        state.execution_stats.execution_path.push("fusion".to_string());

        if is_fresh_plan && !state.candidates.is_empty() {
            let embedding = self
                .embedder
                .embed(&state.query)
                .await
                .map_err(|e| ToolSearchError::Embed(e.to_string()))?;
            let now = Utc::now();
            let cached = CachedPlan {
                id: uuid::Uuid::new_v4().to_string(),
                query_hash: query_hash(&state.query),
                original_query: state.query.clone(),
                query_embedding: embedding,
                intent_state: intent.clone(),
                execution_plan: plan.clone(),
                usage_count: 1,
                last_used: now,
                created_at: now,
                confidence: plan.confidence,
                schema_version: self.schema.version.clone(),
            };
            if let Err(e) = self.plan_cache.store(&cached) {
                tracing::warn!(error = %e, "failed to persist plan cache entry");
            }
        }

        Ok(())
    }
}

fn record_timing(state: &mut State, stage: &str, elapsed: Duration, recovered: bool) {
    tracing::info!(stage, elapsed_ms = elapsed.as_millis() as u64, recovered, "stage complete");
    state.execution_stats.timings.push(StageTiming {
        stage: stage.to_string(),
        elapsed,
        recovered,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmClient;
    use crate::store::{CandidateMetadata, DocHit, InMemoryStore};
    use async_trait::async_trait;

    struct StaticLlmClient(String);

    #[async_trait]
    impl LlmClient for StaticLlmClient {
        async fn chat(&self, _s: &str, _u: &str, _t: f32, _m: u32) -> anyhow::Result<String> {
            Ok(self.0.clone())
        }
    }

    struct FixedEmbedder;

    #[async_trait]
    impl crate::llm::Embedder for FixedEmbedder {
        async fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
            Ok(vec![1.0, 0.0, 0.0])
        }
        async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            Ok(vec![vec![1.0, 0.0, 0.0]; texts.len()])
        }
        fn dimension(&self) -> usize {
            3
        }
    }

    #[tokio::test]
    async fn empty_query_short_circuits_with_bad_input() {
        let schema = Arc::new(Schema::default_ai_tool_discovery());
        let embedder: Arc<dyn crate::llm::Embedder> = Arc::new(FixedEmbedder);
        let llm: Arc<dyn LlmClient> = Arc::new(StaticLlmClient(
            "{\"primaryGoal\": \"find\", \"interface\": \"CLI\"}".to_string(),
        ));
        let mut store = InMemoryStore::new();
        store.seed_doc(
            "tools",
            DocHit {
                id: "tool-1".to_string(),
                metadata: CandidateMetadata {
                    interface: Some("CLI".to_string()),
                    ..Default::default()
                },
            },
        );
        let store = Arc::new(store);

        let driver = PipelineDriver::new(
            schema.clone(),
            embedder.clone(),
            IntentExtractor::new(llm),
            QueryPlanner::new(),
            QueryExecutor::new(store.clone(), store, embedder),
            Arc::new(PlanCache::open_in_memory(0.92, 0.5, 0.5, schema.version.clone()).unwrap()),
            Duration::from_secs(10),
        );

        let result = driver
            .search("   ", SearchOptions::default(), CancellationToken::new())
            .await;
        assert!(matches!(result, Err(ToolSearchError::BadInput)));
    }

    #[tokio::test]
    async fn fresh_query_executes_full_pipeline_and_populates_cache() {
        let schema = Arc::new(Schema::default_ai_tool_discovery());
        let embedder: Arc<dyn crate::llm::Embedder> = Arc::new(FixedEmbedder);
        let llm: Arc<dyn LlmClient> = Arc::new(StaticLlmClient(
            "{\"primaryGoal\": \"find\", \"interface\": \"CLI\", \"confidence\": 0.9}".to_string(),
        ));
        let mut store = InMemoryStore::new();
        store.seed_doc(
            "tools",
            DocHit {
                id: "tool-1".to_string(),
                metadata: CandidateMetadata {
                    interface: Some("CLI".to_string()),
                    ..Default::default()
                },
            },
        );
        store.seed_vector("tools_semantic", "tool-1", vec![1.0, 0.0, 0.0], CandidateMetadata::default());
        let store = Arc::new(store);

        let plan_cache = Arc::new(PlanCache::open_in_memory(0.92, 0.5, 0.5, schema.version.clone()).unwrap());
        let driver = PipelineDriver::new(
            schema.clone(),
            embedder.clone(),
            IntentExtractor::new(llm),
            QueryPlanner::new(),
            QueryExecutor::new(store.clone(), store, embedder),
            plan_cache.clone(),
            Duration::from_secs(10),
        );

        let response = driver
            .search("self hosted cli", SearchOptions::default(), CancellationToken::new())
            .await
            .unwrap();

        assert!(!response.candidates.is_empty());
        assert_eq!(response.execution_stats.cache_hit_type.as_deref(), Some("Miss"));

        let lookup = plan_cache.lookup("self hosted cli", &[1.0, 0.0, 0.0]).unwrap();
        assert_eq!(lookup.hit_type, CacheHitType::Exact);
    }
}
