//! Stage 2: deterministic mapping from an [`IntentState`] to a [`QueryPlan`].
//! Grounded on the strategy-selection shape of the teacher's
//! `llm::workflow_orchestrator::WorkflowOrchestrator::plan_workflow`, with
//! the LLM-optional step replaced by a purely deterministic core per
//! `SPEC_FULL.md §4.3`.

use serde::{Deserialize, Serialize};

use crate::intent::IntentState;
use crate::schema::Schema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Strategy {
    VectorOnly,
    StructuredOnly,
    Hybrid,
    MultiCollectionHybrid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryVectorSource {
    QueryText,
    ReferenceTool,
    SemanticVariant(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOperator {
    Eq,
    In,
    Contains,
    Gt,
    Lt,
    Gte,
    Lte,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredFilter {
    pub field: String,
    pub operator: FilterOperator,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorSourceSpec {
    pub collection: String,
    pub embedding_field: String,
    pub query_vector_source: QueryVectorSource,
    pub top_k: usize,
    pub weight: f32,
    pub filter: Vec<StructuredFilter>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredSourceSpec {
    pub collection: String,
    pub filters: Vec<StructuredFilter>,
    pub top_k: usize,
    pub weight: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FusionMethod {
    Rrf,
    WeightedSum,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryPlan {
    pub strategy: Strategy,
    pub vector_sources: Vec<VectorSourceSpec>,
    pub structured_sources: Vec<StructuredSourceSpec>,
    pub fusion: FusionMethod,
    pub max_refinement_cycles: u32,
    pub confidence: f32,
    pub explanation: String,
}

const PRIMARY_TOP_K: usize = 70;
const SECONDARY_TOP_K: usize = 40;
const PRIMARY_WEIGHT: f32 = 1.0;
const SECONDARY_WEIGHT: f32 = 0.4;
const LOW_CONFIDENCE_THRESHOLD: f32 = 0.3;

pub struct QueryPlanner;

impl QueryPlanner {
    pub fn new() -> Self {
        Self
    }

    pub fn plan(&self, intent: &IntentState, schema: &Schema) -> QueryPlan {
        let mut plan = self.plan_deterministic(intent, schema);
        if let Err(issues) = schema.validate_query_plan(&plan) {
            tracing::warn!(?issues, "repairing invalid query plan");
            self.repair(&mut plan, schema);
        }
        plan
    }

    fn plan_deterministic(&self, intent: &IntentState, schema: &Schema) -> QueryPlan {
        let filters = schema.build_filters(intent);
        let no_free_text = intent.has_only_vocabulary_filters();
        let low_confidence = intent.confidence < LOW_CONFIDENCE_THRESHOLD;

        let strategy = if low_confidence || (filters.is_empty() && !no_free_text) {
            Strategy::VectorOnly
        } else if no_free_text {
            Strategy::StructuredOnly
        } else if spans_multiple_dimensions(intent) {
            Strategy::MultiCollectionHybrid
        } else {
            Strategy::Hybrid
        };

        let query_vector_source = if intent.reference_tool.is_some() {
            QueryVectorSource::ReferenceTool
        } else {
            QueryVectorSource::QueryText
        };

        let mut vector_sources = Vec::new();
        let mut structured_sources = Vec::new();

        match strategy {
            Strategy::StructuredOnly => {
                structured_sources.push(StructuredSourceSpec {
                    collection: schema.structured_database.collection.clone(),
                    filters: filters.clone(),
                    top_k: PRIMARY_TOP_K,
                    weight: PRIMARY_WEIGHT,
                });
            }
            Strategy::VectorOnly => {
                if let Some(primary) = schema.primary_collection() {
                    vector_sources.push(VectorSourceSpec {
                        collection: primary.name.clone(),
                        embedding_field: primary.embedding_field.clone(),
                        query_vector_source,
                        top_k: PRIMARY_TOP_K,
                        weight: PRIMARY_WEIGHT,
                        filter: vec![],
                    });
                }
            }
            Strategy::Hybrid => {
                if let Some(primary) = schema.primary_collection() {
                    vector_sources.push(VectorSourceSpec {
                        collection: primary.name.clone(),
                        embedding_field: primary.embedding_field.clone(),
                        query_vector_source,
                        top_k: PRIMARY_TOP_K,
                        weight: PRIMARY_WEIGHT,
                        filter: vec![],
                    });
                }
                if !filters.is_empty() {
                    structured_sources.push(StructuredSourceSpec {
                        collection: schema.structured_database.collection.clone(),
                        filters: filters.clone(),
                        top_k: SECONDARY_TOP_K,
                        weight: SECONDARY_WEIGHT,
                    });
                }
            }
            Strategy::MultiCollectionHybrid => {
                for (i, collection) in schema.enabled_collections().into_iter().enumerate() {
                    let (top_k, weight) = if i == 0 {
                        (PRIMARY_TOP_K, PRIMARY_WEIGHT)
                    } else {
                        (SECONDARY_TOP_K, SECONDARY_WEIGHT)
                    };
                    vector_sources.push(VectorSourceSpec {
                        collection: collection.name.clone(),
                        embedding_field: collection.embedding_field.clone(),
                        query_vector_source,
                        top_k,
                        weight,
                        filter: vec![],
                    });
                }
                if !filters.is_empty() {
                    structured_sources.push(StructuredSourceSpec {
                        collection: schema.structured_database.collection.clone(),
                        filters,
                        top_k: SECONDARY_TOP_K,
                        weight: SECONDARY_WEIGHT,
                    });
                }
            }
        }

        let source_count = vector_sources.len() + structured_sources.len();
        let fusion = if source_count <= 1 {
            FusionMethod::None
        } else {
            FusionMethod::Rrf
        };

        QueryPlan {
            strategy,
            vector_sources,
            structured_sources,
            fusion,
            max_refinement_cycles: 0,
            confidence: intent.confidence.max(0.5),
            explanation: format!("strategy={strategy:?} from intent confidence={:.2}", intent.confidence),
        }
    }

    /// Deterministically repair an invalid plan: drop any source referencing
    /// a disabled collection or non-filterable field.
    fn repair(&self, plan: &mut QueryPlan, schema: &Schema) {
        plan.vector_sources
            .retain(|vs| schema.enabled_collections().iter().any(|c| c.name == vs.collection));
        for ss in &mut plan.structured_sources {
            ss.filters.retain(|f| schema.is_filterable(&f.field));
        }
        plan.structured_sources.retain(|ss| !ss.filters.is_empty());

        if plan.vector_sources.is_empty() && plan.structured_sources.is_empty() {
            if let Some(primary) = schema.primary_collection() {
                plan.vector_sources.push(VectorSourceSpec {
                    collection: primary.name.clone(),
                    embedding_field: primary.embedding_field.clone(),
                    query_vector_source: QueryVectorSource::QueryText,
                    top_k: PRIMARY_TOP_K,
                    weight: PRIMARY_WEIGHT,
                    filter: vec![],
                });
            }
        }
    }
}

impl Default for QueryPlanner {
    fn default() -> Self {
        Self::new()
    }
}

fn spans_multiple_dimensions(intent: &IntentState) -> bool {
    let mut dims = 0;
    if !intent.functionality.is_empty() {
        dims += 1;
    }
    if intent.interface.is_some() {
        dims += 1;
    }
    if intent.deployment.is_some() {
        dims += 1;
    }
    if intent.category.is_some() {
        dims += 1;
    }
    dims >= 2
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Schema {
        Schema::default_ai_tool_discovery()
    }

    #[test]
    fn low_confidence_yields_vector_only() {
        let mut intent = IntentState::default();
        intent.confidence = 0.1;
        let plan = QueryPlanner::new().plan(&intent, &schema());
        assert_eq!(plan.strategy, Strategy::VectorOnly);
        assert_eq!(plan.fusion, FusionMethod::None);
    }

    #[test]
    fn vocabulary_only_intent_yields_structured_only() {
        let mut intent = IntentState::default();
        intent.interface = Some("CLI".to_string());
        intent.deployment = Some("Self-Hosted".to_string());
        intent.confidence = 0.8;
        let plan = QueryPlanner::new().plan(&intent, &schema());
        assert_eq!(plan.strategy, Strategy::StructuredOnly);
    }

    #[test]
    fn multi_dimension_intent_yields_multi_collection_hybrid() {
        let mut intent = IntentState::default();
        intent.functionality = vec!["Code Generation".to_string()];
        intent.interface = Some("CLI".to_string());
        intent.reference_tool = Some("Cursor".to_string());
        intent.confidence = 0.8;
        let plan = QueryPlanner::new().plan(&intent, &schema());
        assert_eq!(plan.strategy, Strategy::MultiCollectionHybrid);
        assert!(plan.vector_sources.len() >= 2);
    }

    #[test]
    fn plan_always_validates_against_schema() {
        let mut intent = IntentState::default();
        intent.reference_tool = Some("Cursor".to_string());
        intent.confidence = 0.9;
        let plan = QueryPlanner::new().plan(&intent, &schema());
        assert!(schema().validate_query_plan(&plan).is_ok());
    }

    #[test]
    fn max_refinement_cycles_is_inert_reserved_field() {
        let intent = IntentState::default();
        let plan = QueryPlanner::new().plan(&intent, &schema());
        assert_eq!(plan.max_refinement_cycles, 0);
    }
}
