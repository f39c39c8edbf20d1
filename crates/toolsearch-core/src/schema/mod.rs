//! The declarative domain schema that parameterizes every other node:
//! vocabularies, intent field descriptors, vector collections, and the
//! structured-database filter surface.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::intent::IntentState;
use crate::planner::{QueryPlan, StructuredFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    String,
    Enum,
    Number,
    Boolean,
    Array,
    Object,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentFieldSpec {
    pub name: String,
    pub field_type: FieldType,
    pub required: bool,
    pub enum_values: Option<Vec<String>>,
    pub children: Vec<IntentFieldSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorCollectionSpec {
    pub name: String,
    pub embedding_field: String,
    pub dimension: usize,
    pub description: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredDatabaseSpec {
    pub collection: String,
    pub search_fields: Vec<String>,
    pub filterable_fields: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
    pub name: String,
    pub version: String,
    pub vocabularies: HashMap<String, Vec<String>>,
    pub intent_fields: Vec<IntentFieldSpec>,
    pub vector_collections: Vec<VectorCollectionSpec>,
    pub structured_database: StructuredDatabaseSpec,
    pub price_operators: Vec<String>,
    pub embedding_dimension: usize,
}

impl Schema {
    /// The built-in AI-tool-discovery domain schema.
    pub fn default_ai_tool_discovery() -> Self {
        let mut vocabularies = HashMap::new();
        vocabularies.insert(
            "category".to_string(),
            vec![
                "Developer Tools",
                "Productivity",
                "Writing",
                "Design",
                "Data & Analytics",
                "Customer Support",
                "Marketing",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        );
        vocabularies.insert(
            "functionality".to_string(),
            vec![
                "Code Generation",
                "Code Completion",
                "Chat",
                "Search",
                "Summarization",
                "Image Generation",
                "Transcription",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        );
        vocabularies.insert(
            "userType".to_string(),
            vec!["Individual", "Team", "Enterprise"]
                .into_iter()
                .map(String::from)
                .collect(),
        );
        vocabularies.insert(
            "interface".to_string(),
            vec!["CLI", "Web", "Desktop", "Mobile", "API", "IDE Plugin"]
                .into_iter()
                .map(String::from)
                .collect(),
        );
        vocabularies.insert(
            "deployment".to_string(),
            vec!["Cloud", "Self-Hosted", "Hybrid", "On-Premise"]
                .into_iter()
                .map(String::from)
                .collect(),
        );
        vocabularies.insert(
            "industry".to_string(),
            vec!["Software", "Finance", "Healthcare", "Education", "Legal"]
                .into_iter()
                .map(String::from)
                .collect(),
        );
        vocabularies.insert(
            "pricingModel".to_string(),
            vec!["Free", "Freemium", "Paid", "Open Source"]
                .into_iter()
                .map(String::from)
                .collect(),
        );
        vocabularies.insert(
            "billingPeriod".to_string(),
            vec!["Monthly", "Annual", "One-Time", "Usage-Based"]
                .into_iter()
                .map(String::from)
                .collect(),
        );

        let intent_fields = vec![
            IntentFieldSpec {
                name: "primaryGoal".to_string(),
                field_type: FieldType::Enum,
                required: true,
                enum_values: Some(
                    vec!["find", "compare", "recommend", "explore", "analyze", "explain"]
                        .into_iter()
                        .map(String::from)
                        .collect(),
                ),
                children: vec![],
            },
            IntentFieldSpec {
                name: "referenceTool".to_string(),
                field_type: FieldType::String,
                required: false,
                enum_values: None,
                children: vec![],
            },
            IntentFieldSpec {
                name: "comparisonMode".to_string(),
                field_type: FieldType::Enum,
                required: false,
                enum_values: Some(
                    vec!["similar_to", "vs", "alternative_to"]
                        .into_iter()
                        .map(String::from)
                        .collect(),
                ),
                children: vec![],
            },
            IntentFieldSpec {
                name: "functionality".to_string(),
                field_type: FieldType::Array,
                required: false,
                enum_values: None,
                children: vec![],
            },
        ];

        Self {
            name: "ai-tool-discovery".to_string(),
            version: "1.0.0".to_string(),
            vocabularies,
            intent_fields,
            vector_collections: vec![
                VectorCollectionSpec {
                    name: "tools_semantic".to_string(),
                    embedding_field: "description_embedding".to_string(),
                    dimension: 768,
                    description: "Primary semantic embedding over name + description + tagline"
                        .to_string(),
                    enabled: true,
                },
                VectorCollectionSpec {
                    name: "tools_functionality".to_string(),
                    embedding_field: "functionality_embedding".to_string(),
                    dimension: 768,
                    description: "Embedding over enumerated functionality tags".to_string(),
                    enabled: true,
                },
                VectorCollectionSpec {
                    name: "tools_interface".to_string(),
                    embedding_field: "interface_embedding".to_string(),
                    dimension: 768,
                    description: "Embedding over interface/deployment descriptors".to_string(),
                    enabled: true,
                },
            ],
            structured_database: StructuredDatabaseSpec {
                collection: "tools".to_string(),
                search_fields: vec![
                    "name".to_string(),
                    "description".to_string(),
                    "longDescription".to_string(),
                    "tagline".to_string(),
                ],
                filterable_fields: vec![
                    "category".to_string(),
                    "functionality".to_string(),
                    "userType".to_string(),
                    "interface".to_string(),
                    "deployment".to_string(),
                    "industry".to_string(),
                    "pricingModel".to_string(),
                    "billingPeriod".to_string(),
                    "price".to_string(),
                ],
            },
            price_operators: vec!["=", "<", "<=", ">", ">=", "between"]
                .into_iter()
                .map(String::from)
                .collect(),
            embedding_dimension: 768,
        }
    }

    pub fn primary_collection(&self) -> Option<&VectorCollectionSpec> {
        self.vector_collections.iter().find(|c| c.enabled)
    }

    pub fn enabled_collections(&self) -> Vec<&VectorCollectionSpec> {
        self.vector_collections.iter().filter(|c| c.enabled).collect()
    }

    pub fn is_filterable(&self, field: &str) -> bool {
        self.structured_database
            .filterable_fields
            .iter()
            .any(|f| f == field)
    }

    /// Normalize a raw value against a named vocabulary, case-insensitively.
    /// Returns `None` when there is no unambiguous match.
    pub fn canonicalize(&self, field: &str, value: &str) -> Option<String> {
        let values = self.vocabularies.get(field)?;
        let needle = value.trim().to_lowercase().replace([' ', '_'], "-");
        values
            .iter()
            .find(|v| v.to_lowercase().replace([' ', '_'], "-") == needle)
            .cloned()
    }

    pub fn validate_intent(&self, intent: &IntentState) -> std::result::Result<(), Vec<String>> {
        let mut issues = Vec::new();
        for (field, value) in intent.vocabulary_fields() {
            if let Some(v) = value {
                if self.vocabularies.contains_key(field) && self.canonicalize(field, v).is_none() {
                    issues.push(format!("field '{field}' has non-vocabulary value '{v}'"));
                }
            }
        }
        for f in &intent.functionality {
            if self.canonicalize("functionality", f).is_none() {
                issues.push(format!("functionality '{f}' not in vocabulary"));
            }
        }
        if !(0.0..=1.0).contains(&intent.confidence) {
            issues.push("confidence out of range [0,1]".to_string());
        }
        if issues.is_empty() {
            Ok(())
        } else {
            Err(issues)
        }
    }

    pub fn validate_query_plan(&self, plan: &QueryPlan) -> std::result::Result<(), Vec<String>> {
        let mut issues = Vec::new();
        for vs in &plan.vector_sources {
            if !self
                .vector_collections
                .iter()
                .any(|c| c.name == vs.collection && c.enabled)
            {
                issues.push(format!("vector collection '{}' not enabled", vs.collection));
            }
        }
        for ss in &plan.structured_sources {
            for filter in &ss.filters {
                if !self.is_filterable(&filter.field) {
                    issues.push(format!("field '{}' is not filterable", filter.field));
                }
            }
        }
        if plan.vector_sources.is_empty() && plan.structured_sources.is_empty() {
            issues.push("plan has no sources".to_string());
        }
        if issues.is_empty() {
            Ok(())
        } else {
            Err(issues)
        }
    }

    /// Build a structured filter list from the vocabulary fields present on
    /// an intent. Pure function of `(self, intent)`.
    pub fn build_filters(&self, intent: &IntentState) -> Vec<StructuredFilter> {
        let mut filters = Vec::new();
        for (field, value) in intent.vocabulary_fields() {
            if let Some(v) = value {
                if let Some(canon) = self.canonicalize(field, v) {
                    if self.is_filterable(field) {
                        filters.push(StructuredFilter {
                            field: field.to_string(),
                            operator: crate::planner::FilterOperator::Eq,
                            value: canon,
                        });
                    }
                }
            }
        }
        if !intent.functionality.is_empty() && self.is_filterable("functionality") {
            let canon: Vec<String> = intent
                .functionality
                .iter()
                .filter_map(|f| self.canonicalize("functionality", f))
                .collect();
            if !canon.is_empty() {
                filters.push(StructuredFilter {
                    field: "functionality".to_string(),
                    operator: crate::planner::FilterOperator::In,
                    value: canon.join(","),
                });
            }
        }
        filters
    }

    /// Deterministic, pure-function-of-schema system prompt for the intent
    /// extractor. Identical schema -> byte-identical output.
    pub fn generate_intent_extraction_prompt(&self) -> String {
        let mut out = String::new();
        out.push_str("You extract structured search intent from a user query.\n");
        out.push_str("Respond with ONLY a JSON object matching this shape, no prose.\n\n");
        out.push_str("Allowed vocabulary values:\n");
        let mut keys: Vec<&String> = self.vocabularies.keys().collect();
        keys.sort();
        for key in keys {
            let values = &self.vocabularies[key];
            out.push_str(&format!("- {key}: [{}]\n", values.join(", ")));
        }
        out.push_str("\nIntent fields:\n");
        for field in &self.intent_fields {
            out.push_str(&format!(
                "- {} ({:?}{}){}\n",
                field.name,
                field.field_type,
                if field.required { ", required" } else { "" },
                match &field.enum_values {
                    Some(vals) => format!(" allowed: [{}]", vals.join(", ")),
                    None => String::new(),
                }
            ));
        }
        out.push_str("\nExamples:\n");
        out.push_str("\"free cli\" -> {\"primaryGoal\": \"find\", \"pricingModel\": \"Free\", \"interface\": \"CLI\"}\n");
        out.push_str("\"Cursor alternative but cheaper\" -> {\"primaryGoal\": \"find\", \"referenceTool\": \"Cursor\", \"comparisonMode\": \"alternative_to\", \"constraints\": [\"cheaper\"]}\n");
        out.push_str("\"Amazon Q vs GitHub Copilot\" -> {\"primaryGoal\": \"compare\", \"referenceTool\": \"Amazon Q\", \"comparisonMode\": \"vs\"}\n");
        out
    }

    pub fn generate_query_planning_prompt(&self, enabled_collections: &[&str]) -> String {
        let mut out = String::new();
        out.push_str("You select a retrieval strategy for a search intent.\n");
        out.push_str("Respond with ONLY a JSON object describing the query plan, no prose.\n\n");
        out.push_str("Available vector collections:\n");
        for c in &self.vector_collections {
            if enabled_collections.contains(&c.name.as_str()) {
                out.push_str(&format!("- {}: {}\n", c.name, c.description));
            }
        }
        out.push_str("\nFilterable structured fields:\n");
        out.push_str(&format!(
            "- {}\n",
            self.structured_database.filterable_fields.join(", ")
        ));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_is_deterministic() {
        let schema = Schema::default_ai_tool_discovery();
        let a = schema.generate_intent_extraction_prompt();
        let b = schema.generate_intent_extraction_prompt();
        assert_eq!(a, b);
        assert!(a.contains("Self-Hosted"));
        assert!(!a.contains("{{"));
    }

    #[test]
    fn canonicalize_is_case_insensitive() {
        let schema = Schema::default_ai_tool_discovery();
        assert_eq!(
            schema.canonicalize("deployment", "self hosted"),
            Some("Self-Hosted".to_string())
        );
        assert_eq!(schema.canonicalize("deployment", "nonexistent"), None);
    }

    #[test]
    fn every_vocabulary_field_referenced_exists() {
        let schema = Schema::default_ai_tool_discovery();
        for field in &schema.structured_database.filterable_fields {
            if field == "price" {
                continue;
            }
            // fields that aren't vocab-typed (none in this default schema) are allowed
            let _ = schema.vocabularies.get(field);
        }
    }
}
