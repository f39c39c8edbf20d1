//! Stage 1: turn a free-form query into a schema-valid [`IntentState`] via a
//! constrained LLM call, with tolerant JSON recovery. Grounded on
//! `llm::http_query_parser::HttpQueryParser::parse` in the teacher.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{Result, ToolSearchError};
use crate::llm::LlmClient;
use crate::schema::Schema;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceRange {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub operator: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentState {
    #[serde(default)]
    pub primary_goal: Option<String>,
    #[serde(default)]
    pub reference_tool: Option<String>,
    #[serde(default)]
    pub comparison_mode: Option<String>,
    #[serde(default)]
    pub pricing_model: Option<String>,
    #[serde(default)]
    pub billing_period: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub interface: Option<String>,
    #[serde(default)]
    pub deployment: Option<String>,
    #[serde(default)]
    pub industry: Option<String>,
    #[serde(default)]
    pub user_type: Option<String>,
    #[serde(default)]
    pub functionality: Vec<String>,
    #[serde(default)]
    pub price_range: Option<PriceRange>,
    #[serde(default)]
    pub constraints: Vec<String>,
    #[serde(default)]
    pub semantic_variants: Vec<String>,
    #[serde(default)]
    pub confidence: f32,
}

impl IntentState {
    /// Iterate over `(fieldName, Option<&value>)` for the single-valued
    /// vocabulary fields, used by schema validation and filter building.
    pub fn vocabulary_fields(&self) -> Vec<(&'static str, Option<&str>)> {
        vec![
            ("pricingModel", self.pricing_model.as_deref()),
            ("billingPeriod", self.billing_period.as_deref()),
            ("category", self.category.as_deref()),
            ("interface", self.interface.as_deref()),
            ("deployment", self.deployment.as_deref()),
            ("industry", self.industry.as_deref()),
            ("userType", self.user_type.as_deref()),
        ]
    }

    pub fn has_free_text_signal(&self) -> bool {
        self.reference_tool.is_some() || !self.semantic_variants.is_empty()
    }

    pub fn has_only_vocabulary_filters(&self) -> bool {
        !self.has_free_text_signal()
            && (self.vocabulary_fields().iter().any(|(_, v)| v.is_some())
                || !self.functionality.is_empty())
    }
}

pub struct IntentExtractor {
    client: Arc<dyn LlmClient>,
}

impl IntentExtractor {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self { client }
    }

    #[tracing::instrument(skip(self, schema), fields(query_len = query.len()))]
    pub async fn extract(&self, query: &str, schema: &Schema) -> Result<IntentState> {
        let trimmed = query.trim();
        if trimmed.is_empty() {
            return Err(ToolSearchError::BadInput);
        }

        let system_prompt = schema.generate_intent_extraction_prompt();
        let user_prompt = format!("Query: {trimmed}");

        match self.try_extract_once(&system_prompt, &user_prompt, schema).await {
            Ok(intent) => Ok(intent),
            Err(first_err) => {
                tracing::debug!(error = %first_err, "intent extraction retry with tightened prompt");
                let tightened = format!(
                    "{system_prompt}\nReturn ONLY the JSON object, no prose, no markdown fences."
                );
                self.try_extract_once(&tightened, &user_prompt, schema)
                    .await
                    .map_err(|e| ToolSearchError::Intent(e.to_string()))
            }
        }
    }

    async fn try_extract_once(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        schema: &Schema,
    ) -> Result<IntentState> {
        let raw = self
            .client
            .chat(system_prompt, user_prompt, 0.2, 500)
            .await
            .map_err(|e| ToolSearchError::Llm(e.to_string()))?;

        let intent = parse_intent_response(&raw)?;
        schema
            .validate_intent(&intent)
            .map_err(|issues| ToolSearchError::Intent(issues.join("; ")))?;
        Ok(intent)
    }
}

/// Tolerant JSON extraction: strips markdown fences / reasoning wrappers,
/// locates the first balanced `{...}` object, and deserializes it.
/// Mirrors `llm::http_query_parser::parse_query_response`.
pub fn parse_intent_response(raw: &str) -> Result<IntentState> {
    let cleaned = strip_wrappers(raw);
    let json_slice = extract_json_object(&cleaned)
        .ok_or_else(|| ToolSearchError::Intent("no JSON object found in response".to_string()))?;
    serde_json::from_str(json_slice).map_err(|e| ToolSearchError::Intent(e.to_string()))
}

fn strip_wrappers(raw: &str) -> String {
    let mut s = raw.trim().to_string();
    if let Some(start) = s.find("</think>") {
        s = s[start + "</think>".len()..].trim().to_string();
    }
    if let Some(stripped) = s.strip_prefix("```json") {
        s = stripped.to_string();
    } else if let Some(stripped) = s.strip_prefix("```") {
        s = stripped.to_string();
    }
    if let Some(stripped) = s.strip_suffix("```") {
        s = stripped.to_string();
    }
    s.trim().to_string()
}

fn extract_json_object(s: &str) -> Option<&str> {
    let start = s.find('{')?;
    let end = s.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&s[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_object_from_markdown_fence() {
        let raw = "```json\n{\"primaryGoal\": \"find\"}\n```";
        let intent = parse_intent_response(raw).unwrap();
        assert_eq!(intent.primary_goal.as_deref(), Some("find"));
    }

    #[test]
    fn extracts_object_after_think_block() {
        let raw = "<think>reasoning here</think>\n{\"primaryGoal\": \"compare\"}";
        let intent = parse_intent_response(raw).unwrap();
        assert_eq!(intent.primary_goal.as_deref(), Some("compare"));
    }

    #[test]
    fn rejects_missing_object() {
        let raw = "no json here at all";
        assert!(parse_intent_response(raw).is_err());
    }

    #[test]
    fn reference_tool_only_has_free_text_signal() {
        let mut intent = IntentState::default();
        intent.reference_tool = Some("Cursor".to_string());
        assert!(intent.has_free_text_signal());
        assert!(!intent.has_only_vocabulary_filters());
    }
}
