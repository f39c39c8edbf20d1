//! HTTP chat client with a structured-output-first, tolerant-JSON-fallback
//! policy. Grounded on the teacher's `llm::client::VLLMClient`: same
//! `reqwest::Client::builder().timeout(..)` construction, same cache-first
//! call shape, same metrics snapshot idea (trimmed to request counters).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::LlmServiceConfig;
use crate::llm::cache::{chat_cache_key, LlmCache};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Issue a chat completion and return the raw text response. Callers
    /// are responsible for tolerant JSON extraction (see `intent::parse_intent_response`).
    async fn chat(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> anyhow::Result<String>;
}

#[derive(Debug, Default)]
pub struct ApiMetrics {
    pub requests_total: AtomicU64,
    pub requests_failed: AtomicU64,
    pub cache_hits: AtomicU64,
}

#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub requests_failed: u64,
    pub cache_hits: u64,
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

pub struct HttpLlmClient {
    http: reqwest::Client,
    config: LlmServiceConfig,
    cache: Arc<LlmCache>,
    metrics: ApiMetrics,
}

impl HttpLlmClient {
    pub fn new(config: LlmServiceConfig, cache: Arc<LlmCache>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(Self {
            http,
            config,
            cache,
            metrics: ApiMetrics::default(),
        })
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_total: self.metrics.requests_total.load(Ordering::Relaxed),
            requests_failed: self.metrics.requests_failed.load(Ordering::Relaxed),
            cache_hits: self.metrics.cache_hits.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    #[tracing::instrument(skip(self, system_prompt, user_prompt), fields(model = %self.config.model))]
    async fn chat(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> anyhow::Result<String> {
        let key = chat_cache_key(&self.config.model, system_prompt, user_prompt);
        if let Some(cached) = self.cache.get(&key) {
            self.metrics.cache_hits.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("llm chat cache hit");
            return Ok(cached);
        }

        self.metrics.requests_total.fetch_add(1, Ordering::Relaxed);
        let messages = vec![
            ChatMessage {
                role: "system".to_string(),
                content: system_prompt.to_string(),
            },
            ChatMessage {
                role: "user".to_string(),
                content: user_prompt.to_string(),
            },
        ];
        let request = ChatCompletionRequest {
            model: &self.config.model,
            messages: &messages,
            temperature,
            max_tokens,
        };

        let response = self
            .http
            .post(&self.config.endpoint)
            .json(&request)
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                self.metrics.requests_failed.fetch_add(1, Ordering::Relaxed);
                return Err(e.into());
            }
        };

        if !response.status().is_success() {
            self.metrics.requests_failed.fetch_add(1, Ordering::Relaxed);
            anyhow::bail!("llm endpoint returned status {}", response.status());
        }

        let body: ChatCompletionResponse = response.json().await?;
        let content = body
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| anyhow::anyhow!("llm response had no choices"))?;

        self.cache.put(key, content.clone());
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_snapshot_starts_at_zero() {
        let metrics = ApiMetrics::default();
        assert_eq!(metrics.requests_total.load(Ordering::Relaxed), 0);
    }
}
