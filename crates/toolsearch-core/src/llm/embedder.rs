//! Embedding client trait and HTTP implementation. Grounded on the
//! teacher's `llm::http_embedder::HttpEmbedder`, which wraps an HTTP client
//! behind a small trait seam so tests can substitute a fake.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::config::EmbeddingServiceConfig;
use crate::llm::cache::{embedding_cache_key, LlmCache};

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>>;
    async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;
    fn dimension(&self) -> usize;
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

pub struct HttpEmbedder {
    http: reqwest::Client,
    config: EmbeddingServiceConfig,
    cache: Arc<LlmCache>,
}

impl HttpEmbedder {
    pub fn new(config: EmbeddingServiceConfig, cache: Arc<LlmCache>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(Self { http, config, cache })
    }

    fn encode(vector: &[f32]) -> String {
        vector
            .iter()
            .flat_map(|f| f.to_le_bytes())
            .map(|b| format!("{b:02x}"))
            .collect()
    }

    fn decode(hex: &str) -> Option<Vec<f32>> {
        let bytes: Vec<u8> = (0..hex.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&hex[i..i + 2], 16))
            .collect::<std::result::Result<_, _>>()
            .ok()?;
        Some(
            bytes
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        )
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    #[tracing::instrument(skip(self, text))]
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let key = embedding_cache_key(&self.config.model, text);
        if let Some(cached) = self.cache.get(&key) {
            if let Some(vector) = Self::decode(&cached) {
                return Ok(vector);
            }
        }

        let mut vectors = self.embed_batch_uncached(std::slice::from_ref(&text.to_string())).await?;
        let vector = vectors.pop().ok_or_else(|| anyhow::anyhow!("no embedding returned"))?;
        self.cache.put(key, Self::encode(&vector));
        Ok(vector)
    }

    #[tracing::instrument(skip(self, texts), fields(batch_size = texts.len()))]
    async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        let mut results = vec![Vec::new(); texts.len()];
        let mut to_fetch = Vec::new();
        let mut to_fetch_idx = Vec::new();

        for (i, text) in texts.iter().enumerate() {
            let key = embedding_cache_key(&self.config.model, text);
            if let Some(cached) = self.cache.get(&key).and_then(|c| Self::decode(&c)) {
                results[i] = cached;
            } else {
                to_fetch.push(text.clone());
                to_fetch_idx.push(i);
            }
        }

        if !to_fetch.is_empty() {
            let fetched = self.embed_batch_uncached(&to_fetch).await?;
            for (slot, vector) in to_fetch_idx.into_iter().zip(fetched.into_iter()) {
                let key = embedding_cache_key(&self.config.model, &texts[slot]);
                self.cache.put(key, Self::encode(&vector));
                results[slot] = vector;
            }
        }

        Ok(results)
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }
}

impl HttpEmbedder {
    async fn embed_batch_uncached(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        let request = EmbeddingRequest {
            model: &self.config.model,
            input: texts,
        };
        let response = self.http.post(&self.config.endpoint).json(&request).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("embedding endpoint returned status {}", response.status());
        }
        let body: EmbeddingResponse = response.json().await?;
        Ok(body.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trips() {
        let v = vec![0.1f32, -0.5, 2.25];
        let encoded = HttpEmbedder::encode(&v);
        let decoded = HttpEmbedder::decode(&encoded).unwrap();
        assert_eq!(decoded, v);
    }
}
