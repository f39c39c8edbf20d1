//! Process-wide configuration, loaded from environment variables with a
//! YAML override file on top, following the same `load`/`save` shape as
//! the teacher's config layer.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, ToolSearchError};

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_string_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Settings for a remote LLM chat endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmServiceConfig {
    pub endpoint: String,
    pub model: String,
    pub timeout_ms: u64,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for LlmServiceConfig {
    fn default() -> Self {
        Self {
            endpoint: env_string_or("LLM_ENDPOINT", "http://localhost:8080/v1/chat/completions"),
            model: env_string_or("LLM_MODEL", "local-model"),
            timeout_ms: env_or("LLM_TIMEOUT_MS", 5_000),
            max_tokens: env_or("LLM_MAX_TOKENS", 500),
            temperature: env_or("LLM_TEMPERATURE", 0.2),
        }
    }
}

/// Settings for a remote embedding endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingServiceConfig {
    pub endpoint: String,
    pub model: String,
    pub dimension: usize,
    pub timeout_ms: u64,
}

impl Default for EmbeddingServiceConfig {
    fn default() -> Self {
        Self {
            endpoint: env_string_or(
                "EMBEDDING_ENDPOINT",
                "http://localhost:8080/v1/embeddings",
            ),
            model: env_string_or("EMBEDDING_MODEL", "local-embedding"),
            dimension: env_or("EMBEDDING_DIM", 768),
            timeout_ms: env_or("EMBED_TIMEOUT_MS", 2_000),
        }
    }
}

/// Settings for the vector store, document store, and plan-cache store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub vector_store_url: String,
    pub doc_store_url: String,
    pub cache_store_url: String,
    pub timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        let doc_store_url = env_string_or("DOC_STORE_URL", "sqlite://toolsearch.db");
        Self {
            vector_store_url: env_string_or("VECTOR_STORE_URL", "http://localhost:6333"),
            cache_store_url: env_string_or("CACHE_STORE_URL", &doc_store_url),
            doc_store_url,
            timeout_ms: env_or("STORE_TIMEOUT_MS", 2_000),
        }
    }
}

/// Cache thresholds from `§6 Configuration`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub similarity_threshold: f32,
    pub confidence_threshold: f32,
    pub store_confidence_threshold: f32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: env_or("SIMILARITY_THRESHOLD", 0.92),
            confidence_threshold: env_or("CACHE_CONFIDENCE_THRESHOLD", 0.5),
            store_confidence_threshold: env_or("CACHE_STORE_CONFIDENCE_THRESHOLD", 0.5),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub llm: LlmServiceConfig,
    pub embedding: EmbeddingServiceConfig,
    pub store: StoreConfig,
    pub cache: CacheConfig,
    pub request_budget_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            llm: LlmServiceConfig::default(),
            embedding: EmbeddingServiceConfig::default(),
            store: StoreConfig::default(),
            cache: CacheConfig::default(),
            request_budget_ms: env_or("REQUEST_BUDGET_MS", 10_000),
        }
    }
}

impl Config {
    /// Load config: environment variables first, then a YAML override file
    /// merged on top when present.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let base = Self::default();
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_path(),
        };
        if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            let overrides: Config = serde_yaml::from_str(&contents)?;
            Ok(overrides)
        } else {
            Ok(base)
        }
    }

    pub fn save(&self, path: Option<&Path>) -> Result<()> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_path(),
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let yaml = serde_yaml::to_string(self).map_err(ToolSearchError::Yaml)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("toolsearch")
            .join("config.yaml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_thresholds() {
        let cfg = Config::default();
        assert!(cfg.cache.similarity_threshold > 0.0 && cfg.cache.similarity_threshold <= 1.0);
        assert!(cfg.request_budget_ms > 0);
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let cfg = Config::default();
        cfg.save(Some(&path)).unwrap();
        let loaded = Config::load(Some(&path)).unwrap();
        assert_eq!(loaded.llm.model, cfg.llm.model);
    }
}
