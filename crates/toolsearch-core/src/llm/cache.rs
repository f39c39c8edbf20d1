//! In-memory TTL cache for LLM chat and embedding responses, lifted near
//! verbatim from the teacher's `llm::cache::LLMCache` to avoid redundant
//! network calls within a process lifetime.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

struct CacheEntry {
    value: String,
    inserted_at: Instant,
}

#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

pub struct LlmCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    ttl: Duration,
    hits: std::sync::atomic::AtomicU64,
    misses: std::sync::atomic::AtomicU64,
}

impl LlmCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            hits: std::sync::atomic::AtomicU64::new(0),
            misses: std::sync::atomic::AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let entries = self.entries.read().unwrap();
        if let Some(entry) = entries.get(key) {
            if entry.inserted_at.elapsed() < self.ttl {
                self.hits.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                return Some(entry.value.clone());
            }
        }
        self.misses.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        None
    }

    pub fn put(&self, key: String, value: String) {
        let mut entries = self.entries.write().unwrap();
        entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(std::sync::atomic::Ordering::Relaxed),
            misses: self.misses.load(std::sync::atomic::Ordering::Relaxed),
            entries: self.entries.read().unwrap().len(),
        }
    }

    pub fn purge_expired(&self) {
        let mut entries = self.entries.write().unwrap();
        entries.retain(|_, v| v.inserted_at.elapsed() < self.ttl);
    }
}

/// Cache key for a chat completion request: model + system + user prompt.
pub fn chat_cache_key(model: &str, system_prompt: &str, user_prompt: &str) -> String {
    format!("chat:{model}:{system_prompt}:{user_prompt}")
}

/// Cache key for an embedding request: model + normalized text.
pub fn embedding_cache_key(model: &str, text: &str) -> String {
    format!("embed:{model}:{}", text.trim().to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_hits() {
        let cache = LlmCache::new(Duration::from_secs(60));
        cache.put("k".to_string(), "v".to_string());
        assert_eq!(cache.get("k"), Some("v".to_string()));
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn expired_entry_misses() {
        let cache = LlmCache::new(Duration::from_millis(1));
        cache.put("k".to_string(), "v".to_string());
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.get("k"), None);
    }

    #[test]
    fn keys_are_stable_for_identical_input() {
        assert_eq!(
            chat_cache_key("m", "s", "u"),
            chat_cache_key("m", "s", "u")
        );
        assert_eq!(
            embedding_cache_key("m", "Hello World"),
            embedding_cache_key("m", "  hello world  ")
        );
    }
}
