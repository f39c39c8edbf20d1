//! LLM chat client, embedding client, and a shared TTL response cache.

mod cache;
mod client;
mod embedder;

pub use cache::LlmCache;
pub use client::{ChatMessage, HttpLlmClient, LlmClient};
pub use embedder::{Embedder, HttpEmbedder};
