//! Error taxonomy for the search pipeline, with CLI exit-code mapping.

use thiserror::Error;

/// Exit codes surfaced by the CLI binary; mirrors the taxonomy in `§7`.
pub mod exit_codes {
    pub const OK: i32 = 0;
    pub const BAD_INPUT: i32 = 2;
    pub const INTENT_FAILED: i32 = 10;
    pub const PLAN_FAILED: i32 = 11;
    pub const FUSION_FAILED: i32 = 12;
    pub const DEADLINE_EXCEEDED: i32 = 13;
    pub const CANCELLED: i32 = 14;
    pub const UPSTREAM: i32 = 20;
    pub const INTERNAL: i32 = 70;
}

#[derive(Debug, Error)]
pub enum ToolSearchError {
    #[error("query must not be empty")]
    BadInput,

    #[error("intent extraction failed: {0}")]
    Intent(String),

    #[error("query planning failed: {0}")]
    Plan(String),

    #[error("source '{source}' failed: {message}")]
    Source { source: String, message: String },

    #[error("fusion failed: all sources errored")]
    Fusion,

    #[error("embedding request failed: {0}")]
    Embed(String),

    #[error("llm request failed: {0}")]
    Llm(String),

    #[error("store request failed: {0}")]
    Store(String),

    #[error("request deadline of {0}ms exceeded")]
    Deadline(u64),

    #[error("request cancelled")]
    Cancelled,

    #[error("schema validation failed: {0}")]
    Schema(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Regex(#[from] regex::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ToolSearchError {
    pub fn exit_code(&self) -> i32 {
        match self {
            ToolSearchError::BadInput => exit_codes::BAD_INPUT,
            ToolSearchError::Intent(_) => exit_codes::INTENT_FAILED,
            ToolSearchError::Plan(_) => exit_codes::PLAN_FAILED,
            ToolSearchError::Fusion => exit_codes::FUSION_FAILED,
            ToolSearchError::Deadline(_) => exit_codes::DEADLINE_EXCEEDED,
            ToolSearchError::Cancelled => exit_codes::CANCELLED,
            ToolSearchError::Source { .. }
            | ToolSearchError::Embed(_)
            | ToolSearchError::Llm(_)
            | ToolSearchError::Store(_)
            | ToolSearchError::Http(_) => exit_codes::UPSTREAM,
            ToolSearchError::Schema(_)
            | ToolSearchError::Json(_)
            | ToolSearchError::Sqlite(_)
            | ToolSearchError::Regex(_)
            | ToolSearchError::Yaml(_)
            | ToolSearchError::Io(_) => exit_codes::INTERNAL,
        }
    }

    /// Whether this error is expected to be recovered locally (per-source),
    /// as opposed to one that should short-circuit the pipeline.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ToolSearchError::Source { .. })
    }
}

pub type Result<T> = std::result::Result<T, ToolSearchError>;
