//! CLI argument definitions.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "toolsearch")]
#[command(author, version, about = "AI-tool discovery search pipeline")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output format
    #[arg(long, global = true, value_enum, default_value = "cli")]
    pub format: OutputFormat,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to a config YAML file overriding environment defaults
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a search query through the full pipeline
    Search(SearchArgs),

    /// Ingest tool records and vector payloads (external pipeline; stub)
    Seed(SeedArgs),

    /// Create/validate the plan-cache SQLite schema and required indexes
    IndexEnsure(IndexEnsureArgs),

    /// Report process liveness (dependency readiness is out of scope)
    Health,
}

#[derive(Args)]
pub struct SearchArgs {
    /// Search query
    pub query: Vec<String>,

    /// Emit per-stage checkpoints to the logs
    #[arg(long)]
    pub checkpoints: bool,

    /// Request budget in milliseconds before the pipeline aborts
    #[arg(long)]
    pub budget_ms: Option<u64>,
}

#[derive(Args)]
pub struct SeedArgs {
    /// Path to a catalog file to ingest (not implemented: ingestion is an
    /// external pipeline; this stub only validates the path)
    pub path: PathBuf,
}

#[derive(Args)]
pub struct IndexEnsureArgs {
    /// Path to the plan-cache SQLite database
    #[arg(long)]
    pub cache_path: Option<PathBuf>,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Cli,
    Json,
}
