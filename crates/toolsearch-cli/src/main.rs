mod app;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use toolsearch_core::cache::PlanCache;
use toolsearch_core::config::Config;
use toolsearch_core::error::ToolSearchError;
use toolsearch_core::executor::QueryExecutor;
use toolsearch_core::intent::IntentExtractor;
use toolsearch_core::llm::{HttpEmbedder, HttpLlmClient, LlmCache};
use toolsearch_core::pipeline::{PipelineDriver, SearchOptions};
use toolsearch_core::planner::QueryPlanner;
use toolsearch_core::schema::Schema;
use toolsearch_core::store::{CandidateMetadata, DocHit, InMemoryStore};

use app::{Cli, Commands, OutputFormat};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let exit_code = run(cli).await;
    std::process::exit(exit_code);
}

async fn run(cli: Cli) -> i32 {
    let config = match Config::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("failed to load config: {e}");
            return ToolSearchError::Schema(e.to_string()).exit_code();
        }
    };

    match cli.command {
        Commands::Search(args) => run_search(args, config, cli.format).await,
        Commands::Seed(args) => run_seed(args),
        Commands::IndexEnsure(args) => run_index_ensure(args, config),
        Commands::Health => {
            println!("ok: process alive (dependency readiness is out of scope for this core)");
            0
        }
    }
}

async fn run_search(args: app::SearchArgs, config: Config, format: OutputFormat) -> i32 {
    let query = args.query.join(" ");
    let schema = Arc::new(Schema::default_ai_tool_discovery());

    if config.embedding.dimension != schema.embedding_dimension {
        eprintln!(
            "EMBEDDING_DIM ({}) does not match schema.embeddingDimension ({})",
            config.embedding.dimension, schema.embedding_dimension
        );
        return ToolSearchError::Schema("embedding dimension mismatch".to_string()).exit_code();
    }

    let llm_cache = Arc::new(LlmCache::new(Duration::from_secs(300)));
    let llm_client = match HttpLlmClient::new(config.llm.clone(), llm_cache.clone()) {
        Ok(c) => Arc::new(c),
        Err(e) => {
            eprintln!("failed to build llm client: {e}");
            return ToolSearchError::Llm(e.to_string()).exit_code();
        }
    };
    let embedder = match HttpEmbedder::new(config.embedding.clone(), llm_cache) {
        Ok(e) => Arc::new(e),
        Err(e) => {
            eprintln!("failed to build embedder: {e}");
            return ToolSearchError::Embed(e.to_string()).exit_code();
        }
    };

    let store = Arc::new(demo_store());

    let plan_cache = match PlanCache::open_in_memory(
        config.cache.similarity_threshold,
        config.cache.confidence_threshold,
        config.cache.store_confidence_threshold,
        schema.version.clone(),
    ) {
        Ok(c) => Arc::new(c),
        Err(e) => {
            eprintln!("failed to open plan cache: {e}");
            return e.exit_code();
        }
    };

    let budget = Duration::from_millis(args.budget_ms.unwrap_or(config.request_budget_ms));
    let driver = PipelineDriver::new(
        schema,
        embedder.clone() as Arc<dyn toolsearch_core::llm::Embedder>,
        IntentExtractor::new(llm_client as Arc<dyn toolsearch_core::llm::LlmClient>),
        QueryPlanner::new(),
        QueryExecutor::new(store.clone(), store, embedder),
        plan_cache,
        budget,
    );

    let options = SearchOptions {
        enable_checkpoints: args.checkpoints,
    };

    match driver.search(&query, options, CancellationToken::new()).await {
        Ok(response) => {
            print_response(&response, format);
            0
        }
        Err(e) => {
            eprintln!("search failed: {e}");
            e.exit_code()
        }
    }
}

fn print_response(response: &toolsearch_core::pipeline::SearchResponse, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let candidates: Vec<_> = response
                .candidates
                .iter()
                .map(|c| serde_json::json!({"id": c.id, "score": c.score, "name": c.metadata.name}))
                .collect();
            let payload = serde_json::json!({
                "candidates": candidates,
                "reasoning": response.reasoning,
                "errors": response.errors,
            });
            println!("{}", serde_json::to_string_pretty(&payload).unwrap_or_default());
        }
        OutputFormat::Cli => {
            if let Some(reasoning) = &response.reasoning {
                println!("{reasoning}");
            }
            for (i, candidate) in response.candidates.iter().enumerate() {
                println!("{:>3}. {:<30} score={:.4}", i + 1, candidate.metadata.name, candidate.score);
            }
            for err in &response.errors {
                eprintln!("warning: {err}");
            }
        }
    }
}

fn run_seed(args: app::SeedArgs) -> i32 {
    if !args.path.exists() {
        eprintln!("seed source not found: {}", args.path.display());
        return ToolSearchError::BadInput.exit_code();
    }
    println!(
        "not implemented: catalog ingestion from {} is an external pipeline; this command only validates the path",
        args.path.display()
    );
    0
}

fn run_index_ensure(args: app::IndexEnsureArgs, config: Config) -> i32 {
    let schema = Schema::default_ai_tool_discovery();
    let result = match args.cache_path {
        Some(path) => PlanCache::open(
            &path,
            config.cache.similarity_threshold,
            config.cache.confidence_threshold,
            config.cache.store_confidence_threshold,
            schema.version,
        ),
        None => PlanCache::open_in_memory(
            config.cache.similarity_threshold,
            config.cache.confidence_threshold,
            config.cache.store_confidence_threshold,
            schema.version,
        ),
    };
    match result {
        Ok(_) => {
            println!("plan cache schema is up to date");
            0
        }
        Err(e) => {
            eprintln!("failed to ensure plan cache schema: {e}");
            e.exit_code()
        }
    }
}

/// A tiny in-memory demo catalog so `search` is runnable without a real
/// vector/document store configured. Real ingestion is the out-of-scope
/// `seed` pipeline (`SPEC_FULL.md §6`).
fn demo_store() -> InMemoryStore {
    let mut store = InMemoryStore::new();
    let tools = [
        ("fd", vec![1.0, 0.0, 0.0], "CLI", "Self-Hosted", "Free"),
        ("ripgrep", vec![0.9, 0.1, 0.0], "CLI", "Self-Hosted", "Free"),
        ("cursor", vec![0.0, 1.0, 0.0], "Desktop", "Cloud", "Freemium"),
        ("github-copilot", vec![0.1, 0.9, 0.0], "IDE Plugin", "Cloud", "Paid"),
    ];
    for (name, vector, interface, deployment, pricing) in tools {
        let metadata = CandidateMetadata {
            name: name.to_string(),
            interface: Some(interface.to_string()),
            deployment: Some(deployment.to_string()),
            pricing: Some(pricing.to_string()),
            ..Default::default()
        };
        store.seed_vector("tools_semantic", name, vector.clone(), metadata.clone());
        store.seed_doc(
            "tools",
            DocHit {
                id: name.to_string(),
                metadata,
            },
        );
    }
    store
}
