//! unisearch-server: the search engine served over HTTP with the
//! reference in-memory backends and a governance policy directory.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use unisearch::backends::memory::MemoryProvider;
use unisearch::backends::memory_cache::MemoryCache;
use unisearch::config::{EngineConfig, GovernanceConfig, HybridConfig, PerformanceConfig};
use unisearch::provider::CacheProvider;
use unisearch::server::{router, AppState};
use unisearch::SearchEngine;

#[derive(Debug, Parser)]
#[command(name = "unisearch-server", about = "Universal search facade server")]
struct Args {
    #[arg(long, env = "PORT", default_value_t = 8080)]
    port: u16,

    /// Directory of per-dataset governance policy files
    #[arg(long, env = "GOVERNANCE_DIR", default_value = "governance")]
    governance_dir: PathBuf,

    /// Rows to seed into the reference healthcare dataset
    #[arg(long, env = "SEED_ROWS", default_value_t = 1000)]
    seed_rows: usize,

    /// Fan every cache-eligible request out to both backends and merge
    #[arg(long, env = "HYBRID_ENABLED", default_value_t = false)]
    hybrid: bool,

    /// Log every query (also unlocks error detail in HTTP responses)
    #[arg(long, env = "LOG_QUERIES", default_value_t = false)]
    log_queries: bool,

    /// External database DSN; provider wiring is deployment-specific
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// External cache URL; provider wiring is deployment-specific
    #[arg(long, env = "REDIS_URL")]
    redis_url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    if args.database_url.is_some() || args.redis_url.is_some() {
        eprintln!(
            "[server] DATABASE_URL/REDIS_URL set; this reference server runs the in-memory backends"
        );
    }

    let provider = Arc::new(MemoryProvider::new());
    provider.seed_synthetic("healthcare", args.seed_rows);

    // The cache serves the same documents as a searchable replica
    let cache = Arc::new(MemoryCache::new());
    cache.index(provider.dataset_docs("healthcare"));

    let config = EngineConfig {
        governance: Some(GovernanceConfig::new(&args.governance_dir)),
        hybrid: HybridConfig {
            enabled: args.hybrid,
            ..Default::default()
        },
        performance: PerformanceConfig {
            log_queries: args.log_queries,
            ..Default::default()
        },
        ..Default::default()
    };

    let engine = Arc::new(SearchEngine::new(
        provider.clone(),
        Some(cache as Arc<dyn CacheProvider>),
        config,
    ));
    engine.connect().await.context("connecting backends")?;

    let state = Arc::new(AppState {
        engine,
        provider,
    });
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", args.port))
        .await
        .with_context(|| format!("binding port {}", args.port))?;
    eprintln!("[server] listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await.context("serving")?;
    Ok(())
}
