use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

mod chapters;
mod config;
mod engine;
mod error;
mod generator;
mod ingest;
mod ollama;
mod retriever;
mod server;
mod store;
#[cfg(test)]
mod test_support;

use chapters::ChapterCatalog;
use config::Config;
use engine::QueryEngine;
use generator::AnswerGenerator;
use ollama::{ModelBackend, OllamaClient};
use retriever::HybridRetriever;
use store::ChunkStore;

fn setup_logging() {
    let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_level));

    let is_development = std::env::var("DEVELOPMENT").is_ok() || std::env::var("DEV").is_ok();
    if is_development {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .compact()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .json()
            .init();
    }
}

fn usage() -> ! {
    eprintln!("Usage: manual-qa serve | manual-qa ingest <manual.pdf>");
    std::process::exit(2);
}

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = dotenv::dotenv() {
        eprintln!("Warning: could not load .env file: {e}");
    }
    setup_logging();

    let config = Config::from_env();
    tracing::info!(
        ollama_url = %config.ollama_url,
        embedding_model = %config.embedding_model,
        generation_model = %config.generation_model,
        data_dir = %config.data_dir,
        "starting manual-qa"
    );

    let mut args = std::env::args().skip(1);
    match args.next().as_deref() {
        Some("ingest") => {
            let path = args.next().map(PathBuf::from).unwrap_or_else(|| usage());
            run_ingest(&config, &path).await
        }
        Some("serve") | None => run_serve(&config).await,
        Some(_) => usage(),
    }
}

/// One-time batch mode: builds and persists the chunk index. Must not run
/// concurrently with a serving process against the same data directory.
async fn run_ingest(config: &Config, pdf_path: &PathBuf) -> Result<()> {
    let client = OllamaClient::new(config)?;
    client
        .verify()
        .await
        .context("Ollama must be reachable for ingestion")?;

    let catalog = ChapterCatalog::vehicle_manual();
    let store = ingest::ingest_manual(config, &client, &catalog, pdf_path).await?;

    tracing::info!(
        chunks = store.len(),
        chapters = ?store.chapters(),
        source = store.source().unwrap_or("unknown"),
        "ingestion complete"
    );
    Ok(())
}

/// Serving mode: loads the persisted index (fatal if missing) and answers
/// questions over HTTP. The store is read-only from here on.
async fn run_serve(config: &Config) -> Result<()> {
    let client = OllamaClient::new(config)?;
    client
        .verify()
        .await
        .context("Ollama must be reachable to serve queries")?;

    let store = ChunkStore::load(&config.embedding_model, &config.data_dir)
        .await
        .context("cannot serve without a chunk index")?;
    if store.is_empty() {
        anyhow::bail!(
            "chunk index in {} holds no chunks; re-run `manual-qa ingest <pdf>`",
            config.data_dir
        );
    }

    let stats = serde_json::json!({
        "source": store.source(),
        "chunks": store.len(),
        "chapters": store.chapters(),
        "embedding_model": store.model(),
        "generation_model": client.generation_model(),
        "min_similarity": config.min_similarity,
        "top_k": config.top_k,
    });

    let backend: Arc<dyn ModelBackend> = Arc::new(client);
    let store = Arc::new(store);
    let catalog = Arc::new(ChapterCatalog::vehicle_manual());

    let retriever = HybridRetriever::new(
        backend.clone(),
        store,
        catalog,
        config.min_similarity,
        config.top_k,
    );
    let generator = AnswerGenerator::new(backend);
    let engine = Arc::new(QueryEngine::new(retriever, generator));

    server::serve(engine, stats, &config.http_bind).await
}
