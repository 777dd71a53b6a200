use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use log::info;
use std::path::PathBuf;

use drive_rag::chunking::truncate_chars;
use drive_rag::config::RagConfig;
use drive_rag::document::DirectorySource;
use drive_rag::embeddings::Embedder;
use drive_rag::index::IndexStore;
use drive_rag::openai::{OpenAiClient, OpenAiConfig};
use drive_rag::pipeline::IndexingPipeline;
use drive_rag::rag::RagEngine;
use drive_rag::retrieval::Retriever;
use drive_rag::RagError;

/// Hits retrieved for conversational answers
const CHAT_TOP_K: usize = 7;

/// Retrieval-augmented assistant over a folder of documents
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Directory holding the vector index and metadata (overrides RAG_INDEX_DIR)
    #[arg(long, global = true)]
    index_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Rebuild the index from every text and PDF document under a directory
    Index {
        /// Directory with the documents to index
        dir: PathBuf,
    },
    /// Show the chunks closest to a query
    Search {
        query: String,
        #[arg(short)]
        k: Option<usize>,
    },
    /// Answer a single question from the indexed documents
    Ask {
        query: String,
        #[arg(short)]
        k: Option<usize>,
    },
    /// Interactive question loop with a short rolling history
    Chat {
        #[arg(short)]
        k: Option<usize>,
        /// File the conversation is resumed from and saved to
        #[arg(long)]
        history: Option<PathBuf>,
        /// Start a new conversation, discarding the saved one
        #[arg(long, requires = "history")]
        reset: bool,
    },
    /// Show the size of the index and when it was last rebuilt
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize environment
    dotenv().ok();
    env_logger::init();

    let args = Args::parse();

    let mut config = RagConfig::from_env().context("Invalid RAG_* configuration")?;
    if let Some(dir) = args.index_dir {
        config.index_dir = dir;
    }
    let paths = config.index_paths();

    let openai_config = OpenAiConfig::from_env().context("Missing OpenAI configuration")?;
    let client = OpenAiClient::new(openai_config);
    let embedder = Embedder::new(client.clone(), config.embedding_dim, config.retry);

    match args.command {
        Command::Index { dir } => {
            info!("Indexing documents under {}", dir.display());
            let source = DirectorySource::new(&dir).context("Failed to open document directory")?;
            let chunker = config.chunker()?;

            let report = IndexingPipeline::new(&embedder, chunker)
                .with_preview_chars(config.preview_chars)
                .run(source, &paths)
                .await
                .context("Indexing failed")?;

            println!(
                "Indexed {} chunks from {}/{} documents ({} empty, {} unreadable, {} chunks failed)",
                report.chunks_embedded,
                report.documents_indexed,
                report.documents_seen,
                report.documents_skipped,
                report.extraction_failures,
                report.chunks_failed
            );
            println!(
                "Saved index to {} and metadata to {}",
                paths.index_path.display(),
                paths.metadata_path.display()
            );
        }

        Command::Search { query, k } => {
            let store = IndexStore::load(&paths).context("Failed to load index")?;
            let hits = Retriever::new(&embedder)
                .retrieve(&query, k.unwrap_or(config.top_k), &store)
                .await
                .context("Search failed")?;

            if hits.is_empty() {
                println!("No indexed chunks to search.");
            }
            for (rank, hit) in hits.iter().enumerate() {
                println!(
                    "{}. id={} dist={:.4} file={} chunk={}",
                    rank + 1,
                    hit.id,
                    hit.distance,
                    hit.metadata.filename,
                    hit.metadata.chunk_id
                );
                println!("{}\n---", truncate_chars(&hit.metadata.text_preview, 300));
            }
        }

        Command::Ask { query, k } => {
            let mut engine = RagEngine::new(embedder, client, paths, config.context_max_chars);
            let reply = engine
                .answer(&query, k.unwrap_or(CHAT_TOP_K), &[])
                .await
                .context("Failed to answer question")?;
            println!("{}", reply);
        }

        Command::Chat { k, history, reset } => {
            if let Some(path) = history.as_deref().filter(|_| reset) {
                if path.exists() {
                    std::fs::remove_file(path).context("Failed to reset chat history")?;
                    info!("Cleared chat history {}", path.display());
                }
            }
            let mut engine = RagEngine::new(embedder, client, paths, config.context_max_chars);
            engine
                .run_query_loop(k.unwrap_or(CHAT_TOP_K), history.as_deref())
                .await
                .context("Error in query loop")?;
        }

        Command::Status => match IndexStore::load(&paths) {
            Ok(store) => {
                let refreshed = Utc.timestamp_nanos(store.generation() as i64);
                println!(
                    "{} vectors (dim {}, model {})",
                    store.len(),
                    store.dim(),
                    store.model()
                );
                println!("Last refreshed: {}", refreshed.format("%b-%d-%Y %I:%M %p UTC"));
            }
            Err(RagError::MissingIndex(_)) => println!("Last refreshed: never"),
            Err(e) => return Err(e).context("Failed to load index"),
        },
    }

    Ok(())
}
