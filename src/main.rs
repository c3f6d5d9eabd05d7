//! # EduClaw — Grounded Q&A over curriculum content
//!
//! Usage:
//!   educlaw index --file lesson.md --id lesson-1 --title "Phép cộng"
//!   educlaw ask "Phép cộng là gì?"
//!   educlaw ask "Tổng là gì?" --lesson lesson-1
//!   educlaw stats

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use educlaw_core::EduClawConfig;
use educlaw_core::error::EduClawError;
use educlaw_core::traits::ContentStore;
use educlaw_core::types::ContentRecord;
use educlaw_rag::RagEngine;

#[derive(Parser)]
#[command(
    name = "educlaw",
    version,
    about = "📚 EduClaw — Grounded Q&A over curriculum content"
)]
struct Cli {
    /// Config file path (default: ~/.educlaw/config.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Index a lesson file into the knowledge base
    Index {
        /// Path to the lesson text/markdown file
        #[arg(short, long)]
        file: String,

        /// Content id (defaults to the file stem)
        #[arg(long)]
        id: Option<String>,

        /// Lesson title shown in answer sources (defaults to the file stem)
        #[arg(long)]
        title: Option<String>,

        /// Subject shown in answer sources
        #[arg(long, default_value = "General")]
        subject: String,

        /// Grade level
        #[arg(long)]
        grade: Option<u32>,
    },
    /// Ask a question against indexed lessons
    Ask {
        /// The question
        question: String,

        /// Restrict retrieval to one lesson id
        #[arg(short, long)]
        lesson: Option<String>,
    },
    /// Show index and cache counters
    Stats,
}

/// One-record content store backed by the file being indexed.
struct FileContent {
    record: ContentRecord,
}

#[async_trait]
impl ContentStore for FileContent {
    async fn fetch(&self, content_id: &str) -> educlaw_core::error::Result<ContentRecord> {
        if content_id == self.record.content_id {
            Ok(self.record.clone())
        } else {
            Err(EduClawError::ContentNotFound(content_id.to_string()))
        }
    }
}

/// Content store for commands that never index.
struct NoContent;

#[async_trait]
impl ContentStore for NoContent {
    async fn fetch(&self, content_id: &str) -> educlaw_core::error::Result<ContentRecord> {
        Err(EduClawError::ContentNotFound(content_id.to_string()))
    }
}

fn expand_path(p: &str) -> String {
    shellexpand::tilde(p).to_string()
}

fn build_engine(config: &EduClawConfig, content: Arc<dyn ContentStore>) -> Result<RagEngine> {
    let embedding = educlaw_providers::create_embedding_provider(config)?;
    let completion = educlaw_providers::create_completion_provider(config)?;

    let store_path = expand_path(&config.store.path);
    if let Some(parent) = Path::new(&store_path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store = educlaw_rag::store::create_store(&config.store.backend, Path::new(&store_path))?;

    Ok(RagEngine::new(config.clone(), embedding, completion, store, content)?)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let config = match &cli.config {
        Some(path) => EduClawConfig::load_from(Path::new(&expand_path(path)))?,
        None => EduClawConfig::load()?,
    };
    tracing::debug!(
        "Using {} store at {} (providers: {} / {})",
        config.store.backend,
        config.store.path,
        config.llm.provider,
        config.embedding.provider
    );

    match cli.command {
        Command::Index { file, id, title, subject, grade } => {
            let path = expand_path(&file);
            let body = std::fs::read_to_string(&path)?;
            let stem = Path::new(&path)
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| "document".to_string());
            let content_id = id.unwrap_or_else(|| stem.clone());
            let title = title.unwrap_or(stem);

            let mut metadata = serde_json::json!({ "title": title, "subject": subject });
            if let Some(grade) = grade {
                metadata["grade"] = serde_json::json!(grade);
            }

            let record = ContentRecord {
                content_id: content_id.clone(),
                body,
                examples: Vec::new(),
                exercises: Vec::new(),
                metadata,
            };

            let engine = build_engine(&config, Arc::new(FileContent { record }))?;
            let count = engine.index_document(&content_id).await?;
            println!("✅ Indexed '{content_id}': {count} chunks");
        }
        Command::Ask { question, lesson } => {
            let engine = build_engine(&config, Arc::new(NoContent))?;
            let answer = engine.answer_question(&question, lesson.as_deref()).await;

            println!("{}", answer.answer);
            println!();
            let mut note = format!("confidence: {}%", answer.confidence);
            if answer.from_cache {
                note.push_str(" (cached)");
            }
            if answer.degraded {
                note.push_str(" (degraded embeddings)");
            }
            println!("   {note}");
            for (i, source) in answer.sources.iter().take(3).enumerate() {
                println!("   {}. [{}] score {:.2}", i + 1, source.source.title, source.score);
            }
        }
        Command::Stats => {
            let engine = build_engine(&config, Arc::new(NoContent))?;
            let stats = engine.stats().await;
            println!("📊 EduClaw");
            println!("   Indexed chunks:  {}", stats.indexed_chunks);
            println!(
                "   Answer cache:    {} entries ({} hits / {} misses, {} evicted)",
                stats.answer_cache.entries,
                stats.answer_cache.hits,
                stats.answer_cache.misses,
                stats.answer_cache.evictions
            );
            println!(
                "   Embedding cache: {} entries ({} hits / {} misses)",
                stats.embedder.cached_entries,
                stats.embedder.cache_hits,
                stats.embedder.cache_misses
            );
            println!("   Degraded embeds: {}", stats.embedder.degraded_calls);
        }
    }

    Ok(())
}
