//! # EduClaw RAG
//! The retrieval-augmented answering engine — chunks lesson content, indexes
//! embeddings, and answers questions grounded in retrieved fragments.
//!
//! ## Features (EduClaw RAG features):
//! - **Section-aware chunking**: Sentence accumulation with word overlap between chunks
//! - **Fallback cascade**: Vector, then hybrid, then keyword, then partial-query retrieval
//! - **Adaptive thresholds**: Strict cosine pass with an automatic loosened retry
//! - **Smart context**: Document-ordered fragments with adjacency expansion and relevance markers
//! - **Answer cache**: Normalized question keys, TTL expiry, confidence-gated writes
//! - **Graceful degradation**: Provider outages produce flagged pseudo-vectors, never crashes

pub mod cache;
pub mod chunker;
pub mod context;
pub mod embedder;
pub mod engine;
pub mod generator;
pub mod keywords;
pub mod search;
pub mod store;

pub use cache::AnswerCache;
pub use chunker::Chunker;
pub use embedder::CachingEmbedder;
pub use engine::{EngineStats, GENERATION_FAILED_ANSWER, INSUFFICIENT_INFO_ANSWER, RagEngine, spawn_cache_sweeper};
pub use search::{SearchEngine, confidence_score, cosine_similarity};
pub use store::{EmbeddingStore, create_store};

/// Shared test doubles for the pipeline tests: a substring-routed embedding
/// provider, a scripted completion provider, and an in-memory content store.
#[cfg(test)]
pub(crate) mod testutil {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;

    use educlaw_core::error::{EduClawError, Result};
    use educlaw_core::traits::{CompletionProvider, ContentStore, EmbeddingProvider};
    use educlaw_core::types::{
        CompletionParams, ContentRecord, DocumentChunk, Embedding, Message, SearchResult,
    };

    /// Embedding provider that maps any text containing a route's needle to
    /// that route's vector; unmatched text embeds to all zeros. Flip `fail`
    /// to simulate a provider outage.
    pub struct RoutedEmbedder {
        dims: usize,
        routes: Vec<(&'static str, Vec<f32>)>,
        pub calls: AtomicUsize,
        pub fail: AtomicBool,
        pub batch_sizes: Mutex<Vec<usize>>,
    }

    impl RoutedEmbedder {
        pub fn new(dims: usize) -> Self {
            Self {
                dims,
                routes: Vec::new(),
                calls: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
                batch_sizes: Mutex::new(Vec::new()),
            }
        }

        /// Routes are checked in insertion order; the first needle contained
        /// in the text wins.
        pub fn route(mut self, needle: &'static str, vector: Vec<f32>) -> Self {
            self.routes.push((needle, vector));
            self
        }

        fn lookup(&self, text: &str) -> Vec<f32> {
            let lowered = text.to_lowercase();
            for (needle, vector) in &self.routes {
                if lowered.contains(&needle.to_lowercase()) {
                    return vector.clone();
                }
            }
            vec![0.0; self.dims]
        }
    }

    #[async_trait]
    impl EmbeddingProvider for RoutedEmbedder {
        fn name(&self) -> &str {
            "routed-test"
        }

        fn dimensions(&self) -> usize {
            self.dims
        }

        async fn embed(&self, text: &str) -> Result<Embedding> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(EduClawError::Provider("routed embedder offline".into()));
            }
            Ok(Embedding { vector: self.lookup(text), tokens: 7 })
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.batch_sizes.lock().unwrap().push(texts.len());
            if self.fail.load(Ordering::SeqCst) {
                return Err(EduClawError::Provider("routed embedder offline".into()));
            }
            Ok(texts
                .iter()
                .map(|t| Embedding { vector: self.lookup(t), tokens: 7 })
                .collect())
        }
    }

    /// Completion provider that records every request and replays queued
    /// failures before settling on a fixed answer.
    pub struct ScriptedCompleter {
        answer: String,
        pub calls: AtomicUsize,
        pub failures: Mutex<Vec<EduClawError>>,
        pub seen: Mutex<Vec<Vec<Message>>>,
    }

    impl ScriptedCompleter {
        pub fn new(answer: &str) -> Self {
            Self {
                answer: answer.to_string(),
                calls: AtomicUsize::new(0),
                failures: Mutex::new(Vec::new()),
                seen: Mutex::new(Vec::new()),
            }
        }

        /// Queue errors returned by successive calls, oldest first.
        pub fn with_failures(self, failures: Vec<EduClawError>) -> Self {
            *self.failures.lock().unwrap() = failures;
            self
        }
    }

    #[async_trait]
    impl CompletionProvider for ScriptedCompleter {
        fn name(&self) -> &str {
            "scripted-test"
        }

        async fn complete(&self, messages: &[Message], _params: &CompletionParams) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(messages.to_vec());
            let mut failures = self.failures.lock().unwrap();
            if !failures.is_empty() {
                return Err(failures.remove(0));
            }
            Ok(self.answer.clone())
        }
    }

    /// Fixed in-memory content store.
    pub struct StaticContent {
        records: Mutex<HashMap<String, ContentRecord>>,
    }

    impl StaticContent {
        pub fn new() -> Self {
            Self { records: Mutex::new(HashMap::new()) }
        }

        pub fn with_record(self, record: ContentRecord) -> Self {
            self.records.lock().unwrap().insert(record.content_id.clone(), record);
            self
        }
    }

    #[async_trait]
    impl ContentStore for StaticContent {
        async fn fetch(&self, content_id: &str) -> Result<ContentRecord> {
            self.records
                .lock()
                .unwrap()
                .get(content_id)
                .cloned()
                .ok_or_else(|| EduClawError::ContentNotFound(content_id.to_string()))
        }
    }

    pub fn chunk(
        content_id: &str,
        index: i64,
        text: &str,
        embedding: Vec<f32>,
        title: &str,
    ) -> DocumentChunk {
        DocumentChunk {
            id: format!("{content_id}_{index}"),
            content_id: content_id.to_string(),
            chunk_index: index,
            text: text.to_string(),
            embedding,
            metadata: serde_json::json!({"title": title}),
            created_at: chrono::Utc::now(),
        }
    }

    pub fn result(chunk: DocumentChunk, score: f32) -> SearchResult {
        SearchResult { source: chunk.source_info(), chunk, score }
    }
}
