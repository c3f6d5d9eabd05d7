//! The answering pipeline and the indexing flow.
//!
//! `answer_question` runs cache check, retrieval cascade, context assembly,
//! grounded generation, confidence scoring, and cache write-back — and never
//! fails: every provider or store problem degrades into a fixed
//! low-confidence answer. `index_document` regenerates a document's chunks
//! wholesale.

use std::sync::Arc;
use std::time::{Duration, Instant};

use educlaw_core::config::EduClawConfig;
use educlaw_core::error::Result;
use educlaw_core::traits::{CompletionProvider, ContentStore, EmbeddingProvider};
use educlaw_core::types::{CompletionParams, DocumentChunk, EmbeddedText, Message, RagAnswer};

use crate::cache::{AnswerCache, CacheStats};
use crate::chunker::Chunker;
use crate::context::ContextBuilder;
use crate::embedder::{CachingEmbedder, EmbedderStats};
use crate::generator::Generator;
use crate::search::{SearchConfig, SearchEngine, confidence_score};
use crate::store::EmbeddingStore;

/// Returned when retrieval finds nothing to ground an answer on.
pub const INSUFFICIENT_INFO_ANSWER: &str = "I could not find enough information in the study materials to answer that. Try rephrasing the question or narrowing it to one lesson.";

/// Returned when generation fails after all retries.
pub const GENERATION_FAILED_ANSWER: &str =
    "Sorry, I was unable to produce an answer right now. Please try again in a moment.";

const SYSTEM_PROMPT: &str = "You are a study assistant for a curriculum knowledge base. Answer using ONLY the provided reference fragments. If the fragments do not contain the answer, say you do not know. Answer in the language of the question, clearly and concisely.";

/// Reserved chunk-index bases per fragment kind.
const EXAMPLE_INDEX_BASE: i64 = 1000;
const EXERCISE_INDEX_BASE: i64 = 2000;

pub struct RagEngine {
    config: EduClawConfig,
    embedder: Arc<CachingEmbedder>,
    search: SearchEngine,
    context: ContextBuilder,
    cache: AnswerCache,
    generator: Generator,
    store: Arc<dyn EmbeddingStore>,
    content: Arc<dyn ContentStore>,
    chunker: Chunker,
}

/// Aggregated counters for logs and the CLI.
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineStats {
    pub answer_cache: CacheStats,
    pub embedder: EmbedderStats,
    pub indexed_chunks: usize,
}

impl RagEngine {
    /// Wire the engine from config and injected collaborators. Caches are
    /// constructed here, once, and owned by the engine.
    pub fn new(
        config: EduClawConfig,
        embedding_provider: Arc<dyn EmbeddingProvider>,
        completion_provider: Arc<dyn CompletionProvider>,
        store: Arc<dyn EmbeddingStore>,
        content: Arc<dyn ContentStore>,
    ) -> Result<Self> {
        config.validate()?;

        let embedder = Arc::new(CachingEmbedder::new(
            embedding_provider,
            config.embedding.cache_size,
            config.embedding.batch_limit,
            config.embedding.batch_delay_ms,
        ));

        let search = SearchEngine::new(
            Arc::clone(&store),
            Arc::clone(&embedder),
            SearchConfig {
                similarity_threshold: config.rag.similarity_threshold,
                min_similarity_threshold: config.rag.min_similarity_threshold,
                enable_fallback_cascade: config.rag.enable_fallback_cascade,
            },
        );

        let cache = AnswerCache::new(
            config.rag.answer_cache_size,
            Duration::from_secs(config.rag.answer_cache_ttl_secs),
            config.rag.cache_confidence_threshold,
        );

        let generator = Generator::new(
            completion_provider,
            CompletionParams {
                model: config.llm.model.clone(),
                temperature: config.llm.temperature,
                max_tokens: config.llm.max_tokens,
            },
            config.rag.max_retries,
            config.rag.retry_base_delay_ms,
            config.rag.min_request_spacing_ms,
        );

        let context = ContextBuilder::new(config.rag.enable_smart_context);
        let chunker = Chunker::new(config.rag.chunk_target_chars, config.rag.chunk_overlap_words);

        Ok(Self { config, embedder, search, context, cache, generator, store, content, chunker })
    }

    pub fn config(&self) -> &EduClawConfig {
        &self.config
    }

    /// Answer a question, optionally scoped to one lesson's content id.
    pub async fn answer_question(&self, question: &str, scope: Option<&str>) -> RagAnswer {
        let started = Instant::now();
        let question = question.trim();
        if question.is_empty() {
            return RagAnswer {
                answer: INSUFFICIENT_INFO_ANSWER.to_string(),
                sources: Vec::new(),
                confidence: 0,
                from_cache: false,
                degraded: false,
            };
        }

        let key = AnswerCache::cache_key(question, scope);

        // Phase 1: answer cache.
        if self.config.rag.enable_answer_cache {
            if let Some(answer) = self.cache.get(&key).await {
                tracing::debug!("Answer cache hit for {key:?}");
                return RagAnswer {
                    answer,
                    sources: Vec::new(),
                    confidence: 100,
                    from_cache: true,
                    degraded: false,
                };
            }
        }

        // Phase 2: retrieval cascade.
        let outcome = self.search.search(question, scope, self.config.rag.search_limit).await;
        let search_ms = started.elapsed().as_millis();
        if outcome.results.is_empty() {
            tracing::info!("No retrievable context for question (scope: {scope:?})");
            return RagAnswer {
                answer: INSUFFICIENT_INFO_ANSWER.to_string(),
                sources: Vec::new(),
                confidence: 0,
                from_cache: false,
                degraded: outcome.degraded,
            };
        }

        // Phase 3: context assembly.
        let context = self.context.build(question, &outcome.results);

        // Phase 4: grounded generation.
        let messages = vec![
            Message::system(SYSTEM_PROMPT),
            Message::user(format!("Reference fragments:\n{context}\n\nQuestion: {question}")),
        ];
        let generated = match self.generator.complete(&messages).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!("Generation failed after retries: {e}");
                return RagAnswer {
                    answer: GENERATION_FAILED_ANSWER.to_string(),
                    sources: outcome.results,
                    confidence: 0,
                    from_cache: false,
                    degraded: outcome.degraded,
                };
            }
        };

        // Phase 5: confidence scoring.
        let confidence = confidence_score(&outcome.results);

        // Phase 6: cache write-back. Degraded retrievals are never cached.
        if self.config.rag.enable_answer_cache && !outcome.degraded {
            self.cache.set(&key, &generated, confidence).await;
        }

        if self.config.rag.log_timings {
            tracing::info!(
                "Answered in {}ms (search {}ms, {} sources, confidence {})",
                started.elapsed().as_millis(),
                search_ms,
                outcome.results.len(),
                confidence
            );
        }

        RagAnswer {
            answer: generated,
            sources: outcome.results,
            confidence,
            from_cache: false,
            degraded: outcome.degraded,
        }
    }

    /// Delete and regenerate all chunks for a content id. Returns the number
    /// of chunks stored.
    pub async fn index_document(&self, content_id: &str) -> Result<usize> {
        let started = Instant::now();
        let record = self.content.fetch(content_id).await?;

        let mut texts: Vec<String> = Vec::new();
        let mut indexes: Vec<i64> = Vec::new();

        for (i, text) in self.chunker.chunk(&record.body).into_iter().enumerate() {
            texts.push(text);
            indexes.push(i as i64);
        }
        let mut next_example = EXAMPLE_INDEX_BASE;
        for example in &record.examples {
            for text in self.chunker.chunk(example) {
                texts.push(text);
                indexes.push(next_example);
                next_example += 1;
            }
        }
        let mut next_exercise = EXERCISE_INDEX_BASE;
        for exercise in &record.exercises {
            for text in self.chunker.chunk(exercise) {
                texts.push(text);
                indexes.push(next_exercise);
                next_exercise += 1;
            }
        }

        if texts.is_empty() {
            let removed = self.store.delete_content(content_id).await?;
            tracing::info!("Content {content_id} has no indexable text, removed {removed} stale chunks");
            return Ok(0);
        }

        let embedded = self.embedder.embed_batch(&texts).await;
        let total = texts.len();
        let mut degraded_count = 0usize;

        let chunks: Vec<DocumentChunk> = texts
            .into_iter()
            .zip(indexes)
            .zip(embedded)
            .map(|((text, chunk_index), embedding)| {
                if embedding.is_degraded() {
                    degraded_count += 1;
                }
                build_chunk(&record.metadata, content_id, chunk_index, text, embedding, total)
            })
            .collect();

        if degraded_count > 0 {
            tracing::warn!("Indexed {content_id} with {degraded_count}/{total} degraded embeddings");
        }

        let stored = self.store.replace_content(content_id, chunks).await?;
        tracing::info!("Indexed {content_id}: {stored} chunks in {}ms", started.elapsed().as_millis());
        Ok(stored)
    }

    /// Drop expired answer-cache entries. Returns how many were removed.
    pub async fn sweep_caches(&self) -> usize {
        self.cache.sweep().await
    }

    pub async fn stats(&self) -> EngineStats {
        EngineStats {
            answer_cache: self.cache.stats().await,
            embedder: self.embedder.stats().await,
            indexed_chunks: self.store.chunk_count().await.unwrap_or(0),
        }
    }
}

fn build_chunk(
    base_metadata: &serde_json::Value,
    content_id: &str,
    chunk_index: i64,
    text: String,
    embedding: EmbeddedText,
    total: usize,
) -> DocumentChunk {
    let mut metadata = if base_metadata.is_object() {
        base_metadata.clone()
    } else {
        serde_json::json!({})
    };

    let kind = if chunk_index >= EXERCISE_INDEX_BASE {
        "exercise"
    } else if chunk_index >= EXAMPLE_INDEX_BASE {
        "example"
    } else {
        "body"
    };
    if let Some(map) = metadata.as_object_mut() {
        map.insert("chunk".into(), serde_json::json!(chunk_index));
        map.insert("total_chunks".into(), serde_json::json!(total));
        map.insert("kind".into(), serde_json::json!(kind));
        if embedding.is_degraded() {
            map.insert("embedding_quality".into(), serde_json::json!("degraded"));
        }
    }

    DocumentChunk {
        id: format!("{content_id}_{chunk_index}"),
        content_id: content_id.to_string(),
        chunk_index,
        text,
        embedding: embedding.vector,
        metadata,
        created_at: chrono::Utc::now(),
    }
}

/// Spawn the TTL sweeper as a background task, independent of request
/// traffic. The period comes from `rag.sweep_interval_secs`.
pub fn spawn_cache_sweeper(engine: Arc<RagEngine>) -> tokio::task::JoinHandle<()> {
    let interval_secs = engine.config.rag.sweep_interval_secs.max(1);
    tokio::spawn(async move {
        tracing::info!("⏰ Answer-cache sweeper started (every {interval_secs}s)");
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
        // The first tick fires immediately; skip it so the initial sweep
        // waits a full period.
        interval.tick().await;
        loop {
            interval.tick().await;
            let removed = engine.sweep_caches().await;
            if removed > 0 {
                tracing::debug!("Sweeper removed {removed} expired answers");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryEmbeddingStore;
    use crate::testutil::{RoutedEmbedder, ScriptedCompleter, StaticContent};
    use educlaw_core::error::EduClawError;
    use educlaw_core::types::ContentRecord;
    use std::sync::atomic::Ordering as AtomicOrdering;

    struct TestRig {
        engine: RagEngine,
        embedder: Arc<RoutedEmbedder>,
        completer: Arc<ScriptedCompleter>,
        store: Arc<MemoryEmbeddingStore>,
    }

    fn rig(embedder: RoutedEmbedder, completer: ScriptedCompleter, records: Vec<ContentRecord>) -> TestRig {
        let mut config = EduClawConfig::default();
        config.embedding.dimensions = 3;
        config.embedding.batch_delay_ms = 0;
        config.rag.retry_base_delay_ms = 1;
        config.rag.min_request_spacing_ms = 0;

        let embedder = Arc::new(embedder);
        let completer = Arc::new(completer);
        let store = Arc::new(MemoryEmbeddingStore::new());
        let mut content = StaticContent::new();
        for record in records {
            content = content.with_record(record);
        }

        let engine = RagEngine::new(
            config,
            Arc::clone(&embedder) as _,
            Arc::clone(&completer) as _,
            Arc::clone(&store) as _,
            Arc::new(content),
        )
        .unwrap();

        TestRig { engine, embedder, completer, store }
    }

    fn addition_lesson() -> ContentRecord {
        ContentRecord {
            content_id: "lesson-1".into(),
            body: "Phép cộng gộp hai số thành một tổng duy nhất. Khi đổi chỗ các số hạng thì tổng của chúng không thay đổi.".into(),
            examples: Vec::new(),
            exercises: Vec::new(),
            metadata: serde_json::json!({"title": "Phép cộng", "subject": "Toán", "grade": 1}),
        }
    }

    #[tokio::test]
    async fn test_index_then_answer_full_pipeline() {
        let rig = rig(
            RoutedEmbedder::new(3).route("cộng", vec![1.0, 0.0, 0.0]),
            ScriptedCompleter::new("Phép cộng gộp hai số thành một tổng."),
            vec![addition_lesson()],
        );

        let indexed = rig.engine.index_document("lesson-1").await.unwrap();
        assert!(indexed >= 1);

        let answer = rig.engine.answer_question("Phép cộng là gì?", None).await;
        assert_eq!(answer.answer, "Phép cộng gộp hai số thành một tổng.");
        assert!(!answer.from_cache);
        assert!(!answer.degraded);
        assert!(!answer.sources.is_empty());
        assert!(answer.confidence >= 90);
        assert_eq!(answer.sources[0].source.title, "Phép cộng");
    }

    #[tokio::test]
    async fn test_unindexed_scope_degrades_to_insufficient_info() {
        let rig = rig(RoutedEmbedder::new(3), ScriptedCompleter::new("should never run"), Vec::new());

        let answer = rig.engine.answer_question("Phép cộng là gì?", Some("missing-lesson")).await;
        assert_eq!(answer.answer, INSUFFICIENT_INFO_ANSWER);
        assert_eq!(answer.confidence, 0);
        assert!(answer.sources.is_empty());
        assert_eq!(rig.completer.calls.load(AtomicOrdering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_repeat_question_served_from_cache() {
        let rig = rig(
            RoutedEmbedder::new(3).route("cộng", vec![1.0, 0.0, 0.0]),
            ScriptedCompleter::new("Tổng là kết quả của phép cộng."),
            vec![addition_lesson()],
        );
        rig.engine.index_document("lesson-1").await.unwrap();

        let first = rig.engine.answer_question("Phép cộng là gì?", None).await;
        assert!(!first.from_cache);
        let embed_calls = rig.embedder.calls.load(AtomicOrdering::SeqCst);

        // Different casing and punctuation must land on the same key.
        let second = rig.engine.answer_question("  phép cộng là gì ", None).await;
        assert!(second.from_cache);
        assert_eq!(second.answer, first.answer);
        assert_eq!(second.confidence, 100);
        assert!(second.sources.is_empty());

        // No provider traffic for the cached answer.
        assert_eq!(rig.completer.calls.load(AtomicOrdering::SeqCst), 1);
        assert_eq!(rig.embedder.calls.load(AtomicOrdering::SeqCst), embed_calls);
    }

    #[tokio::test]
    async fn test_low_confidence_answer_not_cached() {
        // Query embeds at cosine ~0.55 against the chunk: above the loose
        // threshold, below the cache confidence gate.
        let rig = rig(
            RoutedEmbedder::new(3)
                .route("hiệu của phép trừ", vec![0.55, 0.835165, 0.0])
                .route("trừ", vec![1.0, 0.0, 0.0]),
            ScriptedCompleter::new("Hiệu là kết quả của phép trừ."),
            vec![ContentRecord {
                content_id: "lesson-2".into(),
                body: "Phép trừ tìm hiệu giữa số bị trừ và số trừ.".into(),
                examples: Vec::new(),
                exercises: Vec::new(),
                metadata: serde_json::json!({"title": "Phép trừ", "subject": "Toán"}),
            }],
        );
        rig.engine.index_document("lesson-2").await.unwrap();

        let first = rig.engine.answer_question("hiệu của phép trừ", None).await;
        assert!(!first.from_cache);
        assert!(first.confidence < 60, "confidence was {}", first.confidence);

        let second = rig.engine.answer_question("hiệu của phép trừ", None).await;
        assert!(!second.from_cache);
        assert_eq!(rig.completer.calls.load(AtomicOrdering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_generation_failure_returns_apology() {
        let rig = rig(
            RoutedEmbedder::new(3).route("cộng", vec![1.0, 0.0, 0.0]),
            ScriptedCompleter::new("unused")
                .with_failures(vec![EduClawError::Provider("boom".into())]),
            vec![addition_lesson()],
        );
        rig.engine.index_document("lesson-1").await.unwrap();

        let answer = rig.engine.answer_question("Phép cộng là gì?", None).await;
        assert_eq!(answer.answer, GENERATION_FAILED_ANSWER);
        assert_eq!(answer.confidence, 0);
        // Sources are still reported so the caller can show what was found.
        assert!(!answer.sources.is_empty());

        // The failed answer must not be served from cache afterwards.
        let again = rig.engine.answer_question("Phép cộng là gì?", None).await;
        assert!(!again.from_cache);
    }

    #[tokio::test]
    async fn test_embedding_outage_degrades_but_still_answers() {
        let rig = rig(
            RoutedEmbedder::new(3).route("trừ", vec![1.0, 0.0, 0.0]),
            ScriptedCompleter::new("Phép trừ tìm hiệu của hai số."),
            vec![ContentRecord {
                content_id: "lesson-2".into(),
                body: "Phép trừ tìm hiệu giữa số bị trừ và số trừ.".into(),
                examples: Vec::new(),
                exercises: Vec::new(),
                metadata: serde_json::json!({"title": "Phép trừ", "subject": "Toán"}),
            }],
        );
        rig.engine.index_document("lesson-2").await.unwrap();

        // Provider dies between indexing and asking.
        rig.embedder.fail.store(true, AtomicOrdering::SeqCst);

        let answer = rig.engine.answer_question("Phép trừ là gì?", None).await;
        assert!(answer.degraded);
        assert_eq!(answer.answer, "Phép trừ tìm hiệu của hai số.");

        // Degraded answers never enter the cache.
        let again = rig.engine.answer_question("Phép trừ là gì?", None).await;
        assert!(!again.from_cache);
        assert_eq!(rig.completer.calls.load(AtomicOrdering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_reindex_replaces_chunks() {
        let rig = rig(
            RoutedEmbedder::new(3).route("cộng", vec![1.0, 0.0, 0.0]),
            ScriptedCompleter::new("ok"),
            vec![addition_lesson()],
        );

        let first = rig.engine.index_document("lesson-1").await.unwrap();
        let second = rig.engine.index_document("lesson-1").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(rig.store.chunk_count().await.unwrap(), first);
    }

    #[tokio::test]
    async fn test_examples_and_exercises_get_reserved_ranges() {
        let rig = rig(
            RoutedEmbedder::new(3).route("cộng", vec![1.0, 0.0, 0.0]),
            ScriptedCompleter::new("ok"),
            vec![ContentRecord {
                content_id: "lesson-3".into(),
                body: "Phép cộng gộp hai số thành một tổng duy nhất.".into(),
                examples: vec!["Ví dụ: 12 cộng 15 bằng 27, một tổng hai chữ số.".into()],
                exercises: vec!["Bài tập: tính tổng của 31 và 44 rồi ghi kết quả.".into()],
                metadata: serde_json::json!({"title": "Phép cộng", "subject": "Toán"}),
            }],
        );

        let count = rig.engine.index_document("lesson-3").await.unwrap();
        assert_eq!(count, 3);

        let chunks = rig.store.chunks(Some("lesson-3")).await.unwrap();
        let indexes: Vec<i64> = chunks.iter().map(|c| c.chunk_index).collect();
        assert_eq!(indexes, vec![0, 1000, 2000]);
        assert_eq!(chunks[1].metadata["kind"], "example");
        assert_eq!(chunks[2].metadata["kind"], "exercise");
        assert_eq!(chunks[0].id, "lesson-3_0");
    }

    #[tokio::test]
    async fn test_unknown_content_id_is_an_error() {
        let rig = rig(RoutedEmbedder::new(3), ScriptedCompleter::new("ok"), Vec::new());
        let err = rig.engine.index_document("ghost").await.err().unwrap();
        assert!(matches!(err, EduClawError::ContentNotFound(_)));
    }

    #[tokio::test]
    async fn test_empty_question_short_circuits() {
        let rig = rig(RoutedEmbedder::new(3), ScriptedCompleter::new("ok"), Vec::new());
        let answer = rig.engine.answer_question("   ", None).await;
        assert_eq!(answer.answer, INSUFFICIENT_INFO_ANSWER);
        assert_eq!(rig.embedder.calls.load(AtomicOrdering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_scope_restricts_retrieval() {
        let mut other = addition_lesson();
        other.content_id = "lesson-9".into();
        other.body = "Hình vuông có bốn cạnh bằng nhau và bốn góc vuông.".into();

        let rig = rig(
            RoutedEmbedder::new(3)
                .route("cộng", vec![1.0, 0.0, 0.0])
                .route("vuông", vec![0.0, 1.0, 0.0]),
            ScriptedCompleter::new("ok"),
            vec![addition_lesson(), other],
        );
        rig.engine.index_document("lesson-1").await.unwrap();
        rig.engine.index_document("lesson-9").await.unwrap();

        let answer = rig.engine.answer_question("Phép cộng là gì?", Some("lesson-9")).await;
        assert_eq!(answer.answer, INSUFFICIENT_INFO_ANSWER);

        let answer = rig.engine.answer_question("Phép cộng là gì?", Some("lesson-1")).await;
        assert!(!answer.sources.is_empty());
    }

    #[tokio::test]
    async fn test_sweeper_task_prunes_expired_answers() {
        let mut config = EduClawConfig::default();
        config.embedding.dimensions = 3;
        config.rag.answer_cache_ttl_secs = 0;
        config.rag.sweep_interval_secs = 1;
        config.rag.min_request_spacing_ms = 0;

        let embedder = Arc::new(RoutedEmbedder::new(3).route("cộng", vec![1.0, 0.0, 0.0]));
        let completer = Arc::new(ScriptedCompleter::new("ok"));
        let store = Arc::new(MemoryEmbeddingStore::new());
        let content = StaticContent::new().with_record(addition_lesson());

        let engine = Arc::new(
            RagEngine::new(
                config,
                Arc::clone(&embedder) as _,
                Arc::clone(&completer) as _,
                Arc::clone(&store) as _,
                Arc::new(content),
            )
            .unwrap(),
        );
        engine.index_document("lesson-1").await.unwrap();
        engine.answer_question("Phép cộng là gì?", None).await;

        let handle = spawn_cache_sweeper(Arc::clone(&engine));
        tokio::time::sleep(Duration::from_millis(1300)).await;
        handle.abort();

        let stats = engine.stats().await;
        assert_eq!(stats.answer_cache.entries, 0);
    }

    #[tokio::test]
    async fn test_stats_aggregate_all_layers() {
        let rig = rig(
            RoutedEmbedder::new(3).route("cộng", vec![1.0, 0.0, 0.0]),
            ScriptedCompleter::new("ok"),
            vec![addition_lesson()],
        );
        rig.engine.index_document("lesson-1").await.unwrap();
        rig.engine.answer_question("Phép cộng là gì?", None).await;

        let stats = rig.engine.stats().await;
        assert!(stats.indexed_chunks >= 1);
        assert!(stats.embedder.cache_misses >= 1);
        assert_eq!(stats.answer_cache.entries, 1);
    }
}
