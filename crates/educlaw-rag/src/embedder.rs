//! Caching adapter over the embedding provider.
//!
//! Adds an exact-text LRU layer, splits oversized batches to respect
//! provider limits, and keeps indexing and search alive through provider
//! outages by substituting deterministic pseudo-vectors flagged as
//! degraded. Degraded vectors are never cached.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use lru::LruCache;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::Mutex;

use educlaw_core::traits::EmbeddingProvider;
use educlaw_core::types::{EmbeddedText, EmbeddingQuality};

pub struct CachingEmbedder {
    provider: Arc<dyn EmbeddingProvider>,
    cache: Mutex<LruCache<String, Vec<f32>>>,
    batch_limit: usize,
    batch_delay: Duration,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    degraded_calls: AtomicU64,
}

/// Counters exposed for logs and the CLI stats command.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbedderStats {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub degraded_calls: u64,
    pub cached_entries: usize,
}

impl CachingEmbedder {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        cache_size: usize,
        batch_limit: usize,
        batch_delay_ms: u64,
    ) -> Self {
        let capacity = NonZeroUsize::new(cache_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            provider,
            cache: Mutex::new(LruCache::new(capacity)),
            batch_limit: batch_limit.max(1),
            batch_delay: Duration::from_millis(batch_delay_ms),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            degraded_calls: AtomicU64::new(0),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.provider.dimensions()
    }

    /// Embed one text, consulting the cache first. Never fails: provider
    /// errors degrade to a deterministic pseudo-vector.
    pub async fn embed(&self, text: &str) -> EmbeddedText {
        if let Some(vector) = self.cache_get(text).await {
            return EmbeddedText { vector, quality: EmbeddingQuality::Full };
        }

        match self.provider.embed(text).await {
            Ok(embedding) => {
                tracing::debug!(
                    "Embedded {} chars ({} tokens) via {}",
                    text.chars().count(),
                    embedding.tokens,
                    self.provider.name()
                );
                self.cache_put(text, embedding.vector.clone()).await;
                EmbeddedText { vector: embedding.vector, quality: EmbeddingQuality::Full }
            }
            Err(e) => {
                tracing::warn!("Embedding provider failed, using degraded pseudo-vector: {e}");
                self.degraded(text)
            }
        }
    }

    /// Embed many texts, splitting into provider-sized sub-batches with a
    /// pause between them. Output order matches input order.
    pub async fn embed_batch(&self, texts: &[String]) -> Vec<EmbeddedText> {
        let mut out: Vec<Option<EmbeddedText>> = vec![None; texts.len()];

        // Serve cache hits up front so only misses reach the provider.
        let mut miss_indexes = Vec::new();
        for (i, text) in texts.iter().enumerate() {
            if let Some(vector) = self.cache_get(text).await {
                out[i] = Some(EmbeddedText { vector, quality: EmbeddingQuality::Full });
            } else {
                miss_indexes.push(i);
            }
        }

        for (batch_no, window) in miss_indexes.chunks(self.batch_limit).enumerate() {
            if batch_no > 0 && !self.batch_delay.is_zero() {
                tokio::time::sleep(self.batch_delay).await;
            }

            let batch_texts: Vec<String> = window.iter().map(|&i| texts[i].clone()).collect();
            match self.provider.embed_batch(&batch_texts).await {
                Ok(embeddings) if embeddings.len() == window.len() => {
                    for (&i, embedding) in window.iter().zip(embeddings) {
                        self.cache_put(&texts[i], embedding.vector.clone()).await;
                        out[i] = Some(EmbeddedText {
                            vector: embedding.vector,
                            quality: EmbeddingQuality::Full,
                        });
                    }
                }
                Ok(embeddings) => {
                    tracing::warn!(
                        "Embedding batch size mismatch ({} != {}), degrading batch",
                        embeddings.len(),
                        window.len()
                    );
                    for &i in window {
                        out[i] = Some(self.degraded(&texts[i]));
                    }
                }
                Err(e) => {
                    tracing::warn!("Embedding batch failed, degrading {} items: {e}", window.len());
                    for &i in window {
                        out[i] = Some(self.degraded(&texts[i]));
                    }
                }
            }
        }

        out.into_iter()
            .zip(texts)
            .map(|(slot, text)| slot.unwrap_or_else(|| self.degraded(text)))
            .collect()
    }

    fn degraded(&self, text: &str) -> EmbeddedText {
        self.degraded_calls.fetch_add(1, Ordering::Relaxed);
        EmbeddedText {
            vector: pseudo_vector(text, self.provider.dimensions()),
            quality: EmbeddingQuality::Degraded,
        }
    }

    async fn cache_get(&self, text: &str) -> Option<Vec<f32>> {
        let mut cache = self.cache.lock().await;
        match cache.get(text) {
            Some(v) => {
                self.cache_hits.fetch_add(1, Ordering::Relaxed);
                Some(v.clone())
            }
            None => {
                self.cache_misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    async fn cache_put(&self, text: &str, vector: Vec<f32>) {
        self.cache.lock().await.put(text.to_string(), vector);
    }

    pub async fn stats(&self) -> EmbedderStats {
        EmbedderStats {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            degraded_calls: self.degraded_calls.load(Ordering::Relaxed),
            cached_entries: self.cache.lock().await.len(),
        }
    }
}

/// Deterministic unit-length pseudo-vector seeded from the text hash.
/// Similarities against it are meaningless; anything built from it must be
/// reported as degraded.
fn pseudo_vector(text: &str, dimensions: usize) -> Vec<f32> {
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    let mut rng = StdRng::seed_from_u64(hasher.finish());

    let mut vector: Vec<f32> = (0..dimensions).map(|_| rng.gen_range(-1.0f32..1.0)).collect();
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in &mut vector {
            *v /= norm;
        }
    }
    vector
}
