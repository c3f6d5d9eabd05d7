//! Vector search with adaptive thresholds and a fallback cascade.
//!
//! Strategies run in a fixed precision-then-recall order: vector, then
//! hybrid, then keyword, then partial-query. Each stage is attempted only
//! when everything before it came back empty, so retrieval behavior stays
//! reproducible.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use educlaw_core::error::Result;
use educlaw_core::types::{SearchOutcome, SearchResult};

use crate::embedder::CachingEmbedder;
use crate::keywords::extract_keywords;
use crate::store::EmbeddingStore;

/// Weights for merging vector and keyword scores in hybrid mode.
const VECTOR_WEIGHT: f32 = 0.7;
const KEYWORD_WEIGHT: f32 = 0.3;

/// Scores at or above this count as high quality for the diversity bonus.
const HIGH_QUALITY_SCORE: f32 = 0.8;

/// Top-3 confidence weights, biased toward the best hit.
const CONFIDENCE_WEIGHTS: [f32; 3] = [0.5, 0.3, 0.2];

/// Diversity bonus per extra high-quality result, and its cap.
const DIVERSITY_BONUS_STEP: f32 = 0.05;
const DIVERSITY_BONUS_CAP: f32 = 0.15;

/// Retrieval tunables, lifted out of the full config so the engine can be
/// built in isolation.
#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Cosine threshold for the strict vector pass.
    pub similarity_threshold: f32,
    /// Loosened threshold for the adaptive retry.
    pub min_similarity_threshold: f32,
    pub enable_fallback_cascade: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.7,
            min_similarity_threshold: 0.5,
            enable_fallback_cascade: true,
        }
    }
}

/// One stage of the retrieval cascade.
#[async_trait]
pub trait SearchStrategy: Send + Sync {
    fn name(&self) -> &str;

    async fn attempt(
        &self,
        engine: &SearchEngine,
        query: &str,
        scope: Option<&str>,
        limit: usize,
    ) -> Result<SearchOutcome>;
}

pub struct SearchEngine {
    store: Arc<dyn EmbeddingStore>,
    embedder: Arc<CachingEmbedder>,
    config: SearchConfig,
    strategies: Vec<Box<dyn SearchStrategy>>,
}

impl SearchEngine {
    pub fn new(
        store: Arc<dyn EmbeddingStore>,
        embedder: Arc<CachingEmbedder>,
        config: SearchConfig,
    ) -> Self {
        let strategies: Vec<Box<dyn SearchStrategy>> = if config.enable_fallback_cascade {
            vec![
                Box::new(VectorStrategy),
                Box::new(HybridStrategy),
                Box::new(KeywordStrategy),
                Box::new(PartialQueryStrategy),
            ]
        } else {
            vec![Box::new(VectorStrategy)]
        };
        Self { store, embedder, config, strategies }
    }

    /// Strategy names in cascade order.
    pub fn strategy_names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Run the cascade; the first non-empty outcome wins. A failing stage is
    /// logged and treated as empty, never propagated — retrieval problems
    /// must not take down the caller.
    pub async fn search(&self, query: &str, scope: Option<&str>, limit: usize) -> SearchOutcome {
        let mut degraded = false;
        for strategy in &self.strategies {
            match strategy.attempt(self, query, scope, limit).await {
                Ok(outcome) => {
                    degraded |= outcome.degraded;
                    if !outcome.results.is_empty() {
                        tracing::debug!(
                            "Search strategy '{}' returned {} results",
                            strategy.name(),
                            outcome.results.len()
                        );
                        return SearchOutcome { results: outcome.results, degraded };
                    }
                }
                Err(e) => {
                    tracing::warn!("Search strategy '{}' failed: {e}", strategy.name());
                }
            }
        }
        tracing::debug!("All search strategies exhausted without results");
        SearchOutcome { results: Vec::new(), degraded }
    }

    /// Single vector pass against every stored chunk at an explicit
    /// threshold.
    pub async fn vector_search(
        &self,
        query: &str,
        scope: Option<&str>,
        limit: usize,
        threshold: f32,
    ) -> Result<SearchOutcome> {
        let embedded = self.embedder.embed(query).await;
        let chunks = self.store.chunks(scope).await?;

        let mut results: Vec<SearchResult> = chunks
            .into_iter()
            .filter_map(|chunk| {
                let score = cosine_similarity(&embedded.vector, &chunk.embedding);
                if score >= threshold {
                    let source = chunk.source_info();
                    Some(SearchResult { chunk, score, source })
                } else {
                    None
                }
            })
            .collect();

        sort_by_score(&mut results);
        results.truncate(limit);
        Ok(SearchOutcome { results, degraded: embedded.is_degraded() })
    }

    /// Case-insensitive substring matching over extracted significant terms.
    pub async fn keyword_search(
        &self,
        query: &str,
        scope: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SearchResult>> {
        let terms = extract_keywords(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let chunks = self.store.chunks(scope).await?;
        let mut results: Vec<SearchResult> = chunks
            .into_iter()
            .filter_map(|chunk| {
                let score = keyword_score(&chunk.text, &terms);
                if score > 0.0 {
                    let source = chunk.source_info();
                    Some(SearchResult { chunk, score, source })
                } else {
                    None
                }
            })
            .collect();

        sort_by_score(&mut results);
        results.truncate(limit);
        Ok(results)
    }
}

// ─── Strategies ─────────────────────────────────────────────────────────────

/// Strict cosine pass with one adaptive retry at the loose threshold.
pub struct VectorStrategy;

#[async_trait]
impl SearchStrategy for VectorStrategy {
    fn name(&self) -> &str {
        "vector"
    }

    async fn attempt(
        &self,
        engine: &SearchEngine,
        query: &str,
        scope: Option<&str>,
        limit: usize,
    ) -> Result<SearchOutcome> {
        let strict = engine
            .vector_search(query, scope, limit, engine.config.similarity_threshold)
            .await?;
        if !strict.results.is_empty() {
            return Ok(strict);
        }
        tracing::debug!(
            "No hits at threshold {:.2}, retrying at {:.2}",
            engine.config.similarity_threshold,
            engine.config.min_similarity_threshold
        );
        engine
            .vector_search(query, scope, limit, engine.config.min_similarity_threshold)
            .await
    }
}

/// Weighted merge of a relaxed vector pass and a keyword pass.
pub struct HybridStrategy;

#[async_trait]
impl SearchStrategy for HybridStrategy {
    fn name(&self) -> &str {
        "hybrid"
    }

    async fn attempt(
        &self,
        engine: &SearchEngine,
        query: &str,
        scope: Option<&str>,
        limit: usize,
    ) -> Result<SearchOutcome> {
        // Vector arm runs well below the loose threshold; the keyword arm
        // is there to confirm weak semantic hits.
        let relaxed = engine.config.min_similarity_threshold * 0.5;
        let vector = engine.vector_search(query, scope, limit * 2, relaxed).await?;
        let keyword = engine.keyword_search(query, scope, limit * 2).await?;
        let degraded = vector.degraded;

        let mut merged: HashMap<String, (f32, f32, SearchResult)> = HashMap::new();
        for r in vector.results {
            let score = r.score;
            let entry = merged.entry(r.chunk.id.clone()).or_insert((0.0, 0.0, r));
            entry.0 = entry.0.max(score);
        }
        for r in keyword {
            let score = r.score;
            let entry = merged.entry(r.chunk.id.clone()).or_insert((0.0, 0.0, r));
            entry.1 = entry.1.max(score);
        }

        let mut results: Vec<SearchResult> = merged
            .into_values()
            .map(|(v, k, mut r)| {
                r.score = v * VECTOR_WEIGHT + k * KEYWORD_WEIGHT;
                r
            })
            .collect();

        sort_by_score(&mut results);
        results.truncate(limit);
        Ok(SearchOutcome { results, degraded })
    }
}

/// Pure keyword matching; rescues queries whose embedding is useless.
pub struct KeywordStrategy;

#[async_trait]
impl SearchStrategy for KeywordStrategy {
    fn name(&self) -> &str {
        "keyword"
    }

    async fn attempt(
        &self,
        engine: &SearchEngine,
        query: &str,
        scope: Option<&str>,
        limit: usize,
    ) -> Result<SearchOutcome> {
        let results = engine.keyword_search(query, scope, limit).await?;
        Ok(SearchOutcome { results, degraded: false })
    }
}

/// Last resort for compound questions: retry with the leading half of the
/// query, which usually carries the indexable clause.
pub struct PartialQueryStrategy;

#[async_trait]
impl SearchStrategy for PartialQueryStrategy {
    fn name(&self) -> &str {
        "partial"
    }

    async fn attempt(
        &self,
        engine: &SearchEngine,
        query: &str,
        scope: Option<&str>,
        limit: usize,
    ) -> Result<SearchOutcome> {
        let words: Vec<&str> = query.split_whitespace().collect();
        if words.len() < 2 {
            return Ok(SearchOutcome::default());
        }
        let head = words[..words.len().div_ceil(2)].join(" ");
        tracing::debug!("Partial-query retry with head {head:?}");
        engine
            .vector_search(&head, scope, limit, engine.config.min_similarity_threshold)
            .await
    }
}

// ─── Scoring ────────────────────────────────────────────────────────────────

/// Cosine similarity: dot(a, b) / (‖a‖ · ‖b‖).
///
/// Returns 0.0 when either norm is zero or the dimensions differ — always
/// defined, never an error.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Normalized match-frequency score in [0, 1]: total term occurrences,
/// saturating at three matches per term.
fn keyword_score(text: &str, terms: &[String]) -> f32 {
    let haystack = text.to_lowercase();
    let matches: usize = terms.iter().map(|t| haystack.matches(t.as_str()).count()).sum();
    if matches == 0 {
        return 0.0;
    }
    (matches as f32 / (terms.len() as f32 * 3.0)).min(1.0)
}

/// Confidence percentage (0-100) for a result set ordered by score.
///
/// Weighted average of the top three scores, renormalized when fewer exist,
/// plus a capped bonus for additional high-quality hits further down the
/// list. Monotonic in the top score.
pub fn confidence_score(results: &[SearchResult]) -> u8 {
    if results.is_empty() {
        return 0;
    }

    let top = results.len().min(CONFIDENCE_WEIGHTS.len());
    let weight_sum: f32 = CONFIDENCE_WEIGHTS[..top].iter().sum();
    let weighted: f32 = results[..top]
        .iter()
        .zip(CONFIDENCE_WEIGHTS.iter())
        .map(|(r, w)| r.score.max(0.0) * w)
        .sum::<f32>()
        / weight_sum;

    let extra_quality = results
        .iter()
        .skip(CONFIDENCE_WEIGHTS.len())
        .filter(|r| r.score >= HIGH_QUALITY_SCORE)
        .count();
    let bonus = (extra_quality as f32 * DIVERSITY_BONUS_STEP).min(DIVERSITY_BONUS_CAP);

    (((weighted + bonus) * 100.0).round().clamp(0.0, 100.0)) as u8
}

fn sort_by_score(results: &mut [SearchResult]) {
    results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
}
