//! Trait seams toward external collaborators.
//!
//! The engine owns none of these services: embeddings and completions come
//! from hosted providers, and lesson content lives in the caller's store.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{CompletionParams, ContentRecord, Embedding, Message};

/// Hosted (or local) embedding service.
///
/// Identical text must produce identical vectors within one provider/model
/// version, otherwise adapter cache entries go stale. Failures must surface
/// as typed errors; the caching adapter degrades on them instead of crashing.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Fixed output dimensionality for the lifetime of an index.
    fn dimensions(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Embedding>;

    /// Embed many texts in one provider call where supported. The default
    /// falls back to sequential single embeds.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}

/// Hosted (or local) chat-completion service.
///
/// Implementations must map rate limiting to `RateLimited` and context
/// overflow to `ContextTooLong` so the generator can recover appropriately.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, messages: &[Message], params: &CompletionParams) -> Result<String>;
}

/// Read access to lesson content for (re-)indexing.
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn fetch(&self, content_id: &str) -> Result<ContentRecord>;
}
