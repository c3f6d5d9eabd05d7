//! Shared data types for indexing, retrieval, and answering.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Message role for completion requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single chat message sent to the completion provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// Generation options passed through to the completion provider.
#[derive(Debug, Clone)]
pub struct CompletionParams {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Raw embedding as returned by a provider.
#[derive(Debug, Clone)]
pub struct Embedding {
    pub vector: Vec<f32>,
    pub tokens: u32,
}

/// Whether an embedding came from the real provider or the degraded fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingQuality {
    /// Produced by the configured provider.
    Full,
    /// Deterministic pseudo-vector substituted after a provider failure.
    /// Similarity scores computed against it carry no meaning.
    Degraded,
}

/// Quality-tagged embedding handed out by the caching adapter.
#[derive(Debug, Clone)]
pub struct EmbeddedText {
    pub vector: Vec<f32>,
    pub quality: EmbeddingQuality,
}

impl EmbeddedText {
    pub fn is_degraded(&self) -> bool {
        self.quality == EmbeddingQuality::Degraded
    }
}

/// Immutable unit of indexed text.
///
/// All chunks of a document are deleted and regenerated together when its
/// content changes. `chunk_index` carries reserved ranges (lesson body from
/// 0, worked examples from 1000, assessment questions from 2000) so ordering
/// stays stable without being contiguous.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub id: String,
    pub content_id: String,
    pub chunk_index: i64,
    pub text: String,
    pub embedding: Vec<f32>,
    /// Display and attribution bag (title, subject, grade, ...). Never used
    /// for similarity computation.
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl DocumentChunk {
    /// Attribution info derived from the metadata bag.
    pub fn source_info(&self) -> SourceInfo {
        SourceInfo {
            title: self
                .metadata
                .get("title")
                .and_then(|v| v.as_str())
                .unwrap_or("Untitled")
                .to_string(),
            subject: self
                .metadata
                .get("subject")
                .and_then(|v| v.as_str())
                .unwrap_or("General")
                .to_string(),
        }
    }
}

/// Denormalized attribution for display and citation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceInfo {
    pub title: String,
    pub subject: String,
}

/// A scored retrieval hit. Ephemeral, never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub chunk: DocumentChunk,
    /// Cosine score in [-1, 1], or a normalized keyword score in [0, 1].
    pub score: f32,
    pub source: SourceInfo,
}

/// Result set of one retrieval pass, with the degraded marker carried over
/// from the query embedding.
#[derive(Debug, Clone, Default)]
pub struct SearchOutcome {
    pub results: Vec<SearchResult>,
    pub degraded: bool,
}

/// Readable content record fetched from the content store for indexing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentRecord {
    pub content_id: String,
    /// Main body text of the lesson.
    pub body: String,
    /// Worked examples, indexed into their own chunk-index range.
    #[serde(default)]
    pub examples: Vec<String>,
    /// Assessment questions, indexed into their own chunk-index range.
    #[serde(default)]
    pub exercises: Vec<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Final product of the answering pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct RagAnswer {
    pub answer: String,
    pub sources: Vec<SearchResult>,
    /// 0-100 estimate of answer trustworthiness.
    pub confidence: u8,
    pub from_cache: bool,
    /// True when the query embedding fell back to a pseudo-vector.
    pub degraded: bool,
}
