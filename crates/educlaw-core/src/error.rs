//! Error taxonomy for EduClaw.
//!
//! Provider failures keep `RateLimited` and `ContextTooLong` as their own
//! variants: the answering pipeline reacts to each differently (backoff vs.
//! truncate-and-retry), so they must stay distinguishable from a generic
//! provider error.

use thiserror::Error;

/// Result type used across all EduClaw crates.
pub type Result<T> = std::result::Result<T, EduClawError>;

#[derive(Debug, Error)]
pub enum EduClawError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Provider not found: {0}")]
    ProviderNotFound(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Context too long: {0}")]
    ContextTooLong(String),

    #[error("API key missing for provider: {0}")]
    ApiKeyMissing(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Content not found: {0}")]
    ContentNotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl EduClawError {
    /// Whether a retry with backoff could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited(_) | Self::Http(_))
    }
}

impl From<serde_json::Error> for EduClawError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
