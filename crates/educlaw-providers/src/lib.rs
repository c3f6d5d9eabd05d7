//! # EduClaw Providers
//!
//! Provider bindings for the answering engine. All OpenAI-compatible hosts
//! (OpenAI, DeepSeek, Groq, Ollama) are served by a single
//! [`OpenAiCompatibleProvider`](openai_compatible::OpenAiCompatibleProvider);
//! arbitrary endpoints use a `custom:<url>` provider name.

pub mod openai_compatible;
pub mod registry;

use std::sync::Arc;

use educlaw_core::config::EduClawConfig;
use educlaw_core::error::{EduClawError, Result};
use educlaw_core::traits::{CompletionProvider, EmbeddingProvider};

use openai_compatible::OpenAiCompatibleProvider;

/// Create the completion provider named by `config.llm.provider`.
pub fn create_completion_provider(config: &EduClawConfig) -> Result<Arc<dyn CompletionProvider>> {
    let llm = &config.llm;
    let provider = build(&llm.provider, &llm.api_key, &llm.endpoint)?;
    Ok(Arc::new(provider))
}

/// Create the embedding provider named by `config.embedding.provider`.
pub fn create_embedding_provider(config: &EduClawConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    let emb = &config.embedding;
    let provider =
        build(&emb.provider, &emb.api_key, &emb.endpoint)?.with_embedding_model(&emb.model, emb.dimensions);
    Ok(Arc::new(provider))
}

fn build(name: &str, api_key: &str, endpoint: &str) -> Result<OpenAiCompatibleProvider> {
    if let Some(url) = name.strip_prefix("custom:") {
        return Ok(OpenAiCompatibleProvider::custom(url, api_key));
    }
    let preset = registry::get_preset(name)
        .ok_or_else(|| EduClawError::ProviderNotFound(name.to_string()))?;
    Ok(OpenAiCompatibleProvider::from_preset(preset, api_key, endpoint))
}

/// List all usable provider names.
pub fn available_providers() -> Vec<&'static str> {
    let mut names = registry::all_provider_names();
    names.push("custom");
    names
}
