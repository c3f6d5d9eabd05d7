//! EduClaw configuration system.
//!
//! Loaded from `~/.educlaw/config.toml`, with every field optional thanks to
//! serde defaults, then overridden by `EDUCLAW_*` environment variables so
//! deployments can retune the engine without editing files.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{EduClawError, Result};

/// Root configuration for the answering engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EduClawConfig {
    /// Completion (LLM) provider settings
    #[serde(default)]
    pub llm: LlmConfig,
    /// Embedding provider settings
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    /// Retrieval and answering pipeline tunables
    #[serde(default)]
    pub rag: RagConfig,
    /// Embedding store backend
    #[serde(default)]
    pub store: StoreConfig,
}

impl Default for EduClawConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            embedding: EmbeddingConfig::default(),
            rag: RagConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

/// Completion provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider name: "openai", "deepseek", "groq", "ollama", or "custom:<url>"
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    /// API key; falls back to the provider's environment variable when empty
    #[serde(default)]
    pub api_key: String,
    /// Base URL override; empty means the provider's default endpoint
    #[serde(default)]
    pub endpoint: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_llm_provider() -> String {
    "openai".to_string()
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_temperature() -> f32 {
    0.3
}

fn default_max_tokens() -> u32 {
    1024
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: default_llm_model(),
            api_key: String::new(),
            endpoint: String::new(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

/// Embedding provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub endpoint: String,
    /// Output dimensionality; must stay fixed for the lifetime of an index
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,
    /// Capacity of the exact-text embedding cache
    #[serde(default = "default_embedding_cache_size")]
    pub cache_size: usize,
    /// Maximum texts per provider batch call
    #[serde(default = "default_batch_limit")]
    pub batch_limit: usize,
    /// Pause between consecutive sub-batches
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_dimensions() -> usize {
    1536
}

fn default_embedding_cache_size() -> usize {
    1000
}

fn default_batch_limit() -> usize {
    100
}

fn default_batch_delay_ms() -> u64 {
    200
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: default_embedding_model(),
            api_key: String::new(),
            endpoint: String::new(),
            dimensions: default_dimensions(),
            cache_size: default_embedding_cache_size(),
            batch_limit: default_batch_limit(),
            batch_delay_ms: default_batch_delay_ms(),
        }
    }
}

impl EmbeddingConfig {
    pub fn apply_env(&mut self) {
        if let Some(v) = env_parse("EDUCLAW_EMBEDDING_CACHE_SIZE") {
            self.cache_size = v;
        }
        if let Some(v) = env_parse("EDUCLAW_EMBEDDING_BATCH_LIMIT") {
            self.batch_limit = v;
        }
        if let Some(v) = env_parse("EDUCLAW_EMBEDDING_BATCH_DELAY_MS") {
            self.batch_delay_ms = v;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.dimensions == 0 {
            return Err(EduClawError::Config("embedding.dimensions must be > 0".into()));
        }
        if self.batch_limit == 0 {
            return Err(EduClawError::Config("embedding.batch_limit must be > 0".into()));
        }
        if self.cache_size == 0 {
            return Err(EduClawError::Config("embedding.cache_size must be > 0".into()));
        }
        Ok(())
    }
}

/// Retrieval and answering pipeline tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagConfig {
    /// Answer cache time-to-live in seconds
    #[serde(default = "default_cache_ttl_secs")]
    pub answer_cache_ttl_secs: u64,
    /// Maximum entries in the answer cache
    #[serde(default = "default_answer_cache_size")]
    pub answer_cache_size: usize,
    /// Cosine threshold for the strict vector pass
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    /// Loosened threshold for the adaptive retry
    #[serde(default = "default_min_similarity_threshold")]
    pub min_similarity_threshold: f32,
    /// Minimum confidence an answer needs to be cached
    #[serde(default = "default_cache_confidence_threshold")]
    pub cache_confidence_threshold: u8,
    #[serde(default = "default_true")]
    pub enable_answer_cache: bool,
    /// Smart context: document order, adjacency expansion, relevance markers
    #[serde(default = "default_true")]
    pub enable_smart_context: bool,
    /// Fallback cascade: vector, then hybrid, then keyword, then partial
    #[serde(default = "default_true")]
    pub enable_fallback_cascade: bool,
    /// Results requested from the retrieval cascade
    #[serde(default = "default_search_limit")]
    pub search_limit: usize,
    /// Soft maximum chunk length in characters
    #[serde(default = "default_chunk_target_chars")]
    pub chunk_target_chars: usize,
    /// Words carried from the end of one chunk into the next
    #[serde(default = "default_chunk_overlap_words")]
    pub chunk_overlap_words: usize,
    /// Completion attempts before giving up
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay for exponential backoff
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Minimum spacing between completion requests
    #[serde(default = "default_min_request_spacing_ms")]
    pub min_request_spacing_ms: u64,
    /// Period of the background answer-cache sweep
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Log per-phase pipeline timings at info level
    #[serde(default)]
    pub log_timings: bool,
}

fn default_cache_ttl_secs() -> u64 {
    3600
}

fn default_answer_cache_size() -> usize {
    500
}

fn default_similarity_threshold() -> f32 {
    0.7
}

fn default_min_similarity_threshold() -> f32 {
    0.5
}

fn default_cache_confidence_threshold() -> u8 {
    60
}

fn default_true() -> bool {
    true
}

fn default_search_limit() -> usize {
    5
}

fn default_chunk_target_chars() -> usize {
    500
}

fn default_chunk_overlap_words() -> usize {
    10
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    500
}

fn default_min_request_spacing_ms() -> u64 {
    250
}

fn default_sweep_interval_secs() -> u64 {
    300
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            answer_cache_ttl_secs: default_cache_ttl_secs(),
            answer_cache_size: default_answer_cache_size(),
            similarity_threshold: default_similarity_threshold(),
            min_similarity_threshold: default_min_similarity_threshold(),
            cache_confidence_threshold: default_cache_confidence_threshold(),
            enable_answer_cache: true,
            enable_smart_context: true,
            enable_fallback_cascade: true,
            search_limit: default_search_limit(),
            chunk_target_chars: default_chunk_target_chars(),
            chunk_overlap_words: default_chunk_overlap_words(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            min_request_spacing_ms: default_min_request_spacing_ms(),
            sweep_interval_secs: default_sweep_interval_secs(),
            log_timings: false,
        }
    }
}

impl RagConfig {
    pub fn apply_env(&mut self) {
        if let Some(v) = env_parse("EDUCLAW_CACHE_TTL_SECS") {
            self.answer_cache_ttl_secs = v;
        }
        if let Some(v) = env_parse("EDUCLAW_ANSWER_CACHE_SIZE") {
            self.answer_cache_size = v;
        }
        if let Some(v) = env_parse("EDUCLAW_SIMILARITY_THRESHOLD") {
            self.similarity_threshold = v;
        }
        if let Some(v) = env_parse("EDUCLAW_MIN_SIMILARITY_THRESHOLD") {
            self.min_similarity_threshold = v;
        }
        if let Some(v) = env_parse("EDUCLAW_CACHE_CONFIDENCE_THRESHOLD") {
            self.cache_confidence_threshold = v;
        }
        if let Some(v) = env_flag("EDUCLAW_ENABLE_CACHE") {
            self.enable_answer_cache = v;
        }
        if let Some(v) = env_flag("EDUCLAW_ENABLE_SMART_CONTEXT") {
            self.enable_smart_context = v;
        }
        if let Some(v) = env_flag("EDUCLAW_ENABLE_FALLBACK") {
            self.enable_fallback_cascade = v;
        }
        if let Some(v) = env_flag("EDUCLAW_LOG_TIMINGS") {
            self.log_timings = v;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(-1.0..=1.0).contains(&self.similarity_threshold) {
            return Err(EduClawError::Config(
                "rag.similarity_threshold must be within [-1, 1]".into(),
            ));
        }
        if !(-1.0..=1.0).contains(&self.min_similarity_threshold) {
            return Err(EduClawError::Config(
                "rag.min_similarity_threshold must be within [-1, 1]".into(),
            ));
        }
        if self.min_similarity_threshold > self.similarity_threshold {
            return Err(EduClawError::Config(
                "rag.min_similarity_threshold must not exceed rag.similarity_threshold".into(),
            ));
        }
        if self.cache_confidence_threshold > 100 {
            return Err(EduClawError::Config(
                "rag.cache_confidence_threshold must be within 0-100".into(),
            ));
        }
        if self.answer_cache_size == 0 {
            return Err(EduClawError::Config("rag.answer_cache_size must be > 0".into()));
        }
        if self.search_limit == 0 {
            return Err(EduClawError::Config("rag.search_limit must be > 0".into()));
        }
        if self.chunk_target_chars < 50 {
            return Err(EduClawError::Config("rag.chunk_target_chars must be >= 50".into()));
        }
        if self.max_retries == 0 {
            return Err(EduClawError::Config("rag.max_retries must be > 0".into()));
        }
        Ok(())
    }
}

/// Embedding store backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// "sqlite" for persistence, "memory" for ephemeral runs
    #[serde(default = "default_store_backend")]
    pub backend: String,
    #[serde(default = "default_store_path")]
    pub path: String,
}

fn default_store_backend() -> String {
    "sqlite".to_string()
}

fn default_store_path() -> String {
    "~/.educlaw/index.db".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            path: default_store_path(),
        }
    }
}

impl StoreConfig {
    pub fn validate(&self) -> Result<()> {
        match self.backend.as_str() {
            "sqlite" | "memory" => Ok(()),
            other => Err(EduClawError::Config(format!("Unknown store backend: {other}"))),
        }
    }
}

impl EduClawConfig {
    /// Load config from the default path, falling back to defaults when the
    /// file does not exist, then apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        let mut config = if path.exists() {
            Self::load_from(&path)?
        } else {
            Self::default()
        };
        config.rag.apply_env();
        config.embedding.apply_env();
        Ok(config)
    }

    /// Load config from a specific path, then apply environment overrides.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| EduClawError::Config(format!("Failed to read config: {e}")))?;
        let mut config: Self = toml::from_str(&content)
            .map_err(|e| EduClawError::Config(format!("Failed to parse config: {e}")))?;
        config.rag.apply_env();
        config.embedding.apply_env();
        Ok(config)
    }

    /// Save config to the default path, creating `~/.educlaw/` if needed.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| EduClawError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// EduClaw home directory (~/.educlaw).
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".educlaw")
    }

    /// Check all sections once at engine construction.
    pub fn validate(&self) -> Result<()> {
        self.rag.validate()?;
        self.embedding.validate()?;
        self.store.validate()?;
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok()?.parse().ok()
}

fn env_flag(key: &str) -> Option<bool> {
    let v = std::env::var(key).ok()?;
    Some(matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EduClawConfig::default();
        assert_eq!(config.llm.provider, "openai");
        assert_eq!(config.rag.similarity_threshold, 0.7);
        assert_eq!(config.rag.min_similarity_threshold, 0.5);
        assert_eq!(config.rag.answer_cache_ttl_secs, 3600);
        assert_eq!(config.embedding.batch_limit, 100);
        assert_eq!(config.store.backend, "sqlite");
        assert!(config.rag.enable_fallback_cascade);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            [llm]
            provider = "ollama"
            model = "llama3.2"
            temperature = 0.1

            [rag]
            similarity_threshold = 0.8
            min_similarity_threshold = 0.6
            enable_smart_context = false

            [store]
            backend = "memory"
        "#;
        let config: EduClawConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.llm.provider, "ollama");
        assert_eq!(config.llm.model, "llama3.2");
        assert_eq!(config.rag.similarity_threshold, 0.8);
        assert!(!config.rag.enable_smart_context);
        assert_eq!(config.store.backend, "memory");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_missing_fields_use_defaults() {
        let toml_str = r#"
            [llm]
            model = "gpt-4o"
        "#;
        let config: EduClawConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.llm.provider, "openai");
        assert_eq!(config.llm.model, "gpt-4o");
        assert_eq!(config.llm.temperature, 0.3);
        assert_eq!(config.rag.search_limit, 5);
        assert_eq!(config.embedding.dimensions, 1536);
    }

    #[test]
    fn test_validate_rejects_inverted_thresholds() {
        let mut config = EduClawConfig::default();
        config.rag.similarity_threshold = 0.4;
        config.rag.min_similarity_threshold = 0.6;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_out_of_range_threshold() {
        let mut config = EduClawConfig::default();
        config.rag.similarity_threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_backend() {
        let mut config = EduClawConfig::default();
        config.store.backend = "postgres".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_home_dir() {
        let home = EduClawConfig::home_dir();
        assert!(home.to_string_lossy().contains(".educlaw"));
    }
}
