//! Unified OpenAI-compatible client for chat completions and embeddings.
//!
//! One struct serves every compatible host; providers differ only by
//! endpoint, auth style, and API key. HTTP status codes are mapped onto the
//! typed error taxonomy so callers can react to rate limits and context
//! overflow specifically instead of pattern-matching error strings.

use async_trait::async_trait;
use serde_json::{Value, json};

use educlaw_core::error::{EduClawError, Result};
use educlaw_core::traits::{CompletionProvider, EmbeddingProvider};
use educlaw_core::types::{CompletionParams, Embedding, Message};

use crate::registry::{AuthStyle, ProviderPreset};

pub struct OpenAiCompatibleProvider {
    name: String,
    api_key: String,
    base_url: String,
    chat_path: String,
    embeddings_path: String,
    auth_style: AuthStyle,
    /// Embedding model and its output dimensionality; unset when the
    /// instance only serves completions.
    embedding_model: String,
    dimensions: usize,
    client: reqwest::Client,
}

impl OpenAiCompatibleProvider {
    /// Build from a known preset.
    ///
    /// Resolution order: API key from explicit config, then the preset's
    /// environment variables; base URL from explicit config, then the env
    /// override, then the preset default.
    pub fn from_preset(preset: &'static ProviderPreset, api_key: &str, endpoint: &str) -> Self {
        let api_key = if !api_key.is_empty() {
            api_key.to_string()
        } else {
            preset
                .env_keys
                .iter()
                .find_map(|k| std::env::var(k).ok())
                .unwrap_or_default()
        };

        let base_url = if !endpoint.is_empty() {
            endpoint.trim_end_matches('/').to_string()
        } else {
            preset
                .base_url_env
                .and_then(|k| std::env::var(k).ok())
                .map(|host| {
                    let host = host.trim_end_matches('/');
                    if host.ends_with("/v1") {
                        host.to_string()
                    } else {
                        format!("{host}/v1")
                    }
                })
                .unwrap_or_else(|| preset.base_url.to_string())
        };

        Self {
            name: preset.name.to_string(),
            api_key,
            base_url,
            chat_path: preset.chat_path.to_string(),
            embeddings_path: preset.embeddings_path.to_string(),
            auth_style: preset.auth_style,
            embedding_model: String::new(),
            dimensions: 0,
            client: reqwest::Client::new(),
        }
    }

    /// Build against an arbitrary OpenAI-compatible endpoint.
    pub fn custom(endpoint: &str, api_key: &str) -> Self {
        let api_key = if !api_key.is_empty() {
            api_key.to_string()
        } else {
            std::env::var("CUSTOM_API_KEY").unwrap_or_default()
        };
        let auth_style = if api_key.is_empty() { AuthStyle::None } else { AuthStyle::Bearer };

        Self {
            name: "custom".to_string(),
            api_key,
            base_url: endpoint.trim_end_matches('/').to_string(),
            chat_path: "/chat/completions".to_string(),
            embeddings_path: "/embeddings".to_string(),
            auth_style,
            embedding_model: String::new(),
            dimensions: 0,
            client: reqwest::Client::new(),
        }
    }

    /// Configure the embedding side (model name and fixed dimensionality).
    pub fn with_embedding_model(mut self, model: &str, dimensions: usize) -> Self {
        self.embedding_model = model.to_string();
        self.dimensions = dimensions;
        self
    }

    fn apply_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.auth_style {
            AuthStyle::Bearer => req.header("Authorization", format!("Bearer {}", self.api_key)),
            AuthStyle::None => req,
        }
    }

    fn check_api_key(&self) -> Result<()> {
        if self.auth_style != AuthStyle::None && self.api_key.is_empty() {
            return Err(EduClawError::ApiKeyMissing(self.name.clone()));
        }
        Ok(())
    }

    /// Map a failed response onto the typed taxonomy: 429 is rate limiting,
    /// 400/413 bodies mentioning context length are overflow, everything
    /// else is a generic provider error.
    fn map_status_error(&self, status: reqwest::StatusCode, body: &str) -> EduClawError {
        if status.as_u16() == 429 {
            return EduClawError::RateLimited(format!("{} returned 429: {}", self.name, body));
        }
        let lower = body.to_lowercase();
        if (status.as_u16() == 400 || status.as_u16() == 413)
            && (lower.contains("context_length")
                || lower.contains("context length")
                || lower.contains("maximum context")
                || lower.contains("too many tokens"))
        {
            return EduClawError::ContextTooLong(format!("{} rejected request: {}", self.name, body));
        }
        EduClawError::Provider(format!("{} API error {}: {}", self.name, status, body))
    }

    async fn post_json(&self, url: &str, body: &Value) -> Result<Value> {
        let req = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .json(body);
        let resp = self
            .apply_auth(req)
            .send()
            .await
            .map_err(|e| EduClawError::Http(format!("{} connection failed ({}): {}", self.name, url, e)))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(self.map_status_error(status, &text));
        }

        resp.json::<Value>()
            .await
            .map_err(|e| EduClawError::Http(format!("{} returned invalid JSON: {}", self.name, e)))
    }
}

#[async_trait]
impl CompletionProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, messages: &[Message], params: &CompletionParams) -> Result<String> {
        self.check_api_key()?;

        let body = json!({
            "model": params.model,
            "temperature": params.temperature,
            "max_tokens": params.max_tokens,
            "messages": messages,
        });

        let url = format!("{}{}", self.base_url, self.chat_path);
        let json = self.post_json(&url, &body).await?;

        let content = json["choices"]
            .get(0)
            .and_then(|c| c["message"]["content"].as_str())
            .ok_or_else(|| EduClawError::Provider(format!("{}: no choices in response", self.name)))?;

        if let Some(usage) = json["usage"].as_object() {
            tracing::debug!(
                "{} completion used {} tokens",
                self.name,
                usage.get("total_tokens").and_then(|v| v.as_u64()).unwrap_or(0)
            );
        }

        Ok(content.to_string())
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Embedding> {
        let mut all = self.embed_batch(&[text.to_string()]).await?;
        all.pop()
            .ok_or_else(|| EduClawError::Provider(format!("{}: empty embedding response", self.name)))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        self.check_api_key()?;
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let body = json!({
            "model": self.embedding_model,
            "input": texts,
        });

        let url = format!("{}{}", self.base_url, self.embeddings_path);
        let json = self.post_json(&url, &body).await?;

        let data = json["data"]
            .as_array()
            .ok_or_else(|| EduClawError::Provider(format!("{}: no data in embedding response", self.name)))?;

        // Usage is reported per call, not per item; spread it evenly.
        let total_tokens = json["usage"]["total_tokens"].as_u64().unwrap_or(0) as u32;
        let per_item = if data.is_empty() { 0 } else { total_tokens / data.len() as u32 };

        let mut out = Vec::with_capacity(data.len());
        for item in data {
            let vector: Vec<f32> = item["embedding"]
                .as_array()
                .map(|arr| arr.iter().filter_map(|v| v.as_f64()).map(|v| v as f32).collect())
                .unwrap_or_default();
            if vector.is_empty() {
                return Err(EduClawError::Provider(format!(
                    "{}: embedding item missing vector",
                    self.name
                )));
            }
            out.push(Embedding { vector, tokens: per_item });
        }

        if out.len() != texts.len() {
            return Err(EduClawError::Provider(format!(
                "{}: expected {} embeddings, got {}",
                self.name,
                texts.len(),
                out.len()
            )));
        }

        Ok(out)
    }
}
