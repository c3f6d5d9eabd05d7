//! Provider presets — static endpoint definitions for known hosts.
//!
//! Every OpenAI-compatible service is described here by a `ProviderPreset`;
//! the unified client in `openai_compatible` uses these entries to reach any
//! of them without per-provider code.

/// How to attach credentials to requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStyle {
    /// `Authorization: Bearer <key>`
    Bearer,
    /// No authentication (local servers).
    None,
}

/// Static endpoint preset for one provider.
#[derive(Debug, Clone)]
pub struct ProviderPreset {
    pub name: &'static str,
    pub base_url: &'static str,
    pub chat_path: &'static str,
    pub embeddings_path: &'static str,
    /// Environment variables to try for the API key, in order.
    pub env_keys: &'static [&'static str],
    pub auth_style: AuthStyle,
    /// Environment variable that overrides the base URL (e.g. OLLAMA_HOST).
    pub base_url_env: Option<&'static str>,
}

// ─── Provider Definitions ───────────────────────────────────────────────────

static PRESETS: &[ProviderPreset] = &[
    ProviderPreset {
        name: "openai",
        base_url: "https://api.openai.com/v1",
        chat_path: "/chat/completions",
        embeddings_path: "/embeddings",
        env_keys: &["OPENAI_API_KEY"],
        auth_style: AuthStyle::Bearer,
        base_url_env: None,
    },
    ProviderPreset {
        name: "deepseek",
        base_url: "https://api.deepseek.com/v1",
        chat_path: "/chat/completions",
        embeddings_path: "/embeddings",
        env_keys: &["DEEPSEEK_API_KEY"],
        auth_style: AuthStyle::Bearer,
        base_url_env: None,
    },
    ProviderPreset {
        name: "groq",
        base_url: "https://api.groq.com/openai/v1",
        chat_path: "/chat/completions",
        embeddings_path: "/embeddings",
        env_keys: &["GROQ_API_KEY"],
        auth_style: AuthStyle::Bearer,
        base_url_env: None,
    },
    ProviderPreset {
        name: "ollama",
        base_url: "http://localhost:11434/v1",
        chat_path: "/chat/completions",
        embeddings_path: "/embeddings",
        env_keys: &[],
        auth_style: AuthStyle::None,
        base_url_env: Some("OLLAMA_HOST"),
    },
];

/// Look up a preset by provider name.
pub fn get_preset(name: &str) -> Option<&'static ProviderPreset> {
    PRESETS.iter().find(|p| p.name == name)
}

/// Names of all built-in providers.
pub fn all_provider_names() -> Vec<&'static str> {
    PRESETS.iter().map(|p| p.name).collect()
}
