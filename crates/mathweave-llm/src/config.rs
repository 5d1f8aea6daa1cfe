//! Provider configuration and built-in provider definitions.
//!
//! Each [`LlmProviderConfig`] describes how to reach one OpenAI-compatible
//! endpoint. Model strings carry a routing prefix (`groq/llama-3.3-70b-versatile`)
//! that [`resolve_model`] maps back to a provider.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Configuration for a single provider endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmProviderConfig {
    /// Human-readable provider name (e.g. "groq").
    pub name: String,

    /// Base URL for the OpenAI-compatible API.
    pub base_url: String,

    /// Environment variable that holds the API key.
    pub api_key_env: String,

    /// Local servers accept unauthenticated requests.
    #[serde(default)]
    pub api_key_optional: bool,

    /// Prefix used for routing model names to this provider (e.g. "groq/").
    #[serde(default)]
    pub model_prefix: Option<String>,

    /// Model to use when the caller names only the provider.
    #[serde(default)]
    pub default_model: Option<String>,

    /// Extra HTTP headers sent with every request.
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Request timeout in seconds. Defaults to 120.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl LlmProviderConfig {
    fn builtin(name: &str, base_url: &str, api_key_env: &str, default_model: Option<&str>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            api_key_env: api_key_env.into(),
            api_key_optional: false,
            model_prefix: Some(format!("{name}/")),
            default_model: default_model.map(String::from),
            headers: HashMap::new(),
            timeout_secs: None,
        }
    }
}

/// Returns the built-in provider configurations. The first entry is the
/// default for unprefixed model names.
pub fn builtin_providers() -> Vec<LlmProviderConfig> {
    let mut ollama = LlmProviderConfig::builtin(
        "ollama",
        "http://localhost:11434/v1",
        "OLLAMA_API_KEY",
        Some("qwen2.5-math"),
    );
    ollama.api_key_optional = true;

    vec![
        LlmProviderConfig::builtin(
            "groq",
            "https://api.groq.com/openai/v1",
            "GROQ_API_KEY",
            Some("llama-3.3-70b-versatile"),
        ),
        LlmProviderConfig::builtin(
            "openai",
            "https://api.openai.com/v1",
            "OPENAI_API_KEY",
            Some("gpt-4o"),
        ),
        LlmProviderConfig::builtin(
            "deepseek",
            "https://api.deepseek.com/v1",
            "DEEPSEEK_API_KEY",
            Some("deepseek-chat"),
        ),
        LlmProviderConfig::builtin(
            "openrouter",
            "https://openrouter.ai/api/v1",
            "OPENROUTER_API_KEY",
            None,
        ),
        LlmProviderConfig::builtin(
            "together",
            "https://api.together.xyz/v1",
            "TOGETHER_API_KEY",
            None,
        ),
        ollama,
    ]
}

/// Map a model string to its provider and the bare model name.
///
/// `groq/llama-3.3-70b-versatile` resolves to the groq provider and
/// `llama-3.3-70b-versatile`. A bare provider name (`groq`) resolves to that
/// provider's default model. Anything else goes to the first provider with
/// the model name unchanged. Returns `None` when the bare model is empty and
/// the provider has no default.
pub fn resolve_model(
    providers: &[LlmProviderConfig],
    model: &str,
) -> Option<(LlmProviderConfig, String)> {
    let model = model.trim();

    // Longest prefix wins.
    let mut candidates: Vec<&LlmProviderConfig> = providers
        .iter()
        .filter(|p| p.model_prefix.is_some())
        .collect();
    candidates.sort_by_key(|p| std::cmp::Reverse(p.model_prefix.as_ref().map_or(0, String::len)));

    for provider in candidates {
        let Some(prefix) = provider.model_prefix.as_deref() else {
            continue;
        };
        let bare_name = prefix.trim_end_matches('/');
        if let Some(rest) = model.strip_prefix(prefix) {
            return non_empty_model(provider, rest);
        }
        if model == bare_name {
            return non_empty_model(provider, "");
        }
    }

    let default = providers.first()?;
    non_empty_model(default, model)
}

fn non_empty_model(provider: &LlmProviderConfig, model: &str) -> Option<(LlmProviderConfig, String)> {
    let model = if model.is_empty() {
        provider.default_model.clone()?
    } else {
        model.to_string()
    };
    Some((provider.clone(), model))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groq_is_the_default_provider() {
        let providers = builtin_providers();
        assert_eq!(providers[0].name, "groq");
        assert_eq!(providers[0].base_url, "https://api.groq.com/openai/v1");
        assert_eq!(providers[0].api_key_env, "GROQ_API_KEY");
    }

    #[test]
    fn all_builtins_have_prefixes() {
        for p in builtin_providers() {
            let prefix = p.model_prefix.as_deref().unwrap();
            assert!(prefix.ends_with('/'), "prefix for {} should end with /", p.name);
            assert!(!p.api_key_env.is_empty());
        }
    }

    #[test]
    fn only_ollama_allows_missing_key() {
        let optional: Vec<String> = builtin_providers()
            .into_iter()
            .filter(|p| p.api_key_optional)
            .map(|p| p.name)
            .collect();
        assert_eq!(optional, vec!["ollama".to_string()]);
    }

    #[test]
    fn resolve_prefixed_model() {
        let providers = builtin_providers();
        let (p, model) = resolve_model(&providers, "openai/gpt-4o-mini").unwrap();
        assert_eq!(p.name, "openai");
        assert_eq!(model, "gpt-4o-mini");
    }

    #[test]
    fn resolve_bare_provider_uses_default_model() {
        let providers = builtin_providers();
        let (p, model) = resolve_model(&providers, "groq").unwrap();
        assert_eq!(p.name, "groq");
        assert_eq!(model, "llama-3.3-70b-versatile");
    }

    #[test]
    fn resolve_unprefixed_goes_to_first_provider() {
        let providers = builtin_providers();
        let (p, model) = resolve_model(&providers, "mixtral-8x7b").unwrap();
        assert_eq!(p.name, "groq");
        assert_eq!(model, "mixtral-8x7b");
    }

    #[test]
    fn resolve_without_default_model_fails() {
        let providers = builtin_providers();
        assert!(resolve_model(&providers, "openrouter").is_none());
        assert!(resolve_model(&[], "gpt-4o").is_none());
    }

    #[test]
    fn config_deserialize_minimal() {
        let json = r#"{"name": "local", "base_url": "http://127.0.0.1:8000/v1", "api_key_env": "LOCAL_KEY"}"#;
        let config: LlmProviderConfig = serde_json::from_str(json).unwrap();
        assert!(!config.api_key_optional);
        assert!(config.model_prefix.is_none());
        assert!(config.headers.is_empty());
    }
}
