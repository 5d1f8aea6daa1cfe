//! Backs the [`Reasoner`] capability with an OpenAI-compatible chat model.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use mathweave_llm::{
    ChatMessage, ChatRequest, OpenAiCompatProvider, Provider, ProviderError, builtin_providers,
    is_retryable, resolve_model,
};
use mathweave_types::ReasonerError;
use mathweave_types::config::ReasonerConfig;
use mathweave_types::reasoner::{Completion, ReasonerRequest};

use crate::prompts;
use crate::reasoner::Reasoner;

pub struct LlmReasoner {
    provider: Arc<dyn Provider>,
    model: String,
    temperature: f64,
}

impl LlmReasoner {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>, temperature: f64) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature,
        }
    }

    /// Resolve `config.model` (`provider/model`) against the built-in
    /// providers and build a client for it.
    pub fn from_config(config: &ReasonerConfig) -> Result<Self, ProviderError> {
        let (provider_config, model) = resolve_model(&builtin_providers(), &config.model)
            .ok_or_else(|| ProviderError::NotConfigured(format!("no provider for model '{}'", config.model)))?;
        debug!(provider = %provider_config.name, model = %model, "resolved reasoner model");
        let provider = OpenAiCompatProvider::new(provider_config);
        Ok(Self::new(Arc::new(provider), model, config.temperature))
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

/// Map a provider failure onto the capability's error kinds.
pub fn map_provider_error(err: ProviderError) -> ReasonerError {
    if matches!(err, ProviderError::Timeout) {
        return ReasonerError::Timeout;
    }
    if is_retryable(&err) {
        return ReasonerError::Unavailable(err.to_string());
    }
    match err {
        ProviderError::InvalidResponse(_) | ProviderError::Json(_) => {
            ReasonerError::Malformed(err.to_string())
        }
        other => ReasonerError::Rejected(other.to_string()),
    }
}

#[async_trait]
impl Reasoner for LlmReasoner {
    fn name(&self) -> &str {
        self.provider.name()
    }

    async fn invoke(&self, request: &ReasonerRequest) -> Result<Completion, ReasonerError> {
        let messages = vec![
            ChatMessage::system(prompts::system_prompt(request)),
            ChatMessage::user(prompts::user_message(request)),
        ];
        let mut chat = ChatRequest::new(&self.model, messages).json_mode();
        chat.temperature = Some(self.temperature);

        let response = self.provider.complete(&chat).await.map_err(map_provider_error)?;
        let content = response
            .first_content()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| ReasonerError::Malformed("empty completion".into()))?;
        Ok(Completion::new(content))
    }
}
