//! The [`Provider`] trait for chat completions.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{ChatRequest, ChatResponse};

/// A backend that can execute chat completion requests.
///
/// The main implementation is
/// [`OpenAiCompatProvider`](crate::openai_compat::OpenAiCompatProvider),
/// which works with any OpenAI-compatible endpoint.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Returns the provider name (e.g. "groq", "openai").
    fn name(&self) -> &str;

    /// Execute a chat completion request and return the response.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`](crate::error::ProviderError) on network
    /// failures, authentication problems, rate limiting, or unparseable
    /// responses.
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse>;
}
