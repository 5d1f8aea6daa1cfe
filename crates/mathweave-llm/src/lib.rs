//! LLM provider abstraction for mathweave.
//!
//! A small, standalone client for OpenAI-compatible chat completion
//! endpoints. The reasoning backend in `mathweave-core` sits on top of it.
//!
//! - [`Provider`] defines the chat completion interface
//! - [`OpenAiCompatProvider`] implements it for any OpenAI-compatible API
//! - [`config::resolve_model`] maps `provider/model` strings to endpoints
//! - [`retry`] supplies the backoff policy

pub mod config;
pub mod error;
pub mod openai_compat;
pub mod provider;
pub mod retry;
pub mod types;

pub use config::{LlmProviderConfig, builtin_providers, resolve_model};
pub use error::{ProviderError, Result};
pub use openai_compat::OpenAiCompatProvider;
pub use provider::Provider;
pub use retry::{RetryConfig, compute_delay, delay_for, is_retryable};
pub use types::{ChatMessage, ChatRequest, ChatResponse, Choice, Usage};
