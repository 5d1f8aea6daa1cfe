//! The reasoning capability and the client every stage calls it through.
//!
//! [`Reasoner`] is the narrow seam to whatever produces completions (an LLM
//! provider, a scripted replay). Stages never call it directly: they go
//! through [`ReasonerClient`], which bounds each attempt with a timeout,
//! retries transient failures with jittered backoff, stops promptly when the
//! run is cancelled, and records every attempt on the run's [`CallScope`] so
//! the run can be replayed.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use mathweave_llm::retry::{RetryConfig, compute_delay};
use mathweave_types::ReasonerError;
use mathweave_types::config::ReasonerConfig;
use mathweave_types::reasoner::{Completion, PromptRole, ReasonerRequest};
use mathweave_types::run::{ExchangeOutcome, ReasonerExchange};

use crate::completion_json::parse_completion;

/// Structured prompt in, structured completion out.
#[async_trait]
pub trait Reasoner: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &str;

    async fn invoke(&self, request: &ReasonerRequest) -> Result<Completion, ReasonerError>;
}

/// Per-run call context: the run's cancellation token and the log of
/// reasoner attempts made since the scope was created.
#[derive(Clone, Default)]
pub struct CallScope {
    cancel: CancellationToken,
    exchanges: Arc<Mutex<Vec<ReasonerExchange>>>,
}

impl CallScope {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            exchanges: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn record(&self, exchange: ReasonerExchange) {
        if let Ok(mut log) = self.exchanges.lock() {
            log.push(exchange);
        }
    }

    /// Attempts already recorded for `(role, slot)`.
    pub fn attempts(&self, role: PromptRole, slot: u32) -> u32 {
        self.exchanges
            .lock()
            .map(|log| log.iter().filter(|e| e.role == role && e.slot == slot).count() as u32)
            .unwrap_or(0)
    }

    /// Take every exchange recorded so far.
    pub fn drain(&self) -> Vec<ReasonerExchange> {
        self.exchanges
            .lock()
            .map(|mut log| std::mem::take(&mut *log))
            .unwrap_or_default()
    }
}

/// Timeout, retry and cancellation around a [`Reasoner`].
pub struct ReasonerClient {
    reasoner: Arc<dyn Reasoner>,
    retry: RetryConfig,
    call_timeout: Duration,
}

impl ReasonerClient {
    pub fn new(reasoner: Arc<dyn Reasoner>, config: &ReasonerConfig) -> Self {
        Self {
            reasoner,
            retry: RetryConfig {
                max_retries: config.max_retries,
                base_delay: Duration::from_millis(config.base_delay_ms),
                max_delay: Duration::from_millis(config.max_delay_ms),
                jitter_fraction: config.jitter_fraction,
            },
            call_timeout: Duration::from_millis(config.call_timeout_ms),
        }
    }

    pub fn backend_name(&self) -> &str {
        self.reasoner.name()
    }

    /// Invoke with the configured per-call timeout and retry policy.
    pub async fn invoke(
        &self,
        scope: &CallScope,
        request: &ReasonerRequest,
    ) -> Result<Completion, ReasonerError> {
        self.invoke_within(scope, request, None).await
    }

    /// Invoke, giving up with [`ReasonerError::Timeout`] once `budget` has
    /// elapsed across all attempts.
    pub async fn invoke_within(
        &self,
        scope: &CallScope,
        request: &ReasonerRequest,
        budget: Option<Duration>,
    ) -> Result<Completion, ReasonerError> {
        let deadline = budget.map(|b| Instant::now() + b);
        let mut attempt = 0u32;

        loop {
            if scope.is_cancelled() {
                return Err(ReasonerError::Cancelled);
            }

            let per_call = match deadline {
                Some(d) => {
                    let remaining = d.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(ReasonerError::Timeout);
                    }
                    remaining.min(self.call_timeout)
                }
                None => self.call_timeout,
            };

            let result = tokio::select! {
                biased;
                _ = scope.cancel.cancelled() => return Err(ReasonerError::Cancelled),
                r = tokio::time::timeout(per_call, self.reasoner.invoke(request)) => {
                    r.unwrap_or(Err(ReasonerError::Timeout))
                }
            };

            scope.record(ReasonerExchange {
                role: request.role,
                slot: request.slot,
                attempt,
                outcome: match &result {
                    Ok(c) => ExchangeOutcome::Completed {
                        content: c.content.clone(),
                        confidence: c.confidence,
                    },
                    Err(e) => ExchangeOutcome::Failed { error: e.clone() },
                },
            });

            match result {
                Ok(completion) => {
                    if attempt > 0 {
                        debug!(role = %request.role, slot = request.slot, attempt, "reasoner call succeeded after retry");
                    }
                    return Ok(completion);
                }
                Err(err) if err.is_retryable() && attempt < self.retry.max_retries => {
                    let delay = compute_delay(&self.retry, attempt);
                    warn!(
                        role = %request.role,
                        slot = request.slot,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying reasoner call"
                    );
                    tokio::select! {
                        biased;
                        _ = scope.cancel.cancelled() => return Err(ReasonerError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Invoke and decode the completion as JSON.
    pub async fn invoke_json<T: DeserializeOwned>(
        &self,
        scope: &CallScope,
        request: &ReasonerRequest,
    ) -> Result<(T, Completion), ReasonerError> {
        let completion = self.invoke(scope, request).await?;
        let parsed = parse_completion(&completion.content)?;
        Ok((parsed, completion))
    }
}
