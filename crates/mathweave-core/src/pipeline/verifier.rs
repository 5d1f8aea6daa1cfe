//! Independent verification of an execution trace.
//!
//! [`VerifierEnsemble`] fans the trace out to N verifier invocations at once,
//! each under its own framing, and waits for all of them. A verifier that
//! misses its deadline or answers with something unreadable abstains rather
//! than holding up or failing the ensemble.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use mathweave_types::config::VerificationConfig;
use mathweave_types::reasoner::{PromptBudget, PromptRole, ReasonerRequest};
use mathweave_types::run::{ExchangeOutcome, ReasonerExchange};
use mathweave_types::verification::{Judgment, VerificationVerdict};
use mathweave_types::{PipelineError, ReasonerError};

use super::traits::{Verifier, VerifyInput};
use crate::completion_json::parse_completion;
use crate::reasoner::{CallScope, ReasonerClient};

/// Framing used when negative feedback asks for a re-check.
pub const STRICT_AUDIT: &str = "strict-audit";

/// Extra time the ensemble allows past a verifier's budget before it stops
/// waiting on it.
const GRACE: Duration = Duration::from_millis(250);

pub fn verifier_id(slot: u32) -> String {
    format!("verifier-{slot}")
}

// ── Reasoner-backed verifier ────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct VerifierReply {
    judgment: String,
    #[serde(default)]
    answer: Option<Value>,
    #[serde(default)]
    confidence: Option<f32>,
    #[serde(default)]
    rationale: Option<String>,
}

fn parse_judgment(text: &str) -> Option<Judgment> {
    match text.trim().to_lowercase().as_str() {
        "accept" | "accepted" | "correct" | "valid" | "yes" => Some(Judgment::Accept),
        "reject" | "rejected" | "incorrect" | "invalid" | "no" => Some(Judgment::Reject),
        _ => None,
    }
}

pub struct ReasonerVerifier {
    client: Arc<ReasonerClient>,
}

impl ReasonerVerifier {
    pub fn new(client: Arc<ReasonerClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Verifier for ReasonerVerifier {
    async fn verify(
        &self,
        scope: &CallScope,
        input: &VerifyInput<'_>,
        slot: u32,
        framing: &str,
        budget: Duration,
    ) -> Result<VerificationVerdict, ReasonerError> {
        let context = serde_json::json!({
            "problem": input.problem.normalized_statement(),
            "given_constraints": input.problem.given_constraints(),
            "solution": input.trace.render(),
            "final_answer": input.trace.final_answer(),
        });
        let prompt_budget = if framing == STRICT_AUDIT {
            PromptBudget::Strict
        } else {
            PromptBudget::Normal
        };
        let request = ReasonerRequest::new(PromptRole::Verifier, context)
            .with_slot(slot)
            .with_framing(framing)
            .with_budget(prompt_budget);

        let completion = self.client.invoke_within(scope, &request, Some(budget)).await?;
        let reply: VerifierReply = parse_completion(&completion.content)?;
        let judgment = parse_judgment(&reply.judgment)
            .ok_or_else(|| ReasonerError::Malformed(format!("unknown judgment '{}'", reply.judgment)))?;

        let claimed = reply.answer.and_then(|v| match v {
            Value::Null => None,
            Value::String(s) => Some(s).filter(|s| !s.trim().is_empty()),
            other => Some(other.to_string()),
        });
        // An acceptance without an answer vouches for the trace's answer.
        let claimed_answer = match (judgment, claimed) {
            (Judgment::Accept, None) => Some(input.trace.final_answer().to_string()),
            (_, claimed) => claimed,
        };

        Ok(VerificationVerdict {
            verifier_id: verifier_id(slot),
            judgment,
            claimed_answer,
            confidence: reply
                .confidence
                .or(completion.confidence)
                .unwrap_or(0.5)
                .clamp(0.0, 1.0),
            framing: framing.to_string(),
            rationale: reply.rationale,
        })
    }
}

// ── Ensemble ────────────────────────────────────────────────────────────

pub struct VerifierEnsemble {
    verifier: Arc<dyn Verifier>,
    config: VerificationConfig,
}

impl VerifierEnsemble {
    pub fn new(verifier: Arc<dyn Verifier>, config: VerificationConfig) -> Self {
        Self { verifier, config }
    }

    pub fn size(&self) -> usize {
        self.config.ensemble_size
    }

    pub fn threshold(&self) -> f64 {
        self.config.consensus_threshold
    }

    /// Exactly `ensemble_size` verdicts, in slot order. Framings are handed
    /// out round-robin unless `framing` forces one for every slot.
    pub async fn run(
        &self,
        scope: &CallScope,
        input: &VerifyInput<'_>,
        framing: Option<&str>,
    ) -> Result<Vec<VerificationVerdict>, PipelineError> {
        let budget = Duration::from_millis(self.config.verifier_timeout_ms);
        let size = self.config.ensemble_size;

        let calls = (0..size).map(|i| {
            let slot = i as u32;
            let framing = framing
                .map(str::to_string)
                .or_else(|| self.config.framings.get(i % self.config.framings.len().max(1)).cloned())
                .unwrap_or_else(|| "independent-resolve".to_string());
            let verifier = self.verifier.clone();
            async move {
                let outcome = tokio::time::timeout(
                    budget + GRACE,
                    verifier.verify(scope, input, slot, &framing, budget),
                )
                .await;
                (slot, framing, outcome)
            }
        });
        let outcomes = join_all(calls).await;

        if scope.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let mut verdicts = Vec::with_capacity(size);
        let mut unavailable: Vec<String> = Vec::new();
        for (slot, framing, outcome) in outcomes {
            let id = verifier_id(slot);
            let verdict = match outcome {
                Ok(Ok(verdict)) => verdict,
                Ok(Err(ReasonerError::Cancelled)) => return Err(PipelineError::Cancelled),
                Ok(Err(err @ (ReasonerError::Timeout | ReasonerError::Malformed(_)))) => {
                    warn!(verifier = %id, error = %err, "verifier abstains");
                    VerificationVerdict::abstain(&id, &framing, err.to_string())
                }
                Ok(Err(err)) => {
                    warn!(verifier = %id, error = %err, "verifier unavailable, abstaining");
                    unavailable.push(err.to_string());
                    VerificationVerdict::abstain(&id, &framing, err.to_string())
                }
                Err(_) => {
                    warn!(verifier = %id, budget_ms = budget.as_millis() as u64, "verifier missed its deadline");
                    // The in-flight call was dropped before it could record
                    // itself; log it so replay sees the same timeout.
                    scope.record(ReasonerExchange {
                        role: PromptRole::Verifier,
                        slot,
                        attempt: scope.attempts(PromptRole::Verifier, slot),
                        outcome: ExchangeOutcome::Failed {
                            error: ReasonerError::Timeout,
                        },
                    });
                    VerificationVerdict::abstain(&id, &framing, "verifier timed out")
                }
            };
            verdicts.push(verdict);
        }

        if !unavailable.is_empty() && unavailable.len() == size {
            return Err(PipelineError::ReasonerUnavailable {
                role: PromptRole::Verifier.to_string(),
                reason: unavailable.join("; "),
            });
        }

        debug!(
            verdicts = verdicts.len(),
            abstained = verdicts.iter().filter(|v| v.judgment == Judgment::Abstain).count(),
            "verification complete"
        );
        Ok(verdicts)
    }
}
