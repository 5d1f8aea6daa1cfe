//! Stage trait definitions and the assembled [`Pipeline`].
//!
//! Stages that call the reasoner sit behind a trait so the orchestrator can
//! be driven by scripted or alternative implementations. The deterministic
//! stages (parsing, ambiguity detection, guardrail) are concrete types.
//!
//! Stage order within a run:
//! 1. [`ProblemParser`] -- validate and normalise the raw statement
//! 2. [`AmbiguityDetector`] -- flag statements a human must clarify
//! 3. **[`IntentRouter`]** -- pick the solving category
//! 4. [`RetrievalAugmentor`] -- fetch related knowledge
//! 5. **[`Planner`]** -- propose a step plan
//! 6. [`GuardrailEngine`] -- vet the plan
//! 7. [`ExecutorAgent`] -- run the plan into a trace
//! 8. [`VerifierEnsemble`] -- independent **[`Verifier`]**s vote on the trace
//! 9. **[`Explainer`]** -- narrate the accepted solution

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use mathweave_types::execution::ExecutionTrace;
use mathweave_types::explanation::Explanation;
use mathweave_types::knowledge::RetrievalContext;
use mathweave_types::plan::Plan;
use mathweave_types::problem::{Category, Problem, RouteDecision};
use mathweave_types::verification::{ConsensusResult, VerificationVerdict};
use mathweave_types::{PipelineError, ReasonerError};

use super::ambiguity::AmbiguityDetector;
use super::executor::ExecutorAgent;
use super::guardrail::GuardrailEngine;
use super::parser::ProblemParser;
use super::retrieval::RetrievalAugmentor;
use super::verifier::VerifierEnsemble;
use crate::reasoner::CallScope;

// ── Routing ─────────────────────────────────────────────────────────────

/// A route decision plus the reason it was degraded, if it was.
#[derive(Debug, Clone, PartialEq)]
pub struct Routing {
    pub decision: RouteDecision,
    pub degraded: Option<String>,
}

#[async_trait]
pub trait IntentRouter: Send + Sync {
    /// Only [`ReasonerError::Cancelled`] is expected as an error; other
    /// failures degrade to a fallback decision.
    async fn route(&self, scope: &CallScope, problem: &Problem) -> Result<Routing, ReasonerError>;
}

// ── Planning ────────────────────────────────────────────────────────────

/// Everything the planner sees for one proposal.
#[derive(Debug, Clone, Copy)]
pub struct PlanInput<'a> {
    pub problem: &'a Problem,
    pub category: Category,
    pub retrieval: &'a RetrievalContext,
    /// The plan being replaced, on a re-plan.
    pub previous: Option<&'a Plan>,
    /// Why the previous plan was rejected or failed.
    pub feedback: Option<&'a str>,
    /// A user correction carried over from an earlier run.
    pub seed_hint: Option<&'a str>,
}

#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, scope: &CallScope, input: &PlanInput<'_>) -> Result<Plan, PipelineError>;
}

// ── Verification ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct VerifyInput<'a> {
    pub problem: &'a Problem,
    pub trace: &'a ExecutionTrace,
}

#[async_trait]
pub trait Verifier: Send + Sync {
    /// Judge a trace under one framing. `slot` identifies the verifier within
    /// the ensemble; `budget` bounds the whole call including retries.
    async fn verify(
        &self,
        scope: &CallScope,
        input: &VerifyInput<'_>,
        slot: u32,
        framing: &str,
        budget: Duration,
    ) -> Result<VerificationVerdict, ReasonerError>;
}

// ── Explanation ─────────────────────────────────────────────────────────

#[async_trait]
pub trait Explainer: Send + Sync {
    async fn explain(
        &self,
        scope: &CallScope,
        problem: &Problem,
        trace: &ExecutionTrace,
        consensus: &ConsensusResult,
        final_answer: &str,
    ) -> Result<Explanation, ReasonerError>;
}

// ── Pipeline ────────────────────────────────────────────────────────────

/// Every stage the orchestrator drives, assembled once and shared by runs.
pub struct Pipeline {
    pub parser: ProblemParser,
    pub ambiguity: AmbiguityDetector,
    pub router: Arc<dyn IntentRouter>,
    pub retrieval: RetrievalAugmentor,
    pub planner: Arc<dyn Planner>,
    pub guardrail: GuardrailEngine,
    pub executor: ExecutorAgent,
    pub verifiers: VerifierEnsemble,
    pub explainer: Arc<dyn Explainer>,
}
