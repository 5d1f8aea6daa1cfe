//! The solving stages and the [`Pipeline`] that bundles them.

pub mod ambiguity;
pub mod consensus;
pub mod executor;
pub mod explainer;
pub mod guardrail;
pub mod parser;
pub mod planner;
pub mod retrieval;
pub mod router;
pub mod traits;
pub mod verifier;

use std::sync::Arc;

use mathweave_types::config::PipelineConfig;
use mathweave_types::reasoner::PromptRole;
use mathweave_types::{PipelineError, ReasonerError};

pub use traits::{Explainer, IntentRouter, PlanInput, Pipeline, Planner, Routing, Verifier, VerifyInput};

use crate::knowledge::KnowledgeStore;
use crate::reasoner::{Reasoner, ReasonerClient};

/// Map a reasoner failure a stage could not absorb onto the run's error.
pub(crate) fn reasoner_failure(role: PromptRole, err: ReasonerError) -> PipelineError {
    match err {
        ReasonerError::Cancelled => PipelineError::Cancelled,
        other => PipelineError::ReasonerUnavailable {
            role: role.as_str().to_string(),
            reason: other.to_string(),
        },
    }
}

impl Pipeline {
    /// Assemble every stage around one reasoner and one knowledge store.
    pub fn new(config: &PipelineConfig, reasoner: Arc<dyn Reasoner>, store: Arc<dyn KnowledgeStore>) -> Self {
        let client = Arc::new(ReasonerClient::new(reasoner, &config.reasoner));
        Self {
            parser: parser::ProblemParser::new(config.parser.clone()),
            ambiguity: ambiguity::AmbiguityDetector::new(),
            router: Arc::new(router::ReasonerRouter::new(client.clone(), config.routing.clone())),
            retrieval: retrieval::RetrievalAugmentor::new(store, config.retrieval.clone()),
            planner: Arc::new(planner::ReasonerPlanner::new(
                client.clone(),
                config.guardrail.rules.clone(),
                config.retrieval.max_context_chars,
            )),
            guardrail: guardrail::GuardrailEngine::new(config.guardrail.clone()),
            executor: executor::ExecutorAgent::new(client.clone()),
            verifiers: verifier::VerifierEnsemble::new(
                Arc::new(verifier::ReasonerVerifier::new(client.clone())),
                config.verification.clone(),
            ),
            explainer: Arc::new(explainer::ReasonerExplainer::new(client)),
        }
    }

    /// Swap the router, for example for the keyword-only one.
    pub fn with_router(mut self, router: Arc<dyn IntentRouter>) -> Self {
        self.router = router;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_is_not_an_outage() {
        assert!(matches!(
            reasoner_failure(PromptRole::Executor, ReasonerError::Cancelled),
            PipelineError::Cancelled
        ));
        let err = reasoner_failure(PromptRole::Executor, ReasonerError::Timeout);
        assert!(matches!(err, PipelineError::ReasonerUnavailable { ref role, .. } if role == "executor"));
    }
}
