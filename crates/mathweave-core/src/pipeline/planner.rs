//! Plan proposal through the reasoner.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use mathweave_types::config::RuleSpec;
use mathweave_types::plan::{Plan, PlanStep};
use mathweave_types::reasoner::{PromptBudget, PromptRole, ReasonerRequest};
use mathweave_types::{PipelineError, ReasonerError};

use super::guardrail;
use super::reasoner_failure;
use super::traits::{PlanInput, Planner};
use crate::reasoner::{CallScope, ReasonerClient};

#[derive(Debug, Deserialize)]
struct PlanReply {
    #[serde(default)]
    steps: Vec<PlanStep>,
}

/// Asks the reasoner for a plan. A malformed or empty reply is retried once
/// with a strict prompt before the run fails with
/// [`PipelineError::PlanningFailure`].
pub struct ReasonerPlanner {
    client: Arc<ReasonerClient>,
    rules: Vec<RuleSpec>,
    max_context_chars: usize,
}

impl ReasonerPlanner {
    /// `rules` is the guardrail catalog; its operation allowlist is shown to
    /// the model so plans start out inside it.
    pub fn new(client: Arc<ReasonerClient>, rules: Vec<RuleSpec>, max_context_chars: usize) -> Self {
        Self {
            client,
            rules,
            max_context_chars,
        }
    }

    fn request(&self, input: &PlanInput<'_>, budget: PromptBudget) -> ReasonerRequest {
        let problem = input.problem;
        let context = serde_json::json!({
            "problem": problem.normalized_statement(),
            "category": input.category.as_str(),
            "given_constraints": problem.given_constraints(),
            "allowed_operations": guardrail::allowed_operations(&self.rules, input.category),
            "reference_material": input.retrieval.render(self.max_context_chars),
            "previous_plan": input.previous.map(|p| &p.steps),
            "rejection_feedback": input.feedback,
            "user_correction": input.seed_hint,
        });
        ReasonerRequest::new(PromptRole::Planner, context).with_budget(budget)
    }

    async fn attempt(
        &self,
        scope: &CallScope,
        input: &PlanInput<'_>,
        budget: PromptBudget,
    ) -> Result<Vec<PlanStep>, ReasonerError> {
        let request = self.request(input, budget);
        let (reply, _) = self.client.invoke_json::<PlanReply>(scope, &request).await?;
        let steps: Vec<PlanStep> = reply
            .steps
            .into_iter()
            .filter(|s| !s.operation.trim().is_empty())
            .collect();
        if steps.is_empty() {
            return Err(ReasonerError::Malformed("plan has no steps".into()));
        }
        Ok(steps)
    }
}

#[async_trait]
impl Planner for ReasonerPlanner {
    async fn plan(&self, scope: &CallScope, input: &PlanInput<'_>) -> Result<Plan, PipelineError> {
        let steps = match self.attempt(scope, input, PromptBudget::Normal).await {
            Ok(steps) => steps,
            Err(ReasonerError::Malformed(reason)) => {
                warn!(reason = %reason, "unusable plan, retrying with strict prompt");
                match self.attempt(scope, input, PromptBudget::Strict).await {
                    Ok(steps) => steps,
                    Err(ReasonerError::Malformed(reason)) => {
                        return Err(PipelineError::PlanningFailure { reason });
                    }
                    Err(err) => return Err(reasoner_failure(PromptRole::Planner, err)),
                }
            }
            Err(err) => return Err(reasoner_failure(PromptRole::Planner, err)),
        };

        let plan = match input.previous {
            Some(previous) => Plan::superseding(previous, steps),
            None => Plan::new(steps),
        };
        debug!(plan_id = %plan.id, revision = plan.revision, steps = plan.steps.len(), "plan proposed");
        Ok(plan)
    }
}
