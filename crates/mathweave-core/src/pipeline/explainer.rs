//! Plain-language narration of an accepted trace.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use mathweave_types::ReasonerError;
use mathweave_types::execution::ExecutionTrace;
use mathweave_types::explanation::Explanation;
use mathweave_types::problem::Problem;
use mathweave_types::reasoner::{PromptRole, ReasonerRequest};
use mathweave_types::verification::ConsensusResult;

use super::traits::Explainer;
use crate::reasoner::{CallScope, ReasonerClient};

#[derive(Debug, Deserialize)]
struct ExplanationReply {
    #[serde(default)]
    steps: Vec<Value>,
}

pub struct ReasonerExplainer {
    client: Arc<ReasonerClient>,
}

impl ReasonerExplainer {
    pub fn new(client: Arc<ReasonerClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Explainer for ReasonerExplainer {
    /// The answer in the explanation is always `final_answer`; whatever the
    /// model writes there is ignored so narration cannot change the result.
    async fn explain(
        &self,
        scope: &CallScope,
        problem: &Problem,
        trace: &ExecutionTrace,
        consensus: &ConsensusResult,
        final_answer: &str,
    ) -> Result<Explanation, ReasonerError> {
        let context = serde_json::json!({
            "problem": problem.normalized_statement(),
            "trace": trace.entries(),
            "final_answer": final_answer,
            "agreement_ratio": consensus.agreement_ratio,
        });
        let request = ReasonerRequest::new(PromptRole::Explainer, context);
        let (reply, _) = self
            .client
            .invoke_json::<ExplanationReply>(scope, &request)
            .await?;

        let steps: Vec<String> = reply
            .steps
            .into_iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Null => None,
                other => Some(other.to_string()),
            })
            .filter(|s| !s.is_empty())
            .collect();
        if steps.is_empty() {
            return Err(ReasonerError::Malformed("explanation has no steps".into()));
        }

        debug!(steps = steps.len(), "explanation written");
        Ok(Explanation {
            plan_id: trace.plan_id().to_string(),
            steps,
            final_answer: final_answer.to_string(),
            degraded: false,
        })
    }
}
