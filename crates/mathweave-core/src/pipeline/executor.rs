//! Step-by-step plan execution.
//!
//! Numeric steps delegated to the calculator never reach the reasoner. Every
//! other step is one executor call that sees the problem, the plan and the
//! results so far. A step that cannot be carried out fails the run with
//! [`PipelineError::Execution`], which the orchestrator answers with a
//! re-plan rather than an escalation.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use mathweave_types::execution::{ExecutionTrace, StepBackend, TraceBuilder, TraceEntry};
use mathweave_types::plan::{GuardrailVerdict, Plan, PlanStep};
use mathweave_types::problem::Problem;
use mathweave_types::reasoner::{PromptBudget, PromptRole, ReasonerRequest};
use mathweave_types::{PipelineError, ReasonerError};

use super::reasoner_failure;
use crate::calculator;
use crate::reasoner::{CallScope, ReasonerClient};

/// Operations the calculator handles when the expression is numeric.
pub const CALCULATOR_OPERATIONS: &[&str] = &["use_calculator", "evaluate", "compute"];

#[derive(Debug, Deserialize)]
struct StepReply {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    final_answer: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

/// A step outcome before it is written to the trace.
struct StepResult {
    text: String,
    final_answer: Option<String>,
}

enum StepFailure {
    /// The step cannot be carried out; the plan is at fault.
    Step(String),
    Reasoner(ReasonerError),
}

fn value_text(value: Value) -> Option<String> {
    let text = match value {
        Value::Null => return None,
        Value::String(s) => s,
        other => other.to_string(),
    };
    let text = text.trim().to_string();
    (!text.is_empty()).then_some(text)
}

pub struct ExecutorAgent {
    client: Arc<ReasonerClient>,
}

impl ExecutorAgent {
    pub fn new(client: Arc<ReasonerClient>) -> Self {
        Self { client }
    }

    /// Execute a plan the guardrail cleared.
    pub async fn execute(
        &self,
        scope: &CallScope,
        problem: &Problem,
        plan: &Plan,
        verdict: &GuardrailVerdict,
    ) -> Result<ExecutionTrace, PipelineError> {
        if verdict.plan_id != plan.id || !verdict.is_safe() {
            return Err(PipelineError::Execution {
                step_index: 0,
                reason: format!("plan {} has no safe guardrail verdict", plan.id),
            });
        }

        let mut trace = TraceBuilder::new(plan.id.clone());
        let mut final_answer: Option<String> = None;

        for (index, step) in plan.steps.iter().enumerate() {
            let (result, backend) = match calculator_input(step) {
                Some(expression) => match calculator::evaluate(expression) {
                    Ok(value) => (
                        StepResult {
                            text: value,
                            final_answer: None,
                        },
                        StepBackend::Calculator,
                    ),
                    Err(err) => {
                        return Err(PipelineError::Execution {
                            step_index: index,
                            reason: format!("calculator: {err}"),
                        });
                    }
                },
                None => match self.run_step(scope, problem, plan, index, trace.entries()).await {
                    Ok(result) => (result, StepBackend::Reasoner),
                    Err(StepFailure::Step(reason)) => {
                        return Err(PipelineError::Execution {
                            step_index: index,
                            reason,
                        });
                    }
                    Err(StepFailure::Reasoner(err)) => {
                        return Err(reasoner_failure(PromptRole::Executor, err));
                    }
                },
            };

            debug!(step = index, operation = %step.operation, backend = ?backend, "step executed");
            if result.final_answer.is_some() {
                final_answer = result.final_answer;
            }
            trace.push(TraceEntry {
                step_index: index,
                operation_applied: step.operation.clone(),
                intermediate_result: result.text,
                backend,
            });
        }

        let answer = final_answer
            .or_else(|| trace.entries().last().map(|e| e.intermediate_result.clone()))
            .unwrap_or_default();
        Ok(trace.finish(answer))
    }

    async fn run_step(
        &self,
        scope: &CallScope,
        problem: &Problem,
        plan: &Plan,
        index: usize,
        done: &[TraceEntry],
    ) -> Result<StepResult, StepFailure> {
        match self.ask(scope, problem, plan, index, done, PromptBudget::Normal).await {
            Err(StepFailure::Reasoner(ReasonerError::Malformed(reason))) => {
                warn!(step = index, reason = %reason, "unusable step result, retrying with strict prompt");
                match self.ask(scope, problem, plan, index, done, PromptBudget::Strict).await {
                    Err(StepFailure::Reasoner(ReasonerError::Malformed(reason))) => {
                        Err(StepFailure::Step(format!("malformed result: {reason}")))
                    }
                    other => other,
                }
            }
            other => other,
        }
    }

    async fn ask(
        &self,
        scope: &CallScope,
        problem: &Problem,
        plan: &Plan,
        index: usize,
        done: &[TraceEntry],
        budget: PromptBudget,
    ) -> Result<StepResult, StepFailure> {
        let previous: Vec<Value> = done
            .iter()
            .map(|e| {
                serde_json::json!({
                    "step": e.step_index + 1,
                    "operation": e.operation_applied,
                    "result": e.intermediate_result,
                })
            })
            .collect();
        let context = serde_json::json!({
            "problem": problem.normalized_statement(),
            "given_constraints": problem.given_constraints(),
            "plan": plan.steps,
            "step_number": index + 1,
            "step": plan.steps[index],
            "previous_results": previous,
        });
        let request = ReasonerRequest::new(PromptRole::Executor, context)
            .with_slot(index as u32)
            .with_budget(budget);

        let (reply, _) = self
            .client
            .invoke_json::<StepReply>(scope, &request)
            .await
            .map_err(StepFailure::Reasoner)?;

        if let Some(error) = reply.error.filter(|e| !e.trim().is_empty()) {
            return Err(StepFailure::Step(error));
        }
        let text = reply
            .result
            .and_then(value_text)
            .ok_or_else(|| StepFailure::Reasoner(ReasonerError::Malformed("step result is empty".into())))?;
        Ok(StepResult {
            text,
            final_answer: reply.final_answer.and_then(value_text),
        })
    }
}

/// The numeric expression of a calculator step, if it is one.
fn calculator_input(step: &PlanStep) -> Option<&str> {
    let key = step.operation_key();
    if !CALCULATOR_OPERATIONS.contains(&key.as_str()) {
        return None;
    }
    step.expression
        .as_deref()
        .filter(|e| calculator::is_numeric(e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    use mathweave_types::config::ReasonerConfig;
    use mathweave_types::plan::GuardrailStatus;

    use crate::replay::ScriptedReasoner;

    fn executor(scripted: Arc<ScriptedReasoner>) -> ExecutorAgent {
        let config = ReasonerConfig {
            base_delay_ms: 1,
            max_delay_ms: 2,
            ..ReasonerConfig::default()
        };
        ExecutorAgent::new(Arc::new(ReasonerClient::new(scripted, &config)))
    }

    fn safe(plan: &Plan) -> GuardrailVerdict {
        GuardrailVerdict {
            plan_id: plan.id.clone(),
            status: GuardrailStatus::Safe,
            violated_rules: BTreeSet::new(),
            severity: None,
            findings: vec![],
            override_record: None,
        }
    }

    fn problem(text: &str) -> Problem {
        Problem::new(text, text, vec![])
    }

    #[tokio::test]
    async fn reasoner_steps_build_trace() {
        let scripted = Arc::new(
            ScriptedReasoner::new()
                .reply_slot(PromptRole::Executor, 0, r#"{"result": "(x - 2)(x - 3) = 0"}"#)
                .reply_slot(PromptRole::Executor, 1, r#"{"result": "x = 2 or x = 3", "final_answer": "x = 2, x = 3"}"#),
        );
        let plan = Plan::new(vec![PlanStep::new("factor"), PlanStep::new("solve").with_target("x")]);
        let trace = executor(scripted.clone())
            .execute(&CallScope::default(), &problem("Solve x^2 - 5x + 6 = 0"), &plan, &safe(&plan))
            .await
            .unwrap();
        assert_eq!(trace.entries().len(), 2);
        assert_eq!(trace.entries()[0].intermediate_result, "(x - 2)(x - 3) = 0");
        assert_eq!(trace.final_answer(), "x = 2, x = 3");
        assert_eq!(trace.plan_id(), plan.id);

        let second = &scripted.calls()[1];
        assert_eq!(second.slot, 1);
        assert_eq!(second.context["previous_results"][0]["result"], "(x - 2)(x - 3) = 0");
    }

    #[tokio::test]
    async fn numeric_steps_use_calculator() {
        let scripted = Arc::new(ScriptedReasoner::new());
        let plan = Plan::new(vec![PlanStep::new("use_calculator").with_expression("1234 * 5678")]);
        let trace = executor(scripted.clone())
            .execute(&CallScope::default(), &problem("Compute 1234 * 5678"), &plan, &safe(&plan))
            .await
            .unwrap();
        assert_eq!(trace.final_answer(), "7006652");
        assert_eq!(trace.entries()[0].backend, StepBackend::Calculator);
        assert!(scripted.calls().is_empty());
    }

    #[tokio::test]
    async fn numeric_result_values_are_accepted() {
        let scripted = Arc::new(ScriptedReasoner::new().reply(PromptRole::Executor, r#"{"result": 7, "final_answer": 7}"#));
        let plan = Plan::new(vec![PlanStep::new("solve").with_target("x")]);
        let trace = executor(scripted)
            .execute(&CallScope::default(), &problem("Solve x - 7 = 0"), &plan, &safe(&plan))
            .await
            .unwrap();
        assert_eq!(trace.final_answer(), "7");
    }

    #[tokio::test]
    async fn step_error_fails_execution() {
        let scripted = Arc::new(
            ScriptedReasoner::new()
                .reply_slot(PromptRole::Executor, 0, r#"{"result": "ok"}"#)
                .reply_slot(PromptRole::Executor, 1, r#"{"error": "cannot take log of a negative number"}"#),
        );
        let plan = Plan::new(vec![PlanStep::new("rewrite"), PlanStep::new("take_log")]);
        let err = executor(scripted)
            .execute(&CallScope::default(), &problem("Solve log(x) = -1"), &plan, &safe(&plan))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Execution { step_index: 1, ref reason } if reason.contains("negative")));
    }

    #[tokio::test]
    async fn malformed_twice_fails_execution() {
        let scripted = Arc::new(ScriptedReasoner::new().reply(PromptRole::Executor, "the answer is probably 4"));
        let plan = Plan::new(vec![PlanStep::new("solve")]);
        let err = executor(scripted.clone())
            .execute(&CallScope::default(), &problem("Solve x = 4"), &plan, &safe(&plan))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Execution { step_index: 0, .. }));
        assert_eq!(scripted.calls_for(PromptRole::Executor), 2);
    }

    #[tokio::test]
    async fn unsafe_plan_is_refused() {
        let scripted = Arc::new(ScriptedReasoner::new());
        let plan = Plan::new(vec![PlanStep::new("divide").with_divisor("x")]);
        let mut verdict = safe(&plan);
        verdict.status = GuardrailStatus::Unsafe;
        let err = executor(scripted.clone())
            .execute(&CallScope::default(), &problem("Solve x^2 = x"), &plan, &verdict)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Execution { .. }));
        assert!(scripted.calls().is_empty());
    }

    #[tokio::test]
    async fn calculator_division_by_zero_fails() {
        let scripted = Arc::new(ScriptedReasoner::new());
        let plan = Plan::new(vec![PlanStep::new("evaluate").with_expression("1/0")]);
        let err = executor(scripted)
            .execute(&CallScope::default(), &problem("Evaluate 1/0"), &plan, &safe(&plan))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Execution { step_index: 0, .. }));
    }
}
