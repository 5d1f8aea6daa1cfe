//! System prompts and output contracts for each reasoner role.
//!
//! Every role answers with a single JSON object. The shape is spelled out in
//! the system prompt so that any OpenAI-compatible model can follow it; the
//! stages parse the reply with the repairing decoder in
//! [`completion_json`](crate::completion_json).

use mathweave_types::reasoner::{PromptBudget, PromptRole, ReasonerRequest};

const ROUTER: &str = "\
You classify mathematics problems for a solving pipeline.
Pick exactly one category from: algebra, calculus, geometry, trigonometry, \
probability, statistics, linear_algebra, arithmetic, other.
Reply with JSON only: {\"category\": \"<category>\", \"confidence\": <0..1>}";

const PLANNER: &str = "\
You are a mathematics strategy expert. You write a solution plan; you do not \
solve the problem.
Each step names one operation (snake_case, for example factor, expand, \
divide_both_sides, substitute, evaluate) and describes the action, not the \
algebra. Put the expression the step produces in \"expression\". When a step \
divides, name the divisor in \"divisor\"; a divisor containing a variable must be \
shown nonzero by an earlier step (for example a state_domain step with \
\"constraints\": [\"x != 0\"]) or by the problem itself. Never divide by an \
expression that may be zero: factor instead. Delegate every numeric evaluation to a step with operation \
\"use_calculator\" and a purely numeric expression.
Reply with JSON only: {\"steps\": [{\"operation\": \"...\", \"expression\": \"...\", \
\"divisor\": null, \"target\": null, \"justification\": \"...\", \"constraints\": []}]}";

const EXECUTOR: &str = "\
You are a precise mathematics engine. Carry out exactly the one plan step you \
are given, using the results of the previous steps. Do not skip ahead. If the \
step cannot be carried out, reply {\"error\": \"<why>\"} instead.
Reply with JSON only: {\"result\": \"...\", \"final_answer\": \"...\"} where \
\"final_answer\" is present only on the step that produces the answer.";

const VERIFIER: &str = "\
You are a board examiner checking a worked solution. Re-derive the answer \
yourself according to the framing you are given and compare it with the \
solution's final answer. Do not trust the solution's arithmetic.
Reply with JSON only: {\"judgment\": \"accept\" | \"reject\", \"answer\": \"<the answer you \
derived>\", \"confidence\": <0..1>, \"rationale\": \"...\"}";

const EXPLAINER: &str = "\
You are a patient mathematics tutor. Turn the verified solution trace into a \
short sequence of plain-language steps a student can follow. Keep every \
number and result exactly as it appears in the trace.
Reply with JSON only: {\"steps\": [\"...\"], \"final_answer\": \"...\"}";

const STRICT_SUFFIX: &str = "\n\nYour previous reply could not be used. Reply with the JSON object \
only: no prose, no markdown fences, at least one entry where a list is asked for.";

/// System prompt for a request's role and budget.
pub fn system_prompt(request: &ReasonerRequest) -> String {
    let base = match request.role {
        PromptRole::Router => ROUTER,
        PromptRole::Planner => PLANNER,
        PromptRole::Executor => EXECUTOR,
        PromptRole::Verifier => VERIFIER,
        PromptRole::Explainer => EXPLAINER,
    };
    let mut prompt = base.to_string();
    if let Some(framing) = request.framing.as_deref() {
        prompt.push_str("\n\nFraming: ");
        prompt.push_str(framing_instruction(framing));
    }
    if request.budget == PromptBudget::Strict {
        prompt.push_str(STRICT_SUFFIX);
    }
    prompt
}

/// How a named verifier framing is described to the model.
pub fn framing_instruction(framing: &str) -> &str {
    match framing {
        "independent-resolve" => {
            "solve the problem from scratch without looking at the solution's steps, then compare answers."
        }
        "back-substitution" => {
            "substitute the claimed answer back into the original problem and check that every condition holds."
        }
        "step-audit" => "check each step of the trace in order and reject on the first invalid step.",
        "strict-audit" => {
            "STRICT AUDIT. A user reported this answer as wrong. Assume nothing, recheck domain \
             conditions, excluded values and arithmetic, and reject unless every step is valid."
        }
        other => other,
    }
}

/// User message for a request: the stage's structured context as JSON.
pub fn user_message(request: &ReasonerRequest) -> String {
    serde_json::to_string_pretty(&request.context).unwrap_or_else(|_| request.context.to_string())
}
