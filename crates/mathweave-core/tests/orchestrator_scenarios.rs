//! End-to-end runs of the orchestrator over a scripted reasoner.
//!
//! Each test scripts the reasoner replies a run needs, drives the run through
//! the public orchestrator API, and checks both the outcome and what the
//! audit trail recorded.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use mathweave_core::audit::{JsonlAuditSink, read_trail};
use mathweave_core::knowledge::{AppendOutcome, InMemoryKnowledgeStore, KnowledgeStore};
use mathweave_core::orchestrator::RunStatus;
use mathweave_core::pipeline::verifier::STRICT_AUDIT;
use mathweave_core::replay::ScriptedReasoner;
use mathweave_core::run_store::FileRunStore;
use mathweave_core::{FeedbackOutcome, HumanOperator, Orchestrator, Pipeline, RunOutcome};
use mathweave_types::PipelineError;
use mathweave_types::config::PipelineConfig;
use mathweave_types::escalation::{EscalationPayload, HitlRequest, HitlResponse, StageOrigin};
use mathweave_types::feedback::FeedbackRecord;
use mathweave_types::plan::RuleId;
use mathweave_types::reasoner::PromptRole;
use mathweave_types::run::{AuditEventKind, Resolution, RunId};
use mathweave_types::verification::Judgment;

// ── Fixtures ────────────────────────────────────────────────────────────

fn fast_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.reasoner.base_delay_ms = 1;
    config.reasoner.max_delay_ms = 2;
    config.verification.verifier_timeout_ms = 2_000;
    config
}

struct Harness {
    orchestrator: Orchestrator,
    reasoner: Arc<ScriptedReasoner>,
    store: Arc<InMemoryKnowledgeStore>,
}

fn harness_with(config: PipelineConfig, reasoner: ScriptedReasoner) -> Harness {
    let reasoner = Arc::new(reasoner);
    let store = Arc::new(InMemoryKnowledgeStore::with_dimension(64));
    let pipeline = Pipeline::new(&config, reasoner.clone(), store.clone());
    Harness {
        orchestrator: Orchestrator::new(config, pipeline).unwrap(),
        reasoner,
        store,
    }
}

fn harness(reasoner: ScriptedReasoner) -> Harness {
    harness_with(fast_config(), reasoner)
}

const ALGEBRA: &str = r#"{"category": "algebra", "confidence": 0.9}"#;

fn accept(answer: &str) -> String {
    format!(r#"{{"judgment": "accept", "answer": "{answer}", "confidence": 0.9}}"#)
}

fn reject() -> String {
    r#"{"judgment": "reject", "confidence": 0.7, "rationale": "the last step does not follow"}"#.to_string()
}

fn all_verifiers(reasoner: ScriptedReasoner, reply: &str) -> ScriptedReasoner {
    reasoner.reply(PromptRole::Verifier, reply)
}

const EXPLAIN: &str = r#"{"steps": ["Rewrite the equation in factored form.", "Set each factor to zero."]}"#;

/// Scripts the happy path for `Solve x^2 - 5x + 6 = 0`.
fn quadratic() -> ScriptedReasoner {
    let r = ScriptedReasoner::new()
        .reply(PromptRole::Router, ALGEBRA)
        .reply(
            PromptRole::Planner,
            r#"{"steps": [
                {"operation": "factor", "expression": "(x - 2)(x - 3) = 0"},
                {"operation": "solve", "expression": "x = 2 or x = 3", "target": "x"}
            ]}"#,
        )
        .reply_slot(PromptRole::Executor, 0, r#"{"result": "(x - 2)(x - 3) = 0"}"#)
        .reply_slot(
            PromptRole::Executor,
            1,
            r#"{"result": "x = 2 or x = 3", "final_answer": "x = 2, x = 3"}"#,
        )
        .reply(PromptRole::Explainer, EXPLAIN);
    all_verifiers(r, &accept("x = 2, x = 3"))
}

const DIVIDING_PLAN: &str = r#"{"steps": [
    {"operation": "divide_both_sides", "divisor": "x", "expression": "x - 1 = 0"},
    {"operation": "solve", "expression": "x = 1", "target": "x"}
]}"#;

const FACTORING_PLAN: &str = r#"{"steps": [
    {"operation": "factor", "expression": "x(x - 1) = 0"},
    {"operation": "solve", "expression": "x = 0 or x = 1", "target": "x"}
]}"#;

/// `Solve x^2 - x = 0`: the first plan divides by x, the second factors.
fn dividing_then_factoring() -> ScriptedReasoner {
    let r = ScriptedReasoner::new()
        .reply(PromptRole::Router, ALGEBRA)
        .reply(PromptRole::Planner, DIVIDING_PLAN)
        .reply(PromptRole::Planner, FACTORING_PLAN)
        .reply_slot(PromptRole::Executor, 0, r#"{"result": "x(x - 1) = 0"}"#)
        .reply_slot(
            PromptRole::Executor,
            1,
            r#"{"result": "x = 0 or x = 1", "final_answer": "x = 0, x = 1"}"#,
        )
        .reply(PromptRole::Explainer, EXPLAIN);
    all_verifiers(r, &accept("x = 0, x = 1"))
}

/// `Solve x - 7 = 0` with verifier replies given per slot.
fn linear_with_verdicts(verdicts: [String; 3]) -> ScriptedReasoner {
    let mut r = ScriptedReasoner::new()
        .reply(PromptRole::Router, ALGEBRA)
        .reply(
            PromptRole::Planner,
            r#"{"steps": [{"operation": "isolate", "expression": "x = 7", "target": "x"}]}"#,
        )
        .reply_slot(PromptRole::Executor, 0, r#"{"result": "x = 7", "final_answer": "x = 7"}"#)
        .reply(PromptRole::Explainer, r#"{"steps": ["Add 7 to both sides."]}"#);
    for (slot, verdict) in verdicts.into_iter().enumerate() {
        r = r.reply_slot(PromptRole::Verifier, slot as u32, verdict);
    }
    r
}

async fn escalation_count(h: &Harness, outcome: &RunOutcome) -> usize {
    h.orchestrator
        .snapshot(outcome.run_id())
        .await
        .unwrap()
        .audit
        .escalation_count()
}

// ── Scenarios ───────────────────────────────────────────────────────────

#[tokio::test]
async fn clean_quadratic_completes_without_escalation() {
    let h = harness(quadratic());
    let outcome = h.orchestrator.start("Solve x^2 - 5x + 6 = 0").await.unwrap();

    let output = outcome.completed().expect("run should complete");
    assert_eq!(output.final_answer, "x = 2, x = 3");
    assert_eq!(output.resolution, Resolution::Consensus);
    assert!(output.consensus.accepted);
    assert!((output.consensus.agreement_ratio - 1.0).abs() < 1e-9);
    assert!(!output.explanation.degraded);
    let rendered = output.explanation.render();
    assert!(rendered.contains("x = 2") && rendered.contains("x = 3"), "{rendered}");

    assert_eq!(output.audit.escalation_count(), 0);
    assert_eq!(h.reasoner.calls_for(PromptRole::Verifier), 3);
    assert!(matches!(
        output.audit.events.last().map(|e| &e.kind),
        Some(AuditEventKind::RunCompleted { .. })
    ));
}

#[tokio::test]
async fn missing_domain_is_clarified_then_completes() {
    let r = ScriptedReasoner::new()
        .reply(PromptRole::Router, ALGEBRA)
        .reply(
            PromptRole::Planner,
            r#"{"steps": [
                {"operation": "state_domain", "expression": "x >= 0"},
                {"operation": "conclude"}
            ]}"#,
        )
        .reply_slot(PromptRole::Executor, 0, r#"{"result": "x >= 0"}"#)
        .reply_slot(
            PromptRole::Executor,
            1,
            r#"{"result": "sqrt(x) is real for x >= 0", "final_answer": "sqrt(x)"}"#,
        )
        .reply(PromptRole::Explainer, r#"{"steps": ["The square root is defined on x >= 0."]}"#);
    let h = harness(all_verifiers(r, &accept("sqrt(x)")));

    let outcome = h.orchestrator.start("Find √x for all x").await.unwrap();
    let request = outcome.suspended().expect("ambiguity should escalate");
    assert_eq!(request.stage_origin, StageOrigin::Ambiguity);
    assert!(matches!(request.payload, EscalationPayload::Ambiguity { .. }));
    // Nothing downstream ran before the human answered.
    assert_eq!(h.reasoner.calls_for(PromptRole::Router), 0);

    let run_id = request.run_id.clone();
    let outcome = h
        .orchestrator
        .resume(&run_id, HitlResponse::clarify("Find sqrt(x) for all real x >= 0"))
        .await
        .unwrap();

    let output = outcome.completed().expect("clarified run should complete");
    assert_eq!(output.problem.revision(), 1);
    assert!(output.problem.ambiguity_flags().is_empty());
    assert_eq!(output.audit.escalation_count(), 1);
    assert_eq!(h.reasoner.calls_for(PromptRole::Router), 1);
}

#[tokio::test]
async fn illegal_division_is_replanned_after_human_rejects_override() {
    let h = harness(dividing_then_factoring());

    let outcome = h.orchestrator.start("Solve x^2 - x = 0").await.unwrap();
    let request = outcome.suspended().expect("guardrail should escalate");
    let EscalationPayload::Guardrail { verdict, .. } = &request.payload else {
        panic!("expected a guardrail escalation, got {:?}", request.payload);
    };
    assert!(!verdict.is_safe());
    assert_eq!(verdict.rules_display(), RuleId::ILLEGAL_DIVISION);
    // The unsafe plan never reached the executor.
    assert_eq!(h.reasoner.calls_for(PromptRole::Executor), 0);

    let run_id = request.run_id.clone();
    let outcome = h.orchestrator.resume(&run_id, HitlResponse::request_replan()).await.unwrap();
    let output = outcome.completed().expect("re-planned run should complete");
    assert_eq!(output.final_answer, "x = 0, x = 1");

    let plans: Vec<_> = output
        .audit
        .events
        .iter()
        .filter_map(|e| match &e.kind {
            AuditEventKind::PlanProposed { plan } => Some(plan.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(plans.len(), 2);
    assert_eq!(plans[1].revision, 1);
    assert_eq!(plans[1].supersedes.as_deref(), Some(plans[0].id.as_str()));

    let replan_call = h
        .reasoner
        .calls()
        .into_iter()
        .filter(|c| c.role == PromptRole::Planner)
        .nth(1)
        .unwrap();
    let feedback = replan_call.context["rejection_feedback"].as_str().unwrap();
    assert!(feedback.contains("illegal-division"), "{feedback}");

    let snapshot = h.orchestrator.snapshot(&run_id).await.unwrap();
    assert_eq!(snapshot.counters.replans, 1);
}

#[tokio::test]
async fn approved_override_executes_flagged_plan() {
    let r = ScriptedReasoner::new()
        .reply(PromptRole::Router, ALGEBRA)
        .reply(PromptRole::Planner, DIVIDING_PLAN)
        .reply_slot(PromptRole::Executor, 0, r#"{"result": "x - 1 = 0"}"#)
        .reply_slot(PromptRole::Executor, 1, r#"{"result": "x = 1", "final_answer": "x = 1"}"#)
        .reply(PromptRole::Explainer, EXPLAIN);
    let h = harness(all_verifiers(r, &accept("x = 1")));

    let outcome = h.orchestrator.start("Solve x^2 - x = 0").await.unwrap();
    let run_id = outcome.run_id().clone();
    let outcome = h
        .orchestrator
        .resume(&run_id, HitlResponse::approve_override(Some("x is known to be positive".into())))
        .await
        .unwrap();

    let output = outcome.completed().expect("overridden run should complete");
    assert_eq!(output.final_answer, "x = 1");
    let overridden = output.audit.events.iter().any(|e| {
        matches!(&e.kind, AuditEventKind::GuardrailEvaluated { verdict }
            if verdict.is_safe() && verdict.override_record.is_some())
    });
    assert!(overridden);
}

#[tokio::test]
async fn two_of_three_agreement_is_accepted() {
    let h = harness(linear_with_verdicts([accept("7"), accept("7"), reject()]));
    let outcome = h.orchestrator.start("Solve x - 7 = 0").await.unwrap();

    let output = outcome.completed().expect("2/3 meets the threshold");
    assert!(output.consensus.accepted);
    assert!((output.consensus.agreement_ratio - 2.0 / 3.0).abs() < 1e-9);
    assert_eq!(output.consensus.agreed_answer.as_deref(), Some("7"));
    assert_eq!(output.consensus.plurality_judgment, Some(Judgment::Accept));
    assert!(output.consensus.dissent.contains("verifier-2"));
    assert_eq!(output.audit.escalation_count(), 0);
}

#[tokio::test]
async fn split_verdicts_escalate_and_human_selects_answer() {
    let h = harness(linear_with_verdicts([accept("7"), accept("9"), reject()]));
    let outcome = h.orchestrator.start("Solve x - 7 = 0").await.unwrap();

    let request = outcome.suspended().expect("no plurality should escalate");
    let EscalationPayload::Verification { consensus, verdicts, .. } = &request.payload else {
        panic!("expected a verification escalation");
    };
    assert!(!consensus.accepted);
    assert!(consensus.agreement_ratio < 2.0 / 3.0);
    assert_eq!(verdicts.len(), 3);

    let run_id = request.run_id.clone();
    let outcome = h.orchestrator.resume(&run_id, HitlResponse::select_answer("7")).await.unwrap();
    let output = outcome.completed().expect("selected answer completes the run");
    assert_eq!(output.final_answer, "7");
    assert_eq!(output.resolution, Resolution::HumanSelected { answer: "7".into() });
}

#[tokio::test]
async fn confirmed_selection_is_stored_with_the_selected_answer() {
    let h = harness(linear_with_verdicts([accept("7"), accept("9"), reject()]));
    let outcome = h.orchestrator.start("Solve x - 7 = 0").await.unwrap();
    let run_id = outcome.run_id().clone();
    assert!(outcome.suspended().is_some());

    let outcome = h.orchestrator.resume(&run_id, HitlResponse::select_answer("9")).await.unwrap();
    let output = outcome.completed().unwrap();
    assert_eq!(output.final_answer, "9");
    assert_eq!(output.trace.final_answer(), "x = 7");

    let learned = h
        .orchestrator
        .submit_feedback(&run_id, FeedbackRecord::correct("9"))
        .await
        .unwrap();
    assert!(matches!(learned, FeedbackOutcome::Learned(_)));

    let entries = h.store.entries().await;
    assert_eq!(entries.len(), 1);
    let solution = &entries[0].canonical_solution;
    assert!(solution.ends_with("Final answer: 9"), "{solution}");
    assert!(!solution.contains("Final answer: x = 7"), "{solution}");
}

#[tokio::test]
async fn confirming_twice_stores_one_entry() {
    let h = harness(quadratic());
    let outcome = h.orchestrator.start("Solve x^2 - 5x + 6 = 0").await.unwrap();
    let run_id = outcome.run_id().clone();
    assert!(h.store.is_empty().await);

    let first = h
        .orchestrator
        .submit_feedback(&run_id, FeedbackRecord::correct("x = 2, x = 3"))
        .await
        .unwrap();
    let second = h
        .orchestrator
        .submit_feedback(&run_id, FeedbackRecord::correct("x = 3, x = 2"))
        .await
        .unwrap();

    let (FeedbackOutcome::Learned(first), FeedbackOutcome::Learned(second)) = (first, second) else {
        panic!("correct feedback should be learned");
    };
    assert_eq!(first.outcome, AppendOutcome::Inserted);
    assert_eq!(second.outcome, AppendOutcome::Duplicate);
    assert_eq!(h.store.len().await, 1);

    let snapshot = h.orchestrator.snapshot(&run_id).await.unwrap();
    assert_eq!(snapshot.feedback.len(), 2);
    let written: Vec<bool> = snapshot
        .audit
        .events
        .iter()
        .filter_map(|e| match e.kind {
            AuditEventKind::KnowledgeWritten { created, .. } => Some(created),
            _ => None,
        })
        .collect();
    assert_eq!(written, vec![true, false]);
}

// ── Limits ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn repeated_guardrail_rejections_exhaust_replans() {
    let r = ScriptedReasoner::new()
        .reply(PromptRole::Router, ALGEBRA)
        .reply(PromptRole::Planner, DIVIDING_PLAN);
    let h = harness(r);

    let mut outcome = h.orchestrator.start("Solve x^2 - x = 0").await.unwrap();
    let mut rounds = 0;
    while let Some(request) = outcome.suspended() {
        rounds += 1;
        let run_id = request.run_id.clone();
        outcome = h.orchestrator.resume(&run_id, HitlResponse::request_replan()).await.unwrap();
    }

    let failure = outcome.failure().expect("run should fail");
    assert!(matches!(failure.error, PipelineError::GuardrailRejected { replans: 2, .. }));
    assert_eq!(rounds, 3);
    assert_eq!(h.reasoner.calls_for(PromptRole::Executor), 0);
    assert!(matches!(
        failure.audit.events.last().map(|e| &e.kind),
        Some(AuditEventKind::RunFailed { code, .. }) if code == "guardrail_rejected"
    ));
}

#[tokio::test]
async fn escalation_cap_fails_the_run() {
    let mut config = fast_config();
    config.escalation.max_escalations = 2;
    config.planning.max_replan_attempts = 5;
    let r = ScriptedReasoner::new()
        .reply(PromptRole::Router, ALGEBRA)
        .reply(PromptRole::Planner, DIVIDING_PLAN);
    let h = harness_with(config, r);

    let mut outcome = h.orchestrator.start("Solve x^2 - x = 0").await.unwrap();
    while let Some(request) = outcome.suspended() {
        let run_id = request.run_id.clone();
        outcome = h.orchestrator.resume(&run_id, HitlResponse::request_replan()).await.unwrap();
    }

    let failure = outcome.failure().unwrap();
    assert!(matches!(failure.error, PipelineError::TooManyEscalations { cap: 2 }));
    assert_eq!(failure.audit.escalation_count(), 2);
}

#[tokio::test]
async fn unresolved_ambiguity_fails_after_allowed_clarifications() {
    let h = harness(ScriptedReasoner::new());
    let mut outcome = h.orchestrator.start("Find √x for all x").await.unwrap();
    let mut clarifications = 0;
    while let Some(request) = outcome.suspended() {
        clarifications += 1;
        let run_id = request.run_id.clone();
        outcome = h
            .orchestrator
            .resume(&run_id, HitlResponse::clarify("Find √x for all x, please"))
            .await
            .unwrap();
    }

    assert_eq!(clarifications, 2);
    let failure = outcome.failure().unwrap();
    assert!(matches!(
        failure.error,
        PipelineError::UnresolvableAmbiguity { escalations: 2, .. }
    ));
    assert_eq!(h.reasoner.calls().len(), 0);
}

#[tokio::test]
async fn reexecution_is_bounded() {
    let h = harness(linear_with_verdicts([accept("7"), accept("9"), reject()]));
    let outcome = h.orchestrator.start("Solve x - 7 = 0").await.unwrap();
    let run_id = outcome.run_id().clone();

    let outcome = h.orchestrator.resume(&run_id, HitlResponse::request_reexecution()).await.unwrap();
    assert!(outcome.suspended().is_some(), "re-execution re-verifies and disagrees again");
    assert_eq!(h.reasoner.calls_for(PromptRole::Executor), 2);

    let outcome = h.orchestrator.resume(&run_id, HitlResponse::request_reexecution()).await.unwrap();
    let failure = outcome.failure().unwrap();
    assert!(matches!(failure.error, PipelineError::ConsensusFailure { reexecutions: 1, .. }));
}

#[tokio::test]
async fn failed_step_triggers_replan() {
    let r = ScriptedReasoner::new()
        .reply(PromptRole::Router, ALGEBRA)
        .reply(PromptRole::Planner, FACTORING_PLAN)
        .reply_slot(PromptRole::Executor, 0, r#"{"error": "expression does not factor that way"}"#)
        .reply_slot(PromptRole::Executor, 0, r#"{"result": "x(x - 1) = 0"}"#)
        .reply_slot(
            PromptRole::Executor,
            1,
            r#"{"result": "x = 0 or x = 1", "final_answer": "x = 0, x = 1"}"#,
        )
        .reply(PromptRole::Explainer, EXPLAIN);
    let h = harness(all_verifiers(r, &accept("x = 0, x = 1")));

    let outcome = h.orchestrator.start("Solve x^2 - x = 0").await.unwrap();
    let output = outcome.completed().expect("second plan should execute");
    assert_eq!(output.audit.escalation_count(), 0);
    assert!(output.audit.events.iter().any(|e| matches!(
        &e.kind,
        AuditEventKind::ExecutionFailed { step_index: 0, reason } if reason.contains("does not factor")
    )));

    let replan_call = h
        .reasoner
        .calls()
        .into_iter()
        .filter(|c| c.role == PromptRole::Planner)
        .nth(1)
        .unwrap();
    let feedback = replan_call.context["rejection_feedback"].as_str().unwrap();
    assert!(feedback.starts_with("step 1 could not be carried out"), "{feedback}");
}

#[tokio::test]
async fn dismissal_abandons_the_run() {
    let h = harness(dividing_then_factoring());
    let outcome = h.orchestrator.start("Solve x^2 - x = 0").await.unwrap();
    let run_id = outcome.run_id().clone();

    let outcome = h.orchestrator.resume(&run_id, HitlResponse::dismiss()).await.unwrap();
    let failure = outcome.failure().unwrap();
    assert!(matches!(&failure.error, PipelineError::UserAbandoned { origin } if origin == "guardrail"));
    let snapshot = h.orchestrator.snapshot(&run_id).await.unwrap();
    assert_eq!(snapshot.status, RunStatus::Failed);
}

#[tokio::test]
async fn mismatched_response_keeps_run_suspended() {
    let h = harness(dividing_then_factoring());
    let outcome = h.orchestrator.start("Solve x^2 - x = 0").await.unwrap();
    let run_id = outcome.run_id().clone();

    let err = h
        .orchestrator
        .resume(&run_id, HitlResponse::select_answer("1"))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::InvalidResponse { .. }));
    assert_eq!(h.orchestrator.pending().await.unwrap().len(), 1);

    let outcome = h.orchestrator.resume(&run_id, HitlResponse::request_replan()).await.unwrap();
    assert!(outcome.completed().is_some());
    assert!(h.orchestrator.pending().await.unwrap().is_empty());
}

#[tokio::test]
async fn resuming_unknown_or_finished_runs_is_refused() {
    let h = harness(quadratic());
    let err = h
        .orchestrator
        .resume(&RunId::from("no-such-run"), HitlResponse::dismiss())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::UnknownRun(_)));

    let outcome = h.orchestrator.start("Solve x^2 - 5x + 6 = 0").await.unwrap();
    let err = h
        .orchestrator
        .resume(outcome.run_id(), HitlResponse::dismiss())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::InvalidResponse { .. }));
}

// ── Timeouts and cancellation ───────────────────────────────────────────

#[tokio::test]
async fn late_response_times_the_escalation_out() {
    let mut config = fast_config();
    config.escalation.response_timeout_ms = 20;
    let h = harness_with(config, dividing_then_factoring());

    let outcome = h.orchestrator.start("Solve x^2 - x = 0").await.unwrap();
    let run_id = outcome.run_id().clone();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let outcome = h.orchestrator.resume(&run_id, HitlResponse::request_replan()).await.unwrap();
    let failure = outcome.failure().unwrap();
    assert!(matches!(&failure.error, PipelineError::EscalationTimeout { origin, .. } if origin == "guardrail"));
    assert_eq!(h.reasoner.calls_for(PromptRole::Planner), 1);
}

#[tokio::test]
async fn stale_escalations_are_expired() {
    let h = harness(dividing_then_factoring());
    let outcome = h.orchestrator.start("Solve x^2 - x = 0").await.unwrap();
    assert!(outcome.suspended().is_some());

    let none = h.orchestrator.expire_stale(chrono::Utc::now()).await.unwrap();
    assert!(none.is_empty());

    let later = chrono::Utc::now() + chrono::Duration::hours(2);
    let expired = h.orchestrator.expire_stale(later).await.unwrap();
    assert_eq!(expired.len(), 1);
    assert!(matches!(
        expired[0].failure().map(|f| &f.error),
        Some(PipelineError::EscalationTimeout { .. })
    ));
    assert!(h.orchestrator.pending().await.unwrap().is_empty());
}

#[tokio::test]
async fn cancelling_a_suspended_run() {
    let h = harness(dividing_then_factoring());
    let outcome = h.orchestrator.start("Solve x^2 - x = 0").await.unwrap();
    let run_id = outcome.run_id().clone();

    let cancelled = h.orchestrator.cancel(&run_id).await.unwrap().expect("suspended runs end here");
    assert!(matches!(cancelled.failure().map(|f| &f.error), Some(PipelineError::Cancelled)));
    let snapshot = h.orchestrator.snapshot(&run_id).await.unwrap();
    assert_eq!(snapshot.status, RunStatus::Failed);
    assert_eq!(snapshot.failure.unwrap().code, "cancelled");
}

#[tokio::test]
async fn cancelling_an_in_flight_run() {
    let r = quadratic().delay(PromptRole::Router, None, Duration::from_millis(500));
    let h = harness(r);
    let token = CancellationToken::new();

    let cancel = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
    });
    let outcome = h
        .orchestrator
        .start_with_cancel("Solve x^2 - 5x + 6 = 0", token)
        .await
        .unwrap();

    let failure = outcome.failure().expect("cancelled run fails");
    assert!(matches!(failure.error, PipelineError::Cancelled));
    assert_eq!(h.reasoner.calls_for(PromptRole::Planner), 0);
}

// ── Feedback ────────────────────────────────────────────────────────────

#[tokio::test]
async fn correction_starts_a_linked_run() {
    let h = harness(quadratic());
    let outcome = h.orchestrator.start("Solve x^2 - 5x + 6 = 0").await.unwrap();
    let parent = outcome.run_id().clone();

    let result = h
        .orchestrator
        .submit_feedback(
            &parent,
            FeedbackRecord::incorrect("x = 2, x = 3", Some("the roots are 2 and 3, show the check".into())),
        )
        .await
        .unwrap();

    let FeedbackOutcome::Replanned(child) = result else {
        panic!("a correction should re-plan");
    };
    assert!(child.completed().is_some());
    assert_ne!(child.run_id(), &parent);
    let child_ctx = h.orchestrator.snapshot(child.run_id()).await.unwrap();
    assert_eq!(child_ctx.linked_from.as_ref(), Some(&parent));

    let last_plan = h
        .reasoner
        .calls()
        .into_iter()
        .filter(|c| c.role == PromptRole::Planner)
        .last()
        .unwrap();
    assert!(last_plan.context["user_correction"].as_str().unwrap().contains("show the check"));
    // Nothing is learned from a correction.
    assert!(h.store.is_empty().await);
}

#[tokio::test]
async fn bare_rejection_reverifies_under_strict_framing() {
    let h = harness(quadratic());
    let outcome = h.orchestrator.start("Solve x^2 - 5x + 6 = 0").await.unwrap();
    let run_id = outcome.run_id().clone();
    let before = h.reasoner.calls_for(PromptRole::Verifier);

    let result = h
        .orchestrator
        .submit_feedback(&run_id, FeedbackRecord::incorrect("x = 2, x = 3", None))
        .await
        .unwrap();
    let FeedbackOutcome::Reverified { verdicts, consensus } = result else {
        panic!("bare rejection should re-verify");
    };
    assert_eq!(verdicts.len(), 3);
    assert!(verdicts.iter().all(|v| v.framing == STRICT_AUDIT));
    assert!(consensus.accepted);
    assert_eq!(h.reasoner.calls_for(PromptRole::Verifier), before + 3);
    assert!(h.store.is_empty().await);
}

#[tokio::test]
async fn feedback_on_unfinished_run_is_refused() {
    let h = harness(dividing_then_factoring());
    let outcome = h.orchestrator.start("Solve x^2 - x = 0").await.unwrap();
    let err = h
        .orchestrator
        .submit_feedback(outcome.run_id(), FeedbackRecord::correct("x = 1"))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::InvalidFeedback { .. }));
}

// ── Persistence and replay ──────────────────────────────────────────────

#[tokio::test]
async fn suspended_run_resumes_in_another_orchestrator() {
    let dir = tempfile::tempdir().unwrap();
    let runs_dir = dir.path().join("runs");

    let first = harness(dividing_then_factoring());
    let first = first.orchestrator.with_run_store(Arc::new(FileRunStore::new(&runs_dir)));
    let outcome = first.start("Solve x^2 - x = 0").await.unwrap();
    let run_id = outcome.run_id().clone();
    drop(first);

    let second = harness(dividing_then_factoring());
    let second = second.orchestrator.with_run_store(Arc::new(FileRunStore::new(&runs_dir)));
    assert_eq!(second.pending().await.unwrap().len(), 1);
    let outcome = second.resume(&run_id, HitlResponse::request_replan()).await.unwrap();
    assert_eq!(outcome.completed().unwrap().final_answer, "x = 0, x = 1");
}

#[tokio::test]
async fn recorded_run_replays_to_the_same_answer() {
    let dir = tempfile::tempdir().unwrap();
    let sink = Arc::new(JsonlAuditSink::new(dir.path()));

    let h = harness(dividing_then_factoring());
    let orchestrator = h.orchestrator.with_audit_sink(sink.clone());
    let outcome = orchestrator.start("Solve x^2 - x = 0").await.unwrap();
    let run_id = outcome.run_id().clone();
    let outcome = orchestrator.resume(&run_id, HitlResponse::request_replan()).await.unwrap();
    let original = outcome.completed().unwrap().clone();

    let trail = read_trail(sink.dir(), &run_id).await.unwrap();
    assert_eq!(trail.events.len(), original.audit.events.len());

    let replayer = harness(ScriptedReasoner::from_trail(&trail));
    let replayed = replayer.orchestrator.replay(&trail).await.unwrap();
    let replayed = replayed.completed().expect("replay should complete");
    assert_eq!(replayed.final_answer, original.final_answer);
    assert_eq!(replayed.audit.escalation_count(), 1);
    assert_eq!(replayer.reasoner.calls_for(PromptRole::Planner), 2);
}

#[tokio::test]
async fn concurrent_runs_are_independent() {
    let h = harness(quadratic());
    let (a, b) = tokio::join!(
        h.orchestrator.start("Solve x^2 - 5x + 6 = 0"),
        h.orchestrator.start("Solve x^2 - 5x + 6 = 0"),
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_ne!(a.run_id(), b.run_id());
    assert!(a.completed().is_some() && b.completed().is_some());
    assert_eq!(escalation_count(&h, &a).await, 0);
}

// ── Interactive driving ─────────────────────────────────────────────────

/// Answers escalations from a fixed queue.
struct QueuedOperator {
    responses: Mutex<VecDeque<HitlResponse>>,
    seen: Mutex<Vec<StageOrigin>>,
}

impl QueuedOperator {
    fn new(responses: impl IntoIterator<Item = HitlResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            seen: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl HumanOperator for QueuedOperator {
    async fn respond(&self, request: &HitlRequest) -> Result<HitlResponse, PipelineError> {
        self.seen.lock().unwrap().push(request.stage_origin);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or(PipelineError::Cancelled)
    }
}

/// Fails every time it is asked.
struct BrokenOperator;

#[async_trait]
impl HumanOperator for BrokenOperator {
    async fn respond(&self, _request: &HitlRequest) -> Result<HitlResponse, PipelineError> {
        Err(PipelineError::InconsistentState {
            reason: "operator channel closed".into(),
        })
    }
}

/// Never answers.
struct SilentOperator;

#[async_trait]
impl HumanOperator for SilentOperator {
    async fn respond(&self, _request: &HitlRequest) -> Result<HitlResponse, PipelineError> {
        std::future::pending().await
    }
}

#[tokio::test]
async fn interactive_run_asks_again_after_refused_response() {
    let h = harness(dividing_then_factoring());
    let operator = QueuedOperator::new([HitlResponse::select_answer("1"), HitlResponse::request_replan()]);

    let outcome = h
        .orchestrator
        .run_interactive("Solve x^2 - x = 0", &operator, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.completed().unwrap().final_answer, "x = 0, x = 1");
    assert_eq!(*operator.seen.lock().unwrap(), vec![StageOrigin::Guardrail, StageOrigin::Guardrail]);
}

#[tokio::test]
async fn interactive_run_times_out_silent_operator() {
    let mut config = fast_config();
    config.escalation.response_timeout_ms = 30;
    let h = harness_with(config, dividing_then_factoring());

    let outcome = h
        .orchestrator
        .run_interactive("Solve x^2 - x = 0", &SilentOperator, CancellationToken::new())
        .await
        .unwrap();
    assert!(matches!(
        outcome.failure().map(|f| &f.error),
        Some(PipelineError::EscalationTimeout { .. })
    ));
}

#[tokio::test]
async fn interactive_run_stops_on_cancel() {
    let h = harness(dividing_then_factoring());
    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();
    });

    let outcome = h
        .orchestrator
        .run_interactive("Solve x^2 - x = 0", &SilentOperator, token)
        .await
        .unwrap();
    assert!(matches!(outcome.failure().map(|f| &f.error), Some(PipelineError::Cancelled)));
}

#[tokio::test]
async fn operator_failure_fails_the_run_with_its_own_error() {
    let h = harness(dividing_then_factoring());
    let outcome = h
        .orchestrator
        .run_interactive("Solve x^2 - x = 0", &BrokenOperator, CancellationToken::new())
        .await
        .unwrap();

    let failure = outcome.failure().unwrap();
    assert!(
        matches!(&failure.error, PipelineError::InconsistentState { reason } if reason == "operator channel closed"),
        "{:?}",
        failure.error
    );
    let snapshot = h.orchestrator.snapshot(&failure.run_id).await.unwrap();
    assert_eq!(snapshot.status, RunStatus::Failed);
    let codes: Vec<&str> = snapshot
        .audit
        .events
        .iter()
        .filter_map(|e| match &e.kind {
            AuditEventKind::RunFailed { code, .. } => Some(code.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(codes, vec![failure.error.code()]);
    assert!(!snapshot.audit.events.iter().any(|e| matches!(e.kind, AuditEventKind::EscalationResolved { .. })));
}
