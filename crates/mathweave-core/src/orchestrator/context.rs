//! The explicit per-run context threaded through every stage.
//!
//! Everything a run has produced so far lives here, together with the stage
//! to run next, the retry counters, and the escalation ledger. The context
//! is serializable, which is what lets a suspended run be written to a
//! [`RunStore`](crate::run_store::RunStore) and resumed elsewhere.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mathweave_types::error::ErrorClass;
use mathweave_types::execution::ExecutionTrace;
use mathweave_types::explanation::Explanation;
use mathweave_types::feedback::FeedbackRecord;
use mathweave_types::knowledge::RetrievalContext;
use mathweave_types::plan::{GuardrailVerdict, Plan};
use mathweave_types::problem::{Problem, RouteDecision};
use mathweave_types::run::{AuditEventKind, AuditTrail, FinalOutput, Resolution, RunId, Stage};
use mathweave_types::verification::{ConsensusResult, VerificationVerdict};
use mathweave_types::PipelineError;

use crate::hitl::EscalationLedger;
use crate::reasoner::CallScope;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    /// Waiting on a human response.
    Suspended,
    Completed,
    Failed,
}

/// Retry budgets spent so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounters {
    pub ambiguity_escalations: u32,
    /// Re-plans after a guardrail rejection or an execution failure.
    pub replans: u32,
    pub reexecutions: u32,
}

/// The terminal error of a failed run, as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub code: String,
    pub class: ErrorClass,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunContext {
    pub run_id: RunId,
    pub status: RunStatus,
    /// Stage to run when the run is driven next.
    pub next: Stage,
    pub raw_text: String,
    /// The run whose feedback started this one.
    #[serde(default)]
    pub linked_from: Option<RunId>,
    /// A user correction handed to the planner.
    #[serde(default)]
    pub seed_hint: Option<String>,

    #[serde(default)]
    pub problem: Option<Problem>,
    #[serde(default)]
    pub route: Option<RouteDecision>,
    #[serde(default)]
    pub retrieval: Option<RetrievalContext>,
    #[serde(default)]
    pub plan: Option<Plan>,
    #[serde(default)]
    pub verdict: Option<GuardrailVerdict>,
    /// Why the last plan was rejected or failed; shown to the planner.
    #[serde(default)]
    pub plan_feedback: Option<String>,
    #[serde(default)]
    pub trace: Option<ExecutionTrace>,
    #[serde(default)]
    pub verdicts: Vec<VerificationVerdict>,
    #[serde(default)]
    pub consensus: Option<ConsensusResult>,
    #[serde(default)]
    pub resolution: Option<Resolution>,
    #[serde(default)]
    pub final_answer: Option<String>,
    #[serde(default)]
    pub explanation: Option<Explanation>,
    #[serde(default)]
    pub feedback: Vec<FeedbackRecord>,

    #[serde(default)]
    pub counters: RunCounters,
    #[serde(default)]
    pub ledger: EscalationLedger,
    #[serde(default)]
    pub failure: Option<FailureRecord>,

    pub audit: AuditTrail,
    /// Audit events already handed to the sink.
    #[serde(default)]
    pub audit_flushed: usize,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn missing(what: &str) -> PipelineError {
    PipelineError::InconsistentState {
        reason: format!("run has no {what}"),
    }
}

impl RunContext {
    pub fn new(raw_text: impl Into<String>, linked_from: Option<RunId>, seed_hint: Option<String>) -> Self {
        let run_id = RunId::new();
        let raw_text = raw_text.into();
        let now = Utc::now();
        let mut audit = AuditTrail::new(run_id.clone());
        audit.record(Stage::Parse, AuditEventKind::RunStarted {
            raw_text: raw_text.clone(),
            linked_from: linked_from.clone(),
        });
        Self {
            run_id,
            status: RunStatus::Running,
            next: Stage::Parse,
            raw_text,
            linked_from,
            seed_hint,
            problem: None,
            route: None,
            retrieval: None,
            plan: None,
            verdict: None,
            plan_feedback: None,
            trace: None,
            verdicts: Vec::new(),
            consensus: None,
            resolution: None,
            final_answer: None,
            explanation: None,
            feedback: Vec::new(),
            counters: RunCounters::default(),
            ledger: EscalationLedger::new(),
            failure: None,
            audit,
            audit_flushed: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn record(&mut self, stage: Stage, kind: AuditEventKind) {
        self.audit.record(stage, kind);
        self.updated_at = Utc::now();
    }

    /// Move the reasoner exchanges gathered on `scope` into the trail.
    pub fn absorb(&mut self, stage: Stage, scope: &CallScope) {
        for exchange in scope.drain() {
            self.record(stage, AuditEventKind::ReasonerExchange { exchange });
        }
    }

    pub fn problem(&self) -> Result<&Problem, PipelineError> {
        self.problem.as_ref().ok_or_else(|| missing("problem"))
    }

    pub fn route(&self) -> Result<&RouteDecision, PipelineError> {
        self.route.as_ref().ok_or_else(|| missing("route decision"))
    }

    pub fn plan(&self) -> Result<&Plan, PipelineError> {
        self.plan.as_ref().ok_or_else(|| missing("plan"))
    }

    pub fn verdict(&self) -> Result<&GuardrailVerdict, PipelineError> {
        self.verdict.as_ref().ok_or_else(|| missing("guardrail verdict"))
    }

    pub fn trace(&self) -> Result<&ExecutionTrace, PipelineError> {
        self.trace.as_ref().ok_or_else(|| missing("execution trace"))
    }

    pub fn consensus(&self) -> Result<&ConsensusResult, PipelineError> {
        self.consensus.as_ref().ok_or_else(|| missing("consensus"))
    }

    /// The output of a completed run.
    pub fn final_output(&self) -> Result<FinalOutput, PipelineError> {
        if self.status != RunStatus::Completed {
            return Err(PipelineError::InvalidFeedback {
                reason: format!("run {} has not completed", self.run_id),
            });
        }
        Ok(FinalOutput {
            run_id: self.run_id.clone(),
            problem: self.problem()?.clone(),
            route: self.route()?.clone(),
            explanation: self.explanation.clone().ok_or_else(|| missing("explanation"))?,
            consensus: self.consensus()?.clone(),
            resolution: self.resolution.clone().ok_or_else(|| missing("resolution"))?,
            trace: self.trace()?.clone(),
            final_answer: self.final_answer.clone().ok_or_else(|| missing("final answer"))?,
            audit: self.audit.clone(),
        })
    }
}
