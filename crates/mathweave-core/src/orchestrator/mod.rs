//! The orchestration state machine.
//!
//! [`Orchestrator`] drives a [`RunContext`] through the pipeline one stage at
//! a time and decides, at each boundary, whether to proceed, escalate to a
//! human, re-plan, or fail. Stages run strictly in order; only the verifier
//! ensemble fans out.
//!
//! ```text
//! Parse -> DetectAmbiguity -> Route -> Retrieve -> Plan -> Guardrail -> Execute -> Verify -> Explain -> Done
//!               |   ^                               ^         |          |          |        ^
//!               v   | clarify                replan |         v          | failed   v        | select
//!            Escalation ----------------------------+------ Escalation   +-> Plan  Escalation
//! ```
//!
//! An escalation suspends the run: the context, with its pending request, is
//! saved to the [`RunStore`] and [`RunOutcome::Suspended`] is returned. A
//! later [`Orchestrator::resume`] applies the human response and continues
//! from the stage that response implies. Every terminal failure carries the
//! run's audit trail.

pub mod context;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use mathweave_types::config::PipelineConfig;
use mathweave_types::escalation::{EscalationPayload, HitlRequest, HitlResponse, ResponseAction};
use mathweave_types::explanation::Explanation;
use mathweave_types::feedback::{FeedbackRecord, UserJudgment};
use mathweave_types::knowledge::RetrievalContext;
use mathweave_types::plan::GuardrailVerdict;
use mathweave_types::reasoner::PromptRole;
use mathweave_types::run::{AuditEventKind, AuditTrail, FinalOutput, Resolution, RunId, Stage};
use mathweave_types::verification::{ConsensusResult, VerificationVerdict};
use mathweave_types::{PipelineError, ReasonerError};

pub use context::{FailureRecord, RunContext, RunCounters, RunStatus};

use crate::audit::{AuditSink, NoopAuditSink};
use crate::knowledge::AppendOutcome;
use crate::learning::{Learned, SelfLearningStore};
use crate::pipeline::consensus::{self, canonical_answer};
use crate::pipeline::verifier::STRICT_AUDIT;
use crate::pipeline::{Pipeline, PlanInput, VerifyInput, reasoner_failure};
use crate::reasoner::CallScope;
use crate::run_store::{MemoryRunStore, RunStore};

// ── Outcomes ────────────────────────────────────────────────────────────

/// A run that ended in error, with everything it recorded.
#[derive(Debug)]
pub struct RunFailure {
    pub run_id: RunId,
    pub error: PipelineError,
    pub audit: AuditTrail,
}

#[derive(Debug)]
pub enum RunOutcome {
    Completed(Box<FinalOutput>),
    /// Waiting on a human; resume with the request's run id.
    Suspended(Box<HitlRequest>),
    Failed(Box<RunFailure>),
}

impl RunOutcome {
    pub fn run_id(&self) -> &RunId {
        match self {
            Self::Completed(output) => &output.run_id,
            Self::Suspended(request) => &request.run_id,
            Self::Failed(failure) => &failure.run_id,
        }
    }

    pub fn completed(&self) -> Option<&FinalOutput> {
        match self {
            Self::Completed(output) => Some(output),
            _ => None,
        }
    }

    pub fn suspended(&self) -> Option<&HitlRequest> {
        match self {
            Self::Suspended(request) => Some(request),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&RunFailure> {
        match self {
            Self::Failed(failure) => Some(failure),
            _ => None,
        }
    }
}

/// What feedback on a completed run led to.
#[derive(Debug)]
pub enum FeedbackOutcome {
    /// Confirmed correct and written back (or already known).
    Learned(Learned),
    /// A correction started a fresh, linked run.
    Replanned(RunOutcome),
    /// Reported wrong without a correction; the stored trace was audited
    /// again under strict framing.
    Reverified {
        verdicts: Vec<VerificationVerdict>,
        consensus: ConsensusResult,
    },
}

/// Whoever answers escalations when a run is driven interactively. An error
/// from `respond` fails the run with that error.
#[async_trait]
pub trait HumanOperator: Send + Sync {
    async fn respond(&self, request: &HitlRequest) -> Result<HitlResponse, PipelineError>;
}

enum Flow {
    Continue,
    Suspend,
    Done,
}

// ── Active-run registry ─────────────────────────────────────────────────

type ActiveRuns = Mutex<HashMap<RunId, CancellationToken>>;

/// Marks a run as being driven; released on drop.
struct ActiveRun<'a> {
    active: &'a ActiveRuns,
    run_id: RunId,
}

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        if let Ok(mut active) = self.active.lock() {
            active.remove(&self.run_id);
        }
    }
}

// ── Orchestrator ────────────────────────────────────────────────────────

pub struct Orchestrator {
    pipeline: Arc<Pipeline>,
    config: PipelineConfig,
    runs: Arc<dyn RunStore>,
    audit: Arc<dyn AuditSink>,
    learner: SelfLearningStore,
    active: ActiveRuns,
}

impl Orchestrator {
    /// Runs are kept in memory and audit events discarded until a store and
    /// sink are supplied.
    pub fn new(config: PipelineConfig, pipeline: Pipeline) -> Result<Self, PipelineError> {
        config.validate()?;
        let learner = SelfLearningStore::new(pipeline.retrieval.store().clone(), &config.knowledge);
        Ok(Self {
            pipeline: Arc::new(pipeline),
            config,
            runs: Arc::new(MemoryRunStore::new()),
            audit: Arc::new(NoopAuditSink),
            learner,
            active: Mutex::new(HashMap::new()),
        })
    }

    pub fn with_run_store(mut self, runs: Arc<dyn RunStore>) -> Self {
        self.runs = runs;
        self
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    fn escalation_timeout(&self) -> Duration {
        Duration::from_millis(self.config.escalation.response_timeout_ms)
    }

    // ── Entry points ───────────────────────────────────────────────────

    pub async fn start(&self, raw_text: &str) -> Result<RunOutcome, PipelineError> {
        self.start_with_cancel(raw_text, CancellationToken::new()).await
    }

    /// Start a run that stops at the next suspension point once `cancel`
    /// fires.
    pub async fn start_with_cancel(
        &self,
        raw_text: &str,
        cancel: CancellationToken,
    ) -> Result<RunOutcome, PipelineError> {
        let ctx = RunContext::new(raw_text, None, None);
        info!(run_id = %ctx.run_id, "run started");
        let _active = self.claim(&ctx.run_id, &cancel)?;
        self.drive(ctx, cancel).await
    }

    pub async fn resume(&self, run_id: &RunId, response: HitlResponse) -> Result<RunOutcome, PipelineError> {
        self.resume_with_cancel(run_id, response, CancellationToken::new()).await
    }

    /// Apply a human response to a suspended run and drive it on.
    ///
    /// A response that does not fit the pending escalation is refused with
    /// [`PipelineError::InvalidResponse`] and the run stays suspended. A
    /// response arriving after the escalation timeout fails the run with
    /// [`PipelineError::EscalationTimeout`] instead of being applied.
    pub async fn resume_with_cancel(
        &self,
        run_id: &RunId,
        response: HitlResponse,
        cancel: CancellationToken,
    ) -> Result<RunOutcome, PipelineError> {
        let _active = self.claim(run_id, &cancel)?;
        let mut ctx = self.load_suspended(run_id).await?;

        let now = Utc::now();
        if ctx.ledger.is_expired(now, self.escalation_timeout()) {
            return self.expire(ctx, now).await;
        }

        let request = ctx.ledger.resolve(&response)?;
        let state = ctx.ledger.state();
        ctx.record(Stage::Escalation, AuditEventKind::EscalationResolved {
            request_id: request.id.clone(),
            action: response.action.clone(),
        });
        ctx.record(Stage::Escalation, AuditEventKind::EscalationClosed {
            request_id: request.id.clone(),
            origin: request.stage_origin,
            state,
        });
        info!(
            run_id = %run_id,
            origin = %request.stage_origin,
            action = response.action.name(),
            "escalation answered"
        );

        if let Err(err) = self.apply_response(&mut ctx, &request, response.action) {
            let outcome = self.fail(&mut ctx, err);
            self.persist(&mut ctx).await?;
            return Ok(outcome);
        }
        self.drive(ctx, cancel).await
    }

    /// Cancel a run. An in-flight run is signalled and reports its own
    /// failure to whoever is driving it (`None` here); a suspended run is
    /// abandoned on the spot and its failure returned.
    pub async fn cancel(&self, run_id: &RunId) -> Result<Option<RunOutcome>, PipelineError> {
        let in_flight = self
            .active
            .lock()
            .ok()
            .and_then(|active| active.get(run_id).cloned());
        if let Some(token) = in_flight {
            info!(run_id = %run_id, "cancelling in-flight run");
            token.cancel();
            return Ok(None);
        }
        self.cancel_suspended(run_id).await.map(Some)
    }

    async fn cancel_suspended(&self, run_id: &RunId) -> Result<RunOutcome, PipelineError> {
        self.abandon_suspended(run_id, PipelineError::Cancelled).await
    }

    /// Close a suspended run's escalation unanswered and fail the run with
    /// `error`.
    async fn abandon_suspended(&self, run_id: &RunId, error: PipelineError) -> Result<RunOutcome, PipelineError> {
        let _active = self.claim(run_id, &CancellationToken::new())?;
        let mut ctx = self.load_suspended(run_id).await?;
        let request = ctx.ledger.abandon()?;
        let state = ctx.ledger.state();
        ctx.record(Stage::Escalation, AuditEventKind::EscalationClosed {
            request_id: request.id,
            origin: request.stage_origin,
            state,
        });
        info!(run_id = %run_id, origin = %request.stage_origin, error = %error, "suspended run abandoned");
        let outcome = self.fail(&mut ctx, error);
        self.persist(&mut ctx).await?;
        Ok(outcome)
    }

    /// Give up waiting on a suspended run's escalation.
    pub async fn time_out(&self, run_id: &RunId) -> Result<RunOutcome, PipelineError> {
        let _active = self.claim(run_id, &CancellationToken::new())?;
        let ctx = self.load_suspended(run_id).await?;
        self.expire(ctx, Utc::now()).await
    }

    /// Time out every suspended run whose escalation has waited past the
    /// configured timeout at `now`.
    pub async fn expire_stale(&self, now: DateTime<Utc>) -> Result<Vec<RunOutcome>, PipelineError> {
        let timeout = self.escalation_timeout();
        let mut expired = Vec::new();
        for ctx in self.runs.list_suspended().await? {
            if !ctx.ledger.is_expired(now, timeout) {
                continue;
            }
            let run_id = ctx.run_id.clone();
            let Ok(_active) = self.claim(&run_id, &CancellationToken::new()) else {
                debug!(run_id = %run_id, "skipping expiry of a run being resumed");
                continue;
            };
            expired.push(self.expire(ctx, now).await?);
        }
        Ok(expired)
    }

    /// Every escalation currently waiting on a human, oldest run first.
    pub async fn pending(&self) -> Result<Vec<HitlRequest>, PipelineError> {
        Ok(self
            .runs
            .list_suspended()
            .await?
            .into_iter()
            .filter_map(|ctx| ctx.ledger.pending().cloned())
            .collect())
    }

    pub async fn snapshot(&self, run_id: &RunId) -> Result<RunContext, PipelineError> {
        self.runs
            .load(run_id)
            .await?
            .ok_or_else(|| PipelineError::UnknownRun(run_id.to_string()))
    }

    /// Apply user feedback to a completed run.
    ///
    /// - `Correct`: the solution is written to the knowledge store.
    /// - `Incorrect` with a correction: a new run, linked to this one, plans
    ///   again with the correction as a hint. Nothing is written.
    /// - `Incorrect` alone: the verifier ensemble re-checks the stored trace
    ///   under the strict-audit framing.
    pub async fn submit_feedback(
        &self,
        run_id: &RunId,
        feedback: FeedbackRecord,
    ) -> Result<FeedbackOutcome, PipelineError> {
        let token = CancellationToken::new();
        let _active = self.claim(run_id, &token)?;
        let mut ctx = self.snapshot(run_id).await?;
        let output = ctx.final_output()?;
        ctx.record(Stage::Feedback, AuditEventKind::FeedbackReceived {
            record: feedback.clone(),
        });
        ctx.feedback.push(feedback.clone());
        info!(run_id = %run_id, judgment = ?feedback.user_judgment, "feedback received");

        let result = match (feedback.user_judgment, feedback.correction.clone()) {
            (UserJudgment::Correct, _) => self.learn(&mut ctx, &output, &feedback).await,
            (UserJudgment::Incorrect, Some(correction)) => {
                let child = RunContext::new(output.problem.raw_text(), Some(ctx.run_id.clone()), Some(correction));
                info!(run_id = %run_id, linked_run = %child.run_id, "re-planning from user correction");
                let child_token = CancellationToken::new();
                let _child_active = self.claim(&child.run_id, &child_token)?;
                self.drive(child, child_token).await.map(FeedbackOutcome::Replanned)
            }
            (UserJudgment::Incorrect, None) => self.reverify(&mut ctx, &output, &token).await,
        };
        self.persist(&mut ctx).await?;
        result
    }

    async fn learn(
        &self,
        ctx: &mut RunContext,
        output: &FinalOutput,
        feedback: &FeedbackRecord,
    ) -> Result<FeedbackOutcome, PipelineError> {
        let learned = self.learner.learn(output, feedback).await?;
        ctx.record(Stage::Feedback, AuditEventKind::KnowledgeWritten {
            entry_id: learned.entry_id.clone(),
            created: learned.outcome == AppendOutcome::Inserted,
        });
        Ok(FeedbackOutcome::Learned(learned))
    }

    async fn reverify(
        &self,
        ctx: &mut RunContext,
        output: &FinalOutput,
        token: &CancellationToken,
    ) -> Result<FeedbackOutcome, PipelineError> {
        let scope = CallScope::new(token.clone());
        let input = VerifyInput {
            problem: &output.problem,
            trace: &output.trace,
        };
        let result = self.pipeline.verifiers.run(&scope, &input, Some(STRICT_AUDIT)).await;
        ctx.absorb(Stage::Feedback, &scope);
        let verdicts = result?;
        for verdict in &verdicts {
            ctx.record(Stage::Feedback, AuditEventKind::VerdictRecorded {
                verdict: verdict.clone(),
            });
        }
        let consensus = consensus::compute(&verdicts, self.pipeline.verifiers.threshold());
        ctx.record(Stage::Feedback, AuditEventKind::ConsensusComputed {
            consensus: consensus.clone(),
        });
        info!(
            run_id = %ctx.run_id,
            agreement = consensus.agreement_ratio,
            accepted = consensus.accepted,
            "strict re-verification finished"
        );
        Ok(FeedbackOutcome::Reverified { verdicts, consensus })
    }

    /// Drive a run start to finish, answering escalations through
    /// `operator`. Each wait is bounded by the escalation timeout; a refused
    /// response is asked for again.
    pub async fn run_interactive(
        &self,
        raw_text: &str,
        operator: &dyn HumanOperator,
        cancel: CancellationToken,
    ) -> Result<RunOutcome, PipelineError> {
        let mut outcome = self.start_with_cancel(raw_text, cancel.clone()).await?;
        let wait = self.escalation_timeout();
        loop {
            let request = match outcome {
                RunOutcome::Suspended(request) => request,
                done => return Ok(done),
            };
            let reply = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                r = tokio::time::timeout(wait, operator.respond(&request)) => Some(r),
            };
            outcome = match reply {
                None => self.cancel_suspended(&request.run_id).await?,
                Some(Err(_)) => self.time_out(&request.run_id).await?,
                Some(Ok(Err(err))) => {
                    warn!(run_id = %request.run_id, error = %err, "operator failed to respond");
                    self.abandon_suspended(&request.run_id, err).await?
                }
                Some(Ok(Ok(response))) => {
                    match self
                        .resume_with_cancel(&request.run_id, response, cancel.clone())
                        .await
                    {
                        Err(PipelineError::InvalidResponse { reason }) => {
                            warn!(run_id = %request.run_id, reason = %reason, "response refused, asking again");
                            RunOutcome::Suspended(request)
                        }
                        other => other?,
                    }
                }
            };
        }
    }

    /// Re-drive a recorded run: same input, same human responses in the same
    /// order. Build the orchestrator over
    /// [`ScriptedReasoner::from_trail`](crate::replay::ScriptedReasoner::from_trail)
    /// of the same trail to get the same reasoner outputs.
    pub async fn replay(&self, trail: &AuditTrail) -> Result<RunOutcome, PipelineError> {
        let raw_text = trail
            .events
            .iter()
            .find_map(|e| match &e.kind {
                AuditEventKind::RunStarted { raw_text, .. } => Some(raw_text.clone()),
                _ => None,
            })
            .ok_or_else(|| PipelineError::InconsistentState {
                reason: "trail has no start event".into(),
            })?;
        let mut responses = trail.events.iter().filter_map(|e| match &e.kind {
            AuditEventKind::EscalationResolved { action, .. } => Some(action.clone()),
            _ => None,
        });

        let mut outcome = self.start(&raw_text).await?;
        while let Some(request) = outcome.suspended() {
            let Some(action) = responses.next() else {
                break;
            };
            let run_id = request.run_id.clone();
            outcome = self.resume(&run_id, HitlResponse::new(action)).await?;
        }
        Ok(outcome)
    }

    // ── Driving ────────────────────────────────────────────────────────

    fn claim(&self, run_id: &RunId, token: &CancellationToken) -> Result<ActiveRun<'_>, PipelineError> {
        let mut active = self.active.lock().map_err(|_| PipelineError::InconsistentState {
            reason: "active-run registry poisoned".into(),
        })?;
        if active.contains_key(run_id) {
            return Err(PipelineError::InvalidResponse {
                reason: format!("run {run_id} is already in progress"),
            });
        }
        active.insert(run_id.clone(), token.clone());
        Ok(ActiveRun {
            active: &self.active,
            run_id: run_id.clone(),
        })
    }

    async fn load_suspended(&self, run_id: &RunId) -> Result<RunContext, PipelineError> {
        let ctx = self.snapshot(run_id).await?;
        if ctx.status != RunStatus::Suspended {
            return Err(PipelineError::InvalidResponse {
                reason: format!("run {run_id} is not waiting on a response ({:?})", ctx.status),
            });
        }
        Ok(ctx)
    }

    async fn drive(&self, mut ctx: RunContext, cancel: CancellationToken) -> Result<RunOutcome, PipelineError> {
        let outcome = self.advance(&mut ctx, &cancel).await;
        self.persist(&mut ctx).await?;
        Ok(outcome)
    }

    async fn advance(&self, ctx: &mut RunContext, cancel: &CancellationToken) -> RunOutcome {
        let scope = CallScope::new(cancel.clone());
        ctx.status = RunStatus::Running;
        loop {
            if cancel.is_cancelled() {
                return self.fail(ctx, PipelineError::Cancelled);
            }
            let stage = ctx.next;
            debug!(run_id = %ctx.run_id, stage = ?stage, "entering stage");
            let result = self.step(ctx, &scope).await;
            ctx.absorb(stage, &scope);
            match result {
                Ok(Flow::Continue) => {}
                Ok(Flow::Suspend) => {
                    return match ctx.ledger.pending() {
                        Some(request) => RunOutcome::Suspended(Box::new(request.clone())),
                        None => self.fail(ctx, PipelineError::InconsistentState {
                            reason: "suspended without a pending escalation".into(),
                        }),
                    };
                }
                Ok(Flow::Done) => {
                    return match ctx.final_output() {
                        Ok(output) => RunOutcome::Completed(Box::new(output)),
                        Err(err) => self.fail(ctx, err),
                    };
                }
                Err(err) => return self.fail(ctx, err),
            }
        }
    }

    async fn step(&self, ctx: &mut RunContext, scope: &CallScope) -> Result<Flow, PipelineError> {
        match ctx.next {
            Stage::Parse => self.parse(ctx),
            Stage::DetectAmbiguity => self.detect_ambiguity(ctx),
            Stage::Route => self.route(ctx, scope).await,
            Stage::Retrieve => self.retrieve(ctx).await,
            Stage::Plan => self.plan(ctx, scope).await,
            Stage::Guardrail => self.guardrail(ctx),
            Stage::Execute => self.execute(ctx, scope).await,
            Stage::Verify => self.verify(ctx, scope).await,
            Stage::Explain => self.explain(ctx, scope).await,
            Stage::Done => Ok(Flow::Done),
            other @ (Stage::Escalation | Stage::Feedback) => Err(PipelineError::InconsistentState {
                reason: format!("a run cannot be driven from {other:?}"),
            }),
        }
    }

    /// Record the terminal error and close the run.
    fn fail(&self, ctx: &mut RunContext, error: PipelineError) -> RunOutcome {
        let stage = ctx.next;
        warn!(
            run_id = %ctx.run_id,
            stage = ?stage,
            code = error.code(),
            class = %error.class(),
            error = %error,
            "run failed"
        );
        ctx.record(stage, AuditEventKind::RunFailed {
            code: error.code().to_string(),
            class: error.class(),
            message: error.to_string(),
        });
        ctx.failure = Some(FailureRecord {
            code: error.code().to_string(),
            class: error.class(),
            message: error.to_string(),
        });
        ctx.status = RunStatus::Failed;
        ctx.next = Stage::Done;
        RunOutcome::Failed(Box::new(RunFailure {
            run_id: ctx.run_id.clone(),
            error,
            audit: ctx.audit.clone(),
        }))
    }

    /// Flush new audit events, then save the snapshot.
    async fn persist(&self, ctx: &mut RunContext) -> Result<(), PipelineError> {
        let fresh = ctx.audit.events.get(ctx.audit_flushed..).unwrap_or_default();
        self.audit.append(&ctx.run_id, fresh).await?;
        ctx.audit_flushed = ctx.audit.events.len();
        self.runs.save(ctx).await
    }

    async fn expire(&self, mut ctx: RunContext, now: DateTime<Utc>) -> Result<RunOutcome, PipelineError> {
        let waited = ctx.ledger.waited(now).unwrap_or_default();
        let request = ctx.ledger.time_out()?;
        let state = ctx.ledger.state();
        ctx.record(Stage::Escalation, AuditEventKind::EscalationClosed {
            request_id: request.id,
            origin: request.stage_origin,
            state,
        });
        let outcome = self.fail(&mut ctx, PipelineError::EscalationTimeout {
            origin: request.stage_origin.to_string(),
            waited_ms: waited.as_millis() as u64,
        });
        self.persist(&mut ctx).await?;
        Ok(outcome)
    }

    fn escalate(&self, ctx: &mut RunContext, stage: Stage, payload: EscalationPayload) -> Result<Flow, PipelineError> {
        let cap = self.config.escalation.max_escalations;
        let request = ctx.ledger.submit(ctx.run_id.clone(), payload, cap, Utc::now())?.clone();
        ctx.record(stage, AuditEventKind::EscalationRaised { request });
        ctx.status = RunStatus::Suspended;
        ctx.next = Stage::Escalation;
        Ok(Flow::Suspend)
    }

    /// Where a resolved escalation sends the run.
    fn apply_response(
        &self,
        ctx: &mut RunContext,
        request: &HitlRequest,
        action: ResponseAction,
    ) -> Result<(), PipelineError> {
        ctx.next = match action {
            ResponseAction::Clarify { statement } => {
                let revised = self.pipeline.parser.parse_revision(ctx.problem()?, &statement)?;
                ctx.record(Stage::Escalation, AuditEventKind::ProblemParsed {
                    problem: revised.clone(),
                });
                ctx.problem = Some(revised);
                Stage::DetectAmbiguity
            }
            ResponseAction::ApproveOverride { note } => {
                let verdict = ctx.verdict()?.overridden(note);
                info!(run_id = %ctx.run_id, waived = %verdict.rules_display(), "guardrail override approved");
                ctx.record(Stage::Escalation, AuditEventKind::GuardrailEvaluated {
                    verdict: verdict.clone(),
                });
                ctx.verdict = Some(verdict);
                Stage::Execute
            }
            ResponseAction::RequestReplan => {
                let verdict = ctx.verdict()?;
                let max = self.config.planning.max_replan_attempts;
                if ctx.counters.replans >= max {
                    return Err(PipelineError::GuardrailRejected {
                        rules: verdict.rules_display(),
                        replans: ctx.counters.replans,
                    });
                }
                ctx.plan_feedback = Some(rejection_feedback(verdict));
                ctx.counters.replans += 1;
                Stage::Plan
            }
            ResponseAction::SelectAnswer { answer } => {
                ctx.resolution = Some(Resolution::HumanSelected {
                    answer: answer.clone(),
                });
                ctx.final_answer = Some(answer);
                Stage::Explain
            }
            ResponseAction::RequestReexecution => {
                let max = self.config.verification.max_reexecution_cycles;
                if ctx.counters.reexecutions >= max {
                    return Err(PipelineError::ConsensusFailure {
                        agreement: ctx.consensus()?.agreement_ratio,
                        reexecutions: ctx.counters.reexecutions,
                    });
                }
                ctx.counters.reexecutions += 1;
                Stage::Execute
            }
            ResponseAction::Dismiss => {
                return Err(PipelineError::UserAbandoned {
                    origin: request.stage_origin.to_string(),
                });
            }
        };
        ctx.status = RunStatus::Running;
        Ok(())
    }

    // ── Stages ─────────────────────────────────────────────────────────

    fn parse(&self, ctx: &mut RunContext) -> Result<Flow, PipelineError> {
        let problem = self.pipeline.parser.parse(&ctx.raw_text)?;
        ctx.record(Stage::Parse, AuditEventKind::ProblemParsed {
            problem: problem.clone(),
        });
        ctx.problem = Some(problem);
        ctx.next = Stage::DetectAmbiguity;
        Ok(Flow::Continue)
    }

    fn detect_ambiguity(&self, ctx: &mut RunContext) -> Result<Flow, PipelineError> {
        let report = self.pipeline.ambiguity.detect(ctx.problem()?);
        let flagged = ctx.problem()?.with_ambiguity_flags(report.flags.clone());
        let statement = flagged.normalized_statement().to_string();
        ctx.record(Stage::DetectAmbiguity, AuditEventKind::AmbiguityChecked {
            flags: report.flags.clone(),
        });
        ctx.problem = Some(flagged);

        if report.is_clear() {
            ctx.next = Stage::Route;
            return Ok(Flow::Continue);
        }

        let spent = ctx.counters.ambiguity_escalations;
        if spent >= self.config.escalation.max_ambiguity_escalations {
            return Err(PipelineError::UnresolvableAmbiguity {
                flags: report.flags_display(),
                escalations: spent,
            });
        }
        ctx.counters.ambiguity_escalations += 1;
        info!(run_id = %ctx.run_id, flags = %report.flags_display(), "ambiguous problem, asking for clarification");
        self.escalate(ctx, Stage::DetectAmbiguity, EscalationPayload::Ambiguity {
            statement,
            flags: report.flags,
            findings: report.findings,
        })
    }

    async fn route(&self, ctx: &mut RunContext, scope: &CallScope) -> Result<Flow, PipelineError> {
        let problem = ctx.problem()?.clone();
        let result = self.pipeline.router.route(scope, &problem).await;
        ctx.absorb(Stage::Route, scope);
        let routing = result.map_err(|err| reasoner_failure(PromptRole::Router, err))?;

        if let Some(reason) = routing.degraded {
            ctx.record(Stage::Route, AuditEventKind::Degraded { reason });
        }
        let decision = routing.decision;
        let category = decision.effective_category();
        info!(
            run_id = %ctx.run_id,
            category = %category,
            confidence = decision.confidence,
            low_confidence = decision.low_confidence,
            "routed"
        );
        ctx.record(Stage::Route, AuditEventKind::Routed {
            decision: decision.clone(),
        });
        ctx.problem = Some(problem.with_category(category));
        ctx.route = Some(decision);
        ctx.next = Stage::Retrieve;
        Ok(Flow::Continue)
    }

    async fn retrieve(&self, ctx: &mut RunContext) -> Result<Flow, PipelineError> {
        let category = ctx.route()?.effective_category();
        let (retrieval, degraded) = self.pipeline.retrieval.retrieve(ctx.problem()?, category).await;
        if let Some(reason) = degraded {
            ctx.record(Stage::Retrieve, AuditEventKind::Degraded { reason });
        }
        ctx.record(Stage::Retrieve, AuditEventKind::Retrieved {
            entry_ids: retrieval.entry_ids(),
            degraded: retrieval.degraded,
        });
        ctx.retrieval = Some(retrieval);
        ctx.next = Stage::Plan;
        Ok(Flow::Continue)
    }

    async fn plan(&self, ctx: &mut RunContext, scope: &CallScope) -> Result<Flow, PipelineError> {
        let empty = RetrievalContext::default();
        let input = PlanInput {
            problem: ctx.problem()?,
            category: ctx.route()?.effective_category(),
            retrieval: ctx.retrieval.as_ref().unwrap_or(&empty),
            previous: ctx.plan.as_ref(),
            feedback: ctx.plan_feedback.as_deref(),
            seed_hint: ctx.seed_hint.as_deref(),
        };
        let result = self.pipeline.planner.plan(scope, &input).await;
        ctx.absorb(Stage::Plan, scope);
        let plan = result?;

        info!(run_id = %ctx.run_id, plan_id = %plan.id, revision = plan.revision, steps = plan.steps.len(), "plan proposed");
        ctx.record(Stage::Plan, AuditEventKind::PlanProposed { plan: plan.clone() });
        ctx.plan = Some(plan);
        ctx.verdict = None;
        ctx.plan_feedback = None;
        ctx.next = Stage::Guardrail;
        Ok(Flow::Continue)
    }

    fn guardrail(&self, ctx: &mut RunContext) -> Result<Flow, PipelineError> {
        let verdict = self
            .pipeline
            .guardrail
            .evaluate(ctx.problem()?, ctx.plan()?, ctx.route()?);
        ctx.record(Stage::Guardrail, AuditEventKind::GuardrailEvaluated {
            verdict: verdict.clone(),
        });

        if verdict.is_safe() {
            ctx.verdict = Some(verdict);
            ctx.next = Stage::Execute;
            return Ok(Flow::Continue);
        }

        warn!(run_id = %ctx.run_id, rules = %verdict.rules_display(), "plan rejected by guardrail");
        let plan = ctx.plan()?.clone();
        ctx.verdict = Some(verdict.clone());
        self.escalate(ctx, Stage::Guardrail, EscalationPayload::Guardrail { plan, verdict })
    }

    async fn execute(&self, ctx: &mut RunContext, scope: &CallScope) -> Result<Flow, PipelineError> {
        let result = self
            .pipeline
            .executor
            .execute(scope, ctx.problem()?, ctx.plan()?, ctx.verdict()?)
            .await;
        ctx.absorb(Stage::Execute, scope);

        match result {
            Ok(trace) => {
                for entry in trace.entries() {
                    ctx.record(Stage::Execute, AuditEventKind::StepExecuted {
                        entry: entry.clone(),
                    });
                }
                ctx.record(Stage::Execute, AuditEventKind::ExecutionCompleted {
                    trace: trace.clone(),
                });
                ctx.trace = Some(trace);
                ctx.verdicts.clear();
                ctx.consensus = None;
                ctx.next = Stage::Verify;
                Ok(Flow::Continue)
            }
            Err(PipelineError::Execution { step_index, reason }) => {
                ctx.record(Stage::Execute, AuditEventKind::ExecutionFailed {
                    step_index,
                    reason: reason.clone(),
                });
                if ctx.counters.replans >= self.config.planning.max_replan_attempts {
                    return Err(PipelineError::Execution { step_index, reason });
                }
                warn!(run_id = %ctx.run_id, step = step_index, reason = %reason, "execution failed, re-planning");
                ctx.counters.replans += 1;
                ctx.plan_feedback = Some(format!("step {} could not be carried out: {reason}", step_index + 1));
                ctx.next = Stage::Plan;
                Ok(Flow::Continue)
            }
            Err(err) => Err(err),
        }
    }

    async fn verify(&self, ctx: &mut RunContext, scope: &CallScope) -> Result<Flow, PipelineError> {
        let input = VerifyInput {
            problem: ctx.problem()?,
            trace: ctx.trace()?,
        };
        let result = self.pipeline.verifiers.run(scope, &input, None).await;
        ctx.absorb(Stage::Verify, scope);
        let verdicts = result?;

        for verdict in &verdicts {
            ctx.record(Stage::Verify, AuditEventKind::VerdictRecorded {
                verdict: verdict.clone(),
            });
        }
        let consensus = consensus::compute(&verdicts, self.pipeline.verifiers.threshold());
        ctx.record(Stage::Verify, AuditEventKind::ConsensusComputed {
            consensus: consensus.clone(),
        });
        ctx.verdicts = verdicts.clone();
        ctx.consensus = Some(consensus.clone());

        let final_answer = ctx.trace()?.final_answer().to_string();
        // The verifiers must have agreed on the answer the trace produced.
        let agrees = consensus.agreed_answer.as_deref() == Some(canonical_answer(&final_answer).as_str());
        info!(
            run_id = %ctx.run_id,
            agreement = consensus.agreement_ratio,
            accepted = consensus.accepted,
            matches_trace = agrees,
            "consensus computed"
        );

        if consensus.accepted && agrees {
            ctx.resolution = Some(Resolution::Consensus);
            ctx.final_answer = Some(final_answer);
            ctx.next = Stage::Explain;
            return Ok(Flow::Continue);
        }

        self.escalate(ctx, Stage::Verify, EscalationPayload::Verification {
            final_answer,
            verdicts,
            consensus,
        })
    }

    async fn explain(&self, ctx: &mut RunContext, scope: &CallScope) -> Result<Flow, PipelineError> {
        let final_answer = ctx
            .final_answer
            .clone()
            .ok_or_else(|| PipelineError::InconsistentState {
                reason: "run has no final answer".into(),
            })?;
        let result = self
            .pipeline
            .explainer
            .explain(scope, ctx.problem()?, ctx.trace()?, ctx.consensus()?, &final_answer)
            .await;
        ctx.absorb(Stage::Explain, scope);

        let explanation = match result {
            Ok(explanation) => explanation,
            Err(ReasonerError::Cancelled) => return Err(PipelineError::Cancelled),
            Err(err) => {
                warn!(run_id = %ctx.run_id, error = %err, "explainer failed, using the raw trace");
                ctx.record(Stage::Explain, AuditEventKind::Degraded {
                    reason: format!("explanation fell back to the raw trace: {err}"),
                });
                Explanation::from_trace(ctx.trace()?, &final_answer)
            }
        };

        ctx.record(Stage::Explain, AuditEventKind::Explained {
            explanation: explanation.clone(),
        });
        ctx.explanation = Some(explanation);
        ctx.record(Stage::Done, AuditEventKind::RunCompleted {
            final_answer: final_answer.clone(),
        });
        ctx.status = RunStatus::Completed;
        ctx.next = Stage::Done;
        info!(run_id = %ctx.run_id, answer = %final_answer, "run completed");
        Ok(Flow::Done)
    }
}

/// Planner-facing summary of why a plan was turned down.
fn rejection_feedback(verdict: &GuardrailVerdict) -> String {
    let findings: Vec<String> = verdict
        .findings
        .iter()
        .filter(|f| verdict.violated_rules.contains(&f.rule))
        .map(|f| match f.step_index {
            Some(i) => format!("{} at step {}: {}", f.rule.as_str(), i + 1, f.detail),
            None => format!("{}: {}", f.rule.as_str(), f.detail),
        })
        .collect();
    if findings.is_empty() {
        format!("rejected by guardrail: {}", verdict.rules_display())
    } else {
        format!("rejected by guardrail: {}", findings.join("; "))
    }
}
