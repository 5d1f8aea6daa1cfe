//! Run identity, the stage-by-stage audit trail, and final output.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ErrorClass, ReasonerError};
use crate::escalation::{EscalationState, HitlRequest, ResponseAction, StageOrigin};
use crate::execution::{ExecutionTrace, TraceEntry};
use crate::explanation::Explanation;
use crate::feedback::FeedbackRecord;
use crate::plan::{GuardrailVerdict, Plan};
use crate::problem::{AmbiguityKind, Problem, RouteDecision};
use crate::reasoner::PromptRole;
use crate::verification::{ConsensusResult, VerificationVerdict};

// ── Identity ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RunId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for RunId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Pipeline stages, in data-flow order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Parse,
    DetectAmbiguity,
    Route,
    Retrieve,
    Plan,
    Guardrail,
    Execute,
    Verify,
    Explain,
    Escalation,
    Feedback,
    Done,
}

// ── Audit trail ─────────────────────────────────────────────────────────

/// Outcome of one reasoner attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExchangeOutcome {
    Completed {
        content: String,
        #[serde(default)]
        confidence: Option<f32>,
    },
    Failed {
        error: ReasonerError,
    },
}

/// One reasoner attempt, recorded so the run can be replayed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasonerExchange {
    pub role: PromptRole,
    pub slot: u32,
    /// Zero-based attempt number within one logical call.
    pub attempt: u32,
    pub outcome: ExchangeOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEventKind {
    RunStarted {
        raw_text: String,
        #[serde(default)]
        linked_from: Option<RunId>,
    },
    ProblemParsed {
        problem: Problem,
    },
    AmbiguityChecked {
        flags: BTreeSet<AmbiguityKind>,
    },
    Routed {
        decision: RouteDecision,
    },
    Retrieved {
        entry_ids: Vec<String>,
        degraded: bool,
    },
    PlanProposed {
        plan: Plan,
    },
    GuardrailEvaluated {
        verdict: GuardrailVerdict,
    },
    StepExecuted {
        entry: TraceEntry,
    },
    ExecutionCompleted {
        trace: ExecutionTrace,
    },
    ExecutionFailed {
        step_index: usize,
        reason: String,
    },
    VerdictRecorded {
        verdict: VerificationVerdict,
    },
    ConsensusComputed {
        consensus: ConsensusResult,
    },
    Explained {
        explanation: Explanation,
    },
    Degraded {
        reason: String,
    },
    ReasonerExchange {
        exchange: ReasonerExchange,
    },
    EscalationRaised {
        request: HitlRequest,
    },
    EscalationResolved {
        request_id: String,
        action: ResponseAction,
    },
    EscalationClosed {
        request_id: String,
        origin: StageOrigin,
        state: EscalationState,
    },
    FeedbackReceived {
        record: FeedbackRecord,
    },
    KnowledgeWritten {
        entry_id: String,
        created: bool,
    },
    RunCompleted {
        final_answer: String,
    },
    RunFailed {
        code: String,
        class: ErrorClass,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub seq: u64,
    pub at: DateTime<Utc>,
    pub stage: Stage,
    #[serde(flatten)]
    pub kind: AuditEventKind,
}

/// Full stage-by-stage record of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditTrail {
    pub run_id: RunId,
    pub events: Vec<AuditEvent>,
}

impl AuditTrail {
    pub fn new(run_id: RunId) -> Self {
        Self {
            run_id,
            events: Vec::new(),
        }
    }

    pub fn record(&mut self, stage: Stage, kind: AuditEventKind) {
        let seq = self.events.len() as u64;
        self.events.push(AuditEvent {
            seq,
            at: Utc::now(),
            stage,
            kind,
        });
    }

    /// Every reasoner exchange, in the order it happened.
    pub fn exchanges(&self) -> impl Iterator<Item = &ReasonerExchange> {
        self.events.iter().filter_map(|e| match &e.kind {
            AuditEventKind::ReasonerExchange { exchange } => Some(exchange),
            _ => None,
        })
    }

    pub fn escalation_count(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e.kind, AuditEventKind::EscalationRaised { .. }))
            .count()
    }
}

// ── Final output ────────────────────────────────────────────────────────

/// How the final answer was settled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "by", rename_all = "snake_case")]
pub enum Resolution {
    /// Verifier consensus met the threshold.
    Consensus,
    /// A human picked the answer after the verifiers disagreed.
    HumanSelected { answer: String },
}

/// What a completed run hands back to its caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalOutput {
    pub run_id: RunId,
    pub problem: Problem,
    pub route: RouteDecision,
    pub explanation: Explanation,
    pub consensus: ConsensusResult,
    pub resolution: Resolution,
    pub trace: ExecutionTrace,
    pub final_answer: String,
    pub audit: AuditTrail,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_assigns_sequential_ids() {
        let mut trail = AuditTrail::new(RunId::from("r1"));
        trail.record(Stage::Parse, AuditEventKind::RunStarted {
            raw_text: "1+1".into(),
            linked_from: None,
        });
        trail.record(Stage::Route, AuditEventKind::Degraded {
            reason: "keyword fallback".into(),
        });
        assert_eq!(trail.events[0].seq, 0);
        assert_eq!(trail.events[1].seq, 1);
    }

    #[test]
    fn event_serializes_flat() {
        let mut trail = AuditTrail::new(RunId::from("r1"));
        trail.record(Stage::Execute, AuditEventKind::ExecutionFailed {
            step_index: 2,
            reason: "empty".into(),
        });
        let json = serde_json::to_value(&trail.events[0]).unwrap();
        assert_eq!(json["event"], "execution_failed");
        assert_eq!(json["stage"], "execute");
        assert_eq!(json["step_index"], 2);
        let back: AuditEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, trail.events[0]);
    }

    #[test]
    fn exchanges_are_filtered_in_order() {
        let mut trail = AuditTrail::new(RunId::new());
        for attempt in 0..2 {
            trail.record(Stage::Plan, AuditEventKind::ReasonerExchange {
                exchange: ReasonerExchange {
                    role: PromptRole::Planner,
                    slot: 0,
                    attempt,
                    outcome: ExchangeOutcome::Failed {
                        error: ReasonerError::Timeout,
                    },
                },
            });
        }
        let attempts: Vec<u32> = trail.exchanges().map(|e| e.attempt).collect();
        assert_eq!(attempts, vec![0, 1]);
    }
}
