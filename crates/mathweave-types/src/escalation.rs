//! Human-in-the-loop escalation records.
//!
//! A stage that cannot proceed on its own submits a [`HitlRequest`]. The run
//! is suspended until a matching [`HitlResponse`] arrives, the wait times
//! out, or the operator dismisses it.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::plan::{GuardrailVerdict, Plan};
use crate::problem::{AmbiguityFinding, AmbiguityKind};
use crate::run::RunId;
use crate::verification::{ConsensusResult, VerificationVerdict};

/// Stage that raised an escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOrigin {
    Ambiguity,
    Guardrail,
    Verification,
}

impl StageOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ambiguity => "ambiguity",
            Self::Guardrail => "guardrail",
            Self::Verification => "verification",
        }
    }
}

impl fmt::Display for StageOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the human is shown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "origin", rename_all = "snake_case")]
pub enum EscalationPayload {
    Ambiguity {
        statement: String,
        flags: BTreeSet<AmbiguityKind>,
        findings: Vec<AmbiguityFinding>,
    },
    Guardrail {
        plan: Plan,
        verdict: GuardrailVerdict,
    },
    Verification {
        final_answer: String,
        verdicts: Vec<VerificationVerdict>,
        consensus: ConsensusResult,
    },
}

impl EscalationPayload {
    pub fn origin(&self) -> StageOrigin {
        match self {
            Self::Ambiguity { .. } => StageOrigin::Ambiguity,
            Self::Guardrail { .. } => StageOrigin::Guardrail,
            Self::Verification { .. } => StageOrigin::Verification,
        }
    }
}

/// A pending request for human input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HitlRequest {
    pub id: String,
    pub run_id: RunId,
    pub stage_origin: StageOrigin,
    pub payload: EscalationPayload,
    pub awaiting_since: DateTime<Utc>,
    /// One-based position of this escalation within its run.
    pub sequence: u32,
}

impl HitlRequest {
    pub fn new(run_id: RunId, payload: EscalationPayload, sequence: u32, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            run_id,
            stage_origin: payload.origin(),
            payload,
            awaiting_since: now,
            sequence,
        }
    }
}

/// What the human decided.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ResponseAction {
    /// Restate an ambiguous problem.
    Clarify { statement: String },
    /// Accept a guardrail-flagged plan anyway.
    ApproveOverride {
        #[serde(default)]
        note: Option<String>,
    },
    /// Reject the flagged plan and ask for a new one.
    RequestReplan,
    /// Pick the final answer when verifiers disagree.
    SelectAnswer { answer: String },
    /// Run the plan again and re-verify.
    RequestReexecution,
    /// Give up on the run.
    Dismiss,
}

impl ResponseAction {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Clarify { .. } => "clarify",
            Self::ApproveOverride { .. } => "approve_override",
            Self::RequestReplan => "request_replan",
            Self::SelectAnswer { .. } => "select_answer",
            Self::RequestReexecution => "request_reexecution",
            Self::Dismiss => "dismiss",
        }
    }

    /// Whether this action answers an escalation from `origin`.
    pub fn fits(&self, origin: StageOrigin) -> bool {
        matches!(
            (self, origin),
            (Self::Dismiss, _)
                | (Self::Clarify { .. }, StageOrigin::Ambiguity)
                | (Self::ApproveOverride { .. }, StageOrigin::Guardrail)
                | (Self::RequestReplan, StageOrigin::Guardrail)
                | (Self::SelectAnswer { .. }, StageOrigin::Verification)
                | (Self::RequestReexecution, StageOrigin::Verification)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HitlResponse {
    pub action: ResponseAction,
    pub responded_at: DateTime<Utc>,
}

impl HitlResponse {
    pub fn new(action: ResponseAction) -> Self {
        Self {
            action,
            responded_at: Utc::now(),
        }
    }

    pub fn clarify(statement: impl Into<String>) -> Self {
        Self::new(ResponseAction::Clarify {
            statement: statement.into(),
        })
    }

    pub fn approve_override(note: Option<String>) -> Self {
        Self::new(ResponseAction::ApproveOverride { note })
    }

    pub fn request_replan() -> Self {
        Self::new(ResponseAction::RequestReplan)
    }

    pub fn select_answer(answer: impl Into<String>) -> Self {
        Self::new(ResponseAction::SelectAnswer {
            answer: answer.into(),
        })
    }

    pub fn request_reexecution() -> Self {
        Self::new(ResponseAction::RequestReexecution)
    }

    pub fn dismiss() -> Self {
        Self::new(ResponseAction::Dismiss)
    }
}

/// Gateway state for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationState {
    #[default]
    Idle,
    AwaitingResponse,
    Resolved,
    TimedOut,
    Abandoned,
}

impl EscalationState {
    /// Terminal states end the run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::TimedOut | Self::Abandoned)
    }
}
