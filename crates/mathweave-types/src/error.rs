//! Error types for the mathweave pipeline.
//!
//! [`PipelineError`] is the top-level error surfaced to callers of the
//! orchestrator. [`ReasonerError`] describes failures of the reasoning
//! capability, and [`StoreError`] failures of the knowledge store. All are
//! non-exhaustive so new failure modes can be added without breaking
//! downstream matches.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse classification of a [`PipelineError`].
///
/// The class decides how the orchestrator treats the failure: input errors
/// are reported straight back, reasoning errors are retried locally, policy
/// errors go through a human first, escalation errors are always terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Input,
    Reasoning,
    Policy,
    Escalation,
    Infrastructure,
    Caller,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Input => "input",
            Self::Reasoning => "reasoning",
            Self::Policy => "policy",
            Self::Escalation => "escalation",
            Self::Infrastructure => "infrastructure",
            Self::Caller => "caller",
        };
        f.write_str(s)
    }
}

/// Top-level error type for a pipeline run.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum PipelineError {
    // ── Input ────────────────────────────────────────────────────────

    /// The raw input failed the well-formedness check. The caller should
    /// re-submit a cleaner capture.
    #[error("input looks corrupted: {reason}")]
    Corruption {
        /// Which check failed.
        reason: String,
    },

    /// Ambiguity persisted through the allowed number of clarifications.
    #[error("ambiguity unresolved after {escalations} clarification(s): {flags}")]
    UnresolvableAmbiguity {
        /// Human-readable list of the outstanding ambiguity kinds.
        flags: String,
        /// Clarification rounds already spent.
        escalations: u32,
    },

    // ── Reasoning ────────────────────────────────────────────────────

    /// The planner could not produce a usable plan.
    #[error("planning failed: {reason}")]
    PlanningFailure {
        /// Why the last attempt was rejected.
        reason: String,
    },

    /// A plan step could not be carried out.
    #[error("execution failed at step {step_index}: {reason}")]
    Execution {
        /// Zero-based index of the failing step.
        step_index: usize,
        /// What went wrong.
        reason: String,
    },

    // ── Policy ───────────────────────────────────────────────────────

    /// The guardrail kept rejecting plans after the allowed re-plans.
    #[error("plan rejected by guardrail after {replans} re-plan(s): {rules}")]
    GuardrailRejected {
        /// Rules violated by the last plan.
        rules: String,
        /// Re-plan attempts already spent.
        replans: u32,
    },

    /// Verifiers never reached consensus, even after re-execution.
    #[error("verifier consensus failed (agreement {agreement:.3}) after {reexecutions} re-execution(s)")]
    ConsensusFailure {
        /// Agreement ratio of the last ensemble.
        agreement: f64,
        /// Re-execution cycles already spent.
        reexecutions: u32,
    },

    // ── Escalation ───────────────────────────────────────────────────

    /// No human response arrived within the escalation timeout.
    #[error("escalation from {origin} timed out after {waited_ms}ms")]
    EscalationTimeout {
        /// Stage that raised the escalation.
        origin: String,
        /// How long the run had been waiting.
        waited_ms: u64,
    },

    /// A human dismissed the escalation.
    #[error("run abandoned by operator during {origin} escalation")]
    UserAbandoned {
        /// Stage that raised the escalation.
        origin: String,
    },

    /// The per-run escalation cap was reached.
    #[error("too many escalations: cap of {cap} reached")]
    TooManyEscalations {
        /// Configured cap.
        cap: u32,
    },

    // ── Infrastructure ───────────────────────────────────────────────

    /// The reasoning capability could not serve a stage that depends on it.
    #[error("reasoner unavailable for {role}: {reason}")]
    ReasonerUnavailable {
        /// Prompt role of the failed call.
        role: String,
        /// Last error seen.
        reason: String,
    },

    /// Knowledge store failure.
    #[error("knowledge store error: {0}")]
    Store(#[from] StoreError),

    /// Underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization / deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A stored run snapshot lacks an artifact its next stage needs.
    #[error("inconsistent run state: {reason}")]
    InconsistentState {
        /// What is missing.
        reason: String,
    },

    // ── Caller ───────────────────────────────────────────────────────

    /// The run was cancelled by its caller.
    #[error("run cancelled")]
    Cancelled,

    /// No run with this id is known.
    #[error("unknown run: {0}")]
    UnknownRun(String),

    /// A human response did not fit the pending escalation.
    #[error("invalid escalation response: {reason}")]
    InvalidResponse {
        /// Why the response was refused.
        reason: String,
    },

    /// Feedback could not be applied to the run.
    #[error("invalid feedback: {reason}")]
    InvalidFeedback {
        /// Why the feedback was refused.
        reason: String,
    },

    /// Configuration is malformed or semantically invalid.
    #[error("invalid config: {reason}")]
    ConfigInvalid {
        /// What is wrong with the configuration.
        reason: String,
    },
}

impl PipelineError {
    /// Map the error onto the failure taxonomy.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Corruption { .. } | Self::UnresolvableAmbiguity { .. } => ErrorClass::Input,
            Self::PlanningFailure { .. } | Self::Execution { .. } => ErrorClass::Reasoning,
            Self::GuardrailRejected { .. } | Self::ConsensusFailure { .. } => ErrorClass::Policy,
            Self::EscalationTimeout { .. }
            | Self::UserAbandoned { .. }
            | Self::TooManyEscalations { .. } => ErrorClass::Escalation,
            Self::ReasonerUnavailable { .. }
            | Self::Store(_)
            | Self::Io(_)
            | Self::Json(_)
            | Self::InconsistentState { .. } => ErrorClass::Infrastructure,
            Self::Cancelled
            | Self::UnknownRun(_)
            | Self::InvalidResponse { .. }
            | Self::InvalidFeedback { .. }
            | Self::ConfigInvalid { .. } => ErrorClass::Caller,
        }
    }

    /// Short stable identifier, used in audit records.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Corruption { .. } => "corruption",
            Self::UnresolvableAmbiguity { .. } => "unresolvable_ambiguity",
            Self::PlanningFailure { .. } => "planning_failure",
            Self::Execution { .. } => "execution",
            Self::GuardrailRejected { .. } => "guardrail_rejected",
            Self::ConsensusFailure { .. } => "consensus_failure",
            Self::EscalationTimeout { .. } => "escalation_timeout",
            Self::UserAbandoned { .. } => "user_abandoned",
            Self::TooManyEscalations { .. } => "too_many_escalations",
            Self::ReasonerUnavailable { .. } => "reasoner_unavailable",
            Self::Store(_) => "store",
            Self::Io(_) => "io",
            Self::Json(_) => "json",
            Self::InconsistentState { .. } => "inconsistent_state",
            Self::Cancelled => "cancelled",
            Self::UnknownRun(_) => "unknown_run",
            Self::InvalidResponse { .. } => "invalid_response",
            Self::InvalidFeedback { .. } => "invalid_feedback",
            Self::ConfigInvalid { .. } => "config_invalid",
        }
    }
}

/// Failure of a single reasoning call.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
#[non_exhaustive]
pub enum ReasonerError {
    /// Transient unavailability (network, rate limit, 5xx).
    #[error("reasoner unavailable: {0}")]
    Unavailable(String),

    /// The backend refused the call permanently (auth, unknown model).
    #[error("reasoner rejected the request: {0}")]
    Rejected(String),

    /// The per-call deadline elapsed.
    #[error("reasoner call timed out")]
    Timeout,

    /// The completion could not be interpreted.
    #[error("malformed completion: {0}")]
    Malformed(String),

    /// The owning run was cancelled while the call was in flight.
    #[error("reasoner call cancelled")]
    Cancelled,
}

impl ReasonerError {
    /// Whether a retry with backoff may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout)
    }
}

/// Knowledge store failure.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StoreError {
    /// The store did not answer in time.
    #[error("store timed out")]
    Timeout,

    /// A persisted record could not be decoded.
    #[error("corrupt record at line {line}: {reason}")]
    CorruptRecord {
        /// One-based line number in the log.
        line: usize,
        /// Decoder message.
        reason: String,
    },

    /// Underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, PipelineError>;
