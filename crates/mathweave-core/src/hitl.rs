//! The human-in-the-loop gateway of a single run.
//!
//! [`EscalationLedger`] is the escalation state machine
//! (`Idle -> AwaitingResponse -> {Resolved, TimedOut, Abandoned}`) plus the
//! per-run escalation counter. It is plain data owned by the run context and
//! persisted with it, so a suspended run keeps its pending request and its
//! count across processes.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use mathweave_types::PipelineError;
use mathweave_types::escalation::{
    EscalationPayload, EscalationState, HitlRequest, HitlResponse, ResponseAction,
};
use mathweave_types::run::RunId;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EscalationLedger {
    state: EscalationState,
    #[serde(default)]
    pending: Option<HitlRequest>,
    /// Escalations raised so far in this run, across every stage.
    #[serde(default)]
    raised: u32,
}

impl EscalationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> EscalationState {
        self.state
    }

    pub fn pending(&self) -> Option<&HitlRequest> {
        self.pending.as_ref()
    }

    pub fn raised(&self) -> u32 {
        self.raised
    }

    /// Raise an escalation. Refused with
    /// [`PipelineError::TooManyEscalations`] once `cap` escalations have been
    /// raised; the refused escalation is not counted.
    pub fn submit(
        &mut self,
        run_id: RunId,
        payload: EscalationPayload,
        cap: u32,
        now: DateTime<Utc>,
    ) -> Result<&HitlRequest, PipelineError> {
        if self.state == EscalationState::AwaitingResponse {
            return Err(PipelineError::InvalidResponse {
                reason: "an escalation is already pending for this run".into(),
            });
        }
        if self.state.is_terminal() {
            return Err(PipelineError::InvalidResponse {
                reason: format!("escalation gateway is closed ({:?})", self.state),
            });
        }
        if self.raised >= cap {
            return Err(PipelineError::TooManyEscalations { cap });
        }

        self.raised += 1;
        self.state = EscalationState::AwaitingResponse;
        let request = HitlRequest::new(run_id, payload, self.raised, now);
        info!(
            run_id = %request.run_id,
            origin = %request.stage_origin,
            sequence = request.sequence,
            cap,
            "escalation raised"
        );
        Ok(self.pending.insert(request))
    }

    /// Close the pending escalation with a human response. A response that
    /// does not fit the escalation is refused and the request stays pending.
    /// A dismissal closes the gateway as abandoned.
    pub fn resolve(&mut self, response: &HitlResponse) -> Result<HitlRequest, PipelineError> {
        let Some(pending) = self.pending.as_ref() else {
            return Err(PipelineError::InvalidResponse {
                reason: "no escalation is pending".into(),
            });
        };
        if !response.action.fits(pending.stage_origin) {
            return Err(PipelineError::InvalidResponse {
                reason: format!(
                    "'{}' does not answer a {} escalation",
                    response.action.name(),
                    pending.stage_origin
                ),
            });
        }

        let state = match response.action {
            ResponseAction::Dismiss => EscalationState::Abandoned,
            _ => EscalationState::Resolved,
        };
        let request = self.close(state)?;
        debug!(request_id = %request.id, action = response.action.name(), state = ?self.state, "escalation closed");
        Ok(request)
    }

    /// The wait elapsed without a response.
    pub fn time_out(&mut self) -> Result<HitlRequest, PipelineError> {
        self.close(EscalationState::TimedOut)
    }

    /// The run was cancelled while waiting.
    pub fn abandon(&mut self) -> Result<HitlRequest, PipelineError> {
        self.close(EscalationState::Abandoned)
    }

    fn close(&mut self, state: EscalationState) -> Result<HitlRequest, PipelineError> {
        let request = self.pending.take().ok_or_else(|| PipelineError::InvalidResponse {
            reason: "no escalation is pending".into(),
        })?;
        self.state = state;
        Ok(request)
    }

    /// How long the pending escalation has been waiting.
    pub fn waited(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.pending
            .as_ref()
            .map(|p| (now - p.awaiting_since).to_std().unwrap_or_default())
    }

    pub fn is_expired(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        self.waited(now).is_some_and(|w| w >= timeout)
    }
}
