//! Scripted reasoner for tests and deterministic replay.
//!
//! Replies are queued per `(role, slot)`, with a per-role queue used when no
//! slot-specific queue has anything left. Each call pops the front of its
//! queue; the last reply stays in place and is repeated for any further call.
//! [`ScriptedReasoner::from_trail`] rebuilds the queues from a recorded audit
//! trail so a run can be driven again with exactly the reasoner outputs it saw.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use mathweave_types::ReasonerError;
use mathweave_types::reasoner::{Completion, PromptRole, ReasonerRequest};
use mathweave_types::run::{AuditTrail, ExchangeOutcome};

use crate::reasoner::Reasoner;

type ScriptKey = (PromptRole, Option<u32>);

#[derive(Debug, Clone)]
enum ScriptedReply {
    Complete(Completion),
    Fail(ReasonerError),
}

#[derive(Default)]
pub struct ScriptedReasoner {
    scripts: Mutex<HashMap<ScriptKey, VecDeque<ScriptedReply>>>,
    delays: HashMap<ScriptKey, Duration>,
    calls: Mutex<Vec<ReasonerRequest>>,
}

impl ScriptedReasoner {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(mut self, key: ScriptKey, reply: ScriptedReply) -> Self {
        if let Ok(scripts) = self.scripts.get_mut() {
            scripts.entry(key).or_default().push_back(reply);
        }
        self
    }

    /// Queue a completion for every call of `role` without a slot-specific script.
    pub fn reply(self, role: PromptRole, content: impl Into<String>) -> Self {
        self.push((role, None), ScriptedReply::Complete(Completion::new(content)))
    }

    /// Queue a completion for one slot of `role`.
    pub fn reply_slot(self, role: PromptRole, slot: u32, content: impl Into<String>) -> Self {
        self.push((role, Some(slot)), ScriptedReply::Complete(Completion::new(content)))
    }

    /// Queue a failure.
    pub fn fail(self, role: PromptRole, slot: Option<u32>, error: ReasonerError) -> Self {
        self.push((role, slot), ScriptedReply::Fail(error))
    }

    /// Delay every reply for `(role, slot)`.
    pub fn delay(mut self, role: PromptRole, slot: Option<u32>, delay: Duration) -> Self {
        self.delays.insert((role, slot), delay);
        self
    }

    /// Rebuild the reasoner outputs of a recorded run.
    pub fn from_trail(trail: &AuditTrail) -> Self {
        trail.exchanges().fold(Self::new(), |scripted, exchange| {
            let reply = match &exchange.outcome {
                ExchangeOutcome::Completed {
                    content,
                    confidence,
                } => ScriptedReply::Complete(Completion {
                    content: content.clone(),
                    confidence: *confidence,
                }),
                ExchangeOutcome::Failed { error } => ScriptedReply::Fail(error.clone()),
            };
            scripted.push((exchange.role, Some(exchange.slot)), reply)
        })
    }

    /// Every request received, in arrival order.
    pub fn calls(&self) -> Vec<ReasonerRequest> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn calls_for(&self, role: PromptRole) -> usize {
        self.calls
            .lock()
            .map(|c| c.iter().filter(|r| r.role == role).count())
            .unwrap_or(0)
    }

    fn next_reply(&self, role: PromptRole, slot: u32) -> Option<ScriptedReply> {
        let mut scripts = self.scripts.lock().ok()?;
        for key in [(role, Some(slot)), (role, None)] {
            if let Some(queue) = scripts.get_mut(&key) {
                let reply = if queue.len() > 1 {
                    queue.pop_front()
                } else {
                    queue.front().cloned()
                };
                if reply.is_some() {
                    return reply;
                }
            }
        }
        None
    }
}

#[async_trait]
impl Reasoner for ScriptedReasoner {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn invoke(&self, request: &ReasonerRequest) -> Result<Completion, ReasonerError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(request.clone());
        }

        let delay = self
            .delays
            .get(&(request.role, Some(request.slot)))
            .or_else(|| self.delays.get(&(request.role, None)))
            .copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        match self.next_reply(request.role, request.slot) {
            Some(ScriptedReply::Complete(c)) => Ok(c),
            Some(ScriptedReply::Fail(e)) => Err(e),
            None => Err(ReasonerError::Unavailable(format!(
                "no scripted reply for {} slot {}",
                request.role, request.slot
            ))),
        }
    }
}
