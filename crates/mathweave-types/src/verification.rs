//! Verifier verdicts and the consensus derived from them.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Judgment {
    Accept,
    Reject,
    /// No usable judgment (timeout or unreadable output). Counted for audit,
    /// excluded from the agreement denominator.
    Abstain,
}

/// One verifier's judgment of an execution trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationVerdict {
    pub verifier_id: String,
    pub judgment: Judgment,
    #[serde(default)]
    pub claimed_answer: Option<String>,
    pub confidence: f32,
    /// Prompt framing the verifier was given.
    pub framing: String,
    #[serde(default)]
    pub rationale: Option<String>,
}

impl VerificationVerdict {
    pub fn abstain(
        verifier_id: impl Into<String>,
        framing: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            verifier_id: verifier_id.into(),
            judgment: Judgment::Abstain,
            claimed_answer: None,
            confidence: 0.0,
            framing: framing.into(),
            rationale: Some(reason.into()),
        }
    }
}

/// Vote tally over a set of verdicts. Always recomputed, never stored on its
/// own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusResult {
    pub accepted: bool,
    #[serde(default)]
    pub agreed_answer: Option<String>,
    pub agreement_ratio: f64,
    pub dissent: BTreeSet<String>,
    #[serde(default)]
    pub abstentions: BTreeSet<String>,
    /// Majority judgment among non-abstaining verdicts; `None` on a tie.
    #[serde(default)]
    pub plurality_judgment: Option<Judgment>,
}
