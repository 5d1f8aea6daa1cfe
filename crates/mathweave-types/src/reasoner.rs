//! Request/response shapes for the reasoning capability.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Which pipeline stage is calling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptRole {
    Router,
    Planner,
    Executor,
    Verifier,
    Explainer,
}

impl PromptRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Router => "router",
            Self::Planner => "planner",
            Self::Executor => "executor",
            Self::Verifier => "verifier",
            Self::Explainer => "explainer",
        }
    }
}

impl fmt::Display for PromptRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How much latitude the prompt gives the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptBudget {
    #[default]
    Normal,
    /// Tighter instructions, used on retries and audits.
    Strict,
}

/// A structured call to the reasoner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasonerRequest {
    pub role: PromptRole,
    /// Distinguishes parallel or per-step calls of the same role
    /// (verifier index, step index). Zero otherwise.
    #[serde(default)]
    pub slot: u32,
    #[serde(default)]
    pub framing: Option<String>,
    #[serde(default)]
    pub budget: PromptBudget,
    pub context: serde_json::Value,
}

impl ReasonerRequest {
    pub fn new(role: PromptRole, context: serde_json::Value) -> Self {
        Self {
            role,
            slot: 0,
            framing: None,
            budget: PromptBudget::Normal,
            context,
        }
    }

    pub fn with_slot(mut self, slot: u32) -> Self {
        self.slot = slot;
        self
    }

    pub fn with_framing(mut self, framing: impl Into<String>) -> Self {
        self.framing = Some(framing.into());
        self
    }

    pub fn with_budget(mut self, budget: PromptBudget) -> Self {
        self.budget = budget;
        self
    }
}

/// Raw completion text plus an optional self-reported confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub content: String,
    #[serde(default)]
    pub confidence: Option<f32>,
}

impl Completion {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            confidence: None,
        }
    }
}
