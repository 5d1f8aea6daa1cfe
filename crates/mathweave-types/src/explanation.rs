//! Human-readable explanation of an accepted solution.

use serde::{Deserialize, Serialize};

use crate::execution::ExecutionTrace;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Explanation {
    /// Plan whose trace this explains.
    pub plan_id: String,
    pub steps: Vec<String>,
    pub final_answer: String,
    /// Set when the explainer failed and the raw trace was used instead.
    #[serde(default)]
    pub degraded: bool,
}

impl Explanation {
    /// Minimal explanation built straight from the trace.
    pub fn from_trace(trace: &ExecutionTrace, final_answer: &str) -> Self {
        let steps = trace
            .entries()
            .iter()
            .map(|e| format!("{}: {}", e.operation_applied, e.intermediate_result))
            .collect();
        Self {
            plan_id: trace.plan_id().to_string(),
            steps,
            final_answer: final_answer.to_string(),
            degraded: true,
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for (i, step) in self.steps.iter().enumerate() {
            out.push_str(&format!("{}. {}\n", i + 1, step));
        }
        out.push_str(&format!("Answer: {}", self.final_answer));
        out
    }
}
