//! Execution traces.

use serde::{Deserialize, Serialize};

/// What produced a step's result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepBackend {
    Reasoner,
    Calculator,
}

/// The outcome of applying one plan step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEntry {
    pub step_index: usize,
    pub operation_applied: String,
    pub intermediate_result: String,
    pub backend: StepBackend,
}

/// Append-only builder used while a plan is executing.
#[derive(Debug, Clone)]
pub struct TraceBuilder {
    plan_id: String,
    entries: Vec<TraceEntry>,
}

impl TraceBuilder {
    pub fn new(plan_id: impl Into<String>) -> Self {
        Self {
            plan_id: plan_id.into(),
            entries: Vec::new(),
        }
    }

    pub fn push(&mut self, entry: TraceEntry) {
        self.entries.push(entry);
    }

    /// Results so far, in step order.
    pub fn entries(&self) -> &[TraceEntry] {
        &self.entries
    }

    /// Seal the trace. The builder is consumed, so nothing can be appended
    /// afterwards.
    pub fn finish(self, final_answer: impl Into<String>) -> ExecutionTrace {
        ExecutionTrace {
            plan_id: self.plan_id,
            entries: self.entries,
            final_answer: final_answer.into(),
        }
    }
}

/// The completed, immutable record of executing a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionTrace {
    plan_id: String,
    entries: Vec<TraceEntry>,
    final_answer: String,
}

impl ExecutionTrace {
    pub fn plan_id(&self) -> &str {
        &self.plan_id
    }

    pub fn entries(&self) -> &[TraceEntry] {
        &self.entries
    }

    pub fn final_answer(&self) -> &str {
        &self.final_answer
    }

    /// Deterministic text rendering, used for prompts and knowledge entries.
    pub fn render(&self) -> String {
        self.render_concluding(&self.final_answer)
    }

    /// The step lines of [`render`](Self::render) closed by `answer` instead
    /// of the executor's own answer.
    pub fn render_concluding(&self, answer: &str) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            out.push_str(&format!(
                "{}. {}: {}\n",
                entry.step_index + 1,
                entry.operation_applied,
                entry.intermediate_result
            ));
        }
        out.push_str(&format!("Final answer: {answer}"));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(i: usize, op: &str, result: &str) -> TraceEntry {
        TraceEntry {
            step_index: i,
            operation_applied: op.into(),
            intermediate_result: result.into(),
            backend: StepBackend::Reasoner,
        }
    }

    #[test]
    fn builder_keeps_order_and_seals() {
        let mut builder = TraceBuilder::new("plan-1");
        builder.push(entry(0, "factor", "(x - 2)(x - 3) = 0"));
        builder.push(entry(1, "solve", "x = 2, x = 3"));
        assert_eq!(builder.entries().len(), 2);

        let trace = builder.finish("x = 2, x = 3");
        assert_eq!(trace.plan_id(), "plan-1");
        assert_eq!(trace.entries()[0].operation_applied, "factor");
        assert_eq!(trace.final_answer(), "x = 2, x = 3");
    }

    #[test]
    fn render_is_numbered() {
        let mut builder = TraceBuilder::new("p");
        builder.push(entry(0, "evaluate", "42"));
        let rendered = builder.finish("42").render();
        assert_eq!(rendered, "1. evaluate: 42\nFinal answer: 42");
    }
}
