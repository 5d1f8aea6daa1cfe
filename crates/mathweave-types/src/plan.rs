//! Solution plans and guardrail verdicts.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One step of a solution plan, as proposed by the planner.
///
/// Only `operation` is required; the structured fields help the guardrail
/// reason about the step without re-reading prose.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    /// What the step does, e.g. `factor`, `divide`, `differentiate`.
    pub operation: String,

    /// The expression or relation the step produces or acts on.
    #[serde(default)]
    pub expression: Option<String>,

    /// Divisor, for steps that divide or cancel.
    #[serde(default)]
    pub divisor: Option<String>,

    /// Variable or expression being solved for.
    #[serde(default)]
    pub target: Option<String>,

    #[serde(default)]
    pub justification: String,

    /// Constraints this step relies on or establishes, e.g. `x != 0`.
    #[serde(default, alias = "constraints")]
    pub expected_domain_constraints: BTreeSet<String>,
}

impl PlanStep {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            expression: None,
            divisor: None,
            target: None,
            justification: String::new(),
            expected_domain_constraints: BTreeSet::new(),
        }
    }

    pub fn with_expression(mut self, expression: impl Into<String>) -> Self {
        self.expression = Some(expression.into());
        self
    }

    pub fn with_divisor(mut self, divisor: impl Into<String>) -> Self {
        self.divisor = Some(divisor.into());
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_justification(mut self, justification: impl Into<String>) -> Self {
        self.justification = justification.into();
        self
    }

    pub fn with_constraint(mut self, constraint: impl Into<String>) -> Self {
        self.expected_domain_constraints.insert(constraint.into());
        self
    }

    /// Normalized operation key: lowercase, words joined by `_`.
    pub fn operation_key(&self) -> String {
        normalize_operation(&self.operation)
    }
}

/// Normalize an operation name so `Divide Both-Sides` and `divide_both_sides`
/// compare equal.
pub fn normalize_operation(op: &str) -> String {
    op.trim()
        .to_lowercase()
        .split(|c: char| c.is_whitespace() || c == '-' || c == '_')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

/// An ordered solution plan.
///
/// A plan is never edited after the guardrail sees it. Re-planning produces
/// a new plan whose `supersedes` names the one it replaces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub revision: u32,
    #[serde(default)]
    pub supersedes: Option<String>,
    pub steps: Vec<PlanStep>,
}

impl Plan {
    pub fn new(steps: Vec<PlanStep>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            revision: 0,
            supersedes: None,
            steps,
        }
    }

    /// Build the plan that replaces `previous`.
    pub fn superseding(previous: &Plan, steps: Vec<PlanStep>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            revision: previous.revision + 1,
            supersedes: Some(previous.id.clone()),
            steps,
        }
    }
}

// ── Guardrail ───────────────────────────────────────────────────────────

/// Identifier of a guardrail rule, e.g. `illegal-division`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleId(pub String);

impl RuleId {
    pub const DEGREE_EXPLOSION: &'static str = "degree-explosion";
    pub const ILLEGAL_DIVISION: &'static str = "illegal-division";
    pub const OPERATION_OUTSIDE_CATEGORY: &'static str = "operation-outside-category";
    pub const COMPOSITE_TARGET: &'static str = "composite-target";
    pub const APPROXIMATE_ARITHMETIC: &'static str = "approximate-arithmetic";
    pub const MANUAL_LARGE_ARITHMETIC: &'static str = "manual-large-arithmetic";

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RuleId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Reported; blocks only under strict evaluation.
    Soft,
    /// Always blocks execution.
    Hard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardrailStatus {
    Safe,
    Unsafe,
}

/// A single rule violation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleFinding {
    pub rule: RuleId,
    pub severity: Severity,
    /// Offending step, when the finding is tied to one.
    #[serde(default)]
    pub step_index: Option<usize>,
    pub detail: String,
}

/// Record of a human waiving guardrail rules for a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverrideRecord {
    pub waived_rules: BTreeSet<RuleId>,
    pub approved_at: DateTime<Utc>,
    #[serde(default)]
    pub note: Option<String>,
}

/// The guardrail's judgment of one plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardrailVerdict {
    pub plan_id: String,
    pub status: GuardrailStatus,
    pub violated_rules: BTreeSet<RuleId>,
    /// Highest severity among the findings, if any.
    #[serde(default)]
    pub severity: Option<Severity>,
    #[serde(default)]
    pub findings: Vec<RuleFinding>,
    #[serde(default)]
    pub override_record: Option<OverrideRecord>,
}

impl GuardrailVerdict {
    pub fn is_safe(&self) -> bool {
        self.status == GuardrailStatus::Safe
    }

    /// Verdict after a human approves an override: the same plan, marked
    /// safe, with the waived rules on record.
    pub fn overridden(&self, note: Option<String>) -> Self {
        Self {
            status: GuardrailStatus::Safe,
            override_record: Some(OverrideRecord {
                waived_rules: self.violated_rules.clone(),
                approved_at: Utc::now(),
                note,
            }),
            ..self.clone()
        }
    }

    /// Comma-separated rule ids, for messages.
    pub fn rules_display(&self) -> String {
        self.violated_rules
            .iter()
            .map(RuleId::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_operation_variants() {
        assert_eq!(normalize_operation("Divide Both-Sides"), "divide_both_sides");
        assert_eq!(normalize_operation("  factor "), "factor");
        assert_eq!(normalize_operation("use__calculator"), "use_calculator");
    }

    #[test]
    fn plan_step_accepts_constraints_alias() {
        let json = r#"{"operation": "divide", "divisor": "x", "constraints": ["x != 0"]}"#;
        let step: PlanStep = serde_json::from_str(json).unwrap();
        assert_eq!(step.divisor.as_deref(), Some("x"));
        assert!(step.expected_domain_constraints.contains("x != 0"));
        assert!(step.justification.is_empty());
    }

    #[test]
    fn superseding_plan_links_back() {
        let first = Plan::new(vec![PlanStep::new("divide").with_divisor("x")]);
        let second = Plan::superseding(&first, vec![PlanStep::new("factor")]);
        assert_eq!(second.revision, 1);
        assert_eq!(second.supersedes.as_deref(), Some(first.id.as_str()));
        assert_eq!(first.steps[0].operation, "divide");
    }

    #[test]
    fn override_marks_safe_and_records_rules() {
        let verdict = GuardrailVerdict {
            plan_id: "p1".into(),
            status: GuardrailStatus::Unsafe,
            violated_rules: BTreeSet::from([RuleId::from(RuleId::ILLEGAL_DIVISION)]),
            severity: Some(Severity::Hard),
            findings: vec![],
            override_record: None,
        };
        let approved = verdict.overridden(Some("x is a length".into()));
        assert!(approved.is_safe());
        let record = approved.override_record.unwrap();
        assert!(record.waived_rules.contains(&RuleId::from(RuleId::ILLEGAL_DIVISION)));
        assert_eq!(record.note.as_deref(), Some("x is a length"));
        assert_eq!(approved.plan_id, "p1");
    }

    #[test]
    fn severity_orders_hard_above_soft() {
        assert!(Severity::Hard > Severity::Soft);
    }
}
