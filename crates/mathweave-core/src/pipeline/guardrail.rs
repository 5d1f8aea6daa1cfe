//! Deterministic plan vetting.
//!
//! The engine runs every enabled [`RuleSpec`] that applies to the routed
//! category over the plan. Rules are data; this module only knows how to run
//! the fixed set of [`RuleCheck`] detectors.
//!
//! Hard findings always make the verdict unsafe. Soft findings are reported,
//! and block only when routing was low-confidence and
//! `strict_on_low_confidence` is set.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info};

use mathweave_types::config::{GuardrailConfig, RuleCheck, RuleSpec};
use mathweave_types::plan::{
    GuardrailStatus, GuardrailVerdict, Plan, PlanStep, RuleFinding, RuleId, Severity,
    normalize_operation,
};
use mathweave_types::problem::{Category, Problem, RouteDecision};

use crate::expression::{self, Expr, RelOp};

/// Steps whose expression states a fact rather than transforming one.
const STATING_OPERATIONS: &[&str] = &["state_domain", "state_given", "check", "identify"];

#[derive(Debug, Clone)]
pub struct GuardrailEngine {
    config: GuardrailConfig,
}

impl GuardrailEngine {
    pub fn new(config: GuardrailConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GuardrailConfig {
        &self.config
    }

    /// Operations the plan may use under `category`; `None` when unrestricted.
    pub fn allowed_operations(&self, category: Category) -> Option<Vec<String>> {
        allowed_operations(&self.config.rules, category)
    }

    pub fn evaluate(&self, problem: &Problem, plan: &Plan, route: &RouteDecision) -> GuardrailVerdict {
        let category = route.effective_category();
        let strict = self.config.strict_on_low_confidence && route.low_confidence;

        let mut findings = Vec::new();
        for rule in self.config.rules.iter().filter(|r| r.applies_to(category)) {
            for (step_index, detail) in run_check(rule, problem, plan, category) {
                findings.push(RuleFinding {
                    rule: rule.id.clone(),
                    severity: rule.severity,
                    step_index,
                    detail,
                });
            }
        }

        let blocking = |f: &RuleFinding| f.severity == Severity::Hard || strict;
        let violated_rules: BTreeSet<RuleId> = findings
            .iter()
            .filter(|f| blocking(f))
            .map(|f| f.rule.clone())
            .collect();
        let status = if violated_rules.is_empty() {
            GuardrailStatus::Safe
        } else {
            GuardrailStatus::Unsafe
        };
        let severity = findings.iter().map(|f| f.severity).max();

        let verdict = GuardrailVerdict {
            plan_id: plan.id.clone(),
            status,
            violated_rules,
            severity,
            findings,
            override_record: None,
        };
        if verdict.is_safe() {
            debug!(plan_id = %plan.id, advisories = verdict.findings.len(), strict, "plan passed guardrail");
        } else {
            info!(plan_id = %plan.id, rules = %verdict.rules_display(), strict, "plan rejected by guardrail");
        }
        verdict
    }
}

/// Union of the universal and per-category operations of the first
/// applicable allowlist rule.
pub fn allowed_operations(rules: &[RuleSpec], category: Category) -> Option<Vec<String>> {
    rules
        .iter()
        .filter(|r| r.applies_to(category))
        .find_map(|r| match &r.check {
            RuleCheck::OperationAllowlist { universal, allowed } => {
                allowed.get(&category).map(|ops| {
                    let set: BTreeSet<String> = universal
                        .iter()
                        .chain(ops)
                        .map(|op| normalize_operation(op))
                        .collect();
                    set.into_iter().collect()
                })
            }
            _ => None,
        })
}

type Findings = Vec<(Option<usize>, String)>;

fn run_check(rule: &RuleSpec, problem: &Problem, plan: &Plan, category: Category) -> Findings {
    match &rule.check {
        RuleCheck::DegreeExplosion {
            min_scope_degree,
            slack,
        } => degree_explosion(problem, plan, *min_scope_degree, *slack),
        RuleCheck::IllegalDivision {
            dividing_operations,
        } => illegal_division(problem, plan, dividing_operations),
        RuleCheck::OperationAllowlist { universal, allowed } => {
            operation_allowlist(plan, category, universal, allowed)
        }
        RuleCheck::CompositeTarget { operations } => composite_target(plan, operations),
        RuleCheck::ForbiddenTerms { terms } => forbidden_terms(plan, terms),
        RuleCheck::LargeNumberDelegation {
            min_digits,
            delegated,
            manual,
        } => large_number_delegation(problem, plan, *min_digits, delegated, manual),
    }
}

fn op_set(ops: &[String]) -> BTreeSet<String> {
    ops.iter().map(|op| normalize_operation(op)).collect()
}

// ── Degree explosion ────────────────────────────────────────────────────

fn degree_explosion(problem: &Problem, plan: &Plan, min_scope: u32, slack: u32) -> Findings {
    let scope = expression::statement_degree(problem.normalized_statement())
        .max(min_scope)
        .saturating_add(slack);

    let mut out = Vec::new();
    for (i, step) in plan.steps.iter().enumerate() {
        let Some(text) = step.expression.as_deref() else {
            continue;
        };
        let worst = expression::parse_alternatives(text)
            .iter()
            .filter_map(|r| r.degree())
            .max();
        if let Some(degree) = worst
            && degree > scope
        {
            out.push((
                Some(i),
                format!("step reaches degree {degree} but the problem scope allows {scope}"),
            ));
        }
    }
    out
}

// ── Illegal division ────────────────────────────────────────────────────

static SIGN_FACT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(.+?)\s+(?:is\s+)?(?:nonzero|non-zero|not\s+zero|positive|negative)$")
        .expect("static pattern")
});

/// Constraints a division may rely on: the problem's given constraints and
/// whatever earlier steps stated.
struct Facts {
    texts: Vec<String>,
}

impl Facts {
    fn new(problem: &Problem) -> Self {
        Self {
            texts: problem.given_constraints().to_vec(),
        }
    }

    fn absorb(&mut self, step: &PlanStep) {
        self.texts.extend(step.expected_domain_constraints.iter().cloned());
        if STATING_OPERATIONS.contains(&step.operation_key().as_str())
            && let Some(expr) = &step.expression
        {
            self.texts.push(expr.clone());
        }
    }

    fn establishes_nonzero(&self, factor: &Expr) -> bool {
        let target = factor.canonical();
        self.texts.iter().any(|text| {
            expression::split_alternatives(text)
                .into_iter()
                .any(|part| fact_excludes_zero(part, &target))
        })
    }
}

fn fact_excludes_zero(fact: &str, target: &str) -> bool {
    if let Some(cap) = SIGN_FACT.captures(fact.trim()) {
        return expression::parse_expr(&cap[1]).is_ok_and(|e| e.canonical() == target);
    }
    let Ok(relation) = expression::parse_relation(fact) else {
        return false;
    };
    relation
        .sides
        .windows(2)
        .zip(&relation.ops)
        .any(|(pair, op)| {
            let (lhs, rhs) = (&pair[0], &pair[1]);
            if lhs.canonical() == target {
                bound_excludes_zero(*op, rhs)
            } else if rhs.canonical() == target {
                bound_excludes_zero(mirror(*op), lhs)
            } else {
                false
            }
        })
}

/// Whether `x <op> bound` rules out `x = 0`.
fn bound_excludes_zero(op: RelOp, bound: &Expr) -> bool {
    let Some(c) = bound.constant_value() else {
        return false;
    };
    match op {
        RelOp::Ne => c == 0.0,
        RelOp::Gt => c >= 0.0,
        RelOp::Ge => c > 0.0,
        RelOp::Lt => c <= 0.0,
        RelOp::Le => c < 0.0,
        RelOp::Eq => c != 0.0,
    }
}

fn mirror(op: RelOp) -> RelOp {
    match op {
        RelOp::Lt => RelOp::Gt,
        RelOp::Le => RelOp::Ge,
        RelOp::Gt => RelOp::Lt,
        RelOp::Ge => RelOp::Le,
        other => other,
    }
}

fn illegal_division(problem: &Problem, plan: &Plan, dividing_operations: &[String]) -> Findings {
    let dividing = op_set(dividing_operations);
    let mut facts = Facts::new(problem);
    let mut out = Vec::new();

    for (i, step) in plan.steps.iter().enumerate() {
        let mut divisors: Vec<Expr> = Vec::new();
        let mut unreadable: Option<String> = None;

        if let Some(text) = step.divisor.as_deref().filter(|t| !t.trim().is_empty()) {
            match expression::parse_expr(text) {
                Ok(expr) => divisors.push(expr),
                Err(_) => unreadable = Some(text.to_string()),
            }
        }
        if let Some(text) = step.expression.as_deref() {
            for relation in expression::parse_alternatives(text) {
                for side in &relation.sides {
                    divisors.extend(side.denominators().into_iter().cloned());
                }
            }
        }

        if let Some(text) = unreadable {
            out.push((Some(i), format!("divisor '{text}' cannot be shown nonzero")));
        } else if divisors.is_empty() && dividing.contains(&step.operation_key()) {
            out.push((
                Some(i),
                format!("'{}' divides without naming its divisor", step.operation),
            ));
        }

        for divisor in &divisors {
            if divisor.is_zero() {
                out.push((Some(i), format!("divides by zero ('{divisor}')")));
                continue;
            }
            let unproven: Vec<String> = divisor
                .factors()
                .into_iter()
                .filter(|f| f.has_variables() && !facts.establishes_nonzero(f))
                .map(|f| f.to_string())
                .collect();
            if !unproven.is_empty() {
                out.push((
                    Some(i),
                    format!(
                        "divides by '{divisor}' without establishing {} != 0",
                        unproven.join(", ")
                    ),
                ));
            }
        }

        facts.absorb(step);
    }
    out
}

// ── Operation allowlist ─────────────────────────────────────────────────

fn operation_allowlist(
    plan: &Plan,
    category: Category,
    universal: &[String],
    allowed: &BTreeMap<Category, Vec<String>>,
) -> Findings {
    let Some(category_ops) = allowed.get(&category) else {
        return Vec::new();
    };
    let mut permitted = op_set(universal);
    permitted.extend(op_set(category_ops));

    plan.steps
        .iter()
        .enumerate()
        .filter(|(_, step)| !permitted.contains(&step.operation_key()))
        .map(|(i, step)| {
            (
                Some(i),
                format!("operation '{}' is not allowed for {category}", step.operation),
            )
        })
        .collect()
}

// ── Composite target ────────────────────────────────────────────────────

fn composite_target(plan: &Plan, operations: &[String]) -> Findings {
    let solving = op_set(operations);
    let mut out = Vec::new();
    for (i, step) in plan.steps.iter().enumerate() {
        if !solving.contains(&step.operation_key()) {
            continue;
        }
        let Some(target) = step.target.as_deref() else {
            continue;
        };
        if let Ok(expr) = expression::parse_expr(target)
            && expr.has_variables()
            && !expr.is_single_variable()
            && !matches!(expr, Expr::Call(..))
        {
            out.push((Some(i), format!("solves for composite expression '{target}'")));
        }
    }
    out
}

// ── Forbidden terms ─────────────────────────────────────────────────────

fn step_text(step: &PlanStep) -> String {
    let mut text = format!("{} {}", step.operation.replace('_', " "), step.justification);
    if let Some(expr) = &step.expression {
        text.push(' ');
        text.push_str(expr);
    }
    text.to_lowercase()
}

fn forbidden_terms(plan: &Plan, terms: &[String]) -> Findings {
    let mut out = Vec::new();
    for (i, step) in plan.steps.iter().enumerate() {
        let text = step_text(step);
        let words: BTreeSet<&str> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        let hits: Vec<&str> = terms
            .iter()
            .map(String::as_str)
            .filter(|term| {
                let term_lower = term.to_lowercase();
                if term_lower.contains(' ') {
                    text.contains(&term_lower)
                } else {
                    words.contains(term_lower.as_str())
                }
            })
            .collect();
        if !hits.is_empty() {
            out.push((Some(i), format!("uses forbidden wording: {}", hits.join(", "))));
        }
    }
    out
}

// ── Large-number delegation ─────────────────────────────────────────────

fn longest_number(text: &str) -> usize {
    text.split(|c: char| !c.is_ascii_digit())
        .map(str::len)
        .max()
        .unwrap_or(0)
}

fn large_number_delegation(
    problem: &Problem,
    plan: &Plan,
    min_digits: usize,
    delegated: &[String],
    manual: &[String],
) -> Findings {
    if longest_number(&problem.normalized_statement().replace(',', "")) < min_digits {
        return Vec::new();
    }
    let delegated = op_set(delegated);
    let manual = op_set(manual);

    let mut out: Findings = plan
        .steps
        .iter()
        .enumerate()
        .filter(|(_, step)| manual.contains(&step.operation_key()))
        .map(|(i, step)| {
            (
                Some(i),
                format!("'{}' on large numbers should be delegated to the calculator", step.operation),
            )
        })
        .collect();
    if !plan.steps.iter().any(|s| delegated.contains(&s.operation_key())) {
        out.push((None, "no step delegates the large-number arithmetic".into()));
    }
    out
}
