//! Guardrail rule catalog.
//!
//! Rules are data: each [`RuleSpec`] names a detector from a fixed set
//! ([`RuleCheck`]) and supplies its parameters, severity, and the categories
//! it applies to. Deployments add, disable or retune rules in configuration
//! without touching the engine.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::plan::{RuleId, Severity};
use crate::problem::Category;

use super::default_true;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardrailConfig {
    /// Promote soft findings to blocking when routing confidence was low.
    #[serde(default = "default_true", alias = "strictOnLowConfidence")]
    pub strict_on_low_confidence: bool,

    #[serde(default = "default_rules")]
    pub rules: Vec<RuleSpec>,
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        Self {
            strict_on_low_confidence: true,
            rules: default_rules(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSpec {
    pub id: RuleId,

    pub check: RuleCheck,

    #[serde(default = "default_severity")]
    pub severity: Severity,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Categories the rule applies to. Empty means all.
    #[serde(default)]
    pub categories: Vec<Category>,
}

impl RuleSpec {
    pub fn applies_to(&self, category: Category) -> bool {
        self.enabled && (self.categories.is_empty() || self.categories.contains(&category))
    }
}

fn default_severity() -> Severity {
    Severity::Hard
}

/// The detectors the engine knows how to run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleCheck {
    /// A step's polynomial degree exceeds the problem's scope.
    DegreeExplosion {
        /// Degree a problem is always allowed to reach.
        #[serde(default = "default_min_scope_degree")]
        min_scope_degree: u32,
        /// Extra degree tolerated above the scope.
        #[serde(default)]
        slack: u32,
    },

    /// Division by something not shown to be nonzero.
    IllegalDivision {
        /// Operations that divide even when no divisor is spelled out.
        #[serde(default = "default_dividing_operations")]
        dividing_operations: Vec<String>,
    },

    /// Operation not in the category's allowed set.
    OperationAllowlist {
        /// Operations allowed in every category.
        #[serde(default = "default_universal_operations")]
        universal: Vec<String>,
        /// Per-category operation sets. Categories without an entry allow
        /// everything.
        #[serde(default = "default_category_operations")]
        allowed: BTreeMap<Category, Vec<String>>,
    },

    /// Solving for a compound expression such as `xy` or `x/y`.
    CompositeTarget {
        #[serde(default = "default_solving_operations")]
        operations: Vec<String>,
    },

    /// Words that must not appear anywhere in the plan.
    ForbiddenTerms { terms: Vec<String> },

    /// Large numbers must be handled by the calculator.
    LargeNumberDelegation {
        #[serde(default = "default_min_digits")]
        min_digits: usize,
        /// Operations that count as delegated.
        #[serde(default = "default_delegated_operations")]
        delegated: Vec<String>,
        /// Operations that count as doing arithmetic by hand.
        #[serde(default = "default_manual_operations")]
        manual: Vec<String>,
    },
}

fn default_min_scope_degree() -> u32 {
    2
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn default_dividing_operations() -> Vec<String> {
    strings(&["divide", "divide_both_sides", "cancel", "cancel_common_factor"])
}

fn default_solving_operations() -> Vec<String> {
    strings(&["solve", "solve_for", "isolate"])
}

fn default_min_digits() -> usize {
    4
}

fn default_delegated_operations() -> Vec<String> {
    strings(&["use_calculator", "evaluate", "compute"])
}

fn default_manual_operations() -> Vec<String> {
    strings(&["add", "subtract", "multiply", "divide", "power", "root", "long_division"])
}

/// Operations every category may use.
pub fn default_universal_operations() -> Vec<String> {
    strings(&[
        "state_domain",
        "state_given",
        "identify",
        "check",
        "verify",
        "simplify",
        "rewrite",
        "substitute",
        "evaluate",
        "compute",
        "use_calculator",
        "apply_formula",
        "conclude",
    ])
}

/// Default per-category operation sets.
pub fn default_category_operations() -> BTreeMap<Category, Vec<String>> {
    let mut map = BTreeMap::new();
    map.insert(
        Category::Algebra,
        strings(&[
            "factor",
            "expand",
            "solve",
            "solve_for",
            "isolate",
            "add",
            "subtract",
            "multiply",
            "divide",
            "divide_both_sides",
            "cancel",
            "collect_terms",
            "complete_square",
            "quadratic_formula",
            "square_both_sides",
            "take_root",
            "take_log",
            "exponentiate",
            "cross_multiply",
            "apply_vieta",
            "solve_system",
            "eliminate",
        ]),
    );
    map.insert(
        Category::Calculus,
        strings(&[
            "differentiate",
            "integrate",
            "limit",
            "apply_lhopital",
            "u_substitution",
            "integrate_by_parts",
            "partial_fractions",
            "find_critical_points",
            "second_derivative_test",
            "first_derivative_test",
            "factor",
            "expand",
            "solve",
            "isolate",
            "add",
            "subtract",
            "multiply",
            "divide",
            "cancel",
        ]),
    );
    map.insert(
        Category::Geometry,
        strings(&[
            "apply_pythagoras",
            "distance_formula",
            "midpoint_formula",
            "slope",
            "compute_area",
            "compute_perimeter",
            "compute_volume",
            "compute_angle",
            "similar_triangles",
            "apply_trig",
            "equation_of_line",
            "equation_of_circle",
            "solve",
            "isolate",
            "add",
            "subtract",
            "multiply",
            "divide",
        ]),
    );
    map.insert(
        Category::Trigonometry,
        strings(&[
            "apply_identity",
            "apply_trig",
            "general_solution",
            "factor",
            "expand",
            "solve",
            "isolate",
            "add",
            "subtract",
            "multiply",
            "divide",
            "square_both_sides",
            "take_inverse",
        ]),
    );
    map.insert(
        Category::Probability,
        strings(&[
            "count_outcomes",
            "permutation",
            "combination",
            "complement",
            "conditional_probability",
            "apply_bayes",
            "expected_value",
            "compute_probability",
            "add",
            "subtract",
            "multiply",
            "divide",
        ]),
    );
    map.insert(
        Category::Statistics,
        strings(&[
            "sort",
            "sum",
            "count",
            "mean",
            "median",
            "mode",
            "variance",
            "standard_deviation",
            "add",
            "subtract",
            "multiply",
            "divide",
        ]),
    );
    map.insert(
        Category::LinearAlgebra,
        strings(&[
            "row_reduce",
            "determinant",
            "inverse",
            "transpose",
            "multiply_matrices",
            "dot_product",
            "cross_product",
            "eigenvalues",
            "solve_system",
            "add",
            "subtract",
            "multiply",
        ]),
    );
    map.insert(
        Category::Arithmetic,
        strings(&["add", "subtract", "multiply", "divide", "power", "root", "round"]),
    );
    map
}

/// The built-in catalog.
pub fn default_rules() -> Vec<RuleSpec> {
    vec![
        RuleSpec {
            id: RuleId::from(RuleId::DEGREE_EXPLOSION),
            check: RuleCheck::DegreeExplosion {
                min_scope_degree: default_min_scope_degree(),
                slack: 0,
            },
            severity: Severity::Hard,
            enabled: true,
            categories: vec![],
        },
        RuleSpec {
            id: RuleId::from(RuleId::ILLEGAL_DIVISION),
            check: RuleCheck::IllegalDivision {
                dividing_operations: default_dividing_operations(),
            },
            severity: Severity::Hard,
            enabled: true,
            categories: vec![],
        },
        RuleSpec {
            id: RuleId::from(RuleId::OPERATION_OUTSIDE_CATEGORY),
            check: RuleCheck::OperationAllowlist {
                universal: default_universal_operations(),
                allowed: default_category_operations(),
            },
            severity: Severity::Hard,
            enabled: true,
            categories: vec![],
        },
        RuleSpec {
            id: RuleId::from(RuleId::COMPOSITE_TARGET),
            check: RuleCheck::CompositeTarget {
                operations: default_solving_operations(),
            },
            severity: Severity::Hard,
            enabled: true,
            categories: vec![],
        },
        RuleSpec {
            id: RuleId::from(RuleId::APPROXIMATE_ARITHMETIC),
            check: RuleCheck::ForbiddenTerms {
                terms: strings(&["approximate", "approximately", "estimate", "roughly", "about"]),
            },
            severity: Severity::Soft,
            enabled: true,
            categories: vec![Category::Arithmetic],
        },
        RuleSpec {
            id: RuleId::from(RuleId::MANUAL_LARGE_ARITHMETIC),
            check: RuleCheck::LargeNumberDelegation {
                min_digits: default_min_digits(),
                delegated: default_delegated_operations(),
                manual: default_manual_operations(),
            },
            severity: Severity::Soft,
            enabled: true,
            categories: vec![Category::Arithmetic],
        },
    ]
}
