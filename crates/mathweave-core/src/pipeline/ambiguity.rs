//! Deterministic ambiguity detection.
//!
//! Four rule families run over the normalised statement; none of them calls
//! the reasoner. An empty report lets the run proceed to routing, anything
//! else is escalated to a human for clarification.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

use mathweave_types::problem::{AmbiguityFinding, AmbiguityKind, Problem};

use crate::expression::{self, ExprError};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AmbiguityReport {
    pub flags: BTreeSet<AmbiguityKind>,
    pub findings: Vec<AmbiguityFinding>,
}

impl AmbiguityReport {
    pub fn is_clear(&self) -> bool {
        self.flags.is_empty()
    }

    fn add(&mut self, kind: AmbiguityKind, detail: String) {
        self.flags.insert(kind);
        self.findings.push(AmbiguityFinding { kind, detail });
    }

    /// Comma-separated flag names, for messages.
    pub fn flags_display(&self) -> String {
        self.flags
            .iter()
            .map(AmbiguityKind::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

// ── Patterns ────────────────────────────────────────────────────────────

static QUANTIFIED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bfor\s+(?:all|every|each|any)\s+([a-z])\b").expect("static pattern")
});

static DOMAIN_QUALIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:in|real|reals|positive|negative|nonzero|non-zero|integers?|natural|complex|such that|domain)\b|>=|<=|>|<|!=",
    )
    .expect("static pattern")
});

static FRACTION_TIMES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d+\s*/\s*\d+\s*[a-z(]").expect("static pattern"));

static CHAINED_DIVISION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[\w)]\s*/\s*[\w(][\w^]*\)?\s*/\s*[\w(]").expect("static pattern")
});

static FUNCTION_POWER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(sin|cos|tan|cot|sec|csc|log|ln)\s+[a-z0-9]+\s*\^").expect("static pattern")
});

static UNIT_PAIR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+(?:\.\d+)?)\s*([A-Za-z]+)\s*([+\-=])\s*(\d+(?:\.\d+)?)\s*([A-Za-z]+)\b")
        .expect("static pattern")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnitFamily {
    Length,
    Mass,
    Time,
    Volume,
    Angle,
    Temperature,
}

fn unit_family(word: &str) -> Option<UnitFamily> {
    let family = match word.to_lowercase().as_str() {
        "mm" | "cm" | "m" | "km" | "ft" | "inch" | "inches" | "mile" | "miles" | "meter" | "meters"
        | "metre" | "metres" | "yard" | "yards" => UnitFamily::Length,
        "mg" | "g" | "kg" | "lb" | "lbs" | "gram" | "grams" | "kilogram" | "kilograms" | "ton"
        | "tons" => UnitFamily::Mass,
        "s" | "sec" | "secs" | "second" | "seconds" | "min" | "mins" | "minute" | "minutes" | "h"
        | "hr" | "hrs" | "hour" | "hours" | "day" | "days" => UnitFamily::Time,
        "ml" | "l" | "litre" | "litres" | "liter" | "liters" | "gallon" | "gallons" => {
            UnitFamily::Volume
        }
        "deg" | "degree" | "degrees" | "rad" | "radian" | "radians" => UnitFamily::Angle,
        "celsius" | "fahrenheit" | "kelvin" => UnitFamily::Temperature,
        _ => return None,
    };
    Some(family)
}

// ── Detector ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct AmbiguityDetector;

impl AmbiguityDetector {
    pub fn new() -> Self {
        Self
    }

    pub fn detect(&self, problem: &Problem) -> AmbiguityReport {
        let statement = problem.normalized_statement();
        let mut report = AmbiguityReport::default();
        missing_operands(statement, &mut report);
        missing_domains(problem, &mut report);
        multiple_interpretations(statement, &mut report);
        unit_mismatches(statement, &mut report);
        report
    }
}

fn missing_operands(statement: &str, report: &mut AmbiguityReport) {
    for segment in expression::math_segments(statement) {
        if !segment.chars().any(|c| c.is_ascii_alphanumeric()) {
            continue;
        }
        match expression::parse_relation(&segment) {
            Err(ExprError::Empty | ExprError::UnexpectedEnd) => {
                report.add(
                    AmbiguityKind::MissingOperand,
                    format!("operator without an operand in '{segment}'"),
                );
            }
            Err(ExprError::UnexpectedToken(token)) if token.starts_with("operator") => {
                report.add(
                    AmbiguityKind::MissingOperand,
                    format!("consecutive operators in '{segment}'"),
                );
            }
            _ => {}
        }
    }
}

fn missing_domains(problem: &Problem, report: &mut AmbiguityReport) {
    let statement = problem.normalized_statement();
    for cap in QUANTIFIED.captures_iter(statement) {
        let var = &cap[1];
        let Some(whole) = cap.get(0) else {
            continue;
        };
        let tail = &statement[whole.end()..];
        let qualified = DOMAIN_QUALIFIER.is_match(tail)
            || problem
                .given_constraints()
                .iter()
                .any(|c| c.split_whitespace().next() == Some(var));
        if !qualified {
            report.add(
                AmbiguityKind::MissingDomain,
                format!("'{}' has no stated domain", whole.as_str()),
            );
        }
    }
}

fn multiple_interpretations(statement: &str, report: &mut AmbiguityReport) {
    let checks: [(&Regex, &str); 3] = [
        (&FRACTION_TIMES, "fraction followed by a factor"),
        (&CHAINED_DIVISION, "chained division without grouping"),
        (&FUNCTION_POWER, "function applied to a power without parentheses"),
    ];
    for (pattern, what) in checks {
        if let Some(m) = pattern.find(statement) {
            report.add(
                AmbiguityKind::MultipleInterpretations,
                format!("{what}: '{}'", m.as_str().trim()),
            );
        }
    }
}

fn unit_mismatches(statement: &str, report: &mut AmbiguityReport) {
    for cap in UNIT_PAIR.captures_iter(statement) {
        let (left, right) = (&cap[2], &cap[5]);
        if let (Some(a), Some(b)) = (unit_family(left), unit_family(right))
            && a != b
        {
            report.add(
                AmbiguityKind::UnitMismatch,
                format!("'{left}' combined with '{right}' via '{}'", &cap[3]),
            );
        }
    }
}
