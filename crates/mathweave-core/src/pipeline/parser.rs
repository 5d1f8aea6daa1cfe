//! Problem parser: normalises captured text into a [`Problem`].
//!
//! The parser is deterministic. It rewrites Unicode math notation to the
//! ASCII forms the rest of the pipeline reads, collapses whitespace, pulls
//! stated domain constraints (`x != 0`, `for x > 0`, `x is positive`) out of
//! the statement, and rejects input that fails the well-formedness checks
//! with [`PipelineError::Corruption`]. Corruption is terminal: the caller is
//! expected to re-capture, not to clarify.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use mathweave_types::config::ParserConfig;
use mathweave_types::problem::Problem;
use mathweave_types::{PipelineError, Result};

static NOT_EQUAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b([A-Za-z][A-Za-z0-9]*)\s*!=\s*(-?\d+(?:\.\d+)?)").expect("static pattern")
});

static QUALIFIED_BOUND: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:for|where|with|given|assuming|if|when|such that)\s+(?:(?:all|real|every)\s+)*([a-z][a-z0-9]*)\s*(>=|<=|>|<)\s*(-?\d+(?:\.\d+)?)",
    )
    .expect("static pattern")
});

static ABS_BARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\|([^|]+)\|").expect("static pattern"));

static SIGN_WORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b([a-z])\s+is\s+(strictly\s+)?(positive|negative|nonzero|non-zero)\b")
        .expect("static pattern")
});

#[derive(Debug, Clone)]
pub struct ProblemParser {
    config: ParserConfig,
}

impl ProblemParser {
    pub fn new(config: ParserConfig) -> Self {
        Self { config }
    }

    /// Parse the first revision of a problem.
    pub fn parse(&self, raw: &str) -> Result<Problem> {
        let (statement, constraints) = self.prepare(raw)?;
        debug!(len = statement.len(), constraints = constraints.len(), "parsed problem");
        Ok(Problem::new(raw, statement, constraints))
    }

    /// Parse a human correction as a new revision of `previous`.
    pub fn parse_revision(&self, previous: &Problem, raw: &str) -> Result<Problem> {
        let (statement, constraints) = self.prepare(raw)?;
        debug!(
            revision_of = previous.id(),
            revision = previous.revision() + 1,
            "parsed problem revision"
        );
        Ok(previous.revise(raw, statement, constraints))
    }

    fn prepare(&self, raw: &str) -> Result<(String, Vec<String>)> {
        self.check_markers(raw)?;
        let statement = normalize(raw);
        self.check_well_formed(&statement)?;
        let constraints = extract_constraints(&statement);
        Ok((statement, constraints))
    }

    fn check_markers(&self, raw: &str) -> Result<()> {
        for marker in &self.config.corruption_markers {
            let hit = if marker.chars().all(|c| c.is_ascii_alphabetic()) {
                // Letter markers are OCR misreads of whole tokens ("tane" for
                // "tanθ") and must not fire inside ordinary words.
                raw.split(|c: char| !c.is_ascii_alphanumeric())
                    .any(|word| word == marker.as_str())
            } else {
                raw.contains(marker.as_str())
            };
            if hit {
                return Err(corrupt(format!("contains capture artifact '{marker}'")));
            }
        }
        Ok(())
    }

    fn check_well_formed(&self, statement: &str) -> Result<()> {
        if statement.is_empty() {
            return Err(corrupt("empty statement".into()));
        }
        let len = statement.chars().count();
        if len < self.config.min_length {
            return Err(corrupt(format!(
                "statement shorter than {} characters",
                self.config.min_length
            )));
        }
        if let Some(problem) = bracket_problem(statement) {
            return Err(corrupt(problem));
        }
        let clean = statement.chars().filter(|c| is_clean_char(*c)).count();
        let ratio = clean as f64 / len as f64;
        if ratio < self.config.min_clean_ratio {
            return Err(corrupt(format!(
                "only {:.0}% of characters are mathematical text",
                ratio * 100.0
            )));
        }
        Ok(())
    }
}

fn corrupt(reason: String) -> PipelineError {
    PipelineError::Corruption { reason }
}

fn is_clean_char(c: char) -> bool {
    c.is_alphanumeric() || c.is_whitespace() || "+-*/^=<>!().,[]{}'".contains(c)
}

fn bracket_problem(text: &str) -> Option<String> {
    let mut stack = Vec::new();
    for c in text.chars() {
        match c {
            '(' | '[' | '{' => stack.push(c),
            ')' | ']' | '}' => {
                let expected = match c {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                if stack.pop() != Some(expected) {
                    return Some(format!("unbalanced '{c}'"));
                }
            }
            _ => {}
        }
    }
    stack.last().map(|open| format!("unclosed '{open}'"))
}

/// Rewrite Unicode math notation to ASCII and collapse whitespace.
pub fn normalize(raw: &str) -> String {
    let chars: Vec<char> = raw.chars().collect();
    let mut out = String::with_capacity(raw.len());
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '√' => {
                let mut j = i + 1;
                while j < chars.len() && chars[j] == ' ' {
                    j += 1;
                }
                if chars.get(j) == Some(&'(') {
                    out.push_str("sqrt");
                    i = j;
                    continue;
                }
                let start = j;
                while j < chars.len() && (chars[j].is_alphanumeric() || chars[j] == '.') {
                    j += 1;
                }
                let operand: String = chars[start..j].iter().collect();
                let operand = normalize_symbol_run(&operand);
                out.push_str(&format!("sqrt({operand})"));
                i = j;
                continue;
            }
            '−' | '–' => out.push('-'),
            '×' | '·' | '⋅' => out.push('*'),
            '÷' => out.push('/'),
            '≠' => out.push_str("!="),
            '≤' => out.push_str("<="),
            '≥' => out.push_str(">="),
            '²' => out.push_str("^2"),
            '³' => out.push_str("^3"),
            'π' => out.push_str("pi"),
            'θ' => out.push_str("theta"),
            '∞' => out.push_str("infinity"),
            '∀' => out.push_str("for all "),
            '∈' => out.push_str(" in "),
            '\u{a0}' => out.push(' '),
            other => out.push(other),
        }
        i += 1;
    }

    let collapsed = out.split_whitespace().collect::<Vec<_>>().join(" ");
    ABS_BARS.replace_all(&collapsed, "abs($1)").into_owned()
}

fn normalize_symbol_run(run: &str) -> String {
    run.replace('π', "pi")
}

/// Domain constraints stated in the problem text, in canonical
/// `var op value` form.
pub fn extract_constraints(statement: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut push = |c: String| {
        if !out.contains(&c) {
            out.push(c);
        }
    };

    for cap in NOT_EQUAL.captures_iter(statement) {
        push(format!("{} != {}", &cap[1], &cap[2]));
    }
    for cap in QUALIFIED_BOUND.captures_iter(statement) {
        push(format!("{} {} {}", &cap[1], &cap[2], &cap[3]));
    }
    for cap in SIGN_WORDS.captures_iter(statement) {
        let op = match cap[3].to_lowercase().as_str() {
            "positive" => "> 0",
            "negative" => "< 0",
            _ => "!= 0",
        };
        push(format!("{} {op}", &cap[1]));
    }
    out
}
