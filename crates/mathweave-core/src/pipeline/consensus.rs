//! Vote counting over verifier verdicts.
//!
//! Answers are compared after canonical normalisation, so `x = 2, x = 3`,
//! `{3, 2}` and `x=3 or x=2` count as the same claim. The agreement ratio is
//! the share of non-abstaining verdicts that claim the plurality answer; a
//! run is accepted only when that share reaches the threshold and most of
//! those verdicts accept.

use std::collections::{BTreeMap, BTreeSet};

use mathweave_types::verification::{ConsensusResult, Judgment, VerificationVerdict};

use crate::expression;

/// Float slack when comparing the ratio with the threshold, so that 2/3
/// meets a 2/3 threshold.
const RATIO_EPSILON: f64 = 1e-9;

/// Canonical form of an answer. Alternatives are normalised one by one,
/// sorted and de-duplicated.
pub fn canonical_answer(answer: &str) -> String {
    let mut text = answer.trim().to_lowercase();
    for prefix in ["final answer:", "answer:", "therefore", "thus"] {
        if let Some(rest) = text.strip_prefix(prefix) {
            text = rest.trim().to_string();
        }
    }
    let text: String = text
        .chars()
        .filter(|c| !matches!(c, '$' | '{' | '}' | '\\'))
        .collect();
    let text = text.trim_end_matches('.').trim();

    let parts: Vec<(Option<String>, String)> = expression::split_alternatives(text)
        .into_iter()
        .map(canonical_part)
        .filter(|(_, value)| !value.is_empty())
        .collect();

    // One variable throughout (`x = 2, x = 3`) is a set of values for it;
    // several variables (`x = 2, y = 3`) is an assignment and keeps its names.
    let named: BTreeSet<&str> = parts.iter().filter_map(|(var, _)| var.as_deref()).collect();
    let mut rendered: Vec<String> = if named.len() > 1 {
        parts
            .into_iter()
            .map(|(var, value)| match var {
                Some(var) => format!("{var} = {value}"),
                None => value,
            })
            .collect()
    } else {
        parts.into_iter().map(|(_, value)| value).collect()
    };
    rendered.sort();
    rendered.dedup();
    rendered.join(", ")
}

/// Split `x = 2` into the variable it names and its canonical value.
fn canonical_part(part: &str) -> (Option<String>, String) {
    let (var, value) = match part.split_once('=') {
        Some((lhs, rhs)) if !rhs.contains('=') => match expression::parse_expr(lhs.trim()) {
            Ok(e) if e.is_single_variable() => (Some(e.canonical()), rhs.trim()),
            _ => (None, part.trim()),
        },
        _ => (None, part.trim()),
    };
    let value = match expression::parse_expr(value) {
        Ok(expr) => match expr.constant_value() {
            Some(v) => expression::format_number(v),
            None => expr.canonical(),
        },
        Err(_) => value.split_whitespace().collect::<Vec<_>>().join(" "),
    };
    (var, value)
}

/// Tally `verdicts` against `threshold`.
pub fn compute(verdicts: &[VerificationVerdict], threshold: f64) -> ConsensusResult {
    let abstentions: BTreeSet<String> = verdicts
        .iter()
        .filter(|v| v.judgment == Judgment::Abstain)
        .map(|v| v.verifier_id.clone())
        .collect();
    let voting: Vec<(&VerificationVerdict, Option<String>)> = verdicts
        .iter()
        .filter(|v| v.judgment != Judgment::Abstain)
        .map(|v| {
            let claim = v
                .claimed_answer
                .as_deref()
                .map(canonical_answer)
                .filter(|c| !c.is_empty());
            (v, claim)
        })
        .collect();

    if voting.is_empty() {
        return ConsensusResult {
            accepted: false,
            agreed_answer: None,
            agreement_ratio: 0.0,
            dissent: BTreeSet::new(),
            abstentions,
            plurality_judgment: None,
        };
    }

    // Plurality answer; ties go to the lexicographically smallest claim so
    // the tally never depends on arrival order.
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for (_, claim) in &voting {
        if let Some(c) = claim {
            *counts.entry(c.as_str()).or_default() += 1;
        }
    }
    let plurality: Option<String> = counts
        .iter()
        .fold(None::<(&str, usize)>, |best, (claim, n)| match best {
            Some((_, b)) if b >= *n => best,
            _ => Some((*claim, *n)),
        })
        .map(|(claim, _)| claim.to_string());

    let agreeing: Vec<&VerificationVerdict> = voting
        .iter()
        .filter(|(_, claim)| claim.is_some() && *claim == plurality)
        .map(|(v, _)| *v)
        .collect();
    let dissent: BTreeSet<String> = voting
        .iter()
        .filter(|(_, claim)| claim.is_none() || *claim != plurality)
        .map(|(v, _)| v.verifier_id.clone())
        .collect();
    let agreement_ratio = agreeing.len() as f64 / voting.len() as f64;

    let accepts = agreeing.iter().filter(|v| v.judgment == Judgment::Accept).count();
    let rejects = agreeing.len() - accepts;
    let plurality_judgment = match accepts.cmp(&rejects) {
        std::cmp::Ordering::Greater => Some(Judgment::Accept),
        std::cmp::Ordering::Less => Some(Judgment::Reject),
        std::cmp::Ordering::Equal => None,
    };

    let accepted = agreement_ratio + RATIO_EPSILON >= threshold
        && plurality_judgment == Some(Judgment::Accept);

    ConsensusResult {
        accepted,
        agreed_answer: plurality,
        agreement_ratio,
        dissent,
        abstentions,
        plurality_judgment,
    }
}
