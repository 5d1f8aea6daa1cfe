//! Intent routing: pick the solving category for a problem.
//!
//! Two implementations of [`IntentRouter`]:
//!
//! - [`KeywordRouter`] scores the statement against static keyword tables.
//!   No reasoner, no failure modes.
//! - [`ReasonerRouter`] asks the reasoner and falls back to the keyword
//!   router whenever the call fails or the reply cannot be used.
//!
//! Both apply the confidence threshold the same way: a decision below it is
//! marked low-confidence and carries a fallback category, which the rest of
//! the run works under and which makes the guardrail stricter.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use mathweave_types::ReasonerError;
use mathweave_types::config::RoutingConfig;
use mathweave_types::problem::{Category, Problem, RouteDecision, RouteSource};
use mathweave_types::reasoner::{PromptRole, ReasonerRequest};

use super::traits::{IntentRouter, Routing};
use crate::calculator;
use crate::expression;
use crate::reasoner::{CallScope, ReasonerClient};

/// A keyword table entry: the words and the category they point to.
struct KeywordPattern {
    keywords: &'static [&'static str],
    category: Category,
}

/// Checked in order; on equal hit counts the earlier entry wins, so the more
/// specific categories come first.
const PATTERNS: &[KeywordPattern] = &[
    KeywordPattern {
        keywords: &[
            "derivative",
            "derivatives",
            "differentiate",
            "integral",
            "integrals",
            "integrate",
            "limit",
            "limits",
            "d/dx",
            "dy/dx",
            "maxima",
            "minima",
            "maximum",
            "minimum",
            "continuity",
            "continuous",
            "lim",
        ],
        category: Category::Calculus,
    },
    KeywordPattern {
        keywords: &[
            "matrix",
            "matrices",
            "determinant",
            "eigenvalue",
            "eigenvalues",
            "eigenvector",
            "vector",
            "vectors",
            "transpose",
            "rank",
        ],
        category: Category::LinearAlgebra,
    },
    KeywordPattern {
        keywords: &[
            "probability",
            "dice",
            "die",
            "coin",
            "coins",
            "cards",
            "random",
            "chance",
            "odds",
            "expected value",
            "permutations",
            "combinations",
        ],
        category: Category::Probability,
    },
    KeywordPattern {
        keywords: &[
            "mean",
            "median",
            "mode",
            "variance",
            "standard deviation",
            "average",
            "data",
            "frequency",
        ],
        category: Category::Statistics,
    },
    KeywordPattern {
        keywords: &[
            "sin",
            "cos",
            "tan",
            "cot",
            "sec",
            "csc",
            "theta",
            "trigonometric",
            "radians",
            "identity",
        ],
        category: Category::Trigonometry,
    },
    KeywordPattern {
        keywords: &[
            "triangle",
            "circle",
            "area",
            "perimeter",
            "radius",
            "diameter",
            "polygon",
            "ellipse",
            "parabola",
            "distance",
            "slope",
            "midpoint",
            "coordinates",
            "volume",
            "angle",
        ],
        category: Category::Geometry,
    },
    KeywordPattern {
        keywords: &[
            "solve",
            "equation",
            "equations",
            "roots",
            "root",
            "polynomial",
            "quadratic",
            "factor",
            "factorise",
            "factorize",
            "simplify",
            "expand",
            "inequality",
            "system",
        ],
        category: Category::Algebra,
    },
    KeywordPattern {
        keywords: &["compute", "calculate", "evaluate", "percent", "percentage", "sum", "product"],
        category: Category::Arithmetic,
    },
];

fn count_hits(words: &[String], joined: &str, keywords: &[&str]) -> usize {
    keywords
        .iter()
        .filter(|&&kw| {
            if kw.contains(' ') || kw.contains('/') {
                joined.contains(kw)
            } else {
                words.iter().any(|w| w == kw)
            }
        })
        .count()
}

/// Apply the confidence threshold to a raw classification.
fn decide(
    config: &RoutingConfig,
    category: Category,
    confidence: f32,
    fallback: Option<Category>,
    source: RouteSource,
) -> RouteDecision {
    let confidence = confidence.clamp(0.0, 1.0);
    let low_confidence = confidence < config.confidence_threshold;
    RouteDecision {
        category,
        confidence,
        fallback_category: low_confidence.then(|| fallback.unwrap_or(config.default_fallback)),
        low_confidence,
        source,
    }
}

// ── Keyword router ──────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct KeywordRouter {
    config: RoutingConfig,
}

impl KeywordRouter {
    pub fn new(config: RoutingConfig) -> Self {
        Self { config }
    }

    /// Best category and its confidence, before thresholding.
    pub fn classify(&self, statement: &str) -> (Category, f32) {
        let lower = statement.to_lowercase();
        let words: Vec<String> = lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(str::to_string)
            .collect();

        let mut best: Option<(Category, usize)> = None;
        for pattern in PATTERNS {
            let hits = count_hits(&words, &lower, pattern.keywords);
            if hits > 0 && best.is_none_or(|(_, b)| hits > b) {
                best = Some((pattern.category, hits));
            }
        }

        match best {
            Some((category, hits)) => (category, (0.5 + 0.1 * hits as f32).min(0.9)),
            None if is_bare_arithmetic(statement) => (Category::Arithmetic, 0.7),
            None => (Category::Other, 0.3),
        }
    }

    pub fn decide(&self, statement: &str) -> RouteDecision {
        let (category, confidence) = self.classify(statement);
        decide(&self.config, category, confidence, None, RouteSource::Keywords)
    }
}

/// A statement that is nothing but a numeric expression, such as `12 * 7 + 1`.
fn is_bare_arithmetic(statement: &str) -> bool {
    let segments = expression::math_segments(statement);
    !segments.is_empty() && segments.iter().all(|s| calculator::is_numeric(s))
}

#[async_trait]
impl IntentRouter for KeywordRouter {
    async fn route(&self, _scope: &CallScope, problem: &Problem) -> Result<Routing, ReasonerError> {
        let decision = self.decide(problem.normalized_statement());
        debug!(category = %decision.category, confidence = decision.confidence, "keyword route");
        Ok(Routing {
            decision,
            degraded: None,
        })
    }
}

// ── Reasoner router ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RouterReply {
    category: String,
    #[serde(default)]
    confidence: Option<f32>,
}

pub struct ReasonerRouter {
    client: Arc<ReasonerClient>,
    keywords: KeywordRouter,
    config: RoutingConfig,
}

impl ReasonerRouter {
    pub fn new(client: Arc<ReasonerClient>, config: RoutingConfig) -> Self {
        Self {
            client,
            keywords: KeywordRouter::new(config.clone()),
            config,
        }
    }

    async fn ask(&self, scope: &CallScope, problem: &Problem) -> Result<RouteDecision, ReasonerError> {
        let request = ReasonerRequest::new(
            PromptRole::Router,
            serde_json::json!({
                "problem": problem.normalized_statement(),
                "categories": Category::ALL.iter().map(Category::as_str).collect::<Vec<_>>(),
            }),
        );
        let (reply, completion) = self.client.invoke_json::<RouterReply>(scope, &request).await?;
        let category = Category::parse_loose(&reply.category).ok_or_else(|| {
            ReasonerError::Malformed(format!("unknown category '{}'", reply.category))
        })?;
        let confidence = reply.confidence.or(completion.confidence).unwrap_or(0.5);

        // The keyword guess is the fallback when the reasoner is unsure.
        let (keyword_category, _) = self.keywords.classify(problem.normalized_statement());
        let fallback = (keyword_category != Category::Other).then_some(keyword_category);
        Ok(decide(&self.config, category, confidence, fallback, RouteSource::Reasoner))
    }
}

#[async_trait]
impl IntentRouter for ReasonerRouter {
    async fn route(&self, scope: &CallScope, problem: &Problem) -> Result<Routing, ReasonerError> {
        match self.ask(scope, problem).await {
            Ok(decision) => Ok(Routing {
                decision,
                degraded: None,
            }),
            Err(ReasonerError::Cancelled) => Err(ReasonerError::Cancelled),
            Err(err) => {
                warn!(error = %err, "router call failed, using keyword classification");
                Ok(Routing {
                    decision: self.keywords.decide(problem.normalized_statement()),
                    degraded: Some(format!("routing fell back to keywords: {err}")),
                })
            }
        }
    }
}
