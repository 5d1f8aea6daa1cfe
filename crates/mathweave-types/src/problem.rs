//! Problem model: the parsed statement, its category, and routing decisions.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Category ────────────────────────────────────────────────────────────

/// Solving category used to pick a planner strategy and retrieval scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Algebra,
    Calculus,
    Geometry,
    Trigonometry,
    Probability,
    Statistics,
    LinearAlgebra,
    Arithmetic,
    Other,
}

impl Category {
    /// Every category, in declaration order.
    pub const ALL: [Category; 9] = [
        Category::Algebra,
        Category::Calculus,
        Category::Geometry,
        Category::Trigonometry,
        Category::Probability,
        Category::Statistics,
        Category::LinearAlgebra,
        Category::Arithmetic,
        Category::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Algebra => "algebra",
            Self::Calculus => "calculus",
            Self::Geometry => "geometry",
            Self::Trigonometry => "trigonometry",
            Self::Probability => "probability",
            Self::Statistics => "statistics",
            Self::LinearAlgebra => "linear_algebra",
            Self::Arithmetic => "arithmetic",
            Self::Other => "other",
        }
    }

    /// Lenient parse used on reasoner output: case-insensitive, accepts
    /// spaces or hyphens in place of underscores and a few common aliases.
    pub fn parse_loose(input: &str) -> Option<Self> {
        let key: String = input
            .trim()
            .to_lowercase()
            .chars()
            .map(|c| if c == ' ' || c == '-' { '_' } else { c })
            .collect();
        let category = match key.as_str() {
            "algebra" => Self::Algebra,
            "calculus" => Self::Calculus,
            "geometry" | "coordinate_geometry" => Self::Geometry,
            "trigonometry" | "trig" => Self::Trigonometry,
            "probability" => Self::Probability,
            "statistics" | "stats" => Self::Statistics,
            "linear_algebra" | "matrices" => Self::LinearAlgebra,
            "arithmetic" => Self::Arithmetic,
            "other" | "general" => Self::Other,
            _ => return None,
        };
        Some(category)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_loose(s).ok_or_else(|| format!("unknown category: {s}"))
    }
}

// ── Ambiguity ───────────────────────────────────────────────────────────

/// Kinds of ambiguity the deterministic detector can raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmbiguityKind {
    /// An operator is missing one of its operands.
    MissingOperand,
    /// A quantified variable has no stated domain.
    MissingDomain,
    /// The statement admits more than one distinct reading.
    MultipleInterpretations,
    /// Quantities in incompatible units are combined.
    UnitMismatch,
}

impl AmbiguityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingOperand => "missing-operand",
            Self::MissingDomain => "missing-domain",
            Self::MultipleInterpretations => "multiple-interpretations",
            Self::UnitMismatch => "unit-mismatch",
        }
    }
}

impl fmt::Display for AmbiguityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One detected ambiguity with the fragment that triggered it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmbiguityFinding {
    pub kind: AmbiguityKind,
    pub detail: String,
}

// ── Problem ─────────────────────────────────────────────────────────────

/// A parsed problem statement.
///
/// Problems are immutable. Annotations produce annotated copies, and
/// corrections produce a new revision linked back through `revision_of`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Problem {
    id: String,
    revision: u32,
    revision_of: Option<String>,
    raw_text: String,
    normalized_statement: String,
    detected_category: Option<Category>,
    ambiguity_flags: BTreeSet<AmbiguityKind>,
    given_constraints: Vec<String>,
}

impl Problem {
    /// Create the first revision of a problem.
    pub fn new(
        raw_text: impl Into<String>,
        normalized_statement: impl Into<String>,
        given_constraints: Vec<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            revision: 0,
            revision_of: None,
            raw_text: raw_text.into(),
            normalized_statement: normalized_statement.into(),
            detected_category: None,
            ambiguity_flags: BTreeSet::new(),
            given_constraints,
        }
    }

    /// Create a corrected revision that links back to `self`.
    pub fn revise(
        &self,
        raw_text: impl Into<String>,
        normalized_statement: impl Into<String>,
        given_constraints: Vec<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            revision: self.revision + 1,
            revision_of: Some(self.id.clone()),
            raw_text: raw_text.into(),
            normalized_statement: normalized_statement.into(),
            detected_category: None,
            ambiguity_flags: BTreeSet::new(),
            given_constraints,
        }
    }

    /// Copy of this problem carrying the detector's flags.
    pub fn with_ambiguity_flags(&self, flags: BTreeSet<AmbiguityKind>) -> Self {
        Self {
            ambiguity_flags: flags,
            ..self.clone()
        }
    }

    /// Copy of this problem carrying the routed category.
    pub fn with_category(&self, category: Category) -> Self {
        Self {
            detected_category: Some(category),
            ..self.clone()
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn revision(&self) -> u32 {
        self.revision
    }

    pub fn revision_of(&self) -> Option<&str> {
        self.revision_of.as_deref()
    }

    pub fn raw_text(&self) -> &str {
        &self.raw_text
    }

    pub fn normalized_statement(&self) -> &str {
        &self.normalized_statement
    }

    pub fn detected_category(&self) -> Option<Category> {
        self.detected_category
    }

    pub fn ambiguity_flags(&self) -> &BTreeSet<AmbiguityKind> {
        &self.ambiguity_flags
    }

    pub fn given_constraints(&self) -> &[String] {
        &self.given_constraints
    }
}

// ── Routing ─────────────────────────────────────────────────────────────

/// Where a routing decision came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteSource {
    Reasoner,
    Keywords,
}

/// Output of the intent router, produced once per problem revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteDecision {
    pub category: Category,
    /// In `[0, 1]`.
    pub confidence: f32,
    #[serde(default)]
    pub fallback_category: Option<Category>,
    /// Set when confidence fell below the routing threshold.
    #[serde(default)]
    pub low_confidence: bool,
    pub source: RouteSource,
}

impl RouteDecision {
    /// The category the rest of the run works under.
    pub fn effective_category(&self) -> Category {
        if self.low_confidence {
            self.fallback_category.unwrap_or(self.category)
        } else {
            self.category
        }
    }
}
