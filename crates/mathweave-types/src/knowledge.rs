//! Knowledge entries and retrieval results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::problem::Category;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Curated at install time.
    Seeded,
    /// Written back from a confirmed-correct run.
    Learned,
}

/// A solved problem or reference formula held by the knowledge store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    /// Content key over `(statement, canonical_solution)`.
    pub id: String,
    pub statement: String,
    pub canonical_solution: String,
    /// `None` marks general material visible to every category.
    #[serde(default)]
    pub category: Option<Category>,
    pub provenance: Provenance,
    /// Used to pick between entries for the same statement.
    pub confidence: f32,
    pub created_at: DateTime<Utc>,
}

/// An entry with its similarity to a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredEntry {
    pub entry: KnowledgeEntry,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeQuery {
    pub text: String,
    #[serde(default)]
    pub category: Option<Category>,
    pub k: usize,
}

/// Ranked context handed to the planner. Possibly empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalContext {
    pub entries: Vec<ScoredEntry>,
    /// Set when the store failed or timed out and the context was emptied.
    #[serde(default)]
    pub degraded: bool,
}

impl RetrievalContext {
    pub fn empty_degraded() -> Self {
        Self {
            entries: Vec::new(),
            degraded: true,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry_ids(&self) -> Vec<String> {
        self.entries.iter().map(|s| s.entry.id.clone()).collect()
    }

    /// Prompt-ready text, cut at a char boundary once `max_chars` is reached.
    pub fn render(&self, max_chars: usize) -> String {
        let mut out = String::new();
        for scored in &self.entries {
            out.push_str(&format!(
                "Problem: {}\nSolution: {}\n---\n",
                scored.entry.statement, scored.entry.canonical_solution
            ));
        }
        if out.chars().count() > max_chars {
            out = out.chars().take(max_chars).collect();
        }
        out
    }
}
