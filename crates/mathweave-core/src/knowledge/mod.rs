//! Knowledge store: solved problems and formulas used as retrieval context.
//!
//! The store is append-only. Entries are keyed by a digest of their
//! normalised statement and solution, so writing the same confirmed solution
//! twice is a no-op. When several entries share a statement, searches only
//! see the one with the highest provenance confidence (newest on a tie).
//!
//! # Module Structure
//!
//! - [`embedder`] -- local SimHash embeddings for similarity ranking
//! - [`memory`] -- in-process store with optional JSONL persistence
//! - [`seeds`] -- curated formula and pitfall entries

pub mod embedder;
pub mod memory;
pub mod seeds;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use mathweave_types::StoreError;
use mathweave_types::knowledge::{KnowledgeEntry, KnowledgeQuery, ScoredEntry};

pub use embedder::{Embedder, HashEmbedder};
pub use memory::InMemoryKnowledgeStore;

/// Result of an append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Inserted,
    /// An entry with the same key already exists; nothing was written.
    Duplicate,
}

#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Top-k entries most similar to the query, best first.
    async fn search(&self, query: &KnowledgeQuery) -> Result<Vec<ScoredEntry>, StoreError>;

    /// Append an entry. The entry's `id` must be its [`entry_key`].
    async fn append(&self, entry: KnowledgeEntry) -> Result<AppendOutcome, StoreError>;

    async fn len(&self) -> usize;

    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Every stored entry, in insertion order.
    async fn entries(&self) -> Vec<KnowledgeEntry>;
}

/// Lowercase, whitespace-collapsed, spaces around operators removed.
pub fn normalize_text(text: &str) -> String {
    let lower = text.trim().to_lowercase();
    let collapsed = lower.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut out = String::with_capacity(collapsed.len());
    let chars: Vec<char> = collapsed.chars().collect();
    for (i, c) in chars.iter().enumerate() {
        if *c == ' ' {
            let prev = i.checked_sub(1).and_then(|j| chars.get(j));
            let next = chars.get(i + 1);
            let is_op = |c: Option<&char>| c.is_some_and(|c| "+-*/^=<>(),".contains(*c));
            if is_op(prev) || is_op(next) {
                continue;
            }
        }
        out.push(*c);
    }
    out
}

/// Stable id for a `(statement, solution)` pair: hex SHA-256 of both,
/// normalised.
pub fn entry_key(statement: &str, solution: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_text(statement).as_bytes());
    hasher.update([0u8]);
    hasher.update(normalize_text(solution).as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}
