//! In-process knowledge store with optional JSONL persistence.
//!
//! All entries live in memory next to their embeddings. When opened on a
//! file, every accepted append is written as one JSON line before it becomes
//! visible, and the log is replayed on open. A single async mutex serialises
//! writers, which is what makes check-then-append idempotent under
//! concurrent runs.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

use mathweave_types::StoreError;
use mathweave_types::knowledge::{KnowledgeEntry, KnowledgeQuery, ScoredEntry};

use super::embedder::{Embedder, HashEmbedder, cosine_similarity};
use super::{AppendOutcome, KnowledgeStore, normalize_text};

struct Indexed {
    entry: KnowledgeEntry,
    vector: Vec<f32>,
}

pub struct InMemoryKnowledgeStore {
    embedder: Box<dyn Embedder>,
    entries: Mutex<Vec<Indexed>>,
    path: Option<PathBuf>,
}

impl InMemoryKnowledgeStore {
    pub fn new(embedder: Box<dyn Embedder>) -> Self {
        Self {
            embedder,
            entries: Mutex::new(Vec::new()),
            path: None,
        }
    }

    /// Memory-only store using [`HashEmbedder`].
    pub fn with_dimension(dimension: usize) -> Self {
        Self::new(Box::new(HashEmbedder::new(dimension)))
    }

    /// Store backed by an append-only JSONL log. A missing file is an empty
    /// store; the file is created on the first append.
    pub async fn open(path: impl AsRef<Path>, dimension: usize) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let embedder: Box<dyn Embedder> = Box::new(HashEmbedder::new(dimension));
        let mut entries = Vec::new();

        match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                for (i, line) in content.lines().enumerate() {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    let entry: KnowledgeEntry =
                        serde_json::from_str(trimmed).map_err(|e| StoreError::CorruptRecord {
                            line: i + 1,
                            reason: e.to_string(),
                        })?;
                    let vector = embedder.embed(&embedding_text(&entry));
                    entries.push(Indexed { entry, vector });
                }
                info!(path = %path.display(), entries = entries.len(), "loaded knowledge store");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "knowledge log not found, starting empty");
            }
            Err(e) => return Err(StoreError::Io(e)),
        }

        Ok(Self {
            embedder,
            entries: Mutex::new(entries),
            path: Some(path),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    async fn persist(&self, entry: &KnowledgeEntry) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

fn embedding_text(entry: &KnowledgeEntry) -> String {
    format!("{} {}", entry.statement, entry.canonical_solution)
}

/// Whether `a` wins over `b` for the same statement: higher confidence, then
/// newer, then later insertion.
fn supersedes(a: &Indexed, a_index: usize, b: &Indexed, b_index: usize) -> bool {
    let (ea, eb) = (&a.entry, &b.entry);
    match ea.confidence.total_cmp(&eb.confidence) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Less => false,
        std::cmp::Ordering::Equal => (ea.created_at, a_index) > (eb.created_at, b_index),
    }
}

#[async_trait]
impl KnowledgeStore for InMemoryKnowledgeStore {
    async fn search(&self, query: &KnowledgeQuery) -> Result<Vec<ScoredEntry>, StoreError> {
        let entries = self.entries.lock().await;
        let query_vector = self.embedder.embed(&query.text);

        // Visible entries: in scope, and the current one for their statement.
        let mut current: HashMap<String, usize> = HashMap::new();
        for (i, indexed) in entries.iter().enumerate() {
            let in_scope = match (query.category, indexed.entry.category) {
                (None, _) | (_, None) => true,
                (Some(q), Some(c)) => q == c,
            };
            if !in_scope {
                continue;
            }
            let key = normalize_text(&indexed.entry.statement);
            match current.get(&key) {
                Some(&j) if !supersedes(indexed, i, &entries[j], j) => {}
                _ => {
                    current.insert(key, i);
                }
            }
        }

        let mut visible: Vec<usize> = current.into_values().collect();
        visible.sort_unstable();

        let mut scored: Vec<(usize, f32)> = visible
            .into_iter()
            .map(|i| (i, cosine_similarity(&query_vector, &entries[i].vector)))
            .filter(|(_, score)| *score > 0.0)
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        scored.truncate(query.k);

        Ok(scored
            .into_iter()
            .map(|(i, score)| ScoredEntry {
                entry: entries[i].entry.clone(),
                score,
            })
            .collect())
    }

    async fn append(&self, entry: KnowledgeEntry) -> Result<AppendOutcome, StoreError> {
        let mut entries = self.entries.lock().await;
        if entries.iter().any(|e| e.entry.id == entry.id) {
            debug!(id = %entry.id, "knowledge entry already present");
            return Ok(AppendOutcome::Duplicate);
        }
        self.persist(&entry).await?;
        let vector = self.embedder.embed(&embedding_text(&entry));
        debug!(id = %entry.id, provenance = ?entry.provenance, "knowledge entry appended");
        entries.push(Indexed { entry, vector });
        Ok(AppendOutcome::Inserted)
    }

    async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    async fn entries(&self) -> Vec<KnowledgeEntry> {
        self.entries
            .lock()
            .await
            .iter()
            .map(|i| i.entry.clone())
            .collect()
    }
}
