//! Persistence of run audit trails.
//!
//! The orchestrator hands each sink the events recorded since its last
//! flush. [`JsonlAuditSink`] appends them to one JSONL file per run, one
//! event per line, so a trail can be read back (and replayed) after the
//! process is gone.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use mathweave_types::PipelineError;
use mathweave_types::run::{AuditEvent, AuditTrail, RunId};

#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Persist `events`, which continue whatever was written for `run_id`
    /// before.
    async fn append(&self, run_id: &RunId, events: &[AuditEvent]) -> Result<(), PipelineError>;
}

/// Discards everything.
pub struct NoopAuditSink;

#[async_trait]
impl AuditSink for NoopAuditSink {
    async fn append(&self, _run_id: &RunId, _events: &[AuditEvent]) -> Result<(), PipelineError> {
        Ok(())
    }
}

pub struct JsonlAuditSink {
    dir: PathBuf,
}

impl JsonlAuditSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, run_id: &RunId) -> PathBuf {
        trail_path(&self.dir, run_id)
    }
}

fn trail_path(dir: &Path, run_id: &RunId) -> PathBuf {
    dir.join(format!("{}.jsonl", run_id.as_str()))
}

#[async_trait]
impl AuditSink for JsonlAuditSink {
    async fn append(&self, run_id: &RunId, events: &[AuditEvent]) -> Result<(), PipelineError> {
        if events.is_empty() {
            return Ok(());
        }
        tokio::fs::create_dir_all(&self.dir).await?;

        let mut buf = String::new();
        for event in events {
            buf.push_str(&serde_json::to_string(event)?);
            buf.push('\n');
        }
        let path = self.path_for(run_id);
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(buf.as_bytes()).await?;
        file.flush().await?;
        debug!(run_id = %run_id, events = events.len(), path = %path.display(), "audit events written");
        Ok(())
    }
}

/// Read a persisted trail back. Malformed lines are skipped with a warning.
pub async fn read_trail(dir: &Path, run_id: &RunId) -> Result<AuditTrail, PipelineError> {
    let path = trail_path(dir, run_id);
    let content = match tokio::fs::read_to_string(&path).await {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(PipelineError::UnknownRun(run_id.to_string()));
        }
        Err(e) => return Err(e.into()),
    };

    let mut trail = AuditTrail::new(run_id.clone());
    for (i, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<AuditEvent>(line) {
            Ok(event) => trail.events.push(event),
            Err(e) => warn!(run_id = %run_id, line = i + 1, error = %e, "skipping malformed audit line"),
        }
    }
    Ok(trail)
}
