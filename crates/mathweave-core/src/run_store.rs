//! Where run contexts are kept between drives.
//!
//! A suspended run is saved with its pending escalation so that a response
//! arriving later, possibly in another process, can resume it.
//! [`FileRunStore`] writes one JSON snapshot per run, replacing the file
//! through a temporary sibling so a crash never leaves a half-written
//! snapshot behind.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use mathweave_types::PipelineError;
use mathweave_types::run::RunId;

use crate::orchestrator::context::{RunContext, RunStatus};

#[async_trait]
pub trait RunStore: Send + Sync {
    async fn save(&self, ctx: &RunContext) -> Result<(), PipelineError>;

    async fn load(&self, run_id: &RunId) -> Result<Option<RunContext>, PipelineError>;

    /// Every run currently waiting on a human.
    async fn list_suspended(&self) -> Result<Vec<RunContext>, PipelineError>;
}

#[derive(Default)]
pub struct MemoryRunStore {
    runs: Mutex<HashMap<RunId, RunContext>>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn save(&self, ctx: &RunContext) -> Result<(), PipelineError> {
        self.runs.lock().await.insert(ctx.run_id.clone(), ctx.clone());
        Ok(())
    }

    async fn load(&self, run_id: &RunId) -> Result<Option<RunContext>, PipelineError> {
        Ok(self.runs.lock().await.get(run_id).cloned())
    }

    async fn list_suspended(&self) -> Result<Vec<RunContext>, PipelineError> {
        let runs = self.runs.lock().await;
        let mut suspended: Vec<RunContext> = runs
            .values()
            .filter(|c| c.status == RunStatus::Suspended)
            .cloned()
            .collect();
        suspended.sort_by_key(|c| c.created_at);
        Ok(suspended)
    }
}

pub struct FileRunStore {
    dir: PathBuf,
}

impl FileRunStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, run_id: &RunId) -> PathBuf {
        self.dir.join(format!("{}.json", run_id.as_str()))
    }
}

#[async_trait]
impl RunStore for FileRunStore {
    async fn save(&self, ctx: &RunContext) -> Result<(), PipelineError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(&ctx.run_id);
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(ctx)?;
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(run_id = %ctx.run_id, status = ?ctx.status, "run snapshot saved");
        Ok(())
    }

    async fn load(&self, run_id: &RunId) -> Result<Option<RunContext>, PipelineError> {
        match tokio::fs::read(self.path_for(run_id)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_suspended(&self) -> Result<Vec<RunContext>, PipelineError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut suspended = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            let bytes = tokio::fs::read(&path).await?;
            match serde_json::from_slice::<RunContext>(&bytes) {
                Ok(ctx) if ctx.status == RunStatus::Suspended => suspended.push(ctx),
                Ok(_) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable run snapshot"),
            }
        }
        suspended.sort_by_key(|c| c.created_at);
        Ok(suspended)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn suspended(raw: &str) -> RunContext {
        let mut ctx = RunContext::new(raw, None, None);
        ctx.status = RunStatus::Suspended;
        ctx
    }

    #[tokio::test]
    async fn memory_store_round_trip() {
        let store = MemoryRunStore::new();
        let ctx = suspended("Find sqrt(x) for all x");
        store.save(&ctx).await.unwrap();
        store.save(&RunContext::new("1 + 1", None, None)).await.unwrap();

        assert_eq!(store.load(&ctx.run_id).await.unwrap(), Some(ctx.clone()));
        let listed = store.list_suspended().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].run_id, ctx.run_id);
        assert!(store.load(&RunId::from("missing")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = suspended("Find sqrt(x) for all x");
        FileRunStore::new(dir.path()).save(&ctx).await.unwrap();

        let reopened = FileRunStore::new(dir.path());
        assert_eq!(reopened.load(&ctx.run_id).await.unwrap(), Some(ctx.clone()));
        assert_eq!(reopened.list_suspended().await.unwrap().len(), 1);
        assert!(!dir.path().join(format!("{}.json.tmp", ctx.run_id)).exists());
    }

    #[tokio::test]
    async fn file_store_skips_junk() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("junk.json"), b"{").await.unwrap();
        tokio::fs::write(dir.path().join("notes.txt"), b"hello").await.unwrap();
        let store = FileRunStore::new(dir.path());
        assert!(store.list_suspended().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_dir_lists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRunStore::new(dir.path().join("runs"));
        assert!(store.list_suspended().await.unwrap().is_empty());
        assert!(store.load(&RunId::new()).await.unwrap().is_none());
    }
}
