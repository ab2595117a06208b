//! Durable per-adapter fetch cursors. Read once at worker start, written
//! only at the CHECKPOINTING transition; the write is the pipeline's
//! commit point.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::ingest::types::Cursor;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Checkpoint {
    pub adapter: String,
    pub cursor: Cursor,
    pub updated_at: u64,
}

#[async_trait::async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn load(&self, adapter: &str) -> Result<Option<Checkpoint>>;
    async fn store(&self, checkpoint: &Checkpoint) -> Result<()>;
}

/// One JSON file per adapter under `dir`. Writes go through a temp file
/// plus rename so a crash mid-write leaves the previous cursor intact.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, adapter: &str) -> PathBuf {
        self.dir.join(format!("{adapter}.json"))
    }
}

#[async_trait::async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn load(&self, adapter: &str) -> Result<Option<Checkpoint>> {
        let path = self.path_for(adapter);
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("reading checkpoint {}", path.display()))?;
        let cp: Checkpoint = serde_json::from_str(&raw)
            .with_context(|| format!("parsing checkpoint {}", path.display()))?;
        Ok(Some(cp))
    }

    async fn store(&self, checkpoint: &Checkpoint) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating checkpoint dir {}", self.dir.display()))?;
        let path = self.path_for(&checkpoint.adapter);
        let tmp = tmp_path(&path);
        let raw = serde_json::to_string_pretty(checkpoint)?;
        std::fs::write(&tmp, raw)
            .with_context(|| format!("writing checkpoint {}", tmp.display()))?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("committing checkpoint {}", path.display()))?;
        Ok(())
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut p = path.as_os_str().to_owned();
    p.push(".tmp");
    PathBuf::from(p)
}

// --- Test helper ---
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    inner: std::sync::Mutex<std::collections::HashMap<String, Checkpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self, adapter: &str) -> Result<Option<Checkpoint>> {
        Ok(self.inner.lock().unwrap().get(adapter).cloned())
    }

    async fn store(&self, checkpoint: &Checkpoint) -> Result<()> {
        self.inner
            .lock()
            .unwrap()
            .insert(checkpoint.adapter.clone(), checkpoint.clone());
        Ok(())
    }
}
