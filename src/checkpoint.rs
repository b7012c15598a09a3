use crate::util::{now_rfc3339, sha256_hex};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub input_file: String,
    pub processed_scan_ids: Vec<String>,
    pub last_batch: u32,
    pub last_mini_batch: u32,
    pub started_at: String,
    pub updated_at: String,
}

/// Durable record of which job ids already completed for one input source.
/// Marks are buffered in memory; `flush` persists them with a
/// write-new-then-rename so a crash mid-write never corrupts the previous
/// state. The file is deleted only on a fully successful run.
pub struct CheckpointManager {
    path: PathBuf,
    state: Checkpoint,
    seen: HashSet<String>,
}

impl CheckpointManager {
    /// The checkpoint file name is derived from a hash of the source path so
    /// it stays stable across interrupted and resumed runs.
    pub fn new(dir: &Path, source: &Path) -> Self {
        let key = sha256_hex(source.display().to_string().as_bytes());
        let path = dir.join(format!(".a11y-batch-checkpoint-{}.json", &key[..16]));
        let input_file = source
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| source.display().to_string());
        let now = now_rfc3339();
        Self {
            path,
            state: Checkpoint {
                input_file,
                processed_scan_ids: Vec::new(),
                last_batch: 0,
                last_mini_batch: 0,
                started_at: now.clone(),
                updated_at: now,
            },
            seen: HashSet::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn checkpoint(&self) -> &Checkpoint {
        &self.state
    }

    /// Loads persisted state if present. Returns true when an earlier
    /// incomplete run left a checkpoint behind.
    pub fn load(&mut self) -> Result<bool> {
        if !self.path.exists() {
            return Ok(false);
        }
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("reading checkpoint: {}", self.path.display()))?;
        let state: Checkpoint = serde_json::from_str(&raw)
            .with_context(|| format!("parsing checkpoint: {}", self.path.display()))?;
        self.seen = state.processed_scan_ids.iter().cloned().collect();
        self.state = state;
        debug!(
            "loaded checkpoint {} with {} processed ids",
            self.path.display(),
            self.seen.len()
        );
        Ok(true)
    }

    pub fn is_processed(&self, job_id: &str) -> bool {
        self.seen.contains(job_id)
    }

    pub fn processed_count(&self) -> usize {
        self.state.processed_scan_ids.len()
    }

    /// Buffers ids in memory; processed ids only ever accumulate.
    pub fn mark_processed<I>(&mut self, ids: I)
    where
        I: IntoIterator<Item = String>,
    {
        for id in ids {
            if self.seen.insert(id.clone()) {
                self.state.processed_scan_ids.push(id);
            }
        }
    }

    pub fn set_position(&mut self, batch: u32, mini_batch: u32) {
        self.state.last_batch = batch;
        self.state.last_mini_batch = mini_batch;
    }

    pub fn flush(&mut self) -> Result<()> {
        self.state.updated_at = now_rfc3339();
        let raw = serde_json::to_string_pretty(&self.state)
            .with_context(|| "serializing checkpoint")?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, raw)
            .with_context(|| format!("writing checkpoint: {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("replacing checkpoint: {}", self.path.display()))?;
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                Err(e).with_context(|| format!("removing checkpoint: {}", self.path.display()))
            }
        }
    }
}
