use crate::util::now_rfc3339;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

pub const LOCK_FILE_NAME: &str = ".a11y-batch.lock";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockInfo {
    pub pid: u32,
    pub hostname: String,
    pub started_at: String,
}

/// Advisory single-instance lock for a working directory. The lock file's
/// existence is the mutex: acquisition never overwrites a live lock, and a
/// stale file left by a crashed process must be cleared by hand (the info it
/// carries identifies the owner).
pub struct LockManager {
    path: PathBuf,
}

impl LockManager {
    pub fn new(dir: &Path) -> Self {
        Self {
            path: dir.join(LOCK_FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns false if another live lock exists; the caller must abort.
    pub fn acquire(&self) -> Result<bool> {
        let mut file = match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("creating lock file: {}", self.path.display()));
            }
        };

        let info = LockInfo {
            pid: std::process::id(),
            hostname: hostname(),
            started_at: now_rfc3339(),
        };
        let raw = serde_json::to_string_pretty(&info).with_context(|| "serializing lock info")?;
        file.write_all(raw.as_bytes())
            .with_context(|| format!("writing lock file: {}", self.path.display()))?;
        Ok(true)
    }

    pub fn read_info(&self) -> Result<Option<LockInfo>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("reading lock file: {}", self.path.display()))?;
        match serde_json::from_str(&raw) {
            Ok(info) => Ok(Some(info)),
            Err(err) => {
                warn!("unreadable lock info in {}: {err}", self.path.display());
                Ok(None)
            }
        }
    }

    /// Callers must release on every exit path, including failure; a leaked
    /// lock blocks all future runs until removed manually.
    pub fn release(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                Err(e).with_context(|| format!("removing lock file: {}", self.path.display()))
            }
        }
    }
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}
