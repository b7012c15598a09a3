use crate::{
    agent::AgentInvoker,
    config::Config,
    lock::{LockInfo, LockManager},
    processor::{MiniBatchProcessor, Sleeper},
    runner, summary,
    util::ensure_dir,
};
use anyhow::{Context, Result, anyhow, bail};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

pub const PROCESSED_DIR: &str = "processed";
pub const FAILED_DIR: &str = "failed";

#[derive(Debug)]
pub struct DirScan {
    pub files: Vec<PathBuf>,
    pub total_found: usize,
}

/// Lists eligible input files directly under `dir`, sorted lexicographically
/// so processing order is deterministic regardless of creation order.
pub fn scan_directory(dir: &Path, extensions: &[String]) -> Result<DirScan> {
    let entries =
        std::fs::read_dir(dir).with_context(|| format!("reading directory: {}", dir.display()))?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("reading directory: {}", dir.display()))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(ext) = path.extension().and_then(|s| s.to_str()) else {
            continue;
        };
        if extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)) {
            files.push(path);
        }
    }
    files.sort();
    let total_found = files.len();
    Ok(DirScan { files, total_found })
}

pub fn ensure_subdirectories(dir: &Path) -> Result<()> {
    ensure_dir(&dir.join(PROCESSED_DIR))?;
    ensure_dir(&dir.join(FAILED_DIR))
}

pub fn move_to_processed(file: &Path, dir: &Path) -> Result<PathBuf> {
    relocate(file, &dir.join(PROCESSED_DIR))
}

pub fn move_to_failed(file: &Path, dir: &Path) -> Result<PathBuf> {
    relocate(file, &dir.join(FAILED_DIR))
}

fn relocate(file: &Path, target_dir: &Path) -> Result<PathBuf> {
    let name = file
        .file_name()
        .ok_or_else(|| anyhow!("input has no file name: {}", file.display()))?;
    let mut dest = target_dir.join(name);
    if dest.exists() {
        // Keep the earlier file; suffix the newcomer.
        let stem = file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let ext = file
            .extension()
            .map(|s| format!(".{}", s.to_string_lossy()))
            .unwrap_or_default();
        let secs = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        dest = target_dir.join(format!("{stem}-{secs}{ext}"));
    }
    std::fs::rename(file, &dest)
        .with_context(|| format!("moving {} to {}", file.display(), dest.display()))?;
    Ok(dest)
}

/// Continuous-mode controller: one run per discovered file, relocation by
/// outcome, one advisory lock held for the whole session. With `once` set a
/// single pass is made; otherwise the directory is polled until the process
/// is terminated.
pub fn watch<A: AgentInvoker, S: Sleeper>(
    cfg: &Config,
    processor: &MiniBatchProcessor<A, S>,
    dir: &Path,
    once: bool,
) -> Result<()> {
    ensure_subdirectories(dir)?;

    let lock = LockManager::new(dir);
    if !lock.acquire()? {
        bail!(
            "another run is active: lock {} held{}",
            lock.path().display(),
            describe_holder(lock.read_info()?)
        );
    }

    let result = watch_loop(cfg, processor, dir, once);
    if let Err(err) = lock.release() {
        warn!("releasing lock: {err:#}");
    }
    result
}

fn watch_loop<A: AgentInvoker, S: Sleeper>(
    cfg: &Config,
    processor: &MiniBatchProcessor<A, S>,
    dir: &Path,
    once: bool,
) -> Result<()> {
    let out_dir = resolve_out_dir(cfg, dir);

    loop {
        let scan = scan_directory(dir, &cfg.input.extensions)?;
        if scan.files.is_empty() {
            info!("no eligible input files in {}", dir.display());
        } else {
            info!(
                "found {} input files in {}",
                scan.total_found,
                dir.display()
            );
            let mut stats = summary::RunStats::new();

            for file in &scan.files {
                let run = runner::run_file(cfg, processor, file, &out_dir)?;
                run.fold_into(&mut stats);

                let moved = if run.successful > 0 {
                    move_to_processed(file, dir)?
                } else {
                    move_to_failed(file, dir)?
                };
                info!("moved {} -> {}", file.display(), moved.display());
            }

            let report = summary::generate_summary(&stats);
            if cfg.global.print_summary {
                println!("{}", summary::json_summary(&report)?);
            }
        }

        if once {
            return Ok(());
        }
        std::thread::sleep(Duration::from_secs(cfg.watch.poll_interval_seconds.max(1)));
    }
}

fn resolve_out_dir(cfg: &Config, dir: &Path) -> PathBuf {
    let configured = Path::new(&cfg.paths.out_dir);
    if configured.is_absolute() {
        configured.to_path_buf()
    } else {
        dir.join(configured)
    }
}

pub fn describe_holder(info: Option<LockInfo>) -> String {
    match info {
        Some(info) => format!(
            " by pid {} on {} since {}",
            info.pid, info.hostname, info.started_at
        ),
        None => String::new(),
    }
}
