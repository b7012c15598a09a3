use crate::{
    agent::AgentInvoker,
    batch::organize_batches,
    checkpoint::CheckpointManager,
    config::Config,
    parser,
    processor::{MiniBatchProcessor, Sleeper},
    summary::RunStats,
    transform,
    util::ensure_dir,
};
use anyhow::Result;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Outcome of one input file's run. `source_error` marks a file that could
/// not be read at all; per-job failures are counted, not propagated.
pub struct FileRun {
    pub input: PathBuf,
    pub total_jobs: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
    pub output_file: Option<PathBuf>,
    pub errors: Vec<String>,
    pub source_error: bool,
}

impl FileRun {
    fn source_failure(input: &Path, err: anyhow::Error) -> Self {
        Self {
            input: input.to_path_buf(),
            total_jobs: 0,
            successful: 0,
            failed: 0,
            skipped: 0,
            output_file: None,
            errors: vec![format!("{}: {err:#}", input.display())],
            source_error: true,
        }
    }

    pub fn fold_into(&self, stats: &mut RunStats) {
        stats.files_processed += 1;
        stats.total_jobs += self.total_jobs;
        stats.successful += self.successful;
        stats.failed += self.failed;
        stats.skipped += self.skipped;
        stats.errors.extend(self.errors.iter().cloned());
        if let Some(out) = &self.output_file {
            stats.output_files.push(out.display().to_string());
        }
        if self.source_error || self.successful == 0 {
            stats.failed_files.push(self.input.display().to_string());
        }
    }
}

/// Drives one input file end to end: parse, resume from any checkpoint,
/// organize, process, write results. Errors returned from here are fatal
/// (checkpoint or output I/O); an unreadable input is absorbed into the
/// outcome so directory mode can keep going.
pub fn run_file<A: AgentInvoker, S: Sleeper>(
    cfg: &Config,
    processor: &MiniBatchProcessor<A, S>,
    input: &Path,
    out_dir: &Path,
) -> Result<FileRun> {
    let parsed = match parser::parse_input_file(input) {
        Ok(p) => p,
        Err(err) => {
            warn!("cannot read input {}: {err:#}", input.display());
            return Ok(FileRun::source_failure(input, err));
        }
    };
    info!(
        "parsed {} eligible scans, {} skipped, {} rows from {}",
        parsed.scans.len(),
        parsed.skipped.len(),
        parsed.total_rows,
        input.display()
    );
    for skip in &parsed.skipped {
        warn!("row {} skipped: {}", skip.row_number, skip.reason);
    }

    let dir = working_dir(input);
    let mut checkpoint = CheckpointManager::new(&dir, input);
    let mut scans = parsed.scans;
    if cfg.global.resume && checkpoint.load()? {
        let before = scans.len();
        scans.retain(|s| !checkpoint.is_processed(&s.job_id));
        info!(
            "resuming from {}: {} jobs already processed, {} remaining",
            checkpoint.path().display(),
            before - scans.len(),
            scans.len()
        );
    }

    let batches = organize_batches(&scans, cfg.batching.batch_size, cfg.batching.mini_batch_size);
    let outcomes = processor.process_all_batches(&batches, &mut checkpoint)?;

    let mut results = Vec::new();
    let mut failures = Vec::new();
    for outcome in outcomes {
        results.extend(outcome.results);
        failures.extend(outcome.failed_scans);
    }
    for f in &failures {
        warn!(
            "job {} failed ({}): {}",
            f.job_id,
            f.error_kind.as_str(),
            f.error_message
        );
    }

    let mut output_file = None;
    if !results.is_empty() {
        ensure_dir(out_dir)?;
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "results".to_string());
        let path = out_dir.join(format!("{stem}-findings.csv"));
        let rows = transform::transform_rows(&results, &cfg.agent.model_id)?;
        transform::write_csv(&path, &rows)?;
        info!("wrote {} result rows to {}", rows.len(), path.display());
        output_file = Some(path);
    }

    // The checkpoint belongs to this input until a run finishes it with zero
    // failures; keeping it lets a re-run retry only what failed.
    if failures.is_empty() {
        checkpoint.clear()?;
    }

    Ok(FileRun {
        input: input.to_path_buf(),
        total_jobs: scans.len(),
        successful: results.len(),
        failed: failures.len(),
        skipped: parsed.skipped.len(),
        output_file,
        errors: Vec::new(),
        source_error: false,
    })
}

pub fn working_dir(input: &Path) -> PathBuf {
    match input.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
