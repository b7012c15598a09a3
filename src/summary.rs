use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    PartialFailure,
    CompleteFailure,
}

/// The run's externally visible contract: this JSON is the single source of
/// truth for the outcome. A non-`completed` status is not a process-exit
/// error; callers inspect `failed`/`failed_files` to decide follow-up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingSummary {
    pub status: RunStatus,
    pub files_processed: usize,
    pub total_urls: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
    pub duration_seconds: f64,
    pub output_files: Vec<String>,
    pub failed_files: Vec<String>,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RunStats {
    pub files_processed: usize,
    pub total_jobs: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
    pub output_files: Vec<String>,
    pub failed_files: Vec<String>,
    pub errors: Vec<String>,
    started: Instant,
}

impl RunStats {
    pub fn new() -> Self {
        Self {
            files_processed: 0,
            total_jobs: 0,
            successful: 0,
            failed: 0,
            skipped: 0,
            output_files: Vec::new(),
            failed_files: Vec::new(),
            errors: Vec::new(),
            started: Instant::now(),
        }
    }
}

impl Default for RunStats {
    fn default() -> Self {
        Self::new()
    }
}

pub fn classify(successful: usize, failed: usize) -> RunStatus {
    if failed == 0 {
        RunStatus::Completed
    } else if successful == 0 {
        RunStatus::CompleteFailure
    } else {
        RunStatus::PartialFailure
    }
}

pub fn generate_summary(stats: &RunStats) -> ProcessingSummary {
    ProcessingSummary {
        status: classify(stats.successful, stats.failed),
        files_processed: stats.files_processed,
        total_urls: stats.total_jobs,
        successful: stats.successful,
        failed: stats.failed,
        skipped: stats.skipped,
        duration_seconds: round_seconds(stats.started.elapsed()),
        output_files: stats.output_files.clone(),
        failed_files: stats.failed_files.clone(),
        errors: stats.errors.clone(),
    }
}

/// Wall millis rounded to two decimal places of seconds.
pub fn round_seconds(d: Duration) -> f64 {
    (d.as_millis() as f64 / 10.0).round() / 100.0
}

pub fn json_summary(summary: &ProcessingSummary) -> Result<String> {
    Ok(serde_json::to_string_pretty(summary)?)
}
