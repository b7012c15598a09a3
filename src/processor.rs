use crate::{
    agent::{AgentInvoker, ErrorKind},
    batch::{Batch, MiniBatch},
    checkpoint::CheckpointManager,
    config::Config,
    prompt,
    response::{self, ScanResult},
};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedScan {
    pub job_id: String,
    pub url: String,
    pub error_kind: ErrorKind,
    pub error_message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MiniBatchOutcome {
    pub mini_batch_number: u32,
    pub results: Vec<ScanResult>,
    pub failed_scans: Vec<FailedScan>,
    pub retry_count: u32,
}

/// Suspension seam: retry backoff and inter-mini-batch pacing go through
/// here so the policy is testable without actually sleeping.
pub trait Sleeper {
    fn sleep(&self, d: Duration);
}

pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, d: Duration) {
        std::thread::sleep(d);
    }
}

/// Retry delay for the given 1-based attempt. Rate-limit failures back off
/// from a 60s base (60, 120, 240, ...); everything else from a 5s base
/// (5, 10, 20, ...), both configurable.
pub fn backoff_delay(cfg: &Config, attempt: u32, kind: ErrorKind) -> Duration {
    let base = match kind {
        ErrorKind::RateLimit => cfg.retry.rate_limit_delay_seconds,
        _ => cfg.retry.base_delay_seconds,
    };
    let exp = attempt.saturating_sub(1).min(16);
    Duration::from_secs(base.saturating_mul(1u64 << exp))
}

struct AttemptFailure {
    kind: ErrorKind,
    message: String,
}

/// The execution engine. Mini-batches run strictly sequentially; there is no
/// parallel agent invocation, which keeps ordering trivially input-order and
/// stays under externally imposed request-rate limits.
pub struct MiniBatchProcessor<A: AgentInvoker, S: Sleeper> {
    cfg: Config,
    agent: A,
    sleeper: S,
}

impl<A: AgentInvoker, S: Sleeper> MiniBatchProcessor<A, S> {
    pub fn new(cfg: &Config, agent: A, sleeper: S) -> Self {
        Self {
            cfg: cfg.clone(),
            agent,
            sleeper,
        }
    }

    pub fn process_all_batches(
        &self,
        batches: &[Batch],
        checkpoint: &mut CheckpointManager,
    ) -> Result<Vec<MiniBatchOutcome>> {
        let mut outcomes = Vec::new();
        for batch in batches {
            outcomes.extend(self.process_batch(batch, checkpoint)?);
        }
        Ok(outcomes)
    }

    /// Runs every mini-batch of one batch, then marks all job ids that
    /// succeeded anywhere in the batch and flushes the checkpoint as one
    /// durable unit. Partial successes inside a failing batch still
    /// checkpoint, so resume never redoes completed work. Only checkpoint
    /// I/O failure is fatal here.
    pub fn process_batch(
        &self,
        batch: &Batch,
        checkpoint: &mut CheckpointManager,
    ) -> Result<Vec<MiniBatchOutcome>> {
        info!(
            "batch {} jobs={} mini_batches={}",
            batch.batch_number,
            batch.scans.len(),
            batch.mini_batches.len()
        );

        let mut outcomes = Vec::new();
        for (i, mini) in batch.mini_batches.iter().enumerate() {
            outcomes.push(self.process_mini_batch(mini, batch.batch_number));

            // Pacing only; skipped after the last mini-batch of the batch.
            if i + 1 < batch.mini_batches.len() {
                let delay = Duration::from_secs(self.cfg.batching.mini_batch_delay_seconds);
                if !delay.is_zero() {
                    debug!("sleeping {:?} before next mini-batch", delay);
                    self.sleeper.sleep(delay);
                }
            }
        }

        let succeeded: Vec<String> = outcomes
            .iter()
            .flat_map(|o| o.results.iter().map(|r| r.job_id.clone()))
            .collect();
        if let Some(last) = batch.mini_batches.last() {
            checkpoint.set_position(batch.batch_number, last.mini_batch_number);
        }
        checkpoint.mark_processed(succeeded);
        checkpoint.flush()?;

        Ok(outcomes)
    }

    /// One mini-batch: build the prompt, invoke the agent, parse and
    /// reconcile. Invocation failures retry with backoff; once retries are
    /// exhausted every job in the mini-batch fails with the last error. All
    /// failures are absorbed into the outcome, never propagated.
    pub fn process_mini_batch(&self, mini: &MiniBatch, batch_number: u32) -> MiniBatchOutcome {
        info!(
            "mini-batch {}.{} jobs={}",
            batch_number,
            mini.mini_batch_number,
            mini.scans.len()
        );

        let mut retries = 0u32;
        loop {
            match self.attempt(mini) {
                Ok(results) => return reconcile(mini, results, retries),
                Err(fail) => {
                    if retries >= self.cfg.retry.max_retries {
                        warn!(
                            "mini-batch {}.{} failed after {} retries ({}): {}",
                            batch_number,
                            mini.mini_batch_number,
                            retries,
                            fail.kind.as_str(),
                            fail.message
                        );
                        return fail_all(mini, &fail, retries);
                    }
                    retries += 1;
                    let delay = backoff_delay(&self.cfg, retries, fail.kind);
                    warn!(
                        "mini-batch {}.{} attempt failed ({}): {}; retry {}/{} in {:?}",
                        batch_number,
                        mini.mini_batch_number,
                        fail.kind.as_str(),
                        fail.message,
                        retries,
                        self.cfg.retry.max_retries,
                        delay
                    );
                    self.sleeper.sleep(delay);
                }
            }
        }
    }

    fn attempt(&self, mini: &MiniBatch) -> std::result::Result<Vec<ScanResult>, AttemptFailure> {
        let prompt = prompt::build_mini_batch_prompt(mini).map_err(|e| AttemptFailure {
            kind: ErrorKind::Unknown,
            message: format!("building prompt: {e:#}"),
        })?;

        let invocation = self.agent.invoke(&prompt).map_err(|e| AttemptFailure {
            kind: ErrorKind::Unknown,
            message: format!("invoking agent: {e:#}"),
        })?;

        if !invocation.success {
            return Err(AttemptFailure {
                kind: invocation.error_kind.unwrap_or(ErrorKind::Unknown),
                message: invocation
                    .error
                    .unwrap_or_else(|| "agent invocation failed".to_string()),
            });
        }
        debug!("agent call finished in {}ms", invocation.duration_ms);

        let output = invocation.output.unwrap_or_default();
        response::parse_scan_results(&output).map_err(|e| AttemptFailure {
            kind: ErrorKind::Unknown,
            message: format!("parsing agent output: {e:#}"),
        })
    }
}

/// Matches parsed results against the mini-batch's input set by job id. A
/// short response is never silently accepted: every requested job missing
/// from the output becomes a terminal INVALID_OUTPUT failure, while its
/// siblings keep their results.
fn reconcile(mini: &MiniBatch, results: Vec<ScanResult>, retry_count: u32) -> MiniBatchOutcome {
    let mut by_id: HashMap<String, ScanResult> = HashMap::new();
    for r in results {
        if by_id.contains_key(&r.job_id) {
            warn!("duplicate job id in agent output dropped: {}", r.job_id);
            continue;
        }
        by_id.insert(r.job_id.clone(), r);
    }

    let mut kept = Vec::new();
    let mut failed = Vec::new();
    for scan in &mini.scans {
        match by_id.remove(&scan.job_id) {
            Some(result) => kept.push(result),
            None => failed.push(FailedScan {
                job_id: scan.job_id.clone(),
                url: scan.url.clone(),
                error_kind: ErrorKind::InvalidOutput,
                error_message: "Scan result not found in agent output".to_string(),
            }),
        }
    }
    for id in by_id.keys() {
        warn!("agent output contained unrequested job id: {id}");
    }

    MiniBatchOutcome {
        mini_batch_number: mini.mini_batch_number,
        results: kept,
        failed_scans: failed,
        retry_count,
    }
}

fn fail_all(mini: &MiniBatch, fail: &AttemptFailure, retry_count: u32) -> MiniBatchOutcome {
    MiniBatchOutcome {
        mini_batch_number: mini.mini_batch_number,
        results: Vec::new(),
        failed_scans: mini
            .scans
            .iter()
            .map(|scan| FailedScan {
                job_id: scan.job_id.clone(),
                url: scan.url.clone(),
                error_kind: fail.kind,
                error_message: fail.message.clone(),
            })
            .collect(),
        retry_count,
    }
}
