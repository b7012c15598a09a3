use super::{AgentDiag, AgentInvocation, AgentInvoker, ErrorKind};
use crate::config::Config;
use anyhow::{Context, Result, anyhow};
use std::io::Read;
use std::process::{Child, Command, Output, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Subprocess transport for the agent: the prompt goes to stdin, the
/// response comes back on stdout. Timeouts kill the child; exit status and
/// stderr decide the error kind.
pub struct ProcessAgent {
    cfg: Config,
}

enum WaitOutcome {
    Finished(Output),
    TimedOut,
}

impl ProcessAgent {
    pub fn new(cfg: &Config) -> Result<Self> {
        if cfg.agent.command.trim().is_empty() {
            return Err(anyhow!("agent.command is empty"));
        }
        Ok(Self { cfg: cfg.clone() })
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.cfg.agent.command);
        cmd.args(&self.cfg.agent.args);
        for (k, v) in &self.cfg.agent.env {
            cmd.env(k, v);
        }
        cmd
    }
}

impl AgentInvoker for ProcessAgent {
    fn doctor(&self) -> Result<AgentDiag> {
        let command = self.cfg.agent.command.clone();
        match Command::new(&command).arg("--version").output() {
            Ok(out) if out.status.success() => Ok(AgentDiag {
                command,
                available: true,
                version: Some(String::from_utf8_lossy(&out.stdout).trim().to_string()),
                error: None,
            }),
            Ok(out) => Ok(AgentDiag {
                command,
                available: false,
                version: None,
                error: Some(String::from_utf8_lossy(&out.stderr).trim().to_string()),
            }),
            Err(err) => Ok(AgentDiag {
                command,
                available: false,
                version: None,
                error: Some(err.to_string()),
            }),
        }
    }

    fn invoke(&self, prompt: &str) -> Result<AgentInvocation> {
        let started = Instant::now();
        let timeout_seconds = self.cfg.agent.timeout_seconds;
        debug!(
            "agent invoke command={} timeout={}s prompt_bytes={}",
            self.cfg.agent.command,
            timeout_seconds,
            prompt.len()
        );

        let mut cmd = self.command();
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let mut child = match cmd.spawn() {
            Ok(c) => c,
            Err(err) => {
                return Ok(AgentInvocation::failed(
                    ErrorKind::ProcessCrash,
                    format!("spawning agent: {err}"),
                    elapsed_ms(started),
                ));
            }
        };

        {
            let mut stdin = child.stdin.take().ok_or_else(|| anyhow!("no stdin"))?;
            use std::io::Write;
            stdin.write_all(prompt.as_bytes())?;
            stdin.flush().ok();
        }

        let outcome = if timeout_seconds > 0 {
            wait_with_timeout(&mut child, Duration::from_secs(timeout_seconds))?
        } else {
            WaitOutcome::Finished(
                child
                    .wait_with_output()
                    .with_context(|| "waiting for agent")?,
            )
        };

        match outcome {
            WaitOutcome::TimedOut => Ok(AgentInvocation::failed(
                ErrorKind::Timeout,
                format!("agent timed out after {timeout_seconds}s"),
                elapsed_ms(started),
            )),
            WaitOutcome::Finished(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
                if self.cfg.debug.keep_agent_stderr && !stderr.is_empty() {
                    debug!("agent stderr: {}", stderr.trim());
                }

                if output.status.success() {
                    Ok(AgentInvocation::ok(
                        String::from_utf8_lossy(&output.stdout).into_owned(),
                        elapsed_ms(started),
                    ))
                } else {
                    let kind = classify_failure(&stderr);
                    Ok(AgentInvocation::failed(
                        kind,
                        format!(
                            "agent exited with {}: {}",
                            output.status,
                            truncate(stderr.trim(), 400)
                        ),
                        elapsed_ms(started),
                    ))
                }
            }
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

fn classify_failure(stderr: &str) -> ErrorKind {
    let lower = stderr.to_ascii_lowercase();
    if lower.contains("rate limit")
        || lower.contains("rate_limit")
        || lower.contains("too many requests")
        || lower.contains("429")
    {
        ErrorKind::RateLimit
    } else {
        ErrorKind::ProcessCrash
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

fn wait_with_timeout(child: &mut Child, timeout: Duration) -> Result<WaitOutcome> {
    // Drain pipes while waiting so a chatty agent can't deadlock the child
    // on a full stdout/stderr buffer.
    let stdout_reader = child.stdout.take();
    let stderr_reader = child.stderr.take();

    let stdout_thread = std::thread::spawn(move || -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        if let Some(mut out) = stdout_reader {
            out.read_to_end(&mut buf).with_context(|| "read stdout")?;
        }
        Ok(buf)
    });

    let stderr_thread = std::thread::spawn(move || -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        if let Some(mut err) = stderr_reader {
            err.read_to_end(&mut buf).with_context(|| "read stderr")?;
        }
        Ok(buf)
    });

    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait().with_context(|| "try_wait")? {
            let stdout = stdout_thread
                .join()
                .map_err(|_| anyhow!("stdout reader thread panicked"))??;
            let stderr = stderr_thread
                .join()
                .map_err(|_| anyhow!("stderr reader thread panicked"))??;
            return Ok(WaitOutcome::Finished(Output {
                status,
                stdout,
                stderr,
            }));
        }

        if start.elapsed() > timeout {
            warn!("agent process timed out after {:?}", timeout);
            let _ = child.kill();
            let _ = child.wait();
            let _ = stdout_thread.join();
            let _ = stderr_thread.join();
            return Ok(WaitOutcome::TimedOut);
        }

        std::thread::sleep(Duration::from_millis(50));
    }
}
