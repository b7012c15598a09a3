use a11y_batch::agent::{AgentDiag, AgentInvocation, AgentInvoker, ErrorKind};
use a11y_batch::config::Config;
use a11y_batch::dirscan;
use a11y_batch::lock::{LOCK_FILE_NAME, LockManager};
use a11y_batch::processor::{MiniBatchProcessor, Sleeper};
use anyhow::Result;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::path::Path;
use std::time::Duration;

struct MockAgent {
    responses: RefCell<VecDeque<AgentInvocation>>,
}

impl AgentInvoker for MockAgent {
    fn doctor(&self) -> Result<AgentDiag> {
        Ok(AgentDiag {
            command: "mock".into(),
            available: true,
            version: None,
            error: None,
        })
    }

    fn invoke(&self, _prompt: &str) -> Result<AgentInvocation> {
        Ok(self
            .responses
            .borrow_mut()
            .pop_front()
            .expect("unexpected agent invocation"))
    }
}

struct NoSleep;
impl Sleeper for NoSleep {
    fn sleep(&self, _d: Duration) {}
}

fn write_input(path: &Path, ids: &[&str]) {
    let mut raw = String::from("job_id,url,compliance_level,contact_email,created_at\n");
    for id in ids {
        raw.push_str(&format!("{id},https://example.org/{id},AA,,\n"));
    }
    std::fs::write(path, raw).unwrap();
}

fn result_json(job_ids: &[&str]) -> String {
    let results: Vec<serde_json::Value> = job_ids
        .iter()
        .map(|id| {
            serde_json::json!({
                "job_id": id,
                "url": format!("https://example.org/{id}"),
                "compliance_level": "AA",
                "issues": [],
            })
        })
        .collect();
    serde_json::to_string(&results).unwrap()
}

#[test]
fn one_pass_relocates_files_by_outcome() {
    let dir = tempfile::tempdir().unwrap();
    write_input(&dir.path().join("a.csv"), &["a1"]);
    write_input(&dir.path().join("b.csv"), &["b1"]);

    let mut cfg = Config::default();
    cfg.retry.max_retries = 0;
    cfg.batching.mini_batch_delay_seconds = 0;
    cfg.global.print_summary = false;

    // Files process in lexicographic order: a.csv succeeds, b.csv fails.
    let agent = MockAgent {
        responses: RefCell::new(
            vec![
                AgentInvocation::ok(result_json(&["a1"]), 10),
                AgentInvocation::failed(ErrorKind::Timeout, "agent timed out".into(), 10),
            ]
            .into(),
        ),
    };
    let processor = MiniBatchProcessor::new(&cfg, agent, NoSleep);

    dirscan::watch(&cfg, &processor, dir.path(), true).unwrap();

    assert!(dir.path().join("processed").join("a.csv").exists());
    assert!(dir.path().join("failed").join("b.csv").exists());
    assert!(!dir.path().join("a.csv").exists());
    assert!(!dir.path().join("b.csv").exists());

    // Findings land under the watched directory's out dir.
    assert!(dir.path().join("out").join("a-findings.csv").exists());

    // The session lock is released on the way out.
    assert!(!dir.path().join(LOCK_FILE_NAME).exists());
}

#[test]
fn watch_aborts_when_another_run_holds_the_lock() {
    let dir = tempfile::tempdir().unwrap();
    let foreign = LockManager::new(dir.path());
    assert!(foreign.acquire().unwrap());

    let cfg = Config::default();
    let agent = MockAgent {
        responses: RefCell::new(VecDeque::new()),
    };
    let processor = MiniBatchProcessor::new(&cfg, agent, NoSleep);

    let err = dirscan::watch(&cfg, &processor, dir.path(), true).unwrap_err();
    assert!(err.to_string().contains("another run is active"));

    // The foreign lock is left untouched.
    assert!(foreign.read_info().unwrap().is_some());
    foreign.release().unwrap();
}
