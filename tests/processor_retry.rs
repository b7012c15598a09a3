use a11y_batch::agent::{AgentDiag, AgentInvocation, AgentInvoker, ErrorKind};
use a11y_batch::batch::organize_batches;
use a11y_batch::checkpoint::CheckpointManager;
use a11y_batch::config::Config;
use a11y_batch::parser::{ComplianceLevel, PendingScan};
use a11y_batch::processor::{MiniBatchProcessor, Sleeper, backoff_delay};
use anyhow::Result;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

struct MockAgent {
    responses: RefCell<VecDeque<AgentInvocation>>,
}

impl MockAgent {
    fn new(responses: Vec<AgentInvocation>) -> Self {
        Self {
            responses: RefCell::new(responses.into()),
        }
    }
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

#[derive(Clone, Default)]
struct RecordingSleeper {
    slept: Rc<RefCell<Vec<Duration>>>,
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, d: Duration) {
        self.slept.borrow_mut().push(d);
    }
}

fn mk_scans(n: usize) -> Vec<PendingScan> {
    (0..n)
        .map(|i| PendingScan {
            job_id: format!("job-{i}"),
            url: format!("https://example.org/page-{i}"),
            compliance_level: ComplianceLevel::AA,
            contact_email: None,
            created_at: None,
        })
        .collect()
}

fn result_json(job_ids: &[&str]) -> String {
    let results: Vec<serde_json::Value> = job_ids
        .iter()
        .map(|id| {
            serde_json::json!({
                "job_id": id,
                "url": format!("https://example.org/{id}"),
                "page_title": "Example",
                "compliance_level": "AA",
                "summary": "ok",
                "remediation_plan": "none",
                "issues": [],
            })
        })
        .collect();
    serde_json::to_string(&results).unwrap()
}

fn rate_limited() -> AgentInvocation {
    AgentInvocation::failed(ErrorKind::RateLimit, "agent exited with 429".into(), 10)
}

#[test]
fn backoff_bases_depend_on_error_kind() {
    let cfg = Config::default();
    assert_eq!(
        backoff_delay(&cfg, 1, ErrorKind::RateLimit),
        Duration::from_secs(60)
    );
    assert_eq!(
        backoff_delay(&cfg, 2, ErrorKind::RateLimit),
        Duration::from_secs(120)
    );
    assert_eq!(
        backoff_delay(&cfg, 3, ErrorKind::RateLimit),
        Duration::from_secs(240)
    );
    assert_eq!(
        backoff_delay(&cfg, 1, ErrorKind::Timeout),
        Duration::from_secs(5)
    );
    assert_eq!(
        backoff_delay(&cfg, 2, ErrorKind::ProcessCrash),
        Duration::from_secs(10)
    );
    assert_eq!(
        backoff_delay(&cfg, 3, ErrorKind::Unknown),
        Duration::from_secs(20)
    );
}

#[test]
fn rate_limit_exhaustion_fails_every_job_with_the_last_error() {
    let mut cfg = Config::default();
    cfg.retry.max_retries = 3;

    let agent = MockAgent::new(vec![
        rate_limited(),
        rate_limited(),
        rate_limited(),
        rate_limited(),
    ]);
    let sleeper = RecordingSleeper::default();
    let slept = sleeper.slept.clone();
    let processor = MiniBatchProcessor::new(&cfg, agent, sleeper);

    let batches = organize_batches(&mk_scans(3), 10, 10);
    let outcome = processor.process_mini_batch(&batches[0].mini_batches[0], 1);

    assert_eq!(
        *slept.borrow(),
        vec![
            Duration::from_secs(60),
            Duration::from_secs(120),
            Duration::from_secs(240),
        ]
    );
    assert_eq!(outcome.retry_count, 3);
    assert!(outcome.results.is_empty());
    assert_eq!(outcome.failed_scans.len(), 3);
    for f in &outcome.failed_scans {
        assert_eq!(f.error_kind, ErrorKind::RateLimit);
    }
}

#[test]
fn transient_failure_then_success_counts_retries() {
    let mut cfg = Config::default();
    cfg.retry.max_retries = 3;

    let agent = MockAgent::new(vec![
        AgentInvocation::failed(ErrorKind::Timeout, "agent timed out after 600s".into(), 10),
        AgentInvocation::ok(result_json(&["job-0", "job-1"]), 10),
    ]);
    let sleeper = RecordingSleeper::default();
    let slept = sleeper.slept.clone();
    let processor = MiniBatchProcessor::new(&cfg, agent, sleeper);

    let batches = organize_batches(&mk_scans(2), 10, 10);
    let outcome = processor.process_mini_batch(&batches[0].mini_batches[0], 1);

    assert_eq!(*slept.borrow(), vec![Duration::from_secs(5)]);
    assert_eq!(outcome.retry_count, 1);
    assert_eq!(outcome.results.len(), 2);
    assert!(outcome.failed_scans.is_empty());
}

#[test]
fn missing_job_in_output_is_terminal_invalid_output() {
    let cfg = Config::default();
    let agent = MockAgent::new(vec![AgentInvocation::ok(
        result_json(&["job-0", "job-2"]),
        10,
    )]);
    let processor = MiniBatchProcessor::new(&cfg, agent, RecordingSleeper::default());

    let batches = organize_batches(&mk_scans(3), 10, 10);
    let outcome = processor.process_mini_batch(&batches[0].mini_batches[0], 1);

    assert_eq!(outcome.retry_count, 0);
    assert_eq!(outcome.results.len(), 2);
    assert_eq!(outcome.failed_scans.len(), 1);
    let failed = &outcome.failed_scans[0];
    assert_eq!(failed.job_id, "job-1");
    assert_eq!(failed.error_kind, ErrorKind::InvalidOutput);
    assert_eq!(failed.error_message, "Scan result not found in agent output");
}

#[test]
fn outcome_always_covers_exactly_the_input_set() {
    let cfg = Config::default();
    // Output includes an unrequested id and omits one requested id.
    let agent = MockAgent::new(vec![AgentInvocation::ok(
        result_json(&["job-1", "job-0", "intruder"]),
        10,
    )]);
    let processor = MiniBatchProcessor::new(&cfg, agent, RecordingSleeper::default());

    let batches = organize_batches(&mk_scans(3), 10, 10);
    let outcome = processor.process_mini_batch(&batches[0].mini_batches[0], 1);

    let mut seen: Vec<&str> = outcome
        .results
        .iter()
        .map(|r| r.job_id.as_str())
        .chain(outcome.failed_scans.iter().map(|f| f.job_id.as_str()))
        .collect();
    seen.sort();
    assert_eq!(seen, vec!["job-0", "job-1", "job-2"]);
}

#[test]
fn unparseable_output_retries_as_unknown() {
    let mut cfg = Config::default();
    cfg.retry.max_retries = 1;

    let agent = MockAgent::new(vec![
        AgentInvocation::ok("no json here".into(), 10),
        AgentInvocation::ok(result_json(&["job-0"]), 10),
    ]);
    let sleeper = RecordingSleeper::default();
    let slept = sleeper.slept.clone();
    let processor = MiniBatchProcessor::new(&cfg, agent, sleeper);

    let batches = organize_batches(&mk_scans(1), 10, 10);
    let outcome = processor.process_mini_batch(&batches[0].mini_batches[0], 1);

    // UNKNOWN base, not the rate-limit base.
    assert_eq!(*slept.borrow(), vec![Duration::from_secs(5)]);
    assert_eq!(outcome.results.len(), 1);
    assert_eq!(outcome.retry_count, 1);
}

#[test]
fn batch_flushes_checkpoint_with_partial_successes() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = Config::default();
    cfg.retry.max_retries = 0;
    cfg.batching.mini_batch_delay_seconds = 7;

    // First mini-batch succeeds, second exhausts immediately.
    let agent = MockAgent::new(vec![
        AgentInvocation::ok(result_json(&["job-0", "job-1"]), 10),
        AgentInvocation::failed(ErrorKind::ProcessCrash, "agent exited with 1".into(), 10),
    ]);
    let sleeper = RecordingSleeper::default();
    let slept = sleeper.slept.clone();
    let processor = MiniBatchProcessor::new(&cfg, agent, sleeper);

    let source = dir.path().join("pending.csv");
    let mut checkpoint = CheckpointManager::new(dir.path(), &source);
    let batches = organize_batches(&mk_scans(4), 10, 2);

    let outcomes = processor
        .process_all_batches(&batches, &mut checkpoint)
        .unwrap();

    // One pacing sleep between the two mini-batches, none after the last.
    assert_eq!(*slept.borrow(), vec![Duration::from_secs(7)]);
    assert_eq!(outcomes.len(), 2);

    assert!(checkpoint.path().exists());
    assert!(checkpoint.is_processed("job-0"));
    assert!(checkpoint.is_processed("job-1"));
    assert!(!checkpoint.is_processed("job-2"));
    assert_eq!(checkpoint.checkpoint().last_batch, 1);
    assert_eq!(checkpoint.checkpoint().last_mini_batch, 2);
}
