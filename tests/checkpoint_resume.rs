use a11y_batch::checkpoint::CheckpointManager;
use a11y_batch::parser::{ComplianceLevel, PendingScan};

fn mk_scans(ids: &[&str]) -> Vec<PendingScan> {
    ids.iter()
        .map(|id| PendingScan {
            job_id: id.to_string(),
            url: format!("https://example.org/{id}"),
            compliance_level: ComplianceLevel::A,
            contact_email: None,
            created_at: None,
        })
        .collect()
}

#[test]
fn flush_and_reload_round_trips_processed_ids() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("pending.csv");

    let mut cp = CheckpointManager::new(dir.path(), &source);
    assert!(!cp.load().unwrap());
    cp.mark_processed(["a".to_string(), "b".to_string()]);
    cp.set_position(1, 2);
    cp.flush().unwrap();

    let mut reloaded = CheckpointManager::new(dir.path(), &source);
    assert!(reloaded.load().unwrap());
    assert!(reloaded.is_processed("a"));
    assert!(reloaded.is_processed("b"));
    assert!(!reloaded.is_processed("c"));
    assert_eq!(reloaded.checkpoint().last_batch, 1);
    assert_eq!(reloaded.checkpoint().last_mini_batch, 2);
    assert_eq!(reloaded.checkpoint().input_file, "pending.csv");
}

#[test]
fn resume_is_idempotent_and_monotonic() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("pending.csv");

    let mut cp = CheckpointManager::new(dir.path(), &source);
    cp.mark_processed(["a".to_string()]);
    cp.flush().unwrap();

    // Second run over the same input: already-processed ids are filtered
    // out, the same manager keeps accumulating.
    let mut cp = CheckpointManager::new(dir.path(), &source);
    cp.load().unwrap();
    let scans = mk_scans(&["a", "b"]);
    let remaining: Vec<&PendingScan> = scans
        .iter()
        .filter(|s| !cp.is_processed(&s.job_id))
        .collect();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].job_id, "b");

    cp.mark_processed(["b".to_string()]);
    cp.mark_processed(["a".to_string(), "b".to_string()]); // duplicates are no-ops
    cp.flush().unwrap();
    assert_eq!(cp.processed_count(), 2);
}

#[test]
fn on_disk_format_uses_camel_case_keys() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("pending.csv");

    let mut cp = CheckpointManager::new(dir.path(), &source);
    cp.mark_processed(["a".to_string()]);
    cp.flush().unwrap();

    let raw = std::fs::read_to_string(cp.path()).unwrap();
    let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert!(value.get("inputFile").is_some());
    assert_eq!(value["processedScanIds"], serde_json::json!(["a"]));
    assert!(value.get("lastBatch").is_some());
    assert!(value.get("lastMiniBatch").is_some());
    assert!(value.get("startedAt").is_some());
    assert!(value.get("updatedAt").is_some());
}

#[test]
fn flush_leaves_no_temp_file_behind() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("pending.csv");

    let mut cp = CheckpointManager::new(dir.path(), &source);
    cp.mark_processed(["a".to_string()]);
    cp.flush().unwrap();
    cp.flush().unwrap();

    let names: Vec<String> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert!(names.iter().all(|n| !n.ends_with(".tmp")), "{names:?}");
}

#[test]
fn clear_deletes_the_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("pending.csv");

    let mut cp = CheckpointManager::new(dir.path(), &source);
    cp.mark_processed(["a".to_string()]);
    cp.flush().unwrap();
    assert!(cp.path().exists());

    cp.clear().unwrap();
    assert!(!cp.path().exists());
    cp.clear().unwrap(); // already gone is fine

    let mut fresh = CheckpointManager::new(dir.path(), &source);
    assert!(!fresh.load().unwrap());
}

#[test]
fn different_sources_use_different_checkpoint_files() {
    let dir = tempfile::tempdir().unwrap();
    let a = CheckpointManager::new(dir.path(), &dir.path().join("a.csv"));
    let b = CheckpointManager::new(dir.path(), &dir.path().join("b.csv"));
    assert_ne!(a.path(), b.path());
}
