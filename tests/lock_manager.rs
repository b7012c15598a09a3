use a11y_batch::lock::LockManager;

#[test]
fn acquire_is_all_or_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let lock = LockManager::new(dir.path());

    assert!(lock.acquire().unwrap());
    assert!(!lock.acquire().unwrap());

    let info = lock.read_info().unwrap().expect("lock info");
    assert_eq!(info.pid, std::process::id());
    assert!(!info.hostname.is_empty());
    assert!(!info.started_at.is_empty());

    lock.release().unwrap();
    assert!(lock.read_info().unwrap().is_none());
    assert!(lock.acquire().unwrap());
    lock.release().unwrap();
}

#[test]
fn acquire_never_overwrites_a_foreign_lock() {
    let dir = tempfile::tempdir().unwrap();
    let lock = LockManager::new(dir.path());

    std::fs::write(lock.path(), "{\"pid\":1,\"hostname\":\"other\",\"startedAt\":\"x\"}")
        .unwrap();
    assert!(!lock.acquire().unwrap());

    let info = lock.read_info().unwrap().expect("lock info");
    assert_eq!(info.pid, 1);
    assert_eq!(info.hostname, "other");
}

#[test]
fn release_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let lock = LockManager::new(dir.path());
    assert!(lock.acquire().unwrap());
    lock.release().unwrap();
    lock.release().unwrap();
}
