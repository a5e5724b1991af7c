//! Tests for `src/logging.rs`.

use hostpatch::logging::LoggingGuard;

#[test]
fn logging_guard_is_send() {
    fn assert_send<T: Send>() {}
    assert_send::<LoggingGuard>();
}

#[test]
fn init_production_creates_logs_dir() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let logs_dir = tmp.path().join("logs").join("nested");
    assert!(!logs_dir.exists());

    // Only one global subscriber per process; a second install is ignored, not an error.
    let guard = hostpatch::logging::init_production(&logs_dir, "debug")
        .expect("init should succeed");
    assert!(logs_dir.exists(), "logs directory should be created");
    assert_eq!(guard.logs_dir(), logs_dir.as_path());

    hostpatch::logging::init_cli("info");
}

#[test]
fn init_without_dir_is_console_only() {
    let guard = hostpatch::logging::init("warn", None);
    assert!(matches!(guard, Ok(None)));
}

#[test]
fn init_production_fails_when_path_is_a_file() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let blocker = tmp.path().join("logs");
    std::fs::write(&blocker, "").expect("should write file");

    assert!(hostpatch::logging::init("info", Some(blocker.as_path())).is_err());
}
