// Diff Scenarios
// Classification of workspace and device files through the app and the engine

mod common;

use board_sync::operations::{CompareMode, DiffEngine, Manifest};
use board_sync::utilities::IgnoreMatcher;
use common::{app_with, fast_config, write_local, FakeTransport};

#[tokio::test]
async fn test_empty_workspace_reports_device_files() {
    let dir = tempfile::tempdir().unwrap();
    let device = FakeTransport::new();
    device.add_file("/main.py", b"print('hi')");
    device.add_file("/lib/util.py", b"x = 1");

    let app = app_with(dir.path(), fast_config("/"), device.clone());
    let diff = app.check_diffs().await.unwrap();

    assert!(diff.changed.is_empty());
    assert!(diff.local_only.is_empty());
    assert_eq!(
        diff.device_only.iter().cloned().collect::<Vec<_>>(),
        vec!["/lib/util.py", "/main.py"]
    );
    assert!(app.diff_state().is_set());
}

#[tokio::test]
async fn test_empty_device_reports_local_files() {
    let dir = tempfile::tempdir().unwrap();
    write_local(dir.path(), "main.py", "print('hi')");
    write_local(dir.path(), "lib/util.py", "x = 1");

    let device = FakeTransport::new();
    let app = app_with(dir.path(), fast_config("/app"), device.clone());
    let diff = app.check_diffs().await.unwrap();

    assert_eq!(
        diff.local_only.iter().cloned().collect::<Vec<_>>(),
        vec!["/app/lib/util.py", "/app/main.py"]
    );
    assert!(diff.device_only.is_empty());
}

#[tokio::test]
async fn test_mixed_tree_with_ignored_build_dir() {
    let dir = tempfile::tempdir().unwrap();
    write_local(dir.path(), "a.py", "same");
    write_local(dir.path(), "b.py", "local version");
    write_local(dir.path(), "build/out.bin", "artifact");

    let device = FakeTransport::new();
    device.add_file("/a.py", b"same");
    device.add_file("/b.py", b"board version 2");
    device.add_file("/c.py", b"only here");
    device.add_file("/build/stale.bin", b"ignored on both sides");

    let app = app_with(dir.path(), fast_config("/"), device.clone());
    let diff = app.check_diffs().await.unwrap();

    assert_eq!(diff.changed.iter().cloned().collect::<Vec<_>>(), vec!["/b.py"]);
    assert!(diff.local_only.is_empty());
    assert_eq!(diff.device_only.iter().cloned().collect::<Vec<_>>(), vec!["/c.py"]);
    // Only a.py has equal sizes on both sides
    assert_eq!(device.calls_of("checksum"), 1);
}

#[tokio::test]
async fn test_equal_sizes_fall_back_to_checksums() {
    let dir = tempfile::tempdir().unwrap();
    write_local(dir.path(), "same.py", "aaaa");
    write_local(dir.path(), "differs.py", "aaaa");

    let device = FakeTransport::new();
    device.add_file("/same.py", b"aaaa");
    device.add_file("/differs.py", b"bbbb");

    let ignore = IgnoreMatcher::defaults();
    let manifest = Manifest::build(dir.path(), &ignore).unwrap();
    let entries = {
        use board_sync::DeviceTransport;
        device.stat_tree("/").await.unwrap()
    };

    let engine = DiffEngine::new(ignore, "/", CompareMode::Checksum);
    let diff = engine.diff(&manifest, &entries, device.as_ref()).await.unwrap();

    assert_eq!(diff.changed.iter().cloned().collect::<Vec<_>>(), vec!["/differs.py"]);
    assert_eq!(device.calls_of("checksum"), 2);
}

#[tokio::test]
async fn test_checksum_failure_marks_changed() {
    let dir = tempfile::tempdir().unwrap();
    write_local(dir.path(), "main.py", "aaaa");

    let device = FakeTransport::new();
    device.add_file("/main.py", b"aaaa");
    device.fail_next("checksum", || {
        board_sync::DeviceError::NotResponding("garbled reply".to_string())
    });

    let app = app_with(dir.path(), fast_config("/"), device.clone());
    let diff = app.check_diffs().await.unwrap();
    assert_eq!(diff.changed.iter().cloned().collect::<Vec<_>>(), vec!["/main.py"]);
}

#[tokio::test]
async fn test_missing_root_on_device_is_empty_listing() {
    let dir = tempfile::tempdir().unwrap();
    write_local(dir.path(), "main.py", "x");

    let device = FakeTransport::new();
    device.add_file("/boot.py", b"outside the root");

    let app = app_with(dir.path(), fast_config("/app"), device.clone());
    let diff = app.check_diffs().await.unwrap();

    assert_eq!(diff.local_only.iter().cloned().collect::<Vec<_>>(), vec!["/app/main.py"]);
    assert!(diff.device_only.is_empty());
}

#[tokio::test]
async fn test_first_diff_writes_default_ignore_rules() {
    let dir = tempfile::tempdir().unwrap();
    write_local(dir.path(), "main.py", "print(1)");
    let rules = dir.path().join(".board-sync/syncignore");
    assert!(!rules.exists());

    let device = FakeTransport::new();
    let app = app_with(dir.path(), fast_config("/"), device.clone());
    let diff = app.check_diffs().await.unwrap();

    assert!(rules.is_file());
    assert!(std::fs::read_to_string(&rules).unwrap().contains("__pycache__"));
    assert_eq!(diff.local_only.iter().cloned().collect::<Vec<_>>(), vec!["/main.py"]);
}
