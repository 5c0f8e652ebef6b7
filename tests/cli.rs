//! End-to-end CLI tests (§8 testable properties, black-box subprocess style).

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn siftd_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("siftd");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();
    fs::create_dir_all(root.join("config")).unwrap();
    fs::create_dir_all(root.join("data")).unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/siftd.sqlite"

[embeddings_db]
path = "{}/data/siftd-embeddings.sqlite"
"#,
        root.display(),
        root.display()
    );
    let config_path = root.join("config").join("config.toml");
    fs::write(&config_path, config_content).unwrap();
    (tmp, config_path)
}

fn run_siftd(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = siftd_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("failed to run siftd binary at {:?}: {e}", binary));
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn migrate_creates_database() {
    let (tmp, config_path) = setup_test_env();
    let (stdout, stderr, success) = run_siftd(&config_path, &["migrate"]);
    assert!(success, "migrate failed: stdout={stdout}, stderr={stderr}");
    assert!(tmp.path().join("data/siftd.sqlite").exists());
}

#[test]
fn migrate_is_idempotent() {
    let (_tmp, config_path) = setup_test_env();
    let (_, _, first) = run_siftd(&config_path, &["migrate"]);
    assert!(first, "first migrate failed");
    let (_, _, second) = run_siftd(&config_path, &["migrate"]);
    assert!(second, "second migrate failed (migrations not idempotent)");
}

#[test]
fn status_on_empty_corpus_reports_zero_conversations() {
    let (_tmp, config_path) = setup_test_env();
    run_siftd(&config_path, &["migrate"]);
    let (stdout, stderr, success) = run_siftd(&config_path, &["status"]);
    assert!(success, "status failed: stdout={stdout}, stderr={stderr}");
    assert!(stdout.contains("0 conversations"), "got: {stdout}");
}

#[test]
fn status_json_is_well_formed() {
    let (_tmp, config_path) = setup_test_env();
    run_siftd(&config_path, &["migrate"]);
    let (stdout, _, success) = run_siftd(&config_path, &["--json", "status"]);
    assert!(success);
    let parsed: serde_json::Value = serde_json::from_str(&stdout).expect("status --json must emit valid JSON");
    assert_eq!(parsed["conversations"], 0);
}

#[test]
fn tags_on_empty_corpus_is_empty() {
    let (_tmp, config_path) = setup_test_env();
    run_siftd(&config_path, &["migrate"]);
    let (stdout, stderr, success) = run_siftd(&config_path, &["tags"]);
    assert!(success, "tags failed: stdout={stdout}, stderr={stderr}");
    assert!(stdout.trim().is_empty());
}

#[test]
fn doctor_list_enumerates_builtin_checks() {
    let (_tmp, config_path) = setup_test_env();
    let (stdout, stderr, success) = run_siftd(&config_path, &["doctor", "list"]);
    assert!(success, "doctor list failed: stdout={stdout}, stderr={stderr}");
    assert!(stdout.contains("ingest-pending"));
    assert!(stdout.contains("drop-ins-valid"));
}

#[test]
fn doctor_run_on_fresh_db_does_not_crash() {
    let (_tmp, config_path) = setup_test_env();
    run_siftd(&config_path, &["migrate"]);
    let (stdout, stderr, success) = run_siftd(&config_path, &["doctor", "run", "--fast"]);
    assert!(success, "doctor run failed: stdout={stdout}, stderr={stderr}");
}

#[test]
fn query_unknown_conversation_fails() {
    let (_tmp, config_path) = setup_test_env();
    run_siftd(&config_path, &["migrate"]);
    let (_, stderr, success) = run_siftd(&config_path, &["query", "nonexistent-id"]);
    assert!(!success, "query for a missing conversation should fail");
    assert!(stderr.contains("no conversation found"), "got: {stderr}");
}

#[test]
fn adapters_lists_builtin_harnesses() {
    let (_tmp, config_path) = setup_test_env();
    let (stdout, stderr, success) = run_siftd(&config_path, &["adapters"]);
    assert!(success, "adapters failed: stdout={stdout}, stderr={stderr}");
    assert!(!stdout.trim().is_empty(), "expected at least the built-in adapters to be listed");
}

#[test]
fn path_subcommands_print_directories() {
    let (_tmp, config_path) = setup_test_env();
    for which in ["data", "config", "state"] {
        let (stdout, stderr, success) = run_siftd(&config_path, &["path", which]);
        assert!(success, "path {which} failed: stderr={stderr}");
        assert!(!stdout.trim().is_empty());
    }
}

#[test]
fn session_id_is_stable_across_calls() {
    let (tmp, config_path) = setup_test_env();
    let workspace = tmp.path().join("my-workspace");
    fs::create_dir_all(&workspace).unwrap();
    let workspace_str = workspace.to_str().unwrap();

    let (first, _, success1) = run_siftd(&config_path, &["session-id", "--workspace", workspace_str]);
    assert!(success1);
    let (second, _, success2) = run_siftd(&config_path, &["session-id", "--workspace", workspace_str]);
    assert!(success2);
    assert_eq!(first.trim(), second.trim(), "session-id must be stable for the same workspace");
}

#[test]
fn register_and_tag_session_round_trip() {
    let (_tmp, config_path) = setup_test_env();
    run_siftd(&config_path, &["migrate"]);

    let (_, stderr, success) = run_siftd(&config_path, &["register", "sess-cli-test", "claude_code", "/tmp/example-workspace"]);
    assert!(success, "register failed: {stderr}");

    let (stdout, stderr, success) = run_siftd(&config_path, &["tag", "sess-cli-test", "decision:auth", "--session", "sess-cli-test"]);
    assert!(success, "tag --session failed: stdout={stdout}, stderr={stderr}");
    assert!(stdout.contains("queued"));

    // Queuing the identical tag again is a benign no-op, not an error.
    let (stdout2, _, success2) = run_siftd(&config_path, &["tag", "sess-cli-test", "decision:auth", "--session", "sess-cli-test"]);
    assert!(success2);
    assert!(stdout2.contains("already queued"));
}

#[test]
fn search_on_empty_corpus_with_none_backend_errors_clearly() {
    let (_tmp, config_path) = setup_test_env();
    run_siftd(&config_path, &["migrate"]);
    let (_, stderr, success) = run_siftd(&config_path, &["search", "anything"]);
    assert!(!success, "search should fail when the embedding backend is unconfigured");
    assert!(stderr.to_lowercase().contains("backend") || stderr.to_lowercase().contains("embed"), "got: {stderr}");
}
