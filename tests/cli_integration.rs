//! CLI Integration Tests
//!
//! These tests verify that the CLI commands work correctly end-to-end.
//! They test the actual binary behavior, not just the library.
//!
//! Run with:
//! ```bash
//! cargo test --test cli_integration
//! ```

use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};
use tempfile::tempdir;

const TEST_HASH: &str = "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08";

fn xorcas(root: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_xorcas"));
    cmd.arg("--data-dir")
        .arg(root.join("data"))
        .arg("--cache-dir")
        .arg(root.join("cache"))
        .args(["-f", "json"]);
    cmd
}

/// Run xorcas and return (stdout, stderr, success)
fn run_xorcas(root: &Path, args: &[&str]) -> (String, String, bool) {
    let output = xorcas(root)
        .args(args)
        .output()
        .expect("Failed to execute xorcas");

    (
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
        output.status.success(),
    )
}

fn parse_json(output: &str) -> serde_json::Value {
    serde_json::from_str(output.trim()).expect("Output should be valid JSON")
}

/// Store `data` through stdin and return the hash
fn put_stdin(root: &Path, data: &[u8]) -> serde_json::Value {
    let mut child = xorcas(root)
        .arg("put")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .expect("Failed to execute xorcas");
    child.stdin.take().unwrap().write_all(data).unwrap();
    let output = child.wait_with_output().unwrap();
    assert!(output.status.success(), "put should succeed");
    parse_json(&String::from_utf8_lossy(&output.stdout))
}

// ============================================================================
// Blob Commands
// ============================================================================

#[test]
fn test_cli_put_stdin() {
    let dir = tempdir().unwrap();

    let json = put_stdin(dir.path(), b"test");
    assert_eq!(json["hash"], TEST_HASH);
    assert_eq!(json["new"], true);
    assert!(dir.path().join("data/9f/86").join(TEST_HASH).exists());

    let json = put_stdin(dir.path(), b"test");
    assert_eq!(json["new"], false);
}

#[test]
fn test_cli_put_file_and_get() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("input.txt");
    std::fs::write(&input, b"test").unwrap();

    let (stdout, stderr, success) = run_xorcas(dir.path(), &["put", input.to_str().unwrap()]);
    assert!(success, "put should succeed: {}", stderr);
    assert_eq!(parse_json(&stdout)["hash"], TEST_HASH);

    let (stdout, _stderr, success) = run_xorcas(dir.path(), &["get", TEST_HASH]);
    assert!(success);
    assert_eq!(stdout, "test");

    let out = dir.path().join("out.bin");
    let (stdout, _stderr, success) =
        run_xorcas(dir.path(), &["get", TEST_HASH, "-o", out.to_str().unwrap()]);
    assert!(success);
    assert_eq!(parse_json(&stdout)["bytes"], 4);
    assert_eq!(std::fs::read(&out).unwrap(), b"test");
}

#[test]
fn test_cli_get_missing_fails() {
    let dir = tempdir().unwrap();
    let (_stdout, stderr, success) = run_xorcas(dir.path(), &["get", TEST_HASH]);
    assert!(!success);
    assert!(stderr.contains("not found"), "stderr: {}", stderr);
}

#[test]
fn test_cli_invalid_hash_fails() {
    let dir = tempdir().unwrap();
    let (_stdout, stderr, success) = run_xorcas(dir.path(), &["has", "c0deff"]);
    assert!(!success);
    assert!(stderr.contains("Invalid hash"));
}

#[test]
fn test_cli_has() {
    let dir = tempdir().unwrap();
    let (stdout, _stderr, success) = run_xorcas(dir.path(), &["has", TEST_HASH]);
    assert!(success);
    assert_eq!(parse_json(&stdout)["present"], false);

    put_stdin(dir.path(), b"test");
    let (stdout, _stderr, _success) = run_xorcas(dir.path(), &["has", TEST_HASH]);
    assert_eq!(parse_json(&stdout)["present"], true);
}

#[test]
fn test_cli_list() {
    let dir = tempdir().unwrap();
    for data in [&b"one"[..], b"two", b"test"] {
        put_stdin(dir.path(), data);
    }

    let (stdout, _stderr, success) = run_xorcas(dir.path(), &["list"]);
    assert!(success);
    assert_eq!(parse_json(&stdout)["count"], 3);

    let (stdout, _stderr, success) = run_xorcas(dir.path(), &["list", "-p", "9f8", "-b", "12"]);
    assert!(success);
    let json = parse_json(&stdout);
    assert_eq!(json["count"], 1);
    assert_eq!(json["hashes"][0], TEST_HASH);
}

// ============================================================================
// Integrity Commands
// ============================================================================

#[test]
fn test_cli_verify_consistent() {
    let dir = tempdir().unwrap();
    put_stdin(dir.path(), b"test");

    let (stdout, stderr, success) = run_xorcas(dir.path(), &["verify", TEST_HASH]);
    assert!(success, "verify should succeed: {}", stderr);
    assert_eq!(parse_json(&stdout)["outcome"], "consistent");
}

#[test]
fn test_cli_verify_heals_lost_digest() {
    let dir = tempdir().unwrap();
    put_stdin(dir.path(), b"test");

    // wipe the digest so the stored blob is unaccounted for
    std::fs::remove_dir_all(dir.path().join("cache")).unwrap();

    let (stdout, _stderr, success) = run_xorcas(dir.path(), &["verify", TEST_HASH]);
    assert!(success);
    assert_eq!(parse_json(&stdout)["outcome"], "healed");

    let (stdout, _stderr, _success) = run_xorcas(dir.path(), &["digest", TEST_HASH]);
    let json = parse_json(&stdout);
    assert_eq!(json["digest"], TEST_HASH);
    assert_eq!(json["depth"], 24);
}

#[test]
fn test_cli_refuses_locked_store() {
    let dir = tempdir().unwrap();
    put_stdin(dir.path(), b"test");

    // stands in for a running server holding the digest
    let held = xorcas::DigestTree::open(dir.path().join("cache"), 6, 4).unwrap();
    let (_stdout, stderr, success) = run_xorcas(dir.path(), &["verify", TEST_HASH]);
    assert!(!success);
    assert!(stderr.contains("locked"), "stderr: {}", stderr);

    drop(held);
    let (_stdout, stderr, success) = run_xorcas(dir.path(), &["verify", TEST_HASH]);
    assert!(success, "verify should succeed once released: {}", stderr);
}

// ============================================================================
// Config
// ============================================================================

#[test]
fn test_cli_config_file_schema() {
    let dir = tempdir().unwrap();
    let config = dir.path().join("config.json");
    std::fs::write(&config, r#"{"shard_bits": [4, 4, 4]}"#).unwrap();

    let mut child = xorcas(dir.path())
        .args(["--config", config.to_str().unwrap(), "put"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .unwrap();
    child.stdin.take().unwrap().write_all(b"test").unwrap();
    assert!(child.wait_with_output().unwrap().status.success());

    assert!(dir.path().join("data/9/f/8").join(TEST_HASH).exists());
}

#[test]
fn test_cli_help_lists_commands() {
    let output = Command::new(env!("CARGO_BIN_EXE_xorcas"))
        .arg("--help")
        .output()
        .expect("Failed to execute xorcas");

    let stdout = String::from_utf8_lossy(&output.stdout);
    for command in ["serve", "put", "get", "has", "list", "verify", "push", "pull"] {
        assert!(stdout.contains(command), "help should mention {}", command);
    }
}
