//! CLI Integration Tests
//!
//! These tests verify the CLI commands work correctly end-to-end.
//! They test the "wiring" between the CLI and the core library.

use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

// ============================================================================
// Test Utilities
// ============================================================================

fn cli_cmd() -> Command {
    Command::cargo_bin("livesync").expect("Failed to find livesync binary")
}

/// Write a config file into a temporary directory
fn write_config(dir: &TempDir, contents: &str) -> std::path::PathBuf {
    let path = dir.path().join("livesync.json");
    fs::write(&path, contents).unwrap();
    path
}

// ============================================================================
// Config Command Tests
// ============================================================================

#[test]
fn test_config_show_defaults() {
    cli_cmd()
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"interval_ms\": 5000"))
        .stdout(predicate::str::contains("\"max_backoff_ms\": 60000"))
        .stdout(predicate::str::contains("\"stale_after_failures\": 3"))
        .stdout(predicate::str::contains("\"event_channel_capacity\": 256"));
}

#[test]
fn test_config_show_with_file() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, r#"{ "poller": { "interval_ms": 1500 } }"#);

    cli_cmd()
        .arg("--config")
        .arg(&path)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"interval_ms\": 1500"));
}

#[test]
fn test_config_check_valid() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        r#"{ "poller": { "interval_ms": 1000 }, "sources": { "call-status": { "interval_ms": 500 } } }"#,
    );

    cli_cmd()
        .args(["config", "check"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration OK"))
        .stdout(predicate::str::contains("Default interval: 1000ms"))
        .stdout(predicate::str::contains("Source call-status: 500ms"));
}

#[test]
fn test_config_check_rejects_zero_interval() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, r#"{ "poller": { "interval_ms": 0 } }"#);

    cli_cmd()
        .args(["config", "check"])
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load config"));
}

#[test]
fn test_missing_config_file_fails() {
    let dir = TempDir::new().unwrap();

    cli_cmd()
        .arg("--config")
        .arg(dir.path().join("missing.json"))
        .args(["config", "show"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load config"));
}

// ============================================================================
// Call Simulation Tests
// ============================================================================

#[test]
fn test_simulate_call_progresses_without_regressing() {
    cli_cmd()
        .args(["simulate", "call"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Simulating call monitor for 20s"))
        .stdout(predicate::str::contains(r#""status":"ringing""#))
        .stdout(predicate::str::contains(r#""status":"connected""#))
        .stdout(predicate::str::contains(r#""agent":"ana""#))
        .stdout(predicate::str::contains("final"))
        .stdout(predicate::str::contains(r#""status":"ended""#));
}

#[test]
fn test_simulate_call_reports_stale_status_feed() {
    cli_cmd()
        .args(["simulate", "call", "--status-failures", "4"])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "event source call-status stale after 3 failures",
        ))
        .stdout(predicate::str::contains("stale=true"))
        .stdout(predicate::str::contains(r#""agent":"ana""#));
}

#[test]
fn test_simulate_call_with_config_override() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        r#"{ "sources": { "call-status": { "interval_ms": 1000 } } }"#,
    );

    cli_cmd()
        .arg("--config")
        .arg(&path)
        .args(["simulate", "call", "--seconds", "6"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""status":"connected""#));
}

// ============================================================================
// Alert Simulation Tests
// ============================================================================

#[test]
fn test_simulate_alerts_confirms_mutations() {
    cli_cmd()
        .args(["simulate", "alerts"])
        .assert()
        .success()
        .stdout(predicate::str::contains("mark_read a1"))
        .stdout(predicate::str::contains("mark_all_read a2,a3"))
        .stdout(predicate::str::contains("confirmed by alerts"))
        .stdout(predicate::str::contains("unread=0"));
}

#[test]
fn test_simulate_alerts_rolls_back_failed_writes() {
    cli_cmd()
        .args(["simulate", "alerts", "--fail-writes"])
        .assert()
        .success()
        .stdout(predicate::str::contains("write failed"))
        .stdout(predicate::str::contains("rolled back"))
        .stdout(predicate::str::contains("unread=3"))
        .stdout(predicate::str::contains("confirmed by").not());
}

// ============================================================================
// Help Tests
// ============================================================================

#[test]
fn test_help() {
    cli_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("simulate"))
        .stdout(predicate::str::contains("config"));
}
