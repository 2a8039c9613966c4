//! Basic CLI E2E tests.
//!
//! Each test runs the built binary against its own data directory and
//! pins "now" with `--at`.

use std::path::Path;
use std::process::Command;

use serde_json::Value;

/// Run a CLI command and return (stdout, stderr, exit code).
fn run_cli(data_dir: &Path, args: &[&str]) -> (String, String, i32) {
    let output = Command::new(env!("CARGO_BIN_EXE_deskclock"))
        .args(args)
        .env("DESKCLOCK_DATA_DIR", data_dir)
        .env("RUST_LOG", "warn")
        .output()
        .expect("Failed to execute CLI command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let code = output.status.code().unwrap_or(-1);

    (stdout, stderr, code)
}

fn run_json(data_dir: &Path, args: &[&str]) -> Value {
    let (stdout, stderr, code) = run_cli(data_dir, args);
    assert_eq!(code, 0, "{args:?} failed: {stderr}");
    serde_json::from_str(&stdout).expect("Failed to parse JSON output")
}

#[test]
fn test_alarm_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let data = dir.path();

    let alarm = run_json(
        data,
        &["alarm", "add", "07:00", "--repeat", "daily", "--label", "Wake", "--at", "2026-10-19T06:00"],
    );
    assert_eq!(alarm["hour"], 7);
    assert_eq!(alarm["label"], "Wake");

    let instances = run_json(data, &["instance", "list"]);
    assert_eq!(instances.as_array().unwrap().len(), 1);
    assert_eq!(instances[0]["state"], "notification");
    assert_eq!(instances[0]["fire_time"], "2026-10-19T07:00:00");
    let id = instances[0]["id"].as_i64().unwrap().to_string();

    let applied = run_json(data, &["tick", "--at", "2026-10-19T07:00"]);
    assert_eq!(applied[0]["target"], "fired");
    assert_eq!(applied[0]["result"]["state"], "fired");

    let snoozed = run_json(data, &["instance", "snooze", &id, "--at", "2026-10-19T07:01"]);
    assert_eq!(snoozed["outcome"], "applied");
    assert_eq!(snoozed["state"], "snooze");

    let next = run_json(data, &["next", "--at", "2026-10-19T07:02"]);
    assert_eq!(next["fire_time"], "2026-10-19T07:11:00");

    let dismissed = run_json(data, &["instance", "dismiss", &id, "--at", "2026-10-19T07:02"]);
    assert_eq!(dismissed["outcome"], "deleted");

    let instances = run_json(data, &["instance", "list"]);
    assert_eq!(instances.as_array().unwrap().len(), 1);
    assert_eq!(instances[0]["fire_time"], "2026-10-20T07:00:00");
}

#[test]
fn test_unknown_instance_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let output = run_json(dir.path(), &["instance", "dismiss", "42"]);
    assert_eq!(output["outcome"], "ignored");
    assert_eq!(output["reason"]["kind"], "not_found");
}

#[test]
fn test_next_without_alarms_is_null() {
    let dir = tempfile::tempdir().unwrap();
    assert_eq!(run_json(dir.path(), &["next"]), Value::Null);
}

#[test]
fn test_fix_reports_sweep() {
    let dir = tempfile::tempdir().unwrap();
    let data = dir.path();
    run_json(data, &["alarm", "add", "07:00", "--at", "2026-10-19T06:00"]);

    let summary = run_json(data, &["fix", "--at", "2026-10-20T08:00"]);
    assert_eq!(summary["epoch"], 1);
    assert_eq!(summary["deleted"], 1);

    let alarms = run_json(data, &["alarm", "list"]);
    assert_eq!(alarms[0]["enabled"], false);
}

#[test]
fn test_config_get_set() {
    let dir = tempfile::tempdir().unwrap();
    let data = dir.path();

    let (stdout, _, code) = run_cli(data, &["config", "get", "timing.fire_buffer_secs"]);
    assert_eq!(code, 0);
    assert_eq!(stdout.trim(), "15");

    let (_, _, code) = run_cli(data, &["config", "set", "timing.fire_buffer_secs", "20"]);
    assert_eq!(code, 0);
    let (stdout, _, _) = run_cli(data, &["config", "get", "timing.fire_buffer_secs"]);
    assert_eq!(stdout.trim(), "20");

    let (_, stderr, code) = run_cli(data, &["config", "get", "no.such.key"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("unknown key"));
}

#[test]
fn test_invalid_time_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (_, _, code) = run_cli(dir.path(), &["alarm", "add", "25:00"]);
    assert_ne!(code, 0);
    let (_, _, code) = run_cli(dir.path(), &["next", "--at", "tomorrow"]);
    assert_ne!(code, 0);
}
