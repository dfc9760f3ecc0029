//! Integration tests for the `plcgw` binary.
//!
//! Argument parsing, config handling and the offline commands; nothing here
//! needs a PLC.
#![allow(clippy::unwrap_used)]

use std::io::Write;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

// ── Helpers ─────────────────────────────────────────────────────────

/// `plcgw` with env isolation: no `PLCGW_*` leakage and a config directory
/// that does not exist.
fn plcgw_cmd() -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("plcgw");
    cmd.env("HOME", "/tmp/plcgw-cli-test-nonexistent")
        .env("XDG_CONFIG_HOME", "/tmp/plcgw-cli-test-nonexistent")
        .env_remove("PLCGW_CONFIG")
        .env_remove("PLCGW_PLC__HOST")
        .env_remove("RUST_LOG");
    cmd
}

fn config_file(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

const POINTS: &str = r#"
[plc]
host = "10.0.0.20"

[[points]]
id = "tank_level"
name = "Tank level"
db = 10
offset = 0
type = "INT"
scale = 0.1
unit = "%"

[[points]]
id = "pump_on"
db = 10
offset = 2
type = "BOOL"
bit = 3
writable = true
"#;

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let output = plcgw_cmd().output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Usage"), "Expected 'Usage' in:\n{stderr}");
}

#[test]
fn test_help_lists_commands() {
    plcgw_cmd().arg("--help").assert().success().stdout(
        predicate::str::contains("serve")
            .and(predicate::str::contains("points"))
            .and(predicate::str::contains("config")),
    );
}

#[test]
fn test_version_flag() {
    plcgw_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("plcgw"));
}

#[test]
fn test_completions_zsh() {
    plcgw_cmd()
        .args(["completions", "zsh"])
        .assert()
        .success()
        .stdout(predicate::str::contains("#compdef"));
}

// ── Config ──────────────────────────────────────────────────────────

#[test]
fn test_config_path_honours_flag() {
    plcgw_cmd()
        .args(["config", "path", "--config", "/etc/plcgw/site.toml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("/etc/plcgw/site.toml"));
}

#[test]
fn test_config_show_includes_defaults() {
    let file = config_file(POINTS);
    plcgw_cmd()
        .args(["config", "show", "--config"])
        .arg(file.path())
        .assert()
        .success()
        .stdout(
            predicate::str::contains("host = \"10.0.0.20\"")
                .and(predicate::str::contains("poll_interval_ms = 2000"))
                .and(predicate::str::contains("[[points]]")),
        );
}

#[test]
fn test_missing_config_file_exits_with_config_code() {
    plcgw_cmd()
        .args(["points", "--config", "/tmp/plcgw-cli-test-nonexistent/none.toml"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn test_invalid_point_is_a_usage_error() {
    let file = config_file(
        r#"
[[points]]
id = "bad"
db = 1
offset = 0
type = "REAL"
bit = 1
"#,
    );
    plcgw_cmd()
        .args(["points", "--config"])
        .arg(file.path())
        .assert()
        .code(2)
        .stderr(predicate::str::contains("bit is only valid on BOOL"));
}

// ── Points ──────────────────────────────────────────────────────────

#[test]
fn test_points_table() {
    let file = config_file(POINTS);
    plcgw_cmd()
        .args(["points", "--config"])
        .arg(file.path())
        .assert()
        .success()
        .stdout(
            predicate::str::contains("tank_level")
                .and(predicate::str::contains("DB10.DBX2.3"))
                .and(predicate::str::contains("INT")),
        );
}

#[test]
fn test_points_json() {
    let file = config_file(POINTS);
    let output = plcgw_cmd()
        .args(["points", "-o", "json", "--config"])
        .arg(file.path())
        .output()
        .unwrap();
    assert!(output.status.success());

    let points: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(points[0]["id"], "tank_level");
    assert_eq!(points[1]["writable"], true);
}

#[test]
fn test_points_type_filter() {
    let file = config_file(POINTS);
    plcgw_cmd()
        .args(["points", "--type", "bool", "--config"])
        .arg(file.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("pump_on").and(predicate::str::contains("tank_level").not()));
}

#[test]
fn test_serve_rejects_demo_with_connect() {
    plcgw_cmd()
        .args(["serve", "--demo", "--connect"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot be used with"));
}
