//! CLI tests for `pl2 run`: exit codes and the JSON diagnostics envelope.

use std::process::{Command, Output};

use assert_cmd::cargo;
use tempfile::TempDir;

fn pl2_cmd() -> Command {
    let mut cmd = Command::new(cargo::cargo_bin!("pl2"));
    cmd.env_remove("PL2_HOME").env_remove("PL2_LOG");
    cmd
}

/// Write `src` to a program file inside a fresh directory.
fn program(src: &str) -> (TempDir, String) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("prog.pl2");
    std::fs::write(&path, src).expect("write program");
    let path = path.to_string_lossy().into_owned();
    (dir, path)
}

fn run_json(path: &str, extra: &[&str]) -> (Output, serde_json::Value) {
    let output = pl2_cmd()
        .args(["run", path, "--output", "json"])
        .args(extra)
        .output()
        .expect("run command");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let json = serde_json::from_str(&stdout)
        .unwrap_or_else(|e| panic!("invalid json ({e}): {stdout}"));
    (output, json)
}

fn codes(json: &serde_json::Value) -> Vec<u64> {
    json["diagnostics"]
        .as_array()
        .expect("diagnostics array")
        .iter()
        .map(|d| d["code"].as_u64().expect("numeric code"))
        .collect()
}

#[test]
fn commands_without_language_only_warn() {
    let (_dir, path) = program("echo hi\necho there\n");
    let (output, json) = run_json(&path, &[]);

    assert!(output.status.success());
    assert_eq!(json["ok"], true);
    assert_eq!(codes(&json), [9, 9]);
    assert_eq!(json["diagnostics"][0]["severity"], "warn");
    assert_eq!(json["diagnostics"][1]["source"]["line"], 2);
    assert!(json.get("program").is_none());
}

#[test]
fn missing_language_library_fails_with_load_error() {
    let (dir, path) = program("# demo\nlanguage nosuchlang 1.0\necho hi\n");
    let home = dir.path().to_string_lossy().into_owned();
    let (output, json) = run_json(&path, &["--no-cwd", "--home", &home]);

    assert_eq!(output.status.code(), Some(1));
    assert_eq!(json["ok"], false);
    assert_eq!(codes(&json), [8]);
    let diag = &json["diagnostics"][0];
    assert_eq!(diag["severity"], "error");
    assert_eq!(diag["source"]["line"], 2);
    assert!(
        diag["message"].as_str().unwrap().contains("nosuchlang"),
        "message: {}",
        diag["message"]
    );
}

#[test]
fn parse_errors_fail_before_running() {
    let (_dir, path) = program("echo \"unterminated\n");
    let (output, json) = run_json(&path, &[]);

    assert_eq!(output.status.code(), Some(1));
    assert_eq!(codes(&json), [3]);
    assert_eq!(json["diagnostics"][0]["source"]["line"], 1);
}

#[test]
fn fragment_capacity_flag_is_applied() {
    let (_dir, path) = program("a b c\n");
    let (output, json) = run_json(&path, &["--fragment-capacity", "3"]);
    assert_eq!(output.status.code(), Some(1));
    assert_eq!(codes(&json), [2]);

    let output = pl2_cmd()
        .args(["run", &path, "--fragment-capacity", "1"])
        .output()
        .expect("run command");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("at least 2"), "stderr: {stderr}");
}

#[test]
fn pretty_errors_show_code_and_help() {
    let (_dir, path) = program("?begin\nnever closed\n");
    let output = pl2_cmd()
        .args(["run", &path, "--output", "pretty"])
        .output()
        .expect("run command");

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("PL0004"), "stderr: {stderr}");
    assert!(stderr.contains("?end"), "stderr: {stderr}");
    assert!(stderr.contains("1 error"), "stderr: {stderr}");
}

#[test]
fn unreadable_file_is_reported() {
    let dir = tempfile::tempdir().expect("tempdir");
    let missing = dir.path().join("missing.pl2");
    let output = pl2_cmd()
        .args(["run", &missing.to_string_lossy()])
        .output()
        .expect("run command");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("failed to read"), "stderr: {stderr}");
}
