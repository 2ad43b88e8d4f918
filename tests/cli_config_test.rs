//! Integration tests for configuration resolution and baseline management.

mod common;

use common::{TestEnv, issue, status};
use predicates::prelude::*;

// === Config show ===

#[test]
fn test_config_show_defaults() {
    let env = TestEnv::new();
    let out = env.robot(&["config", "show"]);
    assert_eq!(out["config"]["max_tracks"]["source"], "default");
    assert_eq!(out["config"]["deadline_ms"]["value"], serde_json::Value::Null);
}

#[test]
fn test_project_config_overrides_default() {
    let env = TestEnv::new();
    env.write_project_config("max-tracks 2\nstale-threshold-days 7\n");
    let out = env.robot(&["config", "show"]);
    assert_eq!(out["config"]["max_tracks"]["value"], 2);
    assert_eq!(out["config"]["max_tracks"]["source"], "project");
    assert_eq!(out["config"]["stale_threshold_days"]["value"], 7);
}

#[test]
fn test_cli_flag_overrides_project() {
    let env = TestEnv::new();
    env.write_project_config("max-tracks 2\n");
    let out = env.robot(&["config", "show", "--max-tracks", "5"]);
    assert_eq!(out["config"]["max_tracks"]["value"], 5);
    assert_eq!(out["config"]["max_tracks"]["source"], "cli_flag");
}

#[test]
fn test_system_config_below_project() {
    let env = TestEnv::new();
    let system_dir = env.config_dir.path().join("issuegraph");
    std::fs::create_dir_all(&system_dir).unwrap();
    std::fs::write(system_dir.join("config.kdl"), "max-tracks 3\nlabel-path-limit 4\n").unwrap();
    env.write_project_config("max-tracks 2\n");

    let out = env.robot(&["config", "show"]);
    assert_eq!(out["config"]["max_tracks"]["source"], "project");
    assert_eq!(out["config"]["label_path_limit"]["value"], 4);
    assert_eq!(out["config"]["label_path_limit"]["source"], "system");
}

#[test]
fn test_invalid_config_value_fails() {
    let env = TestEnv::with_records(&[issue("A")]);
    env.write_project_config("max-tracks 0\n");
    env.ig()
        .arg("--robot-plan")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("max-tracks"));
}

#[test]
fn test_unparseable_config_fails() {
    let env = TestEnv::with_records(&[issue("A")]);
    env.write_project_config("max-tracks {{{\n");
    env.ig().arg("--robot-plan").assert().code(1);
}

#[test]
fn test_config_show_human() {
    let env = TestEnv::new();
    env.ig()
        .args(["-H", "config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("max-tracks"))
        .stdout(predicate::str::contains("(default)"));
}

#[test]
fn test_max_tracks_limits_plan() {
    let env = TestEnv::with_records(&[issue("A"), issue("B"), issue("C")]);
    let out = env.robot(&["--robot-plan", "--max-tracks", "1"]);
    let tracks = out["result"]["tracks"].as_array().unwrap();
    assert!(tracks.len() <= 1);
}

// === Baseline ===

#[test]
fn test_baseline_save_reports_fingerprint() {
    let env = TestEnv::with_records(&[issue("A"), issue("B")]);
    let out = env.robot(&["baseline", "save"]);
    assert_eq!(out["issue_count"], 2);
    assert_eq!(out["fingerprint"].as_str().unwrap().len(), 12);
    assert!(env.beads_dir().join("baseline.json").exists());
}

#[test]
fn test_diff_identical_after_save() {
    let env = TestEnv::with_records(&[issue("A"), issue("B")]);
    env.ig().args(["baseline", "save"]).assert().success();
    let out = env.robot(&["--robot-diff"]);
    assert_eq!(out["result"]["identical"], true);
    assert_eq!(out["result"]["severity"], "none");
}

#[test]
fn test_diff_reopened_and_deleted() {
    let env = TestEnv::with_records(&[status(issue("A"), "closed"), issue("B")]);
    env.ig().args(["baseline", "save"]).assert().success();

    env.write_records(&[issue("A")]);
    let out = env.robot(&["--robot-diff"]);
    let result = &out["result"];
    assert_eq!(result["reopened"][0], "A");
    assert_eq!(result["deleted"][0], "B");
    assert_eq!(result["severity"], "high");
}

#[test]
fn test_baseline_save_human() {
    let env = TestEnv::with_records(&[issue("A")]);
    env.ig()
        .args(["-H", "baseline", "save", "--description", "before refactor"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Saved baseline of 1 issues"));
}
