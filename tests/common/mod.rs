//! Common test utilities for issuegraph integration tests.
//!
//! Provides `TestEnv` for isolated repositories whose config lookups never
//! reach the user's `~/.config/issuegraph/` directory.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use serde_json::{Value, json};
pub use tempfile::TempDir;

/// Reference time passed to every command via `IG_NOW`.
pub const NOW: &str = "2025-01-15T10:00:00Z";

/// A test environment with an isolated repository and config home.
///
/// Each `TestEnv` creates two temporary directories:
/// - `repo_dir`: Acts as the repository root holding `.beads/`
/// - `config_dir`: Stands in for `XDG_CONFIG_HOME`
pub struct TestEnv {
    pub repo_dir: TempDir,
    pub config_dir: TempDir,
}

impl TestEnv {
    /// Create a new test environment with isolated directories.
    pub fn new() -> Self {
        Self {
            repo_dir: TempDir::new().unwrap(),
            config_dir: TempDir::new().unwrap(),
        }
    }

    /// Create a new test environment with `records` in `.beads/issues.jsonl`.
    pub fn with_records(records: &[Value]) -> Self {
        let env = Self::new();
        env.write_records(records);
        env
    }

    /// Get a Command for the ig binary with isolated config home.
    pub fn ig(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_ig"));
        cmd.current_dir(self.repo_dir.path());
        cmd.env("XDG_CONFIG_HOME", self.config_dir.path());
        cmd.env("IG_NOW", NOW);
        cmd.env_remove("IG_REPO");
        cmd.env_remove("IG_LOG");
        cmd
    }

    /// Run ig with `args`, assert success and parse stdout as one JSON document.
    pub fn robot(&self, args: &[&str]) -> Value {
        let output = self.ig().args(args).assert().success().get_output().stdout.clone();
        serde_json::from_slice(&output).unwrap()
    }

    pub fn path(&self) -> &Path {
        self.repo_dir.path()
    }

    pub fn beads_dir(&self) -> PathBuf {
        self.repo_dir.path().join(".beads")
    }

    pub fn write_records(&self, records: &[Value]) {
        let lines: Vec<String> = records.iter().map(|r| r.to_string()).collect();
        self.write_raw("issues.jsonl", &lines.join("\n"));
    }

    pub fn write_raw(&self, file: &str, content: &str) {
        std::fs::create_dir_all(self.beads_dir()).unwrap();
        std::fs::write(self.beads_dir().join(file), content).unwrap();
    }

    pub fn write_project_config(&self, kdl: &str) {
        std::fs::create_dir_all(self.beads_dir()).unwrap();
        std::fs::write(self.beads_dir().join("ig.kdl"), kdl).unwrap();
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

/// An open record with priority 1, created and updated a few days before [`NOW`].
pub fn issue(id: &str) -> Value {
    json!({
        "id": id,
        "title": format!("Issue {}", id),
        "status": "open",
        "priority": 1,
        "issue_type": "task",
        "created_at": "2025-01-10T10:00:00Z",
        "updated_at": "2025-01-12T10:00:00Z",
    })
}

pub fn status(mut record: Value, status: &str) -> Value {
    record["status"] = json!(status);
    if status == "closed" {
        record["closed_at"] = json!("2025-01-14T10:00:00Z");
    }
    record
}

pub fn labels(mut record: Value, labels: &[&str]) -> Value {
    record["labels"] = json!(labels);
    record
}

fn add_dep(mut record: Value, target: &str, kind: &str) -> Value {
    let id = record["id"].as_str().unwrap().to_string();
    let dep = json!({ "issue_id": id, "depends_on_id": target, "type": kind });
    match record.get_mut("dependencies").and_then(Value::as_array_mut) {
        Some(deps) => deps.push(dep),
        None => record["dependencies"] = json!([dep]),
    }
    record
}

/// `record` depends on `target` (target blocks record).
pub fn depends_on(record: Value, target: &str) -> Value {
    add_dep(record, target, "blocks")
}

pub fn child_of(record: Value, parent: &str) -> Value {
    add_dep(record, parent, "parent-child")
}

/// Ids of a JSON array of strings.
pub fn ids(value: &Value) -> Vec<String> {
    value
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap().to_string())
        .collect()
}
