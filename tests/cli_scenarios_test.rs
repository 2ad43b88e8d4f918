//! End-to-end scenarios through the robot JSON surface.
//!
//! Each test writes a small record set, runs one `--robot-*` flag and checks
//! the resulting document.

mod common;

use common::{TestEnv, child_of, depends_on, ids, issue, labels, status};
use serde_json::Value;

fn find<'a>(items: &'a Value, key: &str, value: &str) -> &'a Value {
    items
        .as_array()
        .unwrap()
        .iter()
        .find(|item| item[key] == value)
        .unwrap_or_else(|| panic!("no item with {} = {}", key, value))
}

fn top_level(result: &Value) -> Vec<&Value> {
    let arena = result["workstreams"].as_array().unwrap();
    result["roots"]
        .as_array()
        .unwrap()
        .iter()
        .map(|idx| &arena[idx.as_u64().unwrap() as usize])
        .collect()
}

// === Empty set ===

#[test]
fn test_empty_set_plan_and_labels() {
    let env = TestEnv::with_records(&[]);

    let plan = env.robot(&["--robot-plan"]);
    assert_eq!(plan["result"]["tracks"].as_array().unwrap().len(), 0);
    assert_eq!(plan["result"]["recommendations"].as_array().unwrap().len(), 0);
    assert_eq!(plan["result"]["summary"]["total"], 0);
    assert_eq!(plan["result"]["summary"]["ready"], 0);

    let labels = env.robot(&["--robot-labels"]);
    assert_eq!(labels["result"]["total_labels"], 0);
    assert_eq!(labels["result"]["labels"].as_array().unwrap().len(), 0);

    let insights = env.robot(&["--robot-insights"]);
    assert_eq!(insights["result"]["node_count"], 0);
}

// === Chain of three ===

fn chain_of_three() -> TestEnv {
    TestEnv::with_records(&[
        depends_on(issue("A"), "B"),
        depends_on(issue("B"), "C"),
        issue("C"),
    ])
}

#[test]
fn test_chain_ready_and_blocked() {
    let env = chain_of_three();
    let plan = env.robot(&["--robot-plan"]);
    let result = &plan["result"];

    let ready: Vec<&str> = result["ready"]
        .as_array()
        .unwrap()
        .iter()
        .map(|i| i["id"].as_str().unwrap())
        .collect();
    assert_eq!(ready, vec!["C"]);

    let mut blocked: Vec<&str> = result["blocked"]
        .as_array()
        .unwrap()
        .iter()
        .map(|i| i["id"].as_str().unwrap())
        .collect();
    blocked.sort();
    assert_eq!(blocked, vec!["A", "B"]);

    let tracks = result["tracks"].as_array().unwrap();
    assert_eq!(tracks.len(), 1);
    assert_eq!(ids(&tracks[0]["issues"]), vec!["C"]);
}

#[test]
fn test_chain_critical_path_depths() {
    let env = chain_of_three();
    let insights = env.robot(&["--robot-insights"]);
    let metrics = &insights["result"]["metrics"];
    assert_eq!(metrics["A"]["critical_path_depth"], 3);
    assert_eq!(metrics["B"]["critical_path_depth"], 2);
    assert_eq!(metrics["C"]["critical_path_depth"], 1);
}

#[test]
fn test_chain_unblock_recommendation() {
    let env = chain_of_three();
    let triage = env.robot(&["--robot-triage"]);
    let recs = triage["result"]["recommendations"].as_array().unwrap();
    assert!(
        recs.iter()
            .any(|r| r["kind"] == "unblock" && r["issue_id"] == "C"),
        "missing unblock for C: {:?}",
        recs
    );
}

#[test]
fn test_cycle_reported_once() {
    let env = TestEnv::with_records(&[depends_on(issue("Y"), "X"), depends_on(issue("X"), "Y")]);
    let insights = env.robot(&["--robot-insights"]);
    let cycles = insights["result"]["cycles"].as_array().unwrap();
    assert_eq!(cycles.len(), 1);
    assert_eq!(cycles[0][0], "X");

    let triage = env.robot(&["--robot-triage"]);
    let recs = triage["result"]["recommendations"].as_array().unwrap();
    assert_eq!(
        recs.iter().filter(|r| r["kind"] == "investigate_cycle").count(),
        1
    );
}

// === Workstreams ===

#[test]
fn test_disconnected_chains_single_standalone() {
    let env = TestEnv::with_records(&[
        labels(depends_on(issue("A"), "B"), &["foo"]),
        labels(issue("B"), &["foo"]),
        labels(depends_on(issue("C"), "D"), &["foo"]),
        labels(issue("D"), &["foo"]),
    ]);
    let out = env.robot(&["--robot-workstreams", "--label", "foo"]);
    let result = &out["result"];
    let roots = top_level(result);
    assert_eq!(roots.len(), 1);
    assert_eq!(roots[0]["name"], "Standalone");
    assert_eq!(roots[0]["issue_ids"].as_array().unwrap().len(), 4);
    assert_eq!(roots[0]["progress"], 0.0);
}

fn phased_epic(extra_blocks: bool) -> TestEnv {
    let mut epic = issue("E");
    epic["issue_type"] = serde_json::json!("epic");
    let mut records = vec![epic];
    for id in ["p1a", "p1b", "p1c"] {
        records.push(labels(child_of(issue(id), "E"), &["phase1"]));
    }
    for id in ["p2a", "p2b", "p2c"] {
        let mut record = labels(child_of(issue(id), "E"), &["phase2"]);
        if extra_blocks {
            record = depends_on(record, "p1a");
        }
        records.push(record);
    }
    TestEnv::with_records(&records)
}

#[test]
fn test_epic_phase_family() {
    let env = phased_epic(false);
    let out = env.robot(&["--robot-workstreams", "--epic", "E"]);
    let result = &out["result"];
    assert_eq!(result["scope"], "epic:E");

    let roots = top_level(result);
    let names: Vec<&str> = roots.iter().map(|w| w["name"].as_str().unwrap()).collect();
    assert_eq!(names, vec!["Phase1", "Phase2"]);
    for ws in roots {
        assert_eq!(ws["issue_ids"].as_array().unwrap().len(), 3);
    }
}

#[test]
fn test_cross_workstream_blocker() {
    let env = phased_epic(true);
    let out = env.robot(&["--robot-workstreams", "--epic", "E"]);
    let roots = top_level(&out["result"]);
    let phase1 = roots.iter().find(|w| w["name"] == "Phase1").unwrap();
    let phase2 = roots.iter().find(|w| w["name"] == "Phase2").unwrap();

    assert_eq!(phase2["is_blocked"], true);
    assert_eq!(phase2["ready_count"], 0);

    let blocked_by = find(&phase2["cross_blocked_by"], "blocked_id", "p2a");
    assert_eq!(blocked_by["blocker_id"], "p1a");
    assert_eq!(blocked_by["blocker_workstream"], phase1["name"]);

    let blocks = find(&phase1["cross_blocks"], "blocked_id", "p2a");
    assert_eq!(blocks["blocker_id"], "p1a");
    assert_eq!(blocks["blocked_workstream"], phase2["name"]);
}

// === Baseline diff ===

#[test]
fn test_baseline_diff_medium_drift() {
    let env = TestEnv::with_records(&[issue("A"), issue("B")]);
    env.ig().args(["baseline", "save", "-d", "sprint start"]).assert().success();

    env.write_records(&[status(issue("A"), "closed"), issue("B"), issue("C")]);
    let out = env.robot(&["--robot-diff"]);
    let result = &out["result"];

    assert_eq!(ids(&result["new"]), vec!["C"]);
    assert_eq!(ids(&result["closed"]), vec!["A"]);
    assert_eq!(result["summary"]["unchanged"], 1);
    assert_eq!(result["severity"], "medium");
    assert_eq!(result["identical"], false);
}

// === Determinism ===

#[test]
fn test_repeated_runs_are_byte_identical() {
    let env = TestEnv::with_records(&[
        labels(depends_on(issue("A"), "B"), &["api"]),
        labels(depends_on(issue("B"), "C"), &["db"]),
        labels(issue("C"), &["db", "infra"]),
        labels(child_of(issue("D"), "A"), &["api"]),
    ]);
    for flag in ["--robot-insights", "--robot-plan", "--robot-labels", "--robot-triage"] {
        let first = env.ig().arg(flag).assert().success().get_output().stdout.clone();
        let second = env.ig().arg(flag).assert().success().get_output().stdout.clone();
        assert_eq!(first, second, "{} output differs between runs", flag);
    }
}
