//! Command implementations for the `ig` CLI.
//!
//! Each command loads a snapshot through [`Workspace`], runs one analysis and
//! returns a value implementing [`Output`]. Commands never print; `main`
//! decides between JSON and human text.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::analysis::diff::{Baseline, SnapshotDiff};
use crate::analysis::labels::LabelAnalysisResult;
use crate::analysis::metrics::{Insights, RankedIssue};
use crate::analysis::plan::{ExecutionPlan, Recommendation};
use crate::analysis::workstream::{self, WorkstreamResult};
use crate::analysis::{self, AnalysisBundle, AnalysisOptions};
use crate::analysis::diff as snapshot_diff;
use crate::config::{ConfigOverrides, ResolvedConfig, ValueSource, resolve_config, system_config_path};
use crate::correlation::causality::{CausalityOptions, CausalityResult, HistoryReport, IssueHistory};
use crate::models::Warning;
use crate::models::graph::IssueGraph;
use crate::storage::{BaselineStore, JsonlStore, RecordStore, Snapshot};
use crate::{Error, Result};

/// Command results that can be serialized to JSON or formatted for humans.
pub trait Output {
    /// Serialize to JSON string.
    fn to_json(&self) -> String;

    /// Format for human-readable output.
    fn to_human(&self) -> String;
}

fn json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value)
        .unwrap_or_else(|e| serde_json::json!({ "error": e.to_string() }).to_string())
}

/// An opened repository: record store, resolved config and reference time.
#[derive(Debug)]
pub struct Workspace {
    pub store: JsonlStore,
    pub config: ResolvedConfig,
    pub now: DateTime<Utc>,
}

impl Workspace {
    pub fn open(root: &Path, overrides: &ConfigOverrides, now: Option<DateTime<Utc>>) -> Result<Self> {
        let store = JsonlStore::open(root)?;
        let config = resolve_config(root, system_config_path().as_deref(), overrides)?;
        Ok(Self {
            store,
            config,
            now: now.unwrap_or_else(Utc::now),
        })
    }

    pub fn root(&self) -> &Path {
        self.store.root()
    }

    pub fn options(&self) -> AnalysisOptions {
        self.config.analysis_options(self.now)
    }

    pub fn snapshot(&self) -> Result<Snapshot> {
        let snapshot = self.store.snapshot()?;
        debug!(
            records = snapshot.records.len(),
            data_hash = %snapshot.data_hash,
            "Loaded snapshot"
        );
        Ok(snapshot)
    }

    fn analyze(&self) -> Result<(Snapshot, AnalysisBundle)> {
        let snapshot = self.snapshot()?;
        let bundle = analysis::analyze(&snapshot.records, &self.options());
        Ok((snapshot, bundle))
    }
}

/// Envelope around every robot document.
///
/// `warnings` carries loader problems; analysis warnings stay inside
/// `result`.
#[derive(Debug, Serialize)]
pub struct Robot<T> {
    pub generated_at: DateTime<Utc>,
    pub data_hash: String,
    pub warnings: Vec<Warning>,
    pub result: T,
}

impl<T> Robot<T> {
    fn new(snapshot: Snapshot, now: DateTime<Utc>, result: T) -> Self {
        Self {
            generated_at: now,
            data_hash: snapshot.data_hash,
            warnings: snapshot.warnings,
            result,
        }
    }

    fn warning_footer(&self, out: &mut String) {
        if !self.warnings.is_empty() {
            let _ = writeln!(out, "\n{} record warning(s)", self.warnings.len());
        }
    }
}

// === Insights ===

pub fn insights(ws: &Workspace) -> Result<Robot<Insights>> {
    let (snapshot, bundle) = ws.analyze()?;
    Ok(Robot::new(snapshot, ws.now, bundle.insights))
}

fn ranked(out: &mut String, title: &str, items: &[RankedIssue]) {
    if items.is_empty() {
        return;
    }
    let _ = writeln!(out, "\n{}:", title);
    for item in items {
        let _ = writeln!(out, "  {:<16} {:.4}", item.id, item.score);
    }
}

impl Output for Robot<Insights> {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let r = &self.result;
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{} issues, {} blocking edges, {} components",
            r.node_count, r.blocking_edge_count, r.component_count
        );
        if !r.critical_path.is_empty() {
            let _ = writeln!(out, "Critical path: {}", r.critical_path.join(" -> "));
        }
        if r.cycles.is_empty() {
            let _ = writeln!(out, "No cycles");
        } else {
            let _ = writeln!(out, "{} cycle(s):", r.cycles.len());
            for cycle in &r.cycles {
                let _ = writeln!(out, "  {}", cycle.join(" -> "));
            }
        }
        ranked(&mut out, "Top PageRank", &r.top_pagerank);
        ranked(&mut out, "Top betweenness", &r.top_betweenness);
        if r.partial {
            let _ = writeln!(out, "\n(partial: deadline reached)");
        }
        self.warning_footer(&mut out);
        out.trim_end().to_string()
    }
}

// === Plan ===

pub fn plan(ws: &Workspace) -> Result<Robot<ExecutionPlan>> {
    let (snapshot, bundle) = ws.analyze()?;
    Ok(Robot::new(snapshot, ws.now, bundle.plan))
}

impl Output for Robot<ExecutionPlan> {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let p = &self.result;
        let s = &p.summary;
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{} open: {} ready, {} blocked, {} in progress ({} closed)",
            s.total.saturating_sub(s.closed),
            s.ready,
            s.blocked,
            s.in_progress,
            s.closed
        );
        for track in &p.tracks {
            let _ = writeln!(
                out,
                "  {} [{}] impact {:.2}",
                track.track_id,
                track.issues.join(", "),
                track.total_impact
            );
        }
        if !p.backlog.is_empty() {
            let _ = writeln!(out, "  backlog: {}", p.backlog.join(", "));
        }
        if let Some(id) = &p.highest_impact {
            let _ = writeln!(out, "Highest impact: {}", id);
        }
        if !p.blocked.is_empty() {
            let _ = writeln!(out, "\nBlocked:");
            for item in &p.blocked {
                let _ = writeln!(out, "  {} <- {}", item.id, item.blocked_by.join(", "));
            }
        }
        self.warning_footer(&mut out);
        out.trim_end().to_string()
    }
}

// === Labels ===

pub fn labels(ws: &Workspace) -> Result<Robot<LabelAnalysisResult>> {
    let (snapshot, bundle) = ws.analyze()?;
    Ok(Robot::new(snapshot, ws.now, bundle.labels))
}

impl Output for Robot<LabelAnalysisResult> {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let r = &self.result;
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{} labels: {} healthy, {} warning, {} critical ({} unlabeled issues)",
            r.total_labels, r.healthy_count, r.warning_count, r.critical_count, r.unlabeled_count
        );
        for health in &r.labels {
            let _ = writeln!(
                out,
                "  {:<24} {:>3}  {} open / {} total",
                health.label, health.health, health.open_count, health.issue_count
            );
        }
        let flow = &r.cross_label_flow;
        if flow.total_cross_label_deps > 0 {
            let _ = writeln!(
                out,
                "\n{} cross-label dependencies; bottlenecks: {}",
                flow.total_cross_label_deps,
                flow.bottleneck_labels.join(", ")
            );
        }
        self.warning_footer(&mut out);
        out.trim_end().to_string()
    }
}

// === Triage ===

/// Recommendations plus the highest triage scores.
#[derive(Debug, Serialize)]
pub struct TriageReport {
    pub recommendations: Vec<Recommendation>,
    pub top_triage: Vec<RankedIssue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub highest_impact: Option<String>,
    pub partial: bool,
}

pub fn triage(ws: &Workspace) -> Result<Robot<TriageReport>> {
    let (snapshot, bundle) = ws.analyze()?;
    let report = TriageReport {
        recommendations: bundle.plan.recommendations,
        top_triage: bundle.insights.top_triage,
        highest_impact: bundle.plan.highest_impact,
        partial: bundle.partial,
    };
    Ok(Robot::new(snapshot, ws.now, report))
}

impl Output for Robot<TriageReport> {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let r = &self.result;
        let mut out = String::new();
        if r.recommendations.is_empty() {
            let _ = writeln!(out, "No recommendations");
        }
        for rec in &r.recommendations {
            let kind = serde_json::to_value(rec.kind)
                .ok()
                .and_then(|v| v.as_str().map(String::from))
                .unwrap_or_default();
            let _ = writeln!(
                out,
                "[{}] {} ({:.0}%): {}",
                kind,
                rec.issue_id,
                rec.confidence * 100.0,
                rec.reason
            );
        }
        ranked(&mut out, "Top triage", &r.top_triage);
        self.warning_footer(&mut out);
        out.trim_end().to_string()
    }
}

// === Workstreams ===

/// Which slice of the graph to decompose.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkstreamScope {
    Label(String),
    Epic(String),
}

impl WorkstreamScope {
    pub fn from_args(label: Option<String>, epic: Option<String>) -> Result<Self> {
        match (label, epic) {
            (Some(label), None) => Ok(Self::Label(label)),
            (None, Some(epic)) => Ok(Self::Epic(epic)),
            _ => Err(Error::Precondition(
                "--robot-workstreams needs exactly one of --label or --epic".to_string(),
            )),
        }
    }
}

pub fn workstreams(ws: &Workspace, scope: &WorkstreamScope) -> Result<Robot<WorkstreamResult>> {
    let snapshot = ws.snapshot()?;
    let graph = IssueGraph::build(&snapshot.records);
    let opts = ws.options();
    let result = match scope {
        WorkstreamScope::Label(label) => workstream::for_label(&graph, label, &opts),
        WorkstreamScope::Epic(epic) => workstream::for_epic(&graph, epic, &opts)?,
    };
    info!(
        scope = %result.scope,
        workstreams = result.workstreams.len(),
        partial = result.partial,
        "Detected workstreams"
    );
    Ok(Robot::new(snapshot, ws.now, result))
}

impl Output for Robot<WorkstreamResult> {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let r = &self.result;
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{}: {} issues in {} workstream(s)",
            r.scope,
            r.total_issues,
            r.roots.len()
        );
        let mut stack: Vec<usize> = r.roots.iter().rev().copied().collect();
        while let Some(idx) = stack.pop() {
            let ws = &r.workstreams[idx];
            let _ = writeln!(
                out,
                "{}{} ({} issues, {:.0}% done){}",
                "  ".repeat(ws.depth + 1),
                ws.name,
                ws.size(),
                ws.progress * 100.0,
                if ws.is_blocked { " blocked" } else { "" }
            );
            stack.extend(ws.children.iter().rev().copied());
        }
        if r.partial {
            let _ = writeln!(out, "\n(partial: deadline reached)");
        }
        self.warning_footer(&mut out);
        out.trim_end().to_string()
    }
}

// === Diff ===

pub fn diff(ws: &Workspace) -> Result<Robot<SnapshotDiff>> {
    let baseline = BaselineStore::new(ws.root()).load()?;
    let snapshot = ws.snapshot()?;
    let result = snapshot_diff::diff(&baseline, &snapshot.records, ws.now);
    info!(
        severity = result.severity.as_str(),
        ratio = result.change_ratio,
        "Compared against baseline"
    );
    Ok(Robot::new(snapshot, ws.now, result))
}

impl Output for Robot<SnapshotDiff> {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let r = &self.result;
        let s = &r.summary;
        let mut out = String::new();
        if r.identical {
            let _ = writeln!(out, "No changes since baseline");
        } else {
            let _ = writeln!(
                out,
                "Drift {} ({:.0}% changed)",
                r.severity.as_str(),
                r.change_ratio * 100.0
            );
            let _ = writeln!(
                out,
                "  {} new, {} closed, {} reopened, {} priority, {} status, {} deleted",
                s.new, s.closed, s.reopened, s.priority_changed, s.status_changed, s.deleted
            );
        }
        self.warning_footer(&mut out);
        out.trim_end().to_string()
    }
}

// === Baseline ===

#[derive(Debug, Serialize)]
pub struct BaselineSaved {
    pub path: PathBuf,
    pub fingerprint: String,
    pub issue_count: usize,
    pub created_at: DateTime<Utc>,
}

pub fn baseline_save(ws: &Workspace, description: &str) -> Result<BaselineSaved> {
    let snapshot = ws.snapshot()?;
    let baseline = Baseline::capture(&snapshot.records, description, ws.now);
    let store = BaselineStore::new(ws.root());
    store.save(&baseline)?;
    info!(fingerprint = %baseline.fingerprint, "Saved baseline");
    Ok(BaselineSaved {
        path: store.path().to_path_buf(),
        issue_count: baseline.len(),
        fingerprint: baseline.fingerprint,
        created_at: baseline.created_at,
    })
}

impl Output for BaselineSaved {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        format!(
            "Saved baseline of {} issues ({}) to {}",
            self.issue_count,
            self.fingerprint,
            self.path.display()
        )
    }
}

// === Causality ===

pub fn causality(ws: &Workspace, issue_id: &str) -> Result<Robot<CausalityResult>> {
    let snapshot = ws.snapshot()?;
    let issue = snapshot
        .records
        .iter()
        .find(|i| i.id == issue_id)
        .ok_or_else(|| Error::NotFound(format!("Issue {}", issue_id)))?;
    let mut report = HistoryReport::new(snapshot.data_hash.clone());
    report.insert(IssueHistory::from_issue(issue));
    let result = report
        .build_chain(issue_id, &CausalityOptions::default(), ws.now)
        .ok_or_else(|| Error::NotFound(format!("History for {}", issue_id)))?;
    Ok(Robot::new(snapshot, ws.now, result))
}

impl Output for Robot<CausalityResult> {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let r = &self.result;
        let mut out = String::new();
        let _ = writeln!(out, "{}: {}", r.chain.issue_id, r.chain.title);
        for event in &r.chain.events {
            let _ = writeln!(
                out,
                "  {}  {}",
                event.timestamp.format("%Y-%m-%d %H:%M"),
                event.description
            );
        }
        let _ = writeln!(out, "\n{}", r.insights.summary);
        for rec in &r.insights.recommendations {
            let _ = writeln!(out, "  - {}", rec);
        }
        out.trim_end().to_string()
    }
}

// === Config ===

#[derive(Debug, Serialize)]
pub struct ConfigShow {
    pub config: ResolvedConfig,
    pub system_path: Option<PathBuf>,
    pub project_path: PathBuf,
}

/// Resolve config without requiring a record store.
pub fn config_show(root: &Path, overrides: &ConfigOverrides) -> Result<ConfigShow> {
    let system_path = system_config_path();
    let config = resolve_config(root, system_path.as_deref(), overrides)?;
    Ok(ConfigShow {
        config,
        system_path,
        project_path: crate::config::project_config_path(root),
    })
}

impl Output for ConfigShow {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let mut out = String::new();
        let values = serde_json::to_value(&self.config).unwrap_or_default();
        for (key, source) in self.config.sources() {
            let field = key.replace('-', "_");
            let value = values
                .get(&field)
                .and_then(|v| v.get("value"))
                .map(|v| v.to_string())
                .unwrap_or_default();
            let marker = match source {
                ValueSource::Default => "",
                _ => " *",
            };
            let _ = writeln!(out, "{:<26} {:<24} ({}){}", key, value, source, marker);
        }
        let _ = writeln!(out, "\nproject: {}", self.project_path.display());
        if let Some(path) = &self.system_path {
            let _ = writeln!(out, "system:  {}", path.display());
        }
        out.trim_end().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const RECORDS: &str = concat!(
        r#"{"id":"A","title":"Alpha","status":"open","priority":1,"created_at":"2025-01-10T00:00:00Z","updated_at":"2025-01-10T00:00:00Z","dependencies":[{"issue_id":"A","depends_on_id":"B","type":"blocks"}]}"#,
        "\n",
        r#"{"id":"B","title":"Beta","status":"open","priority":1,"created_at":"2025-01-10T00:00:00Z","updated_at":"2025-01-10T00:00:00Z"}"#,
        "\n",
    );

    fn workspace() -> (TempDir, Workspace) {
        let dir = TempDir::new().unwrap();
        let beads = dir.path().join(".beads");
        std::fs::create_dir_all(&beads).unwrap();
        std::fs::write(beads.join("issues.jsonl"), RECORDS).unwrap();
        let store = JsonlStore::open(dir.path()).unwrap();
        let ws = Workspace {
            store,
            config: ResolvedConfig::default(),
            now: crate::test_utils::now(),
        };
        (dir, ws)
    }

    #[test]
    fn test_plan_json_is_single_document() {
        let (_dir, ws) = workspace();
        let out = plan(&ws).unwrap();
        let value: serde_json::Value = serde_json::from_str(&out.to_json()).unwrap();
        assert_eq!(value["result"]["summary"]["ready"], 1);
        assert_eq!(value["data_hash"].as_str().unwrap().len(), 12);
    }

    #[test]
    fn test_workstream_scope_requires_one_of() {
        assert!(WorkstreamScope::from_args(None, None).is_err());
        assert_eq!(
            WorkstreamScope::from_args(Some("a".into()), None).unwrap(),
            WorkstreamScope::Label("a".into())
        );
    }

    #[test]
    fn test_diff_without_baseline_is_not_found() {
        let (_dir, ws) = workspace();
        assert!(matches!(diff(&ws), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_baseline_then_diff_is_identical() {
        let (_dir, ws) = workspace();
        let saved = baseline_save(&ws, "start").unwrap();
        assert_eq!(saved.issue_count, 2);
        let out = diff(&ws).unwrap();
        assert!(out.result.identical);
        assert!(out.to_human().contains("No changes"));
    }

    #[test]
    fn test_causality_unknown_issue() {
        let (_dir, ws) = workspace();
        assert!(matches!(causality(&ws, "nope"), Err(Error::NotFound(_))));
        let out = causality(&ws, "A").unwrap();
        assert_eq!(out.result.chain.issue_id, "A");
    }
}
