//! Snapshot comparison against a saved baseline.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::correlation::cache::data_hash;
use crate::models::graph::IssueGraph;
use crate::models::{Issue, Status};

/// Change ratio below which drift is `low`.
pub const LOW_DRIFT_RATIO: f64 = 0.10;
/// Change ratio below which drift is `medium`.
pub const MEDIUM_DRIFT_RATIO: f64 = 0.70;

/// Fields captured per issue when a baseline is saved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaselineIssue {
    pub status: Status,
    pub priority: i32,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub labels: Vec<String>,
}

/// A prior records state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub fingerprint: String,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub per_issue: BTreeMap<String, BaselineIssue>,
}

impl Baseline {
    /// Capture the valid records of `records`.
    pub fn capture(records: &[Issue], description: &str, now: DateTime<Utc>) -> Self {
        let graph = IssueGraph::build(records);
        let per_issue = graph
            .issues()
            .iter()
            .map(|issue| {
                (
                    issue.id.clone(),
                    BaselineIssue {
                        status: issue.status,
                        priority: issue.priority,
                        title: issue.title.clone(),
                        labels: issue.labels.clone(),
                    },
                )
            })
            .collect();
        Self {
            fingerprint: data_hash(graph.issues()),
            description: description.to_string(),
            created_at: now,
            per_issue,
        }
    }

    pub fn len(&self) -> usize {
        self.per_issue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.per_issue.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    New,
    Closed,
    Reopened,
    PriorityChanged,
    StatusChanged,
    Unchanged,
}

/// Lower priority numbers rank higher, so a drop in number is `raised`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityDirection {
    Raised,
    Lowered,
}

impl PriorityDirection {
    pub fn between(from: i32, to: i32) -> Option<Self> {
        match to.cmp(&from) {
            std::cmp::Ordering::Less => Some(PriorityDirection::Raised),
            std::cmp::Ordering::Greater => Some(PriorityDirection::Lowered),
            std::cmp::Ordering::Equal => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftSeverity {
    None,
    Low,
    Medium,
    High,
}

impl DriftSeverity {
    /// Grade a change ratio. `significant` is false when every current issue
    /// is unchanged or new and nothing was deleted.
    pub fn grade(significant: bool, ratio: f64) -> Self {
        if !significant {
            DriftSeverity::None
        } else if ratio < LOW_DRIFT_RATIO {
            DriftSeverity::Low
        } else if ratio < MEDIUM_DRIFT_RATIO {
            DriftSeverity::Medium
        } else {
            DriftSeverity::High
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DriftSeverity::None => "none",
            DriftSeverity::Low => "low",
            DriftSeverity::Medium => "medium",
            DriftSeverity::High => "high",
        }
    }
}

/// How one current issue moved since the baseline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IssueChange {
    pub id: String,
    pub title: String,
    pub kind: ChangeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_status: Option<Status>,
    pub to_status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_priority: Option<i32>,
    pub to_priority: i32,
    /// Set whenever priority moved, even when `kind` is a status change
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority_direction: Option<PriorityDirection>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DiffSummary {
    pub total: usize,
    pub new: usize,
    pub closed: usize,
    pub reopened: usize,
    pub priority_changed: usize,
    pub status_changed: usize,
    pub unchanged: usize,
    pub deleted: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotDiff {
    pub generated_at: DateTime<Utc>,
    pub baseline_fingerprint: String,
    pub baseline_created_at: DateTime<Utc>,
    pub current_fingerprint: String,
    /// True when the current records hash to the baseline fingerprint
    pub identical: bool,
    pub summary: DiffSummary,
    /// Every current issue, sorted by id
    pub changes: Vec<IssueChange>,
    pub new: Vec<String>,
    pub closed: Vec<String>,
    pub reopened: Vec<String>,
    pub priority_changed: Vec<String>,
    pub status_changed: Vec<String>,
    pub deleted: Vec<String>,
    /// Non-unchanged current issues over all current issues
    pub change_ratio: f64,
    pub severity: DriftSeverity,
}

/// Classify one issue against its baseline entry.
///
/// Precedence: closed, reopened, priority change, other status change.
fn classify(before: Option<&BaselineIssue>, issue: &Issue) -> ChangeKind {
    let Some(before) = before else {
        return ChangeKind::New;
    };
    let was_closed = before.status.is_closed();
    let is_closed = issue.status.is_closed();
    if !was_closed && is_closed {
        ChangeKind::Closed
    } else if was_closed && !is_closed {
        ChangeKind::Reopened
    } else if before.priority != issue.priority {
        ChangeKind::PriorityChanged
    } else if before.status != issue.status {
        ChangeKind::StatusChanged
    } else {
        ChangeKind::Unchanged
    }
}

/// Compare `current` against `baseline`.
///
/// Invalid and duplicate current records are dropped the same way graph
/// construction drops them.
pub fn diff(baseline: &Baseline, current: &[Issue], now: DateTime<Utc>) -> SnapshotDiff {
    let graph = IssueGraph::build(current);
    let mut summary = DiffSummary {
        total: graph.len(),
        ..DiffSummary::default()
    };
    let mut changes = Vec::with_capacity(graph.len());
    let mut lists: BTreeMap<ChangeKind, Vec<String>> = BTreeMap::new();

    for issue in graph.issues() {
        let before = baseline.per_issue.get(&issue.id);
        let kind = classify(before, issue);
        match kind {
            ChangeKind::New => summary.new += 1,
            ChangeKind::Closed => summary.closed += 1,
            ChangeKind::Reopened => summary.reopened += 1,
            ChangeKind::PriorityChanged => summary.priority_changed += 1,
            ChangeKind::StatusChanged => summary.status_changed += 1,
            ChangeKind::Unchanged => summary.unchanged += 1,
        }
        lists.entry(kind).or_default().push(issue.id.clone());
        changes.push(IssueChange {
            id: issue.id.clone(),
            title: issue.title.clone(),
            kind,
            from_status: before.map(|b| b.status),
            to_status: issue.status,
            from_priority: before.map(|b| b.priority),
            to_priority: issue.priority,
            priority_direction: before.and_then(|b| PriorityDirection::between(b.priority, issue.priority)),
        });
    }

    let deleted: Vec<String> = baseline
        .per_issue
        .keys()
        .filter(|id| graph.index_of(id).is_none())
        .cloned()
        .collect();
    summary.deleted = deleted.len();

    let changed = summary.total - summary.unchanged;
    let change_ratio = if summary.total == 0 {
        if deleted.is_empty() { 0.0 } else { 1.0 }
    } else {
        changed as f64 / summary.total as f64
    };
    let significant = changed > summary.new || !deleted.is_empty();
    let severity = DriftSeverity::grade(significant, change_ratio);

    let current_fingerprint = data_hash(graph.issues());
    debug!(
        changed,
        deleted = deleted.len(),
        severity = severity.as_str(),
        "Computed baseline diff"
    );

    let mut take = |kind| lists.remove(&kind).unwrap_or_default();
    SnapshotDiff {
        generated_at: now,
        baseline_fingerprint: baseline.fingerprint.clone(),
        baseline_created_at: baseline.created_at,
        identical: current_fingerprint == baseline.fingerprint,
        current_fingerprint,
        summary,
        changes,
        new: take(ChangeKind::New),
        closed: take(ChangeKind::Closed),
        reopened: take(ChangeKind::Reopened),
        priority_changed: take(ChangeKind::PriorityChanged),
        status_changed: take(ChangeKind::StatusChanged),
        deleted,
        change_ratio,
        severity,
    }
}
