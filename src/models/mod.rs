//! Data models for issuegraph.
//!
//! This module defines the record types consumed by the analysis core:
//! - `Issue` - Work items with status, priority, type, labels and dependencies
//! - `Dependency` - Typed edge from an issue to the issue it depends on
//! - `NodeMetrics` - Structural metrics computed per issue
//! - `Warning` - Non-fatal conditions collected during an analysis pass

pub mod graph;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::{Error, Result};

/// Issue status in the workflow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[default]
    Open,
    InProgress,
    Blocked,
    Closed,
}

impl Status {
    /// Returns true for the terminal `closed` state.
    pub fn is_closed(&self) -> bool {
        matches!(self, Status::Closed)
    }

    /// Returns true for anything that still needs work.
    pub fn is_open(&self) -> bool {
        !self.is_closed()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Open => "open",
            Status::InProgress => "in_progress",
            Status::Blocked => "blocked",
            Status::Closed => "closed",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Status {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "open" => Ok(Status::Open),
            "in_progress" => Ok(Status::InProgress),
            "blocked" => Ok(Status::Blocked),
            "closed" => Ok(Status::Closed),
            _ => Err(Error::MalformedInput(format!("Invalid status: {}", s))),
        }
    }
}

/// Kind of work an issue represents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    Bug,
    Feature,
    #[default]
    Task,
    Epic,
    Chore,
}

impl IssueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueType::Bug => "bug",
            IssueType::Feature => "feature",
            IssueType::Task => "task",
            IssueType::Epic => "epic",
            IssueType::Chore => "chore",
        }
    }
}

impl fmt::Display for IssueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Type of relationship between two issues.
///
/// The source of an edge depends on its target. Only `Blocks` gates readiness;
/// `ParentChild` drives hierarchy and label inheritance; the other two kinds
/// are informational.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DependencyKind {
    Blocks,
    Related,
    ParentChild,
    DiscoveredFrom,
}

impl DependencyKind {
    /// Returns true if this edge kind affects blocking/ready status.
    pub fn is_blocking(&self) -> bool {
        matches!(self, DependencyKind::Blocks)
    }

    /// Dense index used for per-kind adjacency tables.
    pub fn index(&self) -> usize {
        match self {
            DependencyKind::Blocks => 0,
            DependencyKind::Related => 1,
            DependencyKind::ParentChild => 2,
            DependencyKind::DiscoveredFrom => 3,
        }
    }

    /// Get all edge kinds, in index order.
    pub fn all() -> &'static [DependencyKind] {
        &[
            DependencyKind::Blocks,
            DependencyKind::Related,
            DependencyKind::ParentChild,
            DependencyKind::DiscoveredFrom,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DependencyKind::Blocks => "blocks",
            DependencyKind::Related => "related",
            DependencyKind::ParentChild => "parent-child",
            DependencyKind::DiscoveredFrom => "discovered-from",
        }
    }
}

impl fmt::Display for DependencyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DependencyKind {
    type Err = Error;

    /// Parse an edge kind. The empty string is an unspecified kind and reads as `blocks`.
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "" | "blocks" => Ok(DependencyKind::Blocks),
            "related" => Ok(DependencyKind::Related),
            "parent-child" => Ok(DependencyKind::ParentChild),
            "discovered-from" => Ok(DependencyKind::DiscoveredFrom),
            _ => Err(Error::MalformedInput(format!("Unknown dependency type: {}", s))),
        }
    }
}

impl Serialize for DependencyKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for DependencyKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

fn default_kind() -> DependencyKind {
    DependencyKind::Blocks
}

/// A typed dependency edge: `issue_id` depends on `depends_on_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    /// Source issue (the dependent)
    pub issue_id: String,

    /// Target issue (the dependency)
    pub depends_on_id: String,

    /// Relationship kind
    #[serde(rename = "type", default = "default_kind")]
    pub kind: DependencyKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
}

impl Dependency {
    pub fn new(issue_id: &str, depends_on_id: &str, kind: DependencyKind) -> Self {
        Self {
            issue_id: issue_id.to_string(),
            depends_on_id: depends_on_id.to_string(),
            kind,
            created_at: None,
            created_by: None,
        }
    }
}

/// A work item tracked in the record store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    /// Unique identifier (opaque, e.g. "bv-1a2b")
    pub id: String,

    pub title: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub design: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub acceptance_criteria: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub notes: String,

    #[serde(default)]
    pub status: Status,

    /// Priority level (lower is more important, 0 is highest)
    #[serde(default)]
    pub priority: i32,

    #[serde(default)]
    pub issue_type: IssueType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,

    /// Labels, deduplicated on load (first occurrence wins)
    #[serde(default, deserialize_with = "deserialize_labels")]
    pub labels: Vec<String>,

    #[serde(default)]
    pub dependencies: Vec<Dependency>,
}

fn deserialize_labels<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Vec<String>, D::Error> {
    let raw: Option<Vec<String>> = Option::deserialize(deserializer)?;
    Ok(dedup_labels(raw.unwrap_or_default()))
}

/// Drop empty and repeated labels, keeping first-occurrence order.
pub fn dedup_labels(labels: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    labels
        .into_iter()
        .filter(|l| !l.is_empty() && seen.insert(l.clone()))
        .collect()
}

impl Issue {
    /// Create a new open task with the given ID and title.
    pub fn new(id: &str, title: &str) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            title: title.to_string(),
            description: String::new(),
            design: String::new(),
            acceptance_criteria: String::new(),
            notes: String::new(),
            status: Status::Open,
            priority: 2,
            issue_type: IssueType::Task,
            assignee: None,
            created_at: now,
            updated_at: now,
            closed_at: None,
            labels: Vec::new(),
            dependencies: Vec::new(),
        }
    }

    /// Check the record-level invariants.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(Error::MalformedInput("issue ID cannot be empty".to_string()));
        }
        if self.title.is_empty() {
            return Err(Error::MalformedInput(format!(
                "issue {} has an empty title",
                self.id
            )));
        }
        if self.updated_at < self.created_at {
            return Err(Error::MalformedInput(format!(
                "issue {}: updated_at ({}) is before created_at ({})",
                self.id, self.updated_at, self.created_at
            )));
        }
        Ok(())
    }

    /// Returns true if the issue carries `label`.
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    /// Targets of this issue's blocking edges.
    pub fn blocking_targets(&self) -> impl Iterator<Item = &str> {
        self.dependencies
            .iter()
            .filter(|d| d.kind.is_blocking())
            .map(|d| d.depends_on_id.as_str())
    }

    /// Parent issue IDs (targets of parent-child edges).
    pub fn parents(&self) -> impl Iterator<Item = &str> {
        self.dependencies
            .iter()
            .filter(|d| d.kind == DependencyKind::ParentChild)
            .map(|d| d.depends_on_id.as_str())
    }
}

/// Structural metrics computed for one issue.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeMetrics {
    pub pagerank: f64,
    pub betweenness: f64,
    /// Longest blocking chain starting at this issue (cycles count once)
    pub critical_path_depth: usize,
    /// Issues this one depends on through blocking edges
    pub blocks_count: usize,
    /// Issues depending on this one through blocking edges
    pub blocked_by_count: usize,
    pub triage_score: f64,
}

/// Category of a non-fatal condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    InvalidRecord,
    DuplicateId,
    MissingDependencyTarget,
    SelfLoop,
    DeadlineExceeded,
    MalformedLine,
    MergeArtifact,
}

/// A non-fatal condition surfaced alongside a result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warning {
    pub kind: WarningKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue_id: Option<String>,
}

impl Warning {
    pub fn new(kind: WarningKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            issue_id: None,
        }
    }

    pub fn for_issue(kind: WarningKind, issue_id: &str, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            issue_id: Some(issue_id.to_string()),
        }
    }
}
