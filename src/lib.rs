//! issuegraph - graph analytics over issue-tracker records.
//!
//! This library provides the analysis core behind the `ig` CLI: dependency
//! graph construction, structural metrics, execution planning, label health,
//! workstream detection, baseline diffs and per-issue causal chains.
//!
//! Everything in [`analysis`] and [`correlation`] is pure computation over an
//! immutable snapshot of records. The [`storage`], [`config`], [`cli`] and
//! [`commands`] modules are the thin I/O shell around it.

pub mod analysis;
pub mod cli;
pub mod commands;
pub mod config;
pub mod correlation;
pub mod models;
pub mod storage;

use std::path::PathBuf;

/// Library-level error type for issuegraph operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("Record store not found at {}", .0.display())]
    MissingStoreRoot(PathBuf),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("{0}")]
    Other(String),
}

/// Result type alias for issuegraph operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Test utilities shared by unit tests.
#[cfg(test)]
pub(crate) mod test_utils {
    use chrono::{DateTime, TimeZone, Utc};

    use crate::models::{Dependency, DependencyKind, Issue, Status};

    /// Fixed reference instant used by all time-dependent tests.
    pub fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, 10, 0, 0).unwrap()
    }

    /// An open issue with priority 1, created and updated at [`now`].
    pub fn issue(id: &str) -> Issue {
        let mut issue = Issue::new(id, &format!("Issue {}", id));
        issue.priority = 1;
        issue.created_at = now();
        issue.updated_at = now();
        issue
    }

    pub fn with_status(mut issue: Issue, status: Status) -> Issue {
        issue.status = status;
        issue
    }

    pub fn with_labels(mut issue: Issue, labels: &[&str]) -> Issue {
        issue.labels = labels.iter().map(|l| l.to_string()).collect();
        issue
    }

    /// `issue` depends on `target` (target blocks issue).
    pub fn depends_on(mut issue: Issue, target: &str) -> Issue {
        let dep = Dependency::new(&issue.id, target, DependencyKind::Blocks);
        issue.dependencies.push(dep);
        issue
    }

    /// `issue` is a child of `parent`.
    pub fn child_of(mut issue: Issue, parent: &str) -> Issue {
        let dep = Dependency::new(&issue.id, parent, DependencyKind::ParentChild);
        issue.dependencies.push(dep);
        issue
    }
}
