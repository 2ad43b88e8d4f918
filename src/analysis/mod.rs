//! The analysis engine.
//!
//! Every entry point here is a pure function of an immutable record slice and
//! an [`AnalysisOptions`] value. Nothing is cached or mutated across calls;
//! see [`crate::correlation::cache`] for the explicit artifact cache.

pub mod diff;
pub mod labels;
pub mod metrics;
pub mod plan;
pub mod workstream;

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::analysis::labels::{HealthWeights, LabelAnalysisResult};
use crate::analysis::metrics::{Insights, StructuralMetrics};
use crate::analysis::plan::ExecutionPlan;
use crate::models::graph::IssueGraph;
use crate::models::{Issue, Warning};

/// Fixed seed for betweenness source sampling.
pub const DEFAULT_BETWEENNESS_SEED: u64 = 0x6967_5f62_7477_6e73;

/// Point in time after which long computations return partial results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    pub fn new(at: Option<Instant>) -> Self {
        Self(at)
    }

    /// A deadline `timeout` from now.
    pub fn after(timeout: Duration) -> Self {
        Self(Instant::now().checked_add(timeout))
    }

    /// A deadline that never expires.
    pub fn none() -> Self {
        Self(None)
    }

    pub fn expired(&self) -> bool {
        self.0.is_some_and(|at| Instant::now() >= at)
    }
}

/// Tunables for one analysis pass.
///
/// `now` and `deadline` describe the pass itself and are left out of the
/// serialized form, so the JSON of an options value fingerprints only the
/// parameters that shape results.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisOptions {
    /// Reference instant for every age and staleness computation
    #[serde(skip)]
    pub now: DateTime<Utc>,

    #[serde(skip)]
    pub deadline: Option<Instant>,

    /// Days without an update before an issue counts as stale
    pub stale_threshold_days: i64,

    pub health_weights: HealthWeights,

    /// Maximum number of parallel tracks in a plan
    pub max_tracks: usize,

    /// Sources used when betweenness is sampled
    pub betweenness_sample: usize,

    /// Largest graph for which betweenness is exact
    pub betweenness_exact_limit: usize,

    pub betweenness_seed: u64,

    /// Maximum number of label paths reported in cross-label flow
    pub label_path_limit: usize,

    /// Maximum number of labels in one label path
    pub label_path_max_len: usize,

    pub workstream_max_depth: usize,

    pub workstream_min_group: usize,

    /// Treat an issue as blocked while a parent-child ancestor is blocked
    pub parent_gates_readiness: bool,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self::at(Utc::now())
    }
}

impl AnalysisOptions {
    /// Default options evaluated at `now`.
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now,
            deadline: None,
            stale_threshold_days: labels::DEFAULT_STALE_THRESHOLD_DAYS,
            health_weights: HealthWeights::default(),
            max_tracks: plan::DEFAULT_MAX_TRACKS,
            betweenness_sample: 200,
            betweenness_exact_limit: 500,
            betweenness_seed: DEFAULT_BETWEENNESS_SEED,
            label_path_limit: labels::DEFAULT_PATH_LIMIT,
            label_path_max_len: labels::DEFAULT_PATH_MAX_LEN,
            workstream_max_depth: workstream::DEFAULT_MAX_DEPTH,
            workstream_min_group: workstream::DEFAULT_MIN_GROUP_SIZE,
            parent_gates_readiness: false,
        }
    }

    pub fn deadline(&self) -> Deadline {
        Deadline::new(self.deadline)
    }

    pub fn with_deadline(mut self, timeout: Duration) -> Self {
        self.deadline = Instant::now().checked_add(timeout);
        self
    }
}

/// Everything one analysis pass produces for a whole record set.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisBundle {
    pub generated_at: DateTime<Utc>,
    pub issue_count: usize,
    pub insights: Insights,
    pub plan: ExecutionPlan,
    pub labels: LabelAnalysisResult,
    pub partial: bool,
    pub warnings: Vec<Warning>,
}

/// Run graph construction, metrics, planning and label analysis in one pass.
///
/// Never fails: invalid records and dangling edges become warnings, and an
/// empty record set yields an empty but well-formed bundle.
pub fn analyze(records: &[Issue], opts: &AnalysisOptions) -> AnalysisBundle {
    let graph = IssueGraph::build(records);
    let metrics = StructuralMetrics::compute(&graph, opts);
    let plan = plan::plan(&graph, &metrics, opts);
    let labels = labels::analyze_labels(&graph, &metrics, opts);

    let mut warnings: Vec<Warning> = graph.warnings().to_vec();
    warnings.extend(metrics.warnings.iter().cloned());

    info!(
        issues = graph.len(),
        ready = plan.summary.ready,
        blocked = plan.summary.blocked,
        labels = labels.total_labels,
        warnings = warnings.len(),
        "Analysis complete"
    );

    AnalysisBundle {
        generated_at: opts.now,
        issue_count: graph.len(),
        insights: Insights::new(&graph, &metrics),
        partial: metrics.partial,
        plan,
        labels,
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{depends_on, issue, now};

    #[test]
    fn test_deadline_none_never_expires() {
        assert!(!Deadline::none().expired());
        assert!(!Deadline::after(Duration::from_secs(3600)).expired());
    }

    #[test]
    fn test_deadline_past_is_expired() {
        let past = Instant::now() - Duration::from_millis(5);
        assert!(Deadline::new(Some(past)).expired());
    }

    #[test]
    fn test_options_serialization_skips_now() {
        let a = serde_json::to_string(&AnalysisOptions::at(now())).unwrap();
        let b = serde_json::to_string(&AnalysisOptions::at(now() + chrono::Duration::days(3)))
            .unwrap();
        assert_eq!(a, b);
        assert!(!a.contains("now"));
    }

    #[test]
    fn test_analyze_empty() {
        let bundle = analyze(&[], &AnalysisOptions::at(now()));
        assert_eq!(bundle.issue_count, 0);
        assert!(bundle.plan.tracks.is_empty());
        assert!(bundle.plan.recommendations.is_empty());
        assert_eq!(bundle.labels.total_labels, 0);
        assert!(bundle.warnings.is_empty());
        assert!(!bundle.partial);
    }

    #[test]
    fn test_analyze_collects_graph_warnings() {
        let bundle = analyze(
            &[depends_on(issue("a"), "missing")],
            &AnalysisOptions::at(now()),
        );
        assert_eq!(bundle.warnings.len(), 1);
        assert_eq!(bundle.plan.summary.ready, 1);
    }

    #[test]
    fn test_analyze_is_deterministic() {
        let records = vec![
            depends_on(issue("a"), "b"),
            depends_on(issue("b"), "c"),
            depends_on(issue("d"), "c"),
            issue("c"),
        ];
        let opts = AnalysisOptions::at(now());
        let first = serde_json::to_string(&analyze(&records, &opts)).unwrap();
        let second = serde_json::to_string(&analyze(&records, &opts)).unwrap();
        assert_eq!(first, second);
    }
}
