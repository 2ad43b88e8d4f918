//! Label-scoped statistics, co-occurrence, cross-label flow and label health.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::analysis::AnalysisOptions;
use crate::analysis::metrics::{StructuralMetrics, finite};
use crate::models::graph::IssueGraph;
use crate::models::{Issue, Status};

pub const DEFAULT_STALE_THRESHOLD_DAYS: i64 = 14;
pub const DEFAULT_PATH_LIMIT: usize = 10;
pub const DEFAULT_PATH_MAX_LEN: usize = 6;

pub const HEALTHY_THRESHOLD: i32 = 70;
pub const WARNING_THRESHOLD: i32 = 40;

/// Trend band for velocity direction, in percent.
const TREND_BAND: f64 = 10.0;

/// Upper bound on partial paths explored when enumerating label paths.
const PATH_EXPLORATION_CAP: usize = 10_000;

/// Weights of the four health sub-scores.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HealthWeights {
    pub velocity: f64,
    pub freshness: f64,
    pub flow: f64,
    pub criticality: f64,
}

impl Default for HealthWeights {
    fn default() -> Self {
        Self {
            velocity: 0.25,
            freshness: 0.25,
            flow: 0.25,
            criticality: 0.25,
        }
    }
}

impl HealthWeights {
    pub fn sum(&self) -> f64 {
        self.velocity + self.freshness + self.flow + self.criticality
    }

    /// Each weight must lie in [0,1] and together they must sum to 1.
    pub fn validate(&self) -> Result<(), String> {
        for (name, w) in [
            ("velocity", self.velocity),
            ("freshness", self.freshness),
            ("flow", self.flow),
            ("criticality", self.criticality),
        ] {
            if !(0.0..=1.0).contains(&w) {
                return Err(format!("health weight {} must be within [0, 1], got {}", name, w));
            }
        }
        if (self.sum() - 1.0).abs() > 1e-6 {
            return Err(format!("health weights must sum to 1, got {}", self.sum()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthLevel {
    Healthy,
    Warning,
    Critical,
}

impl HealthLevel {
    pub fn from_score(score: i32) -> Self {
        if score >= HEALTHY_THRESHOLD {
            HealthLevel::Healthy
        } else if score >= WARNING_THRESHOLD {
            HealthLevel::Warning
        } else {
            HealthLevel::Critical
        }
    }
}

/// Weighted sum of the sub-scores, truncated and clamped to [0,100].
pub fn composite_health(
    velocity: i32,
    freshness: i32,
    flow: i32,
    criticality: i32,
    weights: &HealthWeights,
) -> i32 {
    let weighted = velocity as f64 * weights.velocity
        + freshness as f64 * weights.freshness
        + flow as f64 * weights.flow
        + criticality as f64 * weights.criticality;
    (finite(weighted) as i32).clamp(0, 100)
}

fn score(x: f64) -> i32 {
    (finite(x).round() as i32).clamp(0, 100)
}

fn days_between(later: DateTime<Utc>, earlier: DateTime<Utc>) -> f64 {
    (later - earlier).num_seconds().max(0) as f64 / 86_400.0
}

/// When a closed issue was closed, falling back to its last update.
fn closed_time(issue: &Issue) -> Option<DateTime<Utc>> {
    issue
        .status
        .is_closed()
        .then(|| issue.closed_at.unwrap_or(issue.updated_at))
}

// ============================================================================
// Label extraction
// ============================================================================

/// Basic per-label counts.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LabelStats {
    pub label: String,
    pub total_count: usize,
    pub open_count: usize,
    pub closed_count: usize,
    pub in_progress: usize,
    /// Unclosed issues with a present, unclosed blocker
    pub blocked: usize,
    /// Unclosed issues not updated within the stale threshold
    pub stale_count: usize,
    pub by_status: BTreeMap<String, usize>,
    pub by_priority: BTreeMap<i32, usize>,
    pub by_type: BTreeMap<String, usize>,
    pub issue_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LabelExtraction {
    /// Unique labels in sorted order
    pub labels: Vec<String>,
    pub label_count: usize,
    pub stats: BTreeMap<String, LabelStats>,
    pub issue_count: usize,
    pub unlabeled_count: usize,
    /// Labels by issue count, ties alphabetical
    pub top_labels: Vec<String>,
}

/// Collect every label in the graph with its statistics.
pub fn extract_labels(g: &IssueGraph, now: DateTime<Utc>, stale_threshold_days: i64) -> LabelExtraction {
    let mut result = LabelExtraction {
        issue_count: g.len(),
        ..Default::default()
    };
    let stale_after = Duration::days(stale_threshold_days);

    for (idx, issue) in g.issues().iter().enumerate() {
        if issue.labels.is_empty() {
            result.unlabeled_count += 1;
        }
        for label in issue.labels.iter().filter(|l| !l.is_empty()) {
            let stats = result.stats.entry(label.clone()).or_insert_with(|| LabelStats {
                label: label.clone(),
                ..Default::default()
            });
            stats.total_count += 1;
            stats.issue_ids.push(issue.id.clone());
            match issue.status {
                Status::Open => stats.open_count += 1,
                Status::Closed => stats.closed_count += 1,
                Status::InProgress => stats.in_progress += 1,
                Status::Blocked => {}
            }
            if issue.status.is_open() {
                if g.has_open_blocker(idx) {
                    stats.blocked += 1;
                }
                if now - issue.updated_at > stale_after {
                    stats.stale_count += 1;
                }
            }
            *stats.by_status.entry(issue.status.to_string()).or_default() += 1;
            *stats.by_priority.entry(issue.priority).or_default() += 1;
            *stats.by_type.entry(issue.issue_type.to_string()).or_default() += 1;
        }
    }

    result.labels = result.stats.keys().cloned().collect();
    result.label_count = result.labels.len();
    result.top_labels = sort_labels_by_count(&result.stats);
    result
}

/// Labels by descending issue count, alphabetical on ties.
pub fn sort_labels_by_count(stats: &BTreeMap<String, LabelStats>) -> Vec<String> {
    let mut labels: Vec<(&String, usize)> = stats.iter().map(|(l, s)| (l, s.total_count)).collect();
    labels.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
    labels.into_iter().map(|(l, _)| l.clone()).collect()
}

/// Issues carrying `label`, in input order.
pub fn issues_with_label<'a>(issues: &'a [Issue], label: &str) -> Vec<&'a Issue> {
    issues.iter().filter(|i| i.has_label(label)).collect()
}

/// Labels of the issue with id `issue_id`, if present.
pub fn labels_for_issue<'a>(issues: &'a [Issue], issue_id: &str) -> Option<&'a [String]> {
    issues
        .iter()
        .find(|i| i.id == issue_id)
        .map(|i| i.labels.as_slice())
}

/// Labels present in every one of `sets`, sorted.
pub fn common_labels(sets: &[&[String]]) -> Vec<String> {
    let Some((first, rest)) = sets.split_first() else {
        return Vec::new();
    };
    let mut common: BTreeSet<&String> = first.iter().collect();
    for set in rest {
        let members: HashSet<&String> = set.iter().collect();
        common.retain(|l| members.contains(l));
    }
    common.into_iter().cloned().collect()
}

/// Symmetric counts of label pairs appearing on the same issue.
pub fn label_cooccurrence(issues: &[Issue]) -> BTreeMap<String, BTreeMap<String, usize>> {
    let mut cooc: BTreeMap<String, BTreeMap<String, usize>> = BTreeMap::new();
    for issue in issues {
        let labels = &issue.labels;
        for i in 0..labels.len() {
            for j in (i + 1)..labels.len() {
                if labels[i] == labels[j] {
                    continue;
                }
                *cooc
                    .entry(labels[i].clone())
                    .or_default()
                    .entry(labels[j].clone())
                    .or_default() += 1;
                *cooc
                    .entry(labels[j].clone())
                    .or_default()
                    .entry(labels[i].clone())
                    .or_default() += 1;
            }
        }
    }
    cooc
}

// ============================================================================
// Cross-label flow
// ============================================================================

/// One blocking edge crossing from one label to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockingPair {
    pub blocker_id: String,
    pub blocked_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LabelDependency {
    /// Label of the blocking side
    pub from_label: String,
    /// Label of the blocked side
    pub to_label: String,
    pub issue_count: usize,
    pub blocking_pairs: Vec<BlockingPair>,
}

/// A chain of distinct labels connected by non-zero flow.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabelPath {
    pub labels: Vec<String>,
    /// Number of label transitions
    pub length: usize,
    /// Sum of the flow counts along the path
    pub total_weight: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CrossLabelFlow {
    pub labels: Vec<String>,
    /// `flow_matrix[from][to]`: blocker label to blocked label
    pub flow_matrix: Vec<Vec<usize>>,
    pub dependencies: Vec<LabelDependency>,
    pub critical_paths: Vec<LabelPath>,
    /// Labels with the largest positive out-flow minus in-flow
    pub bottleneck_labels: Vec<String>,
    pub total_cross_label_deps: usize,
}

/// Build the label-to-label blocking flow.
///
/// Only edges between two unclosed issues count. An edge contributes to
/// (A, B) when the blocker carries A but not B and the blocked issue carries
/// B but not A.
pub fn cross_label_flow(g: &IssueGraph, path_limit: usize, path_max_len: usize) -> CrossLabelFlow {
    let labels: Vec<String> = g
        .issues()
        .iter()
        .flat_map(|i| i.labels.iter().cloned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let pos: BTreeMap<&str, usize> = labels.iter().enumerate().map(|(i, l)| (l.as_str(), i)).collect();
    let n = labels.len();
    let mut matrix = vec![vec![0usize; n]; n];
    let mut pairs: BTreeMap<(usize, usize), Vec<BlockingPair>> = BTreeMap::new();

    for blocked in 0..g.len() {
        let blocked_issue = g.issue(blocked);
        if blocked_issue.status.is_closed() {
            continue;
        }
        for &blocker in g.blocking_successors(blocked) {
            let blocker_issue = g.issue(blocker);
            if blocker_issue.status.is_closed() {
                continue;
            }
            for a in &blocker_issue.labels {
                if blocked_issue.has_label(a) {
                    continue;
                }
                for b in &blocked_issue.labels {
                    if blocker_issue.has_label(b) {
                        continue;
                    }
                    let (Some(&ai), Some(&bi)) = (pos.get(a.as_str()), pos.get(b.as_str())) else {
                        continue;
                    };
                    matrix[ai][bi] += 1;
                    pairs.entry((ai, bi)).or_default().push(BlockingPair {
                        blocker_id: blocker_issue.id.clone(),
                        blocked_id: blocked_issue.id.clone(),
                    });
                }
            }
        }
    }

    let dependencies: Vec<LabelDependency> = pairs
        .into_iter()
        .map(|((a, b), blocking_pairs)| LabelDependency {
            from_label: labels[a].clone(),
            to_label: labels[b].clone(),
            issue_count: blocking_pairs.len(),
            blocking_pairs,
        })
        .collect();
    let total = dependencies.iter().map(|d| d.issue_count).sum();

    let mut net: Vec<(i64, usize)> = (0..n)
        .map(|l| {
            let out: usize = matrix[l].iter().sum();
            let inc: usize = matrix.iter().map(|row| row[l]).sum();
            (out as i64 - inc as i64, l)
        })
        .filter(|(d, _)| *d > 0)
        .collect();
    net.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

    CrossLabelFlow {
        critical_paths: label_paths(&labels, &matrix, path_limit, path_max_len),
        bottleneck_labels: net.into_iter().map(|(_, l)| labels[l].clone()).collect(),
        labels,
        flow_matrix: matrix,
        dependencies,
        total_cross_label_deps: total,
    }
}

/// Maximal simple paths over non-zero flow, longest and heaviest first.
fn label_paths(labels: &[String], matrix: &[Vec<usize>], limit: usize, max_len: usize) -> Vec<LabelPath> {
    let n = labels.len();
    let mut found: Vec<(Vec<usize>, usize)> = Vec::new();
    let mut explored = 0usize;

    // Depth-first with an explicit stack of (path, weight).
    for start in 0..n {
        if !matrix[start].iter().any(|&c| c > 0) {
            continue;
        }
        let mut stack: Vec<(Vec<usize>, usize)> = vec![(vec![start], 0)];
        while let Some((path, weight)) = stack.pop() {
            explored += 1;
            if explored > PATH_EXPLORATION_CAP {
                break;
            }
            let last = path[path.len() - 1];
            let mut extended = false;
            if path.len() < max_len {
                for next in (0..n).rev() {
                    if matrix[last][next] > 0 && !path.contains(&next) {
                        let mut p = path.clone();
                        p.push(next);
                        stack.push((p, weight + matrix[last][next]));
                        extended = true;
                    }
                }
            }
            if !extended && path.len() >= 2 {
                found.push((path, weight));
            }
        }
    }

    found.sort_by(|a, b| {
        b.0.len()
            .cmp(&a.0.len())
            .then(b.1.cmp(&a.1))
            .then_with(|| {
                let la: Vec<&str> = a.0.iter().map(|&i| labels[i].as_str()).collect();
                let lb: Vec<&str> = b.0.iter().map(|&i| labels[i].as_str()).collect();
                la.cmp(&lb)
            })
    });
    found
        .into_iter()
        .take(limit)
        .map(|(path, weight)| LabelPath {
            length: path.len() - 1,
            labels: path.into_iter().map(|i| labels[i].clone()).collect(),
            total_weight: weight as f64,
        })
        .collect()
}

// ============================================================================
// Label health
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Improving,
    Stable,
    Declining,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VelocityMetrics {
    pub closed_last_7_days: usize,
    pub closed_last_30_days: usize,
    pub avg_days_to_close: f64,
    pub trend_direction: TrendDirection,
    pub trend_percent: f64,
    pub velocity_score: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FreshnessMetrics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub most_recent_update: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest_open_issue: Option<DateTime<Utc>>,
    pub avg_days_since_update: f64,
    pub stale_count: usize,
    pub stale_threshold_days: i64,
    pub freshness_score: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowMetrics {
    /// Labels blocking this one
    pub incoming_labels: Vec<String>,
    /// Labels this one blocks
    pub outgoing_labels: Vec<String>,
    pub incoming_deps: usize,
    pub outgoing_deps: usize,
    /// Unclosed issues held up by an issue without this label
    pub blocked_by_external: usize,
    /// Unclosed issues holding up an issue without this label
    pub blocking_external: usize,
    pub flow_score: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CriticalityMetrics {
    pub avg_pagerank: f64,
    pub avg_betweenness: f64,
    pub max_betweenness: f64,
    pub critical_path_count: usize,
    pub bottleneck_count: usize,
    pub criticality_score: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabelHealth {
    pub label: String,
    pub issue_count: usize,
    pub open_count: usize,
    pub closed_count: usize,
    pub health: i32,
    pub health_level: HealthLevel,
    pub velocity: VelocityMetrics,
    pub freshness: FreshnessMetrics,
    pub flow: FlowMetrics,
    pub criticality: CriticalityMetrics,
    pub issues: Vec<String>,
}

impl LabelHealth {
    pub fn needs_attention(&self) -> bool {
        self.health < HEALTHY_THRESHOLD
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabelSummary {
    pub label: String,
    pub issue_count: usize,
    pub open_count: usize,
    pub health: i32,
    pub health_level: HealthLevel,
    /// Most important unclosed issue
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_issue: Option<String>,
    pub needs_attention: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabelAnalysisResult {
    pub generated_at: DateTime<Utc>,
    pub total_labels: usize,
    pub healthy_count: usize,
    pub warning_count: usize,
    pub critical_count: usize,
    pub unlabeled_count: usize,
    pub labels: Vec<LabelHealth>,
    pub summaries: Vec<LabelSummary>,
    pub cooccurrence: BTreeMap<String, BTreeMap<String, usize>>,
    pub cross_label_flow: CrossLabelFlow,
    /// Labels below the healthy threshold, worst first
    pub attention_needed: Vec<String>,
}

fn velocity(members: &[usize], g: &IssueGraph, now: DateTime<Utc>) -> VelocityMetrics {
    let mut last7 = 0;
    let mut prior7 = 0;
    let mut last30 = 0;
    let mut close_days = Vec::new();
    for &v in members {
        let issue = g.issue(v);
        let Some(closed) = closed_time(issue) else { continue };
        let age = days_between(now, closed);
        if age <= 7.0 {
            last7 += 1;
        } else if age <= 14.0 {
            prior7 += 1;
        }
        if age <= 30.0 {
            last30 += 1;
        }
        close_days.push(days_between(closed, issue.created_at));
    }

    let trend_percent = if prior7 > 0 {
        (last7 as f64 - prior7 as f64) / prior7 as f64 * 100.0
    } else if last7 > 0 {
        100.0
    } else {
        0.0
    };
    let trend_direction = if trend_percent > TREND_BAND {
        TrendDirection::Improving
    } else if trend_percent < -TREND_BAND {
        TrendDirection::Declining
    } else {
        TrendDirection::Stable
    };

    let open = members.iter().filter(|&&v| g.status(v).is_open()).count();
    let velocity_score = if open == 0 {
        100
    } else {
        let base = last30 as f64 / (last30 + open) as f64 * 100.0;
        let adjust = match trend_direction {
            TrendDirection::Improving => 10.0,
            TrendDirection::Stable => 0.0,
            TrendDirection::Declining => -10.0,
        };
        score(base + adjust)
    };

    VelocityMetrics {
        closed_last_7_days: last7,
        closed_last_30_days: last30,
        avg_days_to_close: if close_days.is_empty() {
            0.0
        } else {
            finite(close_days.iter().sum::<f64>() / close_days.len() as f64)
        },
        trend_direction,
        trend_percent: finite(trend_percent),
        velocity_score,
    }
}

fn freshness(members: &[usize], g: &IssueGraph, now: DateTime<Utc>, threshold_days: i64) -> FreshnessMetrics {
    let open: Vec<&Issue> = members
        .iter()
        .map(|&v| g.issue(v))
        .filter(|i| i.status.is_open())
        .collect();
    let threshold = threshold_days.max(1) as f64;
    let ages: Vec<f64> = open.iter().map(|i| days_between(now, i.updated_at)).collect();
    let stale_count = ages.iter().filter(|&&d| d > threshold).count();
    let avg = if ages.is_empty() {
        0.0
    } else {
        ages.iter().sum::<f64>() / ages.len() as f64
    };
    let freshness_score = if open.is_empty() {
        100
    } else {
        let stale_fraction = stale_count as f64 / open.len() as f64;
        score(100.0 * (1.0 - avg / (2.0 * threshold)).max(0.0) - 50.0 * stale_fraction)
    };

    FreshnessMetrics {
        most_recent_update: members.iter().map(|&v| g.issue(v).updated_at).max(),
        oldest_open_issue: open.iter().map(|i| i.created_at).min(),
        avg_days_since_update: finite(avg),
        stale_count,
        stale_threshold_days: threshold_days,
        freshness_score,
    }
}

fn flow(label: &str, members: &[usize], g: &IssueGraph, cross: &CrossLabelFlow) -> FlowMetrics {
    let mut blocked_by_external = 0;
    let mut blocking_external = 0;
    let mut open = 0;
    for &v in members {
        if g.status(v).is_closed() {
            continue;
        }
        open += 1;
        if g.open_blockers(v).any(|b| !g.issue(b).has_label(label)) {
            blocked_by_external += 1;
        }
        if g
            .blocking_predecessors(v)
            .iter()
            .any(|&d| g.status(d).is_open() && !g.issue(d).has_label(label))
        {
            blocking_external += 1;
        }
    }

    let mut incoming = Vec::new();
    let mut outgoing = Vec::new();
    let mut incoming_deps = 0;
    let mut outgoing_deps = 0;
    for dep in &cross.dependencies {
        if dep.to_label == label {
            incoming.push(dep.from_label.clone());
            incoming_deps += dep.issue_count;
        }
        if dep.from_label == label {
            outgoing.push(dep.to_label.clone());
            outgoing_deps += dep.issue_count;
        }
    }

    FlowMetrics {
        incoming_labels: incoming,
        outgoing_labels: outgoing,
        incoming_deps,
        outgoing_deps,
        blocked_by_external,
        blocking_external,
        flow_score: if open == 0 {
            100
        } else {
            score((1.0 - blocked_by_external as f64 / open as f64) * 100.0)
        },
    }
}

/// Analyze every label: health, summaries, co-occurrence and cross-label flow.
pub fn analyze_labels(g: &IssueGraph, m: &StructuralMetrics, opts: &AnalysisOptions) -> LabelAnalysisResult {
    let extraction = extract_labels(g, opts.now, opts.stale_threshold_days);
    let cross = cross_label_flow(g, opts.label_path_limit, opts.label_path_max_len);

    let members: BTreeMap<&str, Vec<usize>> = extraction
        .labels
        .iter()
        .map(|label| {
            let idx = extraction.stats[label]
                .issue_ids
                .iter()
                .filter_map(|id| g.index_of(id))
                .collect();
            (label.as_str(), idx)
        })
        .collect();

    let avg = |values: &[f64], idx: &[usize]| {
        if idx.is_empty() {
            0.0
        } else {
            finite(idx.iter().map(|&v| values[v]).sum::<f64>() / idx.len() as f64)
        }
    };
    let max_avg_pr = members.values().map(|idx| avg(&m.pagerank, idx)).fold(0.0, f64::max);
    let max_avg_bw = members.values().map(|idx| avg(&m.betweenness, idx)).fold(0.0, f64::max);
    let graph_max_bw = m.betweenness.iter().copied().fold(0.0, f64::max);
    let on_path: HashSet<usize> = m.critical_path.iter().copied().collect();

    let mut labels: Vec<LabelHealth> = Vec::with_capacity(members.len());
    for (&label, idx) in &members {
        let velocity = velocity(idx, g, opts.now);
        let freshness = freshness(idx, g, opts.now, opts.stale_threshold_days);
        let flow = flow(label, idx, g, &cross);

        let avg_pagerank = avg(&m.pagerank, idx);
        let avg_betweenness = avg(&m.betweenness, idx);
        let pr_part = if max_avg_pr > 0.0 { avg_pagerank / max_avg_pr } else { 0.0 };
        let bw_part = if max_avg_bw > 0.0 { avg_betweenness / max_avg_bw } else { 0.0 };
        let criticality = CriticalityMetrics {
            avg_pagerank,
            avg_betweenness,
            max_betweenness: idx.iter().map(|&v| m.betweenness[v]).fold(0.0, f64::max),
            critical_path_count: idx.iter().filter(|v| on_path.contains(v)).count(),
            bottleneck_count: idx
                .iter()
                .filter(|&&v| graph_max_bw > 0.0 && m.betweenness[v] >= 0.5 * graph_max_bw)
                .count(),
            criticality_score: score(100.0 * (0.5 * pr_part + 0.5 * bw_part)),
        };

        let health = composite_health(
            velocity.velocity_score,
            freshness.freshness_score,
            flow.flow_score,
            criticality.criticality_score,
            &opts.health_weights,
        );
        let stats = &extraction.stats[label];
        labels.push(LabelHealth {
            label: label.to_string(),
            issue_count: stats.total_count,
            open_count: idx.iter().filter(|&&v| g.status(v).is_open()).count(),
            closed_count: stats.closed_count,
            health,
            health_level: HealthLevel::from_score(health),
            velocity,
            freshness,
            flow,
            criticality,
            issues: stats.issue_ids.clone(),
        });
    }

    let summaries: Vec<LabelSummary> = labels
        .iter()
        .map(|h| LabelSummary {
            label: h.label.clone(),
            issue_count: h.issue_count,
            open_count: h.open_count,
            health: h.health,
            health_level: h.health_level,
            top_issue: members[h.label.as_str()]
                .iter()
                .copied()
                .filter(|&v| g.status(v).is_open())
                .min_by(|&a, &b| g.issue(a).priority.cmp(&g.issue(b).priority).then(a.cmp(&b)))
                .map(|v| g.id(v).to_string()),
            needs_attention: h.needs_attention(),
        })
        .collect();

    let mut attention: Vec<&LabelHealth> = labels.iter().filter(|h| h.needs_attention()).collect();
    attention.sort_by(|a, b| a.health.cmp(&b.health).then(a.label.cmp(&b.label)));
    let attention_needed = attention.into_iter().map(|h| h.label.clone()).collect();

    let count_level = |level: HealthLevel| labels.iter().filter(|h| h.health_level == level).count();

    debug!(
        labels = labels.len(),
        cross_label_deps = cross.total_cross_label_deps,
        "Analyzed labels"
    );

    LabelAnalysisResult {
        generated_at: opts.now,
        total_labels: labels.len(),
        healthy_count: count_level(HealthLevel::Healthy),
        warning_count: count_level(HealthLevel::Warning),
        critical_count: count_level(HealthLevel::Critical),
        unlabeled_count: extraction.unlabeled_count,
        cooccurrence: label_cooccurrence(g.issues()),
        cross_label_flow: cross,
        summaries,
        attention_needed,
        labels,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{depends_on, issue, now, with_labels, with_status};

    fn opts() -> AnalysisOptions {
        AnalysisOptions::at(now())
    }

    fn analyze(records: &[Issue]) -> LabelAnalysisResult {
        let g = IssueGraph::build(records);
        let m = StructuralMetrics::compute(&g, &opts());
        analyze_labels(&g, &m, &opts())
    }

    #[test]
    fn test_health_level_from_score() {
        assert_eq!(HealthLevel::from_score(100), HealthLevel::Healthy);
        assert_eq!(HealthLevel::from_score(70), HealthLevel::Healthy);
        assert_eq!(HealthLevel::from_score(69), HealthLevel::Warning);
        assert_eq!(HealthLevel::from_score(40), HealthLevel::Warning);
        assert_eq!(HealthLevel::from_score(39), HealthLevel::Critical);
        assert_eq!(HealthLevel::from_score(0), HealthLevel::Critical);
    }

    #[test]
    fn test_composite_health() {
        let w = HealthWeights::default();
        assert_eq!(composite_health(100, 100, 100, 100, &w), 100);
        assert_eq!(composite_health(0, 0, 0, 0, &w), 0);
        assert_eq!(composite_health(50, 50, 50, 50, &w), 50);
        assert_eq!(composite_health(100, 0, 100, 0, &w), 50);
    }

    #[test]
    fn test_health_weights_validate() {
        assert!(HealthWeights::default().validate().is_ok());
        let bad = HealthWeights {
            velocity: 0.5,
            ..HealthWeights::default()
        };
        assert!(bad.validate().is_err());
        let negative = HealthWeights {
            velocity: -0.25,
            freshness: 0.75,
            flow: 0.25,
            criticality: 0.25,
        };
        assert!(negative.validate().is_err());
    }

    #[test]
    fn test_extract_labels_empty() {
        let g = IssueGraph::build(&[]);
        let result = extract_labels(&g, now(), 14);
        assert_eq!(result.label_count, 0);
        assert_eq!(result.issue_count, 0);
        assert!(result.stats.is_empty());
    }

    #[test]
    fn test_extract_labels_basic() {
        let g = IssueGraph::build(&[
            with_labels(issue("bv-1"), &["api", "bug"]),
            with_status(with_labels(issue("bv-2"), &["api", "feature"]), Status::Closed),
            with_status(with_labels(issue("bv-3"), &["ui"]), Status::InProgress),
            issue("bv-4"),
        ]);
        let result = extract_labels(&g, now(), 14);
        assert_eq!(result.issue_count, 4);
        assert_eq!(result.unlabeled_count, 1);
        assert_eq!(result.labels, vec!["api", "bug", "feature", "ui"]);
        let api = &result.stats["api"];
        assert_eq!(api.total_count, 2);
        assert_eq!(api.open_count, 1);
        assert_eq!(api.closed_count, 1);
        assert_eq!(result.stats["ui"].in_progress, 1);
        assert_eq!(result.top_labels[0], "api");
    }

    #[test]
    fn test_extract_labels_stale_and_blocked() {
        let mut stale = with_labels(issue("a"), &["x"]);
        stale.created_at = now() - Duration::days(40);
        stale.updated_at = now() - Duration::days(20);
        let g = IssueGraph::build(&[depends_on(stale, "b"), issue("b")]);
        let stats = &extract_labels(&g, now(), 14).stats["x"];
        assert_eq!(stats.stale_count, 1);
        assert_eq!(stats.blocked, 1);
    }

    #[test]
    fn test_sort_labels_by_count_ties_alphabetical() {
        let mut stats = BTreeMap::new();
        for (label, count) in [("ui", 3), ("feature", 10), ("bug", 5), ("api", 10)] {
            stats.insert(
                label.to_string(),
                LabelStats {
                    label: label.to_string(),
                    total_count: count,
                    ..Default::default()
                },
            );
        }
        assert_eq!(sort_labels_by_count(&stats), vec!["api", "feature", "bug", "ui"]);
    }

    #[test]
    fn test_issues_with_label_and_labels_for_issue() {
        let issues = vec![
            with_labels(issue("bv-1"), &["api", "bug"]),
            with_labels(issue("bv-2"), &["api"]),
            with_labels(issue("bv-3"), &["ui"]),
        ];
        assert_eq!(issues_with_label(&issues, "api").len(), 2);
        assert!(issues_with_label(&issues, "nope").is_empty());
        assert_eq!(labels_for_issue(&issues, "bv-1").map(|l| l.len()), Some(2));
        assert!(labels_for_issue(&issues, "bv-999").is_none());
    }

    #[test]
    fn test_common_labels() {
        let s1: Vec<String> = ["api", "bug", "feature"].iter().map(|s| s.to_string()).collect();
        let s2: Vec<String> = ["api", "feature", "ui"].iter().map(|s| s.to_string()).collect();
        let s3: Vec<String> = ["api", "core"].iter().map(|s| s.to_string()).collect();
        assert_eq!(common_labels(&[s1.as_slice(), s2.as_slice(), s3.as_slice()]), vec!["api"]);
        assert_eq!(common_labels(&[s1.as_slice(), s2.as_slice()]), vec!["api", "feature"]);
        assert!(common_labels(&[]).is_empty());
    }

    #[test]
    fn test_label_cooccurrence() {
        let issues = vec![
            with_labels(issue("1"), &["api", "bug"]),
            with_labels(issue("2"), &["api", "bug"]),
            with_labels(issue("3"), &["api", "feature"]),
            with_labels(issue("4"), &["ui"]),
        ];
        let cooc = label_cooccurrence(&issues);
        assert_eq!(cooc["api"]["bug"], 2);
        assert_eq!(cooc["bug"]["api"], 2);
        assert_eq!(cooc["api"]["feature"], 1);
        assert!(!cooc.contains_key("ui"));
    }

    #[test]
    fn test_cross_label_flow_orientation() {
        // backend blocks frontend
        let g = IssueGraph::build(&[
            depends_on(with_labels(issue("fe"), &["frontend"]), "be"),
            with_labels(issue("be"), &["backend"]),
        ]);
        let flow = cross_label_flow(&g, 10, 6);
        assert_eq!(flow.labels, vec!["backend", "frontend"]);
        assert_eq!(flow.flow_matrix[0][1], 1);
        assert_eq!(flow.flow_matrix[1][0], 0);
        assert_eq!(flow.bottleneck_labels, vec!["backend"]);
        assert_eq!(flow.total_cross_label_deps, 1);
        assert_eq!(flow.dependencies[0].blocking_pairs[0].blocker_id, "be");
    }

    #[test]
    fn test_cross_label_flow_ignores_shared_labels() {
        let g = IssueGraph::build(&[
            depends_on(with_labels(issue("a"), &["core", "x"]), "b"),
            with_labels(issue("b"), &["core", "y"]),
        ]);
        let flow = cross_label_flow(&g, 10, 6);
        // only y -> x crosses; core is on both ends
        assert_eq!(flow.total_cross_label_deps, 1);
        assert_eq!(flow.dependencies[0].from_label, "y");
        assert_eq!(flow.dependencies[0].to_label, "x");
    }

    #[test]
    fn test_label_paths_longest_first() {
        let g = IssueGraph::build(&[
            depends_on(with_labels(issue("c"), &["l3"]), "b"),
            depends_on(with_labels(issue("b"), &["l2"]), "a"),
            with_labels(issue("a"), &["l1"]),
        ]);
        let flow = cross_label_flow(&g, 10, 6);
        assert_eq!(flow.critical_paths[0].labels, vec!["l1", "l2", "l3"]);
        assert_eq!(flow.critical_paths[0].length, 2);
        assert_eq!(flow.critical_paths[0].total_weight, 2.0);
    }

    #[test]
    fn test_label_paths_respect_max_len() {
        let g = IssueGraph::build(&[
            depends_on(with_labels(issue("c"), &["l3"]), "b"),
            depends_on(with_labels(issue("b"), &["l2"]), "a"),
            with_labels(issue("a"), &["l1"]),
        ]);
        let flow = cross_label_flow(&g, 10, 2);
        assert!(flow.critical_paths.iter().all(|p| p.labels.len() <= 2));
    }

    #[test]
    fn test_analyze_labels_empty() {
        let result = analyze(&[]);
        assert_eq!(result.total_labels, 0);
        assert!(result.labels.is_empty());
        assert!(result.attention_needed.is_empty());
    }

    #[test]
    fn test_fresh_label_without_blockers_is_healthy_band_consistent() {
        let result = analyze(&[
            with_labels(issue("a"), &["ok"]),
            with_status(with_labels(issue("b"), &["ok"]), Status::Closed),
        ]);
        let health = &result.labels[0];
        assert_eq!(health.flow.flow_score, 100);
        assert_eq!(health.freshness.freshness_score, 100);
        assert_eq!(health.health_level, HealthLevel::from_score(health.health));
    }

    #[test]
    fn test_externally_blocked_label_has_poor_flow() {
        let result = analyze(&[
            depends_on(with_labels(issue("a"), &["ui"]), "z"),
            with_labels(issue("z"), &["api"]),
        ]);
        let ui = result.labels.iter().find(|h| h.label == "ui").unwrap();
        assert_eq!(ui.flow.blocked_by_external, 1);
        assert_eq!(ui.flow.flow_score, 0);
        assert_eq!(ui.flow.incoming_labels, vec!["api"]);
        let api = result.labels.iter().find(|h| h.label == "api").unwrap();
        assert_eq!(api.flow.blocking_external, 1);
    }

    #[test]
    fn test_velocity_trend() {
        let mut recent = with_status(with_labels(issue("a"), &["v"]), Status::Closed);
        recent.created_at = now() - Duration::days(20);
        recent.closed_at = Some(now() - Duration::days(2));
        let g = IssueGraph::build(&[recent, with_labels(issue("b"), &["v"])]);
        let v = velocity(&[0, 1], &g, now());
        assert_eq!(v.closed_last_7_days, 1);
        assert_eq!(v.closed_last_30_days, 1);
        assert_eq!(v.trend_direction, TrendDirection::Improving);
        assert!((v.avg_days_to_close - 18.0).abs() < 1e-9);
        // 1 closed / (1 closed + 1 open) = 50, +10 for the improving trend
        assert_eq!(v.velocity_score, 60);
    }

    #[test]
    fn test_summary_top_issue_is_highest_priority_open() {
        let mut urgent = with_labels(issue("b"), &["l"]);
        urgent.priority = 0;
        let result = analyze(&[with_labels(issue("a"), &["l"]), urgent]);
        assert_eq!(result.summaries[0].top_issue.as_deref(), Some("b"));
    }
}
