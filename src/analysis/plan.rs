//! Execution planning: readiness, impact, parallel tracks and recommendations.

use std::collections::{BTreeMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::analysis::AnalysisOptions;
use crate::analysis::metrics::{StructuralMetrics, finite};
use crate::models::graph::IssueGraph;
use crate::models::{DependencyKind, Status};

pub const DEFAULT_MAX_TRACKS: usize = 8;

/// Weight of the summed priority weights in an impact score.
const IMPACT_PRIORITY_FACTOR: f64 = 0.25;

/// Number of `start_next` recommendations emitted.
const START_NEXT_LIMIT: usize = 3;

/// Minimum unlock set size for an `unblock` recommendation.
const UNBLOCK_MIN: usize = 2;

/// Where an issue sits in the plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Readiness {
    Ready,
    Blocked,
    InProgress,
    Closed,
}

/// Classify every node.
///
/// Open and blocked-status issues are ready unless a present, unclosed
/// blocker exists; the `blocked` status alone never blocks. With `parent_gates_readiness`, an otherwise ready issue is
/// blocked while any parent-child ancestor is blocked.
pub fn readiness(g: &IssueGraph, opts: &AnalysisOptions) -> Vec<Readiness> {
    let mut state: Vec<Readiness> = (0..g.len())
        .map(|v| match g.status(v) {
            Status::Closed => Readiness::Closed,
            Status::InProgress => Readiness::InProgress,
            Status::Open | Status::Blocked => {
                if g.has_open_blocker(v) {
                    Readiness::Blocked
                } else {
                    Readiness::Ready
                }
            }
        })
        .collect();

    if opts.parent_gates_readiness {
        let base = state.clone();
        for v in 0..g.len() {
            if base[v] == Readiness::Ready && blocked_ancestor(g, &base, v).is_some() {
                state[v] = Readiness::Blocked;
            }
        }
    }
    state
}

/// First blocked ancestor of `v` along parent-child edges, breadth-first.
fn blocked_ancestor(g: &IssueGraph, state: &[Readiness], v: usize) -> Option<usize> {
    let mut seen = HashSet::from([v]);
    let mut queue: VecDeque<usize> = g.parents(v).iter().copied().collect();
    while let Some(p) = queue.pop_front() {
        if !seen.insert(p) {
            continue;
        }
        if state[p] == Readiness::Blocked {
            return Some(p);
        }
        queue.extend(g.parents(p).iter().copied());
    }
    None
}

/// Blocked issues that closing `i` would release.
///
/// Fixed point from `{i}`: a blocked issue is released once every one of its
/// open blockers is `i` or already released.
pub fn unlock_set(g: &IssueGraph, state: &[Readiness], i: usize) -> Vec<usize> {
    let mut released: HashSet<usize> = HashSet::from([i]);
    let mut queue: VecDeque<usize> = VecDeque::from([i]);
    while let Some(v) = queue.pop_front() {
        for &dep in g.blocking_predecessors(v) {
            if released.contains(&dep) || state[dep] != Readiness::Blocked {
                continue;
            }
            if g.open_blockers(dep).all(|x| released.contains(&x)) {
                released.insert(dep);
                queue.push_back(dep);
            }
        }
    }

    released.remove(&i);
    let mut unlocked: Vec<usize> = released.into_iter().collect();
    unlocked.sort_unstable();
    unlocked
}

/// Impact of closing `i`: unlock count plus a quarter of their priority weights.
pub fn impact_score(unlocked: &[usize], priority_weight: &[f64]) -> f64 {
    let weights: f64 = unlocked.iter().map(|&u| priority_weight[u]).sum();
    finite(unlocked.len() as f64 + IMPACT_PRIORITY_FACTOR * weights)
}

/// A ready or in-progress issue with its planning scores.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanItem {
    pub id: String,
    pub title: String,
    pub priority: i32,
    pub impact: f64,
    /// Issues released by closing this one
    pub unblocks: Vec<String>,
    pub pagerank: f64,
    pub triage_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlockedItem {
    pub id: String,
    pub title: String,
    /// Present, unclosed blockers
    pub blocked_by: Vec<String>,
    /// Blocked ancestor that gates this issue, when parent gating is on
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gated_by: Option<String>,
}

/// A bundle of ready issues with no edges between them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Track {
    pub track_id: String,
    pub issues: Vec<String>,
    pub total_impact: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationKind {
    StartNext,
    Unblock,
    InvestigateCycle,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    pub kind: RecommendationKind,
    pub issue_id: String,
    pub confidence: f64,
    pub reason: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub related: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PlanSummary {
    pub total: usize,
    pub ready: usize,
    pub blocked: usize,
    pub in_progress: usize,
    pub closed: usize,
    pub tracks: usize,
    pub backlog: usize,
    pub cycles: usize,
    /// Record counts per status; sums to `total`
    pub status_counts: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionPlan {
    pub generated_at: DateTime<Utc>,
    pub summary: PlanSummary,
    pub ready: Vec<PlanItem>,
    pub blocked: Vec<BlockedItem>,
    pub in_progress: Vec<PlanItem>,
    pub tracks: Vec<Track>,
    /// Ready issues that did not fit in any track
    pub backlog: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub highest_impact: Option<String>,
    pub recommendations: Vec<Recommendation>,
}

fn conflicts(g: &IssueGraph, a: usize, b: usize) -> bool {
    g.linked(a, b, DependencyKind::Blocks) || g.linked(a, b, DependencyKind::ParentChild)
}

/// Greedy independent-set packing of `ordered` into at most `max_tracks` tracks.
///
/// Returns the tracks as node lists plus the spill-over backlog.
pub fn pack_tracks(g: &IssueGraph, ordered: &[usize], max_tracks: usize) -> (Vec<Vec<usize>>, Vec<usize>) {
    let mut tracks: Vec<Vec<usize>> = Vec::new();
    let mut backlog = Vec::new();
    for &v in ordered {
        let slot = tracks
            .iter()
            .position(|t| t.iter().all(|&u| !conflicts(g, u, v)));
        match slot {
            Some(i) => tracks[i].push(v),
            None if tracks.len() < max_tracks => tracks.push(vec![v]),
            None => backlog.push(v),
        }
    }
    (tracks, backlog)
}

/// Build the execution plan for a graph.
pub fn plan(g: &IssueGraph, m: &StructuralMetrics, opts: &AnalysisOptions) -> ExecutionPlan {
    let state = readiness(g, opts);
    let n = g.len();

    let mut unlocks: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut impact = vec![0.0; n];
    for v in 0..n {
        if matches!(state[v], Readiness::Ready | Readiness::InProgress) {
            unlocks[v] = unlock_set(g, &state, v);
            impact[v] = impact_score(&unlocks[v], &m.priority_weight);
        }
    }

    // impact desc, then PageRank desc, then id asc
    let by_impact = |a: &usize, b: &usize| {
        impact[*b]
            .total_cmp(&impact[*a])
            .then(m.pagerank[*b].total_cmp(&m.pagerank[*a]))
            .then(a.cmp(b))
    };
    let mut ready: Vec<usize> = (0..n).filter(|&v| state[v] == Readiness::Ready).collect();
    ready.sort_by(by_impact);
    let mut in_progress: Vec<usize> = (0..n).filter(|&v| state[v] == Readiness::InProgress).collect();
    in_progress.sort_by(by_impact);

    let (tracks, backlog) = pack_tracks(g, &ready, opts.max_tracks);

    let ids = |list: &[usize]| list.iter().map(|&v| g.id(v).to_string()).collect::<Vec<_>>();
    let item = |v: usize| PlanItem {
        id: g.id(v).to_string(),
        title: g.issue(v).title.clone(),
        priority: g.issue(v).priority,
        impact: impact[v],
        unblocks: ids(&unlocks[v]),
        pagerank: m.pagerank[v],
        triage_score: m.triage[v],
    };

    let blocked: Vec<BlockedItem> = (0..n)
        .filter(|&v| state[v] == Readiness::Blocked)
        .map(|v| BlockedItem {
            id: g.id(v).to_string(),
            title: g.issue(v).title.clone(),
            blocked_by: g.open_blockers(v).map(|b| g.id(b).to_string()).collect(),
            gated_by: if g.has_open_blocker(v) {
                None
            } else {
                blocked_ancestor(g, &state, v).map(|p| g.id(p).to_string())
            },
        })
        .collect();

    let mut status_counts: BTreeMap<String, usize> = [
        Status::Open,
        Status::InProgress,
        Status::Blocked,
        Status::Closed,
    ]
    .iter()
    .map(|s| (s.to_string(), 0))
    .collect();
    for issue in g.issues() {
        *status_counts.entry(issue.status.to_string()).or_default() += 1;
    }

    let recommendations = recommend(g, m, &state, &ready, &in_progress, &unlocks, &impact);

    let summary = PlanSummary {
        total: n,
        ready: ready.len(),
        blocked: blocked.len(),
        in_progress: in_progress.len(),
        closed: state.iter().filter(|s| **s == Readiness::Closed).count(),
        tracks: tracks.len(),
        backlog: backlog.len(),
        cycles: m.cycles.len(),
        status_counts,
    };

    debug!(
        ready = summary.ready,
        blocked = summary.blocked,
        tracks = summary.tracks,
        recommendations = recommendations.len(),
        "Built execution plan"
    );

    ExecutionPlan {
        generated_at: opts.now,
        summary,
        highest_impact: ready.first().map(|&v| g.id(v).to_string()),
        ready: ready.iter().map(|&v| item(v)).collect(),
        blocked,
        in_progress: in_progress.iter().map(|&v| item(v)).collect(),
        tracks: tracks
            .iter()
            .enumerate()
            .map(|(i, t)| Track {
                track_id: format!("track-{}", i + 1),
                issues: ids(t),
                total_impact: t.iter().map(|&v| impact[v]).sum(),
            })
            .collect(),
        backlog: ids(&backlog),
        recommendations,
    }
}

fn recommend(
    g: &IssueGraph,
    m: &StructuralMetrics,
    state: &[Readiness],
    ready: &[usize],
    in_progress: &[usize],
    unlocks: &[Vec<usize>],
    impact: &[f64],
) -> Vec<Recommendation> {
    let mut out = Vec::new();
    let max_impact = impact.iter().copied().fold(0.0, f64::max);
    let norm_impact = |v: usize| {
        if max_impact > 0.0 {
            impact[v] / max_impact
        } else {
            0.0
        }
    };

    for &v in ready.iter().take(START_NEXT_LIMIT) {
        let reason = match unlocks[v].len() {
            0 => format!("Ready to start: {}", g.issue(v).title),
            1 => format!("Ready to start; unblocks 1 issue: {}", g.issue(v).title),
            k => format!("Ready to start; unblocks {} issues: {}", k, g.issue(v).title),
        };
        out.push(Recommendation {
            kind: RecommendationKind::StartNext,
            issue_id: g.id(v).to_string(),
            confidence: finite(0.6 * norm_impact(v) + 0.4 * m.triage[v]).clamp(0.0, 1.0),
            reason,
            related: Vec::new(),
        });
    }

    let mut unblockers: Vec<usize> = ready
        .iter()
        .chain(in_progress)
        .copied()
        .filter(|&v| unlocks[v].len() >= UNBLOCK_MIN)
        .collect();
    unblockers.sort_by(|&a, &b| unlocks[b].len().cmp(&unlocks[a].len()).then(a.cmp(&b)));
    let max_unlocks = unblockers.first().map(|&v| unlocks[v].len()).unwrap_or(1).max(1);
    for v in unblockers {
        let count = unlocks[v].len();
        let confidence =
            0.7 * count as f64 / max_unlocks as f64 + 0.3 * m.priority_weight[v];
        out.push(Recommendation {
            kind: RecommendationKind::Unblock,
            issue_id: g.id(v).to_string(),
            confidence: finite(confidence).clamp(0.0, 1.0),
            reason: format!("Closing {} unblocks {} issues", g.id(v), count),
            related: unlocks[v].iter().map(|&u| g.id(u).to_string()).collect(),
        });
    }

    for cycle in &m.cycles {
        let open = cycle.iter().filter(|&&v| state[v] != Readiness::Closed).count();
        let members: Vec<String> = cycle.iter().map(|&v| g.id(v).to_string()).collect();
        out.push(Recommendation {
            kind: RecommendationKind::InvestigateCycle,
            issue_id: members[0].clone(),
            confidence: finite(open as f64 / cycle.len() as f64).clamp(0.0, 1.0),
            reason: format!("Dependency cycle: {}", members.join(" -> ")),
            related: members,
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{child_of, depends_on, issue, now, with_status};

    fn run(records: &[crate::models::Issue]) -> (IssueGraph, ExecutionPlan) {
        let opts = AnalysisOptions::at(now());
        let g = IssueGraph::build(records);
        let m = StructuralMetrics::compute(&g, &opts);
        let p = plan(&g, &m, &opts);
        (g, p)
    }

    #[test]
    fn test_chain_plan() {
        let (_, p) = run(&[
            depends_on(issue("A"), "B"),
            depends_on(issue("B"), "C"),
            issue("C"),
        ]);
        let ready: Vec<&str> = p.ready.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ready, vec!["C"]);
        let blocked: Vec<&str> = p.blocked.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(blocked, vec!["A", "B"]);
        assert_eq!(p.tracks.len(), 1);
        assert_eq!(p.tracks[0].issues, vec!["C"]);
        assert_eq!(p.highest_impact.as_deref(), Some("C"));
        assert_eq!(p.ready[0].unblocks, vec!["A", "B"]);
        assert!(
            p.recommendations
                .iter()
                .any(|r| r.kind == RecommendationKind::Unblock && r.issue_id == "C")
        );
    }

    #[test]
    fn test_empty_plan() {
        let (_, p) = run(&[]);
        assert!(p.tracks.is_empty());
        assert!(p.recommendations.is_empty());
        assert_eq!(p.summary.total, 0);
        assert_eq!(p.summary.status_counts.values().sum::<usize>(), 0);
        assert!(p.highest_impact.is_none());
    }

    #[test]
    fn test_closed_and_missing_blockers_are_satisfied() {
        let (_, p) = run(&[
            depends_on(depends_on(issue("a"), "b"), "ghost"),
            with_status(issue("b"), Status::Closed),
        ]);
        assert_eq!(p.ready.len(), 1);
        assert_eq!(p.ready[0].id, "a");
        assert_eq!(p.summary.closed, 1);
    }

    #[test]
    fn test_in_progress_excluded_from_partition() {
        let (_, p) = run(&[
            with_status(issue("a"), Status::InProgress),
            depends_on(issue("b"), "a"),
        ]);
        assert!(p.ready.is_empty());
        assert_eq!(p.in_progress.len(), 1);
        assert_eq!(p.blocked[0].blocked_by, vec!["a"]);
    }

    #[test]
    fn test_status_counts_sum_to_total() {
        let (_, p) = run(&[
            issue("a"),
            with_status(issue("b"), Status::Closed),
            with_status(issue("c"), Status::InProgress),
            with_status(issue("d"), Status::Blocked),
        ]);
        assert_eq!(p.summary.status_counts.values().sum::<usize>(), 4);
        assert_eq!(p.summary.status_counts["blocked"], 1);
    }

    #[test]
    fn test_blocked_status_follows_edges() {
        let (_, p) = run(&[
            with_status(issue("a"), Status::Blocked),
            with_status(depends_on(issue("b"), "c"), Status::Blocked),
            issue("c"),
        ]);
        let mut ready: Vec<&str> = p.ready.iter().map(|i| i.id.as_str()).collect();
        ready.sort();
        assert_eq!(ready, vec!["a", "c"]);
        assert_eq!(p.blocked.len(), 1);
        assert_eq!(p.blocked[0].id, "b");
    }

    #[test]
    fn test_unlock_ignores_issue_still_blocked_elsewhere() {
        // y waits on i and z; x waits on y. Closing i leaves y blocked by z,
        // so x stays blocked too.
        let records = vec![
            issue("i"),
            depends_on(depends_on(issue("y"), "i"), "z"),
            depends_on(issue("x"), "y"),
            issue("z"),
        ];
        let opts = AnalysisOptions::at(now());
        let g = IssueGraph::build(&records);
        let state = readiness(&g, &opts);
        let i = g.index_of("i").unwrap();
        assert!(unlock_set(&g, &state, i).is_empty());

        let z = g.index_of("z").unwrap();
        assert!(unlock_set(&g, &state, z).is_empty());
    }

    #[test]
    fn test_unlock_releases_transitively() {
        let records = vec![
            depends_on(issue("a"), "b"),
            depends_on(issue("b"), "c"),
            depends_on(issue("d"), "b"),
            issue("c"),
        ];
        let opts = AnalysisOptions::at(now());
        let g = IssueGraph::build(&records);
        let state = readiness(&g, &opts);
        let unlocked: Vec<&str> = unlock_set(&g, &state, g.index_of("c").unwrap())
            .into_iter()
            .map(|v| g.id(v))
            .collect();
        assert_eq!(unlocked, vec!["a", "b", "d"]);
    }

    #[test]
    fn test_unlock_requires_all_blockers_in_closure() {
        // x depends on both a and b; closing a alone does not release x
        let (_, p) = run(&[
            depends_on(depends_on(issue("x"), "a"), "b"),
            issue("a"),
            issue("b"),
        ]);
        assert!(p.ready.iter().all(|i| i.unblocks.is_empty()));
        assert!(
            p.recommendations
                .iter()
                .all(|r| r.kind != RecommendationKind::Unblock)
        );
    }

    #[test]
    fn test_tracks_separate_parent_and_child() {
        let (_, p) = run(&[child_of(issue("a"), "e"), issue("e"), issue("z")]);
        assert_eq!(p.ready.len(), 3);
        for track in &p.tracks {
            assert!(!(track.issues.contains(&"a".to_string()) && track.issues.contains(&"e".to_string())));
        }
    }

    #[test]
    fn test_track_limit_spills_to_backlog() {
        let records: Vec<_> = (0..5).map(|i| issue(&format!("c{}", i))).collect();
        let mut records = records;
        // c1..c4 are children of c0 and of each other's chain so nothing shares a track
        for i in 1..5 {
            for j in 0..i {
                let child = records[i].clone();
                records[i] = child_of(child, &format!("c{}", j));
            }
        }
        let opts = AnalysisOptions {
            max_tracks: 2,
            ..AnalysisOptions::at(now())
        };
        let g = IssueGraph::build(&records);
        let m = StructuralMetrics::compute(&g, &opts);
        let p = plan(&g, &m, &opts);
        assert_eq!(p.tracks.len(), 2);
        assert_eq!(p.backlog.len(), 3);
    }

    #[test]
    fn test_cycle_recommendation() {
        let (_, p) = run(&[depends_on(issue("b"), "a"), depends_on(issue("a"), "b")]);
        let rec = p
            .recommendations
            .iter()
            .find(|r| r.kind == RecommendationKind::InvestigateCycle)
            .unwrap();
        assert_eq!(rec.issue_id, "a");
        assert_eq!(rec.related, vec!["a", "b"]);
        assert_eq!(rec.confidence, 1.0);
    }

    #[test]
    fn test_parent_gates_readiness() {
        let records = vec![
            child_of(issue("child"), "epic"),
            depends_on(issue("epic"), "dep"),
            issue("dep"),
        ];
        let (_, default_plan) = run(&records);
        assert!(default_plan.ready.iter().any(|i| i.id == "child"));

        let opts = AnalysisOptions {
            parent_gates_readiness: true,
            ..AnalysisOptions::at(now())
        };
        let g = IssueGraph::build(&records);
        let m = StructuralMetrics::compute(&g, &opts);
        let p = plan(&g, &m, &opts);
        let child = p.blocked.iter().find(|b| b.id == "child").unwrap();
        assert_eq!(child.gated_by.as_deref(), Some("epic"));
        assert!(child.blocked_by.is_empty());
    }

    #[test]
    fn test_recommendation_confidence_in_range() {
        let (_, p) = run(&[
            depends_on(issue("a"), "c"),
            depends_on(issue("b"), "c"),
            issue("c"),
            issue("d"),
        ]);
        for r in &p.recommendations {
            assert!((0.0..=1.0).contains(&r.confidence));
        }
        assert_eq!(p.recommendations[0].issue_id, "c");
    }
}
