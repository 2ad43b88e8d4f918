//! Structural metrics over the blocking view of an [`IssueGraph`].
//!
//! All per-node vectors are indexed by the graph's dense node index, so they
//! line up with `IssueGraph::issue(idx)`.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::analysis::AnalysisOptions;
use crate::models::graph::IssueGraph;
use crate::models::{NodeMetrics, Warning, WarningKind};

pub const PAGERANK_DAMPING: f64 = 0.85;
pub const PAGERANK_TOLERANCE: f64 = 1e-6;
pub const PAGERANK_MAX_ITERATIONS: usize = 100;

const TRIAGE_PAGERANK_WEIGHT: f64 = 0.35;
const TRIAGE_BETWEENNESS_WEIGHT: f64 = 0.15;
const TRIAGE_PRIORITY_WEIGHT: f64 = 0.30;
const TRIAGE_AGE_WEIGHT: f64 = 0.20;
const AGE_DECAY_DAYS: f64 = 30.0;

/// Replace NaN and infinities with 0.
pub fn finite(x: f64) -> f64 {
    if x.is_finite() { x } else { 0.0 }
}

/// Scale values into [0,1] by dividing by the maximum.
pub fn normalize_by_max(values: &[f64]) -> Vec<f64> {
    let max = values.iter().copied().map(finite).fold(0.0, f64::max);
    if max <= 0.0 {
        return vec![0.0; values.len()];
    }
    values.iter().map(|v| finite(*v / max).clamp(0.0, 1.0)).collect()
}

/// Per-node priority weights: `(max_p - p + 1) / max_p`, clamped to [0,1].
///
/// `max_p` is the largest priority in the graph, at least 1. Priority 0 is the
/// most important and maps to the top of the range.
pub fn priority_weights(g: &IssueGraph) -> Vec<f64> {
    let max_p = g.issues().iter().map(|i| i.priority).max().unwrap_or(1).max(1) as f64;
    g.issues()
        .iter()
        .map(|i| finite((max_p - i.priority as f64 + 1.0) / max_p).clamp(0.0, 1.0))
        .collect()
}

/// PageRank where rank flows from each dependent to the issues it waits on.
///
/// Returns the rank vector, the iteration count and whether the run converged.
pub fn pagerank(g: &IssueGraph) -> (Vec<f64>, usize, bool) {
    let n = g.len();
    if n == 0 {
        return (Vec::new(), 0, true);
    }
    let nf = n as f64;
    let mut rank = vec![1.0 / nf; n];
    let mut next = vec![0.0; n];

    for iteration in 1..=PAGERANK_MAX_ITERATIONS {
        let dangling: f64 = (0..n)
            .filter(|&v| g.blocking_successors(v).is_empty())
            .map(|v| rank[v])
            .sum();
        let base = (1.0 - PAGERANK_DAMPING) / nf + PAGERANK_DAMPING * dangling / nf;
        next.iter_mut().for_each(|x| *x = base);

        for v in 0..n {
            let targets = g.blocking_successors(v);
            if targets.is_empty() {
                continue;
            }
            let share = PAGERANK_DAMPING * rank[v] / targets.len() as f64;
            for &t in targets {
                next[t] += share;
            }
        }

        let delta: f64 = rank.iter().zip(&next).map(|(a, b)| (a - b).abs()).sum();
        std::mem::swap(&mut rank, &mut next);
        if delta < PAGERANK_TOLERANCE {
            return (rank.into_iter().map(finite).collect(), iteration, true);
        }
    }
    (rank.into_iter().map(finite).collect(), PAGERANK_MAX_ITERATIONS, false)
}

/// Undirected neighbour lists of the blocking view.
fn undirected_blocking(g: &IssueGraph) -> Vec<Vec<usize>> {
    (0..g.len())
        .map(|v| {
            let mut adj: Vec<usize> = g
                .blocking_successors(v)
                .iter()
                .chain(g.blocking_predecessors(v))
                .copied()
                .collect();
            adj.sort_unstable();
            adj.dedup();
            adj
        })
        .collect()
}

/// Deterministic source sample: the `k` nodes with the smallest seeded hash.
fn sample_sources(g: &IssueGraph, k: usize, seed: u64) -> Vec<usize> {
    let mut keyed: Vec<(u64, usize)> = (0..g.len())
        .map(|v| {
            let mut hasher = Sha256::new();
            hasher.update(seed.to_le_bytes());
            hasher.update(g.id(v).as_bytes());
            let digest = hasher.finalize();
            let mut head = [0u8; 8];
            head.copy_from_slice(&digest[..8]);
            (u64::from_be_bytes(head), v)
        })
        .collect();
    keyed.sort_unstable();
    let mut sources: Vec<usize> = keyed.into_iter().take(k).map(|(_, v)| v).collect();
    sources.sort_unstable();
    sources
}

/// Result of a betweenness run.
#[derive(Debug, Clone, Default)]
pub struct Betweenness {
    pub scores: Vec<f64>,
    pub sampled: bool,
    pub partial: bool,
}

/// Brandes betweenness on the undirected projection of blocking edges.
///
/// Above `opts.betweenness_exact_limit` nodes only a seeded sample of
/// `opts.betweenness_sample` sources is used and scores are scaled by N/k.
/// The deadline is checked between sources; on expiry the scores gathered so
/// far are scaled and returned with `partial` set.
pub fn betweenness(g: &IssueGraph, opts: &AnalysisOptions) -> Betweenness {
    let n = g.len();
    let mut scores = vec![0.0; n];
    if n == 0 {
        return Betweenness::default();
    }
    let adj = undirected_blocking(g);

    let sampled = n > opts.betweenness_exact_limit;
    let sources: Vec<usize> = if sampled {
        sample_sources(g, opts.betweenness_sample.clamp(1, n), opts.betweenness_seed)
    } else {
        (0..n).collect()
    };

    let deadline = opts.deadline();
    let mut processed = 0usize;
    let mut partial = false;

    let mut sigma = vec![0.0f64; n];
    let mut dist = vec![-1i64; n];
    let mut delta = vec![0.0f64; n];
    let mut preds: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut order: Vec<usize> = Vec::with_capacity(n);
    let mut queue: VecDeque<usize> = VecDeque::new();

    for &s in &sources {
        if deadline.expired() {
            partial = true;
            warn!(processed, total = sources.len(), "Betweenness deadline exceeded");
            break;
        }
        for v in 0..n {
            sigma[v] = 0.0;
            dist[v] = -1;
            delta[v] = 0.0;
            preds[v].clear();
        }
        order.clear();
        sigma[s] = 1.0;
        dist[s] = 0;
        queue.push_back(s);

        while let Some(v) = queue.pop_front() {
            order.push(v);
            for &w in &adj[v] {
                if dist[w] < 0 {
                    dist[w] = dist[v] + 1;
                    queue.push_back(w);
                }
                if dist[w] == dist[v] + 1 {
                    sigma[w] += sigma[v];
                    preds[w].push(v);
                }
            }
        }

        while let Some(w) = order.pop() {
            for &v in &preds[w] {
                delta[v] += sigma[v] / sigma[w] * (1.0 + delta[w]);
            }
            if w != s {
                scores[w] += delta[w];
            }
        }
        processed += 1;
    }

    // Every undirected pair is counted from both endpoints.
    let mut scale = 0.5;
    if (sampled || partial) && processed > 0 {
        scale *= n as f64 / processed as f64;
    }
    for x in scores.iter_mut() {
        *x = finite(*x * scale);
    }

    Betweenness {
        scores,
        sampled,
        partial,
    }
}

/// Cycles of the blocking view: SCCs with two or more members.
///
/// Members follow discovery order, rotated to start at the smallest id.
/// Cycles are listed in the order their components were found.
pub fn cycles(g: &IssueGraph, sccs: &[Vec<usize>]) -> Vec<Vec<usize>> {
    sccs.iter()
        .filter(|c| c.len() >= 2)
        .map(|component| {
            // Tarjan pops members in reverse discovery order.
            let mut members: Vec<usize> = component.iter().rev().copied().collect();
            let start = members
                .iter()
                .enumerate()
                .min_by(|a, b| g.id(*a.1).cmp(g.id(*b.1)))
                .map(|(pos, _)| pos)
                .unwrap_or(0);
            members.rotate_left(start);
            members
        })
        .collect()
}

/// Longest blocking chain from each node, with each SCC counted once.
pub fn critical_path_depths(g: &IssueGraph, sccs: &[Vec<usize>]) -> Vec<usize> {
    let n = g.len();
    let mut comp_of = vec![0usize; n];
    for (c, members) in sccs.iter().enumerate() {
        for &v in members {
            comp_of[v] = c;
        }
    }
    // Tarjan emits a component only after everything it reaches.
    let mut comp_depth = vec![0usize; sccs.len()];
    for (c, members) in sccs.iter().enumerate() {
        let mut best = 0;
        for &v in members {
            for &w in g.blocking_successors(v) {
                let cw = comp_of[w];
                if cw != c {
                    best = best.max(comp_depth[cw]);
                }
            }
        }
        comp_depth[c] = best + 1;
    }
    (0..n).map(|v| comp_depth[comp_of[v]]).collect()
}

/// The deepest blocking chain, one node per condensed component.
///
/// Starts at the node with the greatest depth and repeatedly steps to a
/// blocker one level shallower. Ties go to the smaller id.
pub fn critical_path(g: &IssueGraph, sccs: &[Vec<usize>], depth: &[usize]) -> Vec<usize> {
    let Some(mut current) = (0..g.len()).max_by(|&a, &b| depth[a].cmp(&depth[b]).then(b.cmp(&a)))
    else {
        return Vec::new();
    };
    let mut comp_of = vec![0usize; g.len()];
    for (c, members) in sccs.iter().enumerate() {
        for &v in members {
            comp_of[v] = c;
        }
    }

    let mut path = vec![current];
    while depth[current] > 1 {
        let want = depth[current] - 1;
        let next = sccs[comp_of[current]]
            .iter()
            .flat_map(|&m| g.blocking_successors(m).iter().copied())
            .filter(|&w| depth[w] == want && comp_of[w] != comp_of[current])
            .min();
        match next {
            Some(w) => {
                path.push(w);
                current = w;
            }
            None => break,
        }
    }
    path
}

/// Triage score per node, in [0,1].
pub fn triage_scores(
    g: &IssueGraph,
    pagerank: &[f64],
    betweenness: &[f64],
    priority_weight: &[f64],
    now: DateTime<Utc>,
) -> Vec<f64> {
    let norm_pr = normalize_by_max(pagerank);
    let norm_bw = normalize_by_max(betweenness);
    (0..g.len())
        .map(|v| {
            let days = (now - g.issue(v).updated_at).num_seconds().max(0) as f64 / 86_400.0;
            let age_decay = (-days / AGE_DECAY_DAYS).exp();
            let score = TRIAGE_PAGERANK_WEIGHT * norm_pr[v]
                + TRIAGE_BETWEENNESS_WEIGHT * norm_bw[v]
                + TRIAGE_PRIORITY_WEIGHT * priority_weight[v]
                + TRIAGE_AGE_WEIGHT * (1.0 - age_decay);
            finite(score).clamp(0.0, 1.0)
        })
        .collect()
}

/// Every structural metric for one graph, indexed by node.
#[derive(Debug, Clone, Default)]
pub struct StructuralMetrics {
    pub pagerank: Vec<f64>,
    pub pagerank_iterations: usize,
    pub pagerank_converged: bool,
    pub betweenness: Vec<f64>,
    pub betweenness_sampled: bool,
    pub depth: Vec<usize>,
    pub priority_weight: Vec<f64>,
    pub triage: Vec<f64>,
    pub cycles: Vec<Vec<usize>>,
    pub critical_path: Vec<usize>,
    pub component_count: usize,
    /// Set when a deadline cut a computation short
    pub partial: bool,
    pub warnings: Vec<Warning>,
}

impl StructuralMetrics {
    pub fn compute(g: &IssueGraph, opts: &AnalysisOptions) -> Self {
        let (pagerank, pagerank_iterations, pagerank_converged) = pagerank(g);
        let bw = betweenness(g, opts);
        let sccs = g.strongly_connected_components();
        let cycles = cycles(g, &sccs);
        let depth = critical_path_depths(g, &sccs);
        let critical_path = critical_path(g, &sccs, &depth);
        let priority_weight = priority_weights(g);
        let triage = triage_scores(g, &pagerank, &bw.scores, &priority_weight, opts.now);

        let mut warnings = Vec::new();
        if bw.partial {
            warnings.push(Warning::new(
                WarningKind::DeadlineExceeded,
                "betweenness stopped at deadline; scores are extrapolated from a partial source set",
            ));
        }

        debug!(
            nodes = g.len(),
            cycles = cycles.len(),
            pagerank_iterations,
            betweenness_sampled = bw.sampled,
            "Computed structural metrics"
        );

        Self {
            pagerank,
            pagerank_iterations,
            pagerank_converged,
            betweenness: bw.scores,
            betweenness_sampled: bw.sampled,
            depth,
            priority_weight,
            triage,
            cycles,
            critical_path,
            component_count: g.components().len(),
            partial: bw.partial,
            warnings,
        }
    }

    /// Metrics for node `idx`.
    pub fn node(&self, g: &IssueGraph, idx: usize) -> NodeMetrics {
        NodeMetrics {
            pagerank: self.pagerank[idx],
            betweenness: self.betweenness[idx],
            critical_path_depth: self.depth[idx],
            blocks_count: g.blocking_successors(idx).len(),
            blocked_by_count: g.blocking_predecessors(idx).len(),
            triage_score: self.triage[idx],
        }
    }
}

/// An issue id paired with a score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedIssue {
    pub id: String,
    pub score: f64,
}

fn top_by(g: &IssueGraph, scores: &[f64], limit: usize) -> Vec<RankedIssue> {
    let mut order: Vec<usize> = (0..g.len()).filter(|&v| scores[v] > 0.0).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]).then(a.cmp(&b)));
    order
        .into_iter()
        .take(limit)
        .map(|v| RankedIssue {
            id: g.id(v).to_string(),
            score: scores[v],
        })
        .collect()
}

/// Serializable view of the structural metrics.
#[derive(Debug, Clone, Serialize)]
pub struct Insights {
    pub node_count: usize,
    pub blocking_edge_count: usize,
    pub component_count: usize,
    pub metrics: BTreeMap<String, NodeMetrics>,
    pub cycles: Vec<Vec<String>>,
    pub critical_path: Vec<String>,
    pub top_pagerank: Vec<RankedIssue>,
    pub top_betweenness: Vec<RankedIssue>,
    pub top_triage: Vec<RankedIssue>,
    pub pagerank_converged: bool,
    pub betweenness_sampled: bool,
    pub partial: bool,
}

impl Insights {
    pub const TOP_N: usize = 10;

    pub fn new(g: &IssueGraph, m: &StructuralMetrics) -> Self {
        let ids = |list: &[usize]| list.iter().map(|&v| g.id(v).to_string()).collect::<Vec<_>>();
        Self {
            node_count: g.len(),
            blocking_edge_count: g.edge_count(crate::models::DependencyKind::Blocks),
            component_count: m.component_count,
            metrics: (0..g.len())
                .map(|v| (g.id(v).to_string(), m.node(g, v)))
                .collect(),
            cycles: m.cycles.iter().map(|c| ids(c)).collect(),
            critical_path: ids(&m.critical_path),
            top_pagerank: top_by(g, &m.pagerank, Self::TOP_N),
            top_betweenness: top_by(g, &m.betweenness, Self::TOP_N),
            top_triage: top_by(g, &m.triage, Self::TOP_N),
            pagerank_converged: m.pagerank_converged,
            betweenness_sampled: m.betweenness_sampled,
            partial: m.partial,
        }
    }
}
