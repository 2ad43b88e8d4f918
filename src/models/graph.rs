//! Typed dependency graph built from issue records.
//!
//! Nodes get dense integer indices in sorted-id order at construction, so
//! iterating `0..len()` always visits issues in lexicographic id order. Each
//! node keeps one successor and one predecessor list per [`DependencyKind`].
//! Edges to ids outside the record set are kept as [`DanglingEdge`]s and are
//! never treated as blockers.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use tracing::debug;

use crate::models::{DependencyKind, Issue, Status, Warning, WarningKind};

const KINDS: usize = 4;

/// Union-Find (Disjoint Set Union) over dense node indices.
///
/// Uses path compression and union by rank.
#[derive(Debug, Clone)]
pub struct UnionFind {
    /// Parent of each element in the union-find forest
    parent: Vec<usize>,

    /// Ranks for union by rank heuristic (approximate tree height)
    rank: Vec<u8>,
}

impl UnionFind {
    /// Create a structure holding `n` singleton sets `0..n`.
    pub fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    /// Find the representative of the set containing `x`.
    ///
    /// Returns `None` if `x` is out of range.
    pub fn find(&mut self, x: usize) -> Option<usize> {
        if x >= self.parent.len() {
            return None;
        }
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        // Path compression
        let mut cur = x;
        while self.parent[cur] != root {
            let next = self.parent[cur];
            self.parent[cur] = root;
            cur = next;
        }
        Some(root)
    }

    /// Union the sets containing `x` and `y`.
    ///
    /// Returns `true` if the sets were merged, `false` if they were already
    /// joined or either element is out of range.
    pub fn union(&mut self, x: usize, y: usize) -> bool {
        let (Some(rx), Some(ry)) = (self.find(x), self.find(y)) else {
            return false;
        };
        if rx == ry {
            return false;
        }
        match self.rank[rx].cmp(&self.rank[ry]) {
            std::cmp::Ordering::Less => self.parent[rx] = ry,
            std::cmp::Ordering::Greater => self.parent[ry] = rx,
            std::cmp::Ordering::Equal => {
                self.parent[ry] = rx;
                self.rank[rx] += 1;
            }
        }
        true
    }

    pub fn connected(&mut self, x: usize, y: usize) -> bool {
        match (self.find(x), self.find(y)) {
            (Some(rx), Some(ry)) => rx == ry,
            _ => false,
        }
    }

    /// All sets, each sorted ascending, ordered by their smallest member.
    pub fn components(&mut self) -> Vec<Vec<usize>> {
        let mut by_root: HashMap<usize, usize> = HashMap::new();
        let mut out: Vec<Vec<usize>> = Vec::new();
        for x in 0..self.parent.len() {
            let Some(root) = self.find(x) else { continue };
            let slot = *by_root.entry(root).or_insert_with(|| {
                out.push(Vec::new());
                out.len() - 1
            });
            out[slot].push(x);
        }
        out
    }

    pub fn len(&self) -> usize {
        self.parent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }

    pub fn num_components(&mut self) -> usize {
        self.components().len()
    }
}

/// A dependency edge whose target is not in the record set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DanglingEdge {
    pub source: String,
    pub target: String,
    pub kind: DependencyKind,
}

/// Immutable typed dependency graph.
///
/// Edge direction follows the records: the source depends on the target, so
/// a node's blocking successors are the issues it waits on.
#[derive(Debug, Clone, Default)]
pub struct IssueGraph {
    issues: Vec<Issue>,
    index: HashMap<String, usize>,
    out: [Vec<Vec<usize>>; KINDS],
    inc: [Vec<Vec<usize>>; KINDS],
    dangling: Vec<DanglingEdge>,
    warnings: Vec<Warning>,
}

impl IssueGraph {
    /// Build the graph from a record slice.
    ///
    /// Records failing validation are skipped, as are repeated ids after the
    /// first. Self-loops are dropped and parallel edges of one kind collapse.
    /// Every such case yields a warning rather than an error.
    pub fn build(records: &[Issue]) -> Self {
        let mut warnings = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();
        let mut issues: Vec<Issue> = Vec::with_capacity(records.len());

        for record in records {
            if let Err(e) = record.validate() {
                warnings.push(Warning::for_issue(
                    WarningKind::InvalidRecord,
                    &record.id,
                    e.to_string(),
                ));
                continue;
            }
            if !seen.insert(record.id.as_str()) {
                warnings.push(Warning::for_issue(
                    WarningKind::DuplicateId,
                    &record.id,
                    format!("duplicate issue id {}, keeping first occurrence", record.id),
                ));
                continue;
            }
            issues.push(record.clone());
        }
        issues.sort_by(|a, b| a.id.cmp(&b.id));

        let n = issues.len();
        let index: HashMap<String, usize> = issues
            .iter()
            .enumerate()
            .map(|(i, issue)| (issue.id.clone(), i))
            .collect();

        let mut out: [Vec<Vec<usize>>; KINDS] = std::array::from_fn(|_| vec![Vec::new(); n]);
        let mut inc: [Vec<Vec<usize>>; KINDS] = std::array::from_fn(|_| vec![Vec::new(); n]);
        let mut dangling = Vec::new();
        let mut dangling_seen: HashSet<(usize, String, DependencyKind)> = HashSet::new();

        for (src, issue) in issues.iter().enumerate() {
            for dep in &issue.dependencies {
                let k = dep.kind.index();
                if dep.depends_on_id == issue.id {
                    warnings.push(Warning::for_issue(
                        WarningKind::SelfLoop,
                        &issue.id,
                        format!("dropped {} self-loop on {}", dep.kind, issue.id),
                    ));
                    continue;
                }
                match index.get(&dep.depends_on_id) {
                    Some(&dst) => {
                        out[k][src].push(dst);
                        inc[k][dst].push(src);
                    }
                    None => {
                        if dangling_seen.insert((src, dep.depends_on_id.clone(), dep.kind)) {
                            warnings.push(Warning::for_issue(
                                WarningKind::MissingDependencyTarget,
                                &issue.id,
                                format!(
                                    "{} depends on missing issue {} ({})",
                                    issue.id, dep.depends_on_id, dep.kind
                                ),
                            ));
                            dangling.push(DanglingEdge {
                                source: issue.id.clone(),
                                target: dep.depends_on_id.clone(),
                                kind: dep.kind,
                            });
                        }
                    }
                }
            }
        }

        for lists in out.iter_mut().chain(inc.iter_mut()) {
            for list in lists.iter_mut() {
                list.sort_unstable();
                list.dedup();
            }
        }

        debug!(
            nodes = n,
            blocking_edges = out[0].iter().map(Vec::len).sum::<usize>(),
            dangling = dangling.len(),
            warnings = warnings.len(),
            "Built issue graph"
        );

        Self {
            issues,
            index,
            out,
            inc,
            dangling,
            warnings,
        }
    }

    pub fn len(&self) -> usize {
        self.issues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    /// Issues in index (sorted-id) order.
    pub fn issues(&self) -> &[Issue] {
        &self.issues
    }

    pub fn issue(&self, idx: usize) -> &Issue {
        &self.issues[idx]
    }

    pub fn id(&self, idx: usize) -> &str {
        &self.issues[idx].id
    }

    pub fn status(&self, idx: usize) -> Status {
        self.issues[idx].status
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn get(&self, id: &str) -> Option<&Issue> {
        self.index_of(id).map(|i| &self.issues[i])
    }

    /// Targets of `idx`'s edges of the given kind.
    pub fn successors(&self, idx: usize, kind: DependencyKind) -> &[usize] {
        &self.out[kind.index()][idx]
    }

    /// Sources of edges of the given kind pointing at `idx`.
    pub fn predecessors(&self, idx: usize, kind: DependencyKind) -> &[usize] {
        &self.inc[kind.index()][idx]
    }

    /// Issues `idx` waits on.
    pub fn blocking_successors(&self, idx: usize) -> &[usize] {
        self.successors(idx, DependencyKind::Blocks)
    }

    /// Issues waiting on `idx`.
    pub fn blocking_predecessors(&self, idx: usize) -> &[usize] {
        self.predecessors(idx, DependencyKind::Blocks)
    }

    /// Parents of `idx` along parent-child edges.
    pub fn parents(&self, idx: usize) -> &[usize] {
        self.successors(idx, DependencyKind::ParentChild)
    }

    /// Children of `idx` along parent-child edges.
    pub fn children(&self, idx: usize) -> &[usize] {
        self.predecessors(idx, DependencyKind::ParentChild)
    }

    /// Blocking successors of `idx` that are present and not closed.
    pub fn open_blockers(&self, idx: usize) -> impl Iterator<Item = usize> + '_ {
        self.blocking_successors(idx)
            .iter()
            .copied()
            .filter(|&b| self.issues[b].status.is_open())
    }

    /// True if any present blocker of `idx` is still open.
    pub fn has_open_blocker(&self, idx: usize) -> bool {
        self.open_blockers(idx).next().is_some()
    }

    /// True if an edge of `kind` joins `a` and `b` in either direction.
    pub fn linked(&self, a: usize, b: usize, kind: DependencyKind) -> bool {
        self.successors(a, kind).binary_search(&b).is_ok()
            || self.successors(b, kind).binary_search(&a).is_ok()
    }

    pub fn edge_count(&self, kind: DependencyKind) -> usize {
        self.out[kind.index()].iter().map(Vec::len).sum()
    }

    pub fn dangling(&self) -> &[DanglingEdge] {
        &self.dangling
    }

    /// Warnings produced while building.
    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    /// Weakly connected components over blocking and parent-child edges.
    pub fn components(&self) -> Vec<Vec<usize>> {
        let mut uf = UnionFind::new(self.len());
        for kind in [DependencyKind::Blocks, DependencyKind::ParentChild] {
            for src in 0..self.len() {
                for &dst in self.successors(src, kind) {
                    uf.union(src, dst);
                }
            }
        }
        uf.components()
    }

    /// Strongly connected components of the blocking view (Tarjan).
    ///
    /// Components come out in discovery order, i.e. reverse topological order
    /// of the condensation. Members of each component are in pop order.
    pub fn strongly_connected_components(&self) -> Vec<Vec<usize>> {
        const UNVISITED: usize = usize::MAX;
        let n = self.len();
        let mut index = vec![UNVISITED; n];
        let mut low = vec![0usize; n];
        let mut on_stack = vec![false; n];
        let mut stack: Vec<usize> = Vec::new();
        let mut sccs: Vec<Vec<usize>> = Vec::new();
        let mut counter = 0usize;
        // (node, position in its successor list)
        let mut call: Vec<(usize, usize)> = Vec::new();

        for root in 0..n {
            if index[root] != UNVISITED {
                continue;
            }
            index[root] = counter;
            low[root] = counter;
            counter += 1;
            stack.push(root);
            on_stack[root] = true;
            call.push((root, 0));

            while let Some(frame) = call.last_mut() {
                let v = frame.0;
                let succ = self.blocking_successors(v);
                if frame.1 < succ.len() {
                    let w = succ[frame.1];
                    frame.1 += 1;
                    if index[w] == UNVISITED {
                        index[w] = counter;
                        low[w] = counter;
                        counter += 1;
                        stack.push(w);
                        on_stack[w] = true;
                        call.push((w, 0));
                    } else if on_stack[w] {
                        low[v] = low[v].min(index[w]);
                    }
                    continue;
                }

                call.pop();
                if let Some(&(parent, _)) = call.last() {
                    low[parent] = low[parent].min(low[v]);
                }
                if low[v] == index[v] {
                    let mut component = Vec::new();
                    while let Some(w) = stack.pop() {
                        on_stack[w] = false;
                        component.push(w);
                        if w == v {
                            break;
                        }
                    }
                    sccs.push(component);
                }
            }
        }
        sccs
    }
}
