//! Workstream detection.
//!
//! A workstream is a group of issues inside a label- or epic-scoped view,
//! partitioned by the best-scoring label family (phase1/phase2, feat:*,
//! auth-*, *-backend ...). Partitioning follows these steps:
//!
//! 1. Detect label families among the primary issues' labels
//! 2. Score each family on coverage, exclusivity and balance
//! 3. Inherit the winning family's labels down parent-child edges
//! 4. Partition primaries by their first family label, then attach context
//!    issues through parent-child edges
//! 5. Compute per-workstream stats against the global graph
//! 6. Record cross-workstream blocking edges
//! 7. Sort, then optionally subdivide each workstream recursively
//!
//! Workstreams live in a flat arena; subdivision records child indices on
//! the parent and a parent index on each child.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::analysis::{AnalysisOptions, Deadline};
use crate::models::graph::IssueGraph;
use crate::models::{DependencyKind, Issue, Status, Warning, WarningKind};
use crate::{Error, Result};

pub const DEFAULT_MAX_DEPTH: usize = 3;
pub const DEFAULT_MIN_GROUP_SIZE: usize = 2;

/// A family must score above this to partition a view.
pub const MIN_FAMILY_SCORE: f64 = 0.1;

const SUBDIVISION_SCORE_FACTOR: f64 = 0.7;
const SUBDIVISION_SCORE_FLOOR: f64 = 0.08;
const CONTEXT_ITERATIONS: usize = 5;
const RELATED_LABEL_COUNT: usize = 3;

pub const STANDALONE_ID: &str = "standalone";
pub const STANDALONE_NAME: &str = "Standalone";

/// Marker prefix for the combined suffix family.
const BY_SUFFIX: &str = "_by_suffix_";

static SEQUENTIAL_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"^(.+?)(\d+)$",
        r"^(.+?-)(\d+)$",
        r"^(.+?)\s+(\d+)$",
        r"^(q)(\d)$",
        r"^(v)(\d+(?:\.\d+)?)$",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("Invalid regex"))
    .collect()
});

static COLON_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([a-zA-Z][a-zA-Z0-9]*):(.+)$").expect("Invalid regex"));

static SEPARATOR_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([a-zA-Z][a-zA-Z0-9]*)[-_](.+)$").expect("Invalid regex"));

static SEPARATOR_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.+)[-_]([a-zA-Z][a-zA-Z0-9]*)$").expect("Invalid regex"));

// ============================================================================
// Label families
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FamilyKind {
    Sequential,
    Prefixed,
    Suffixed,
    Generic,
}

impl FamilyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FamilyKind::Sequential => "sequential",
            FamilyKind::Prefixed => "prefixed",
            FamilyKind::Suffixed => "suffixed",
            FamilyKind::Generic => "generic",
        }
    }
}

/// A group of labels that act as alternative values of one dimension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LabelFamily {
    pub kind: FamilyKind,
    /// Shared prefix ("phase", "feat:", "auth-"), "-suffix" for a single
    /// suffix family, or empty for generic singletons
    pub prefix: String,
    /// Member labels, sorted
    pub labels: Vec<String>,
}

impl LabelFamily {
    fn new(kind: FamilyKind, prefix: impl Into<String>, mut labels: Vec<String>) -> Self {
        labels.sort();
        Self {
            kind,
            prefix: prefix.into(),
            labels,
        }
    }

    pub fn is_sequential(&self) -> bool {
        self.kind == FamilyKind::Sequential
    }

    /// Stable identifier used for tie-breaks and `grouped_by`.
    pub fn key(&self) -> String {
        match self.kind {
            FamilyKind::Generic => format!("generic:{}", self.labels.join(",")),
            _ => format!("{}:{}", self.kind.as_str(), self.prefix),
        }
    }

    pub fn contains(&self, label: &str) -> bool {
        self.labels.binary_search_by(|l| l.as_str().cmp(label)).is_ok()
    }

    /// Workstream key and display name for a member label.
    fn workstream_for(&self, label: &str) -> (String, String) {
        if self.kind == FamilyKind::Suffixed {
            let suffix = if self.prefix == BY_SUFFIX {
                SEPARATOR_SUFFIX
                    .captures(label)
                    .and_then(|c| c.get(2))
                    .map(|m| m.as_str().to_string())
            } else {
                Some(self.prefix.trim_start_matches('-').to_string())
            };
            if let Some(suffix) = suffix {
                return (format!("ws:{}", suffix), format_workstream_name(&suffix));
            }
        }
        (format!("ws:{}", label), format_workstream_name(label))
    }
}

/// True for pure digits and a few common sequence tokens (v1, q3).
pub fn looks_sequential(s: &str) -> bool {
    if s.is_empty() {
        return false;
    }
    if s.chars().all(|c| c.is_ascii_digit()) {
        return true;
    }
    let lower = s.to_lowercase();
    (lower.starts_with('v') && lower.len() <= 4) || matches!(lower.as_str(), "q1" | "q2" | "q3" | "q4")
}

fn sequential_match(label: &str) -> Option<(String, String)> {
    let lower = label.to_lowercase();
    SEQUENTIAL_PATTERNS.iter().find_map(|p| {
        p.captures(&lower)
            .map(|c| (c[1].to_string(), c[2].to_string()))
    })
}

/// The trailing number in a sequential label (`phase2` -> 2, `v1.5` -> 5).
pub fn sequence_number(label: &str) -> u32 {
    sequential_match(label)
        .and_then(|(_, num)| {
            num.split('.')
                .next()
                .and_then(|whole| whole.parse::<u32>().ok())
        })
        .unwrap_or(0)
}

fn take_groups(
    groups: BTreeMap<String, Vec<String>>,
    assigned: &mut HashSet<String>,
) -> Vec<(String, Vec<String>)> {
    groups
        .into_iter()
        .filter(|(_, members)| members.len() >= 2)
        .inspect(|(_, members)| assigned.extend(members.iter().cloned()))
        .collect()
}

/// Group labels into families by naming pattern.
///
/// Passes run in order and each label joins at most one family: sequential,
/// colon-prefixed, separator-prefixed, separator-suffixed, then generic
/// singletons. Families come back sorted by [`LabelFamily::key`].
pub fn detect_label_families(labels: &[String]) -> Vec<LabelFamily> {
    let mut labels: Vec<String> = labels.to_vec();
    labels.sort();
    labels.dedup();

    let mut families: Vec<LabelFamily> = Vec::new();
    let mut assigned: HashSet<String> = HashSet::new();

    let mut sequential: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for label in &labels {
        if let Some((prefix, _)) = sequential_match(label) {
            sequential.entry(prefix).or_default().push(label.clone());
        }
    }
    for (prefix, members) in take_groups(sequential, &mut assigned) {
        families.push(LabelFamily::new(FamilyKind::Sequential, prefix, members));
    }

    let mut colon: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for label in labels.iter().filter(|l| !assigned.contains(*l)) {
        if let Some(c) = COLON_PREFIX.captures(label) {
            colon.entry(format!("{}:", &c[1])).or_default().push(label.clone());
        }
    }
    for (prefix, members) in take_groups(colon, &mut assigned) {
        families.push(LabelFamily::new(FamilyKind::Prefixed, prefix, members));
    }

    let mut separator: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for label in labels.iter().filter(|l| !assigned.contains(*l)) {
        if let Some(c) = SEPARATOR_PREFIX.captures(label) {
            if !looks_sequential(&c[2]) {
                separator.entry(c[1].to_string()).or_default().push(label.clone());
            }
        }
    }
    for (prefix, members) in take_groups(separator, &mut assigned) {
        families.push(LabelFamily::new(FamilyKind::Prefixed, format!("{}-", prefix), members));
    }

    let mut suffix: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for label in labels.iter().filter(|l| !assigned.contains(*l)) {
        if let Some(c) = SEPARATOR_SUFFIX.captures(label) {
            if !looks_sequential(&c[2]) {
                suffix.entry(c[2].to_string()).or_default().push(label.clone());
            }
        }
    }
    let suffix_groups = take_groups(suffix, &mut assigned);
    if suffix_groups.len() >= 2 {
        let members = suffix_groups.into_iter().flat_map(|(_, m)| m).collect();
        families.push(LabelFamily::new(FamilyKind::Suffixed, BY_SUFFIX, members));
    } else {
        for (suffix, members) in suffix_groups {
            families.push(LabelFamily::new(FamilyKind::Suffixed, format!("-{}", suffix), members));
        }
    }

    for label in labels.iter().filter(|l| !assigned.contains(*l)) {
        families.push(LabelFamily::new(FamilyKind::Generic, "", vec![label.clone()]));
    }

    families.sort_by_key(|f| f.key());
    families
}

// ============================================================================
// Family scoring
// ============================================================================

/// How well a family partitions a set of issues.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FamilyScore {
    pub family: LabelFamily,
    pub score: f64,
    /// Fraction of issues carrying any family label
    pub coverage: f64,
    /// Fraction of covered issues carrying exactly one family label
    pub exclusivity: f64,
    /// 1 - min(1, variance / mean^2) over per-label counts
    pub balance: f64,
}

/// Evenness of per-label counts, 1 when all equal.
pub fn compute_balance(counts: &BTreeMap<&str, usize>) -> f64 {
    if counts.len() < 2 {
        return 1.0;
    }
    let n = counts.len() as f64;
    let mean = counts.values().sum::<usize>() as f64 / n;
    if mean <= 0.0 {
        return 0.0;
    }
    let variance = counts
        .values()
        .map(|&c| (c as f64 - mean).powi(2))
        .sum::<f64>()
        / n;
    1.0 - (variance / (mean * mean)).min(1.0)
}

/// Score `family` over `issues`.
pub fn score_family(family: &LabelFamily, issues: &[&Issue]) -> FamilyScore {
    let zero = |family: &LabelFamily| FamilyScore {
        family: family.clone(),
        score: 0.0,
        coverage: 0.0,
        exclusivity: 0.0,
        balance: 0.0,
    };
    if family.labels.len() < 2 && family.kind != FamilyKind::Generic {
        return zero(family);
    }

    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    let mut covered = 0usize;
    let mut multiple = 0usize;
    for issue in issues {
        let hits = issue.labels.iter().filter(|l| family.contains(l)).count();
        for label in issue.labels.iter().filter(|l| family.contains(l)) {
            *counts.entry(label.as_str()).or_default() += 1;
        }
        if hits > 0 {
            covered += 1;
        }
        if hits > 1 {
            multiple += 1;
        }
    }
    if covered == 0 {
        return zero(family);
    }

    let coverage = covered as f64 / issues.len() as f64;
    let exclusivity = (covered - multiple) as f64 / covered as f64;
    let balance = compute_balance(&counts);

    let mut score = coverage * exclusivity * balance;
    match family.kind {
        FamilyKind::Sequential => score *= 1.4,
        FamilyKind::Prefixed => score *= 1.2,
        FamilyKind::Suffixed => score *= 1.1,
        FamilyKind::Generic => {}
    }
    if coverage < 0.3 {
        score *= coverage / 0.3;
    }
    if family.kind == FamilyKind::Generic && coverage > 0.6 {
        score *= 0.3;
    }

    FamilyScore {
        family: family.clone(),
        score,
        coverage,
        exclusivity,
        balance,
    }
}

/// Strip anything up to a colon and capitalize the first letter.
pub fn format_workstream_name(label: &str) -> String {
    let base = label.split_once(':').map(|(_, rest)| rest).unwrap_or(label);
    let mut chars = base.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// A label that splits a view without covering all of it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DistinguishingLabel {
    pub label: String,
    /// Coverage scaled to 0-100
    pub score: f64,
    pub issue_count: usize,
    pub partition_ratio: f64,
}

/// Labels carried by at least `min_group` but not all of `issues`, by coverage.
pub fn distinguishing_labels(
    issues: &[Issue],
    selected_label: Option<&str>,
    min_group: usize,
) -> Vec<DistinguishingLabel> {
    if issues.is_empty() {
        return Vec::new();
    }
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for issue in issues {
        for label in &issue.labels {
            if Some(label.as_str()) != selected_label {
                *counts.entry(label.as_str()).or_default() += 1;
            }
        }
    }
    let total = issues.len() as f64;
    let mut out: Vec<DistinguishingLabel> = counts
        .into_iter()
        .filter(|&(_, c)| c >= min_group && c < issues.len())
        .map(|(label, c)| DistinguishingLabel {
            label: label.to_string(),
            score: c as f64 / total * 100.0,
            issue_count: c,
            partition_ratio: c as f64 / total,
        })
        .collect();
    out.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.label.cmp(&b.label)));
    out
}

// ============================================================================
// Workstreams
// ============================================================================

/// A blocking edge whose ends sit in different workstreams.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CrossWorkstreamBlocker {
    pub blocker_id: String,
    pub blocker_workstream: String,
    pub blocked_id: String,
    pub blocked_workstream: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Workstream {
    pub id: String,
    pub name: String,
    pub issue_ids: Vec<String>,
    /// Members from the scope itself
    pub primary_count: usize,
    /// Members pulled in through parent-child edges
    pub context_count: usize,
    /// Closed primaries over all primaries
    pub progress: f64,
    /// No ready or in-progress work and not fully closed
    pub is_blocked: bool,
    pub ready_count: usize,
    pub blocked_count: usize,
    pub in_progress_count: usize,
    pub closed_count: usize,
    pub related_labels: Vec<String>,
    pub cross_blocked_by: Vec<CrossWorkstreamBlocker>,
    pub cross_blocks: Vec<CrossWorkstreamBlocker>,
    /// Sequence number for sequential families
    pub order: u32,
    pub depth: usize,
    /// Family key used to form this group, or "dependencies"
    pub grouped_by: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<usize>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<usize>,
    #[serde(skip)]
    family_prefix: Option<String>,
}

impl Workstream {
    pub fn is_standalone(&self) -> bool {
        self.id == STANDALONE_ID || self.id.ends_with("/standalone")
    }

    pub fn size(&self) -> usize {
        self.issue_ids.len()
    }
}

/// Knobs for one detection level.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkstreamOptions {
    pub max_depth: usize,
    pub current_depth: usize,
    pub min_group_size: usize,
    /// Families must score strictly above this
    pub min_score: f64,
    /// Labels ignored when detecting families
    pub exclude_labels: Vec<String>,
    /// Family prefixes already used higher up
    pub exclude_families: Vec<String>,
}

impl Default for WorkstreamOptions {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            current_depth: 0,
            min_group_size: DEFAULT_MIN_GROUP_SIZE,
            min_score: MIN_FAMILY_SCORE,
            exclude_labels: Vec::new(),
            exclude_families: Vec::new(),
        }
    }
}

impl WorkstreamOptions {
    pub fn from_analysis(opts: &AnalysisOptions) -> Self {
        Self {
            max_depth: opts.workstream_max_depth,
            min_group_size: opts.workstream_min_group,
            ..Self::default()
        }
    }

    fn min_size(&self) -> usize {
        self.min_group_size.max(2)
    }

    /// Options one level deeper, with a relaxed score threshold.
    pub fn for_subdivision(&self, used_prefix: Option<&str>, used_labels: &[String]) -> Self {
        let mut exclude_labels = self.exclude_labels.clone();
        exclude_labels.extend(used_labels.iter().cloned());
        let mut exclude_families = self.exclude_families.clone();
        if let Some(prefix) = used_prefix.filter(|p| !p.is_empty()) {
            exclude_families.push(prefix.to_string());
        }
        Self {
            max_depth: self.max_depth,
            current_depth: self.current_depth + 1,
            min_group_size: self.min_group_size,
            min_score: (self.min_score * SUBDIVISION_SCORE_FACTOR).max(SUBDIVISION_SCORE_FLOOR),
            exclude_labels,
            exclude_families,
        }
    }

    fn family_excluded(&self, family: &LabelFamily) -> bool {
        !family.prefix.is_empty()
            && self
                .exclude_families
                .iter()
                .any(|p| family.prefix == *p || family.prefix.starts_with(p.as_str()))
    }
}

/// Detection output: a flat arena of workstreams.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkstreamResult {
    /// "label:<name>", "epic:<id>" or "view"
    pub scope: String,
    pub total_issues: usize,
    pub primary_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub family: Option<FamilyScore>,
    /// Every workstream, top level first, then subdivisions
    pub workstreams: Vec<Workstream>,
    /// Arena indices of the top-level workstreams, in sorted order
    pub roots: Vec<usize>,
    /// Context issues with no parent-child link into any workstream
    pub unassigned_context: Vec<String>,
    pub partial: bool,
    pub warnings: Vec<Warning>,
}

impl WorkstreamResult {
    fn empty(scope: String) -> Self {
        Self {
            scope,
            total_issues: 0,
            primary_count: 0,
            family: None,
            workstreams: Vec::new(),
            roots: Vec::new(),
            unassigned_context: Vec::new(),
            partial: false,
            warnings: Vec::new(),
        }
    }

    /// Top-level workstreams in sorted order.
    pub fn top_level(&self) -> impl Iterator<Item = &Workstream> {
        self.roots.iter().map(|&i| &self.workstreams[i])
    }

    pub fn children_of(&self, idx: usize) -> impl Iterator<Item = &Workstream> {
        self.workstreams[idx].children.iter().map(|&c| &self.workstreams[c])
    }
}

/// One detection level before it is placed in the arena.
struct Level {
    workstreams: Vec<Workstream>,
    family: Option<FamilyScore>,
    unassigned: Vec<String>,
}

struct Group {
    key: String,
    name: String,
    order: u32,
    members: Vec<usize>,
}

/// True when `issue` has a present, unclosed blocker in `global`.
fn blocked_in(global: &IssueGraph, issue: &Issue) -> bool {
    issue
        .blocking_targets()
        .any(|t| global.get(t).is_some_and(|b| b.status.is_open()))
}

/// Append the winning family's label to parent-child descendants lacking one.
///
/// Works on a local copy of labels; the records themselves are untouched.
fn inherit_labels(
    family: &LabelFamily,
    labels: &mut [Vec<String>],
    children: &[Vec<usize>],
) {
    let roots: Vec<(usize, String)> = labels
        .iter()
        .enumerate()
        .filter_map(|(i, ls)| ls.iter().find(|l| family.contains(l)).map(|l| (i, l.clone())))
        .collect();

    for (root, label) in roots {
        let mut visited: HashSet<usize> = HashSet::from([root]);
        let mut queue: VecDeque<usize> = VecDeque::from([root]);
        while let Some(current) = queue.pop_front() {
            for &child in &children[current] {
                if !visited.insert(child) {
                    continue;
                }
                if !labels[child].iter().any(|l| family.contains(l)) {
                    labels[child].push(label.clone());
                }
                queue.push_back(child);
            }
        }
    }
}

fn top_labels(labels: &[&Vec<String>], skip: &HashSet<&str>, n: usize) -> Vec<String> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for set in labels {
        for l in set.iter().filter(|l| !skip.contains(l.as_str())) {
            *counts.entry(l.as_str()).or_default() += 1;
        }
    }
    let mut sorted: Vec<(&str, usize)> = counts.into_iter().collect();
    sorted.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
    sorted.into_iter().take(n).map(|(l, _)| l.to_string()).collect()
}

/// Run steps 1-7 over one view.
fn detect_level(
    view: &[&Issue],
    primary: &BTreeSet<String>,
    global: &IssueGraph,
    opts: &WorkstreamOptions,
) -> Level {
    if view.is_empty() {
        return Level {
            workstreams: Vec::new(),
            family: None,
            unassigned: Vec::new(),
        };
    }

    let mut primary_idx: Vec<usize> = (0..view.len()).filter(|&i| primary.contains(&view[i].id)).collect();
    let mut context_idx: Vec<usize> = (0..view.len()).filter(|&i| !primary.contains(&view[i].id)).collect();
    if primary_idx.is_empty() {
        primary_idx = (0..view.len()).collect();
        context_idx.clear();
    }
    let is_primary: HashSet<usize> = primary_idx.iter().copied().collect();

    let excluded: HashSet<&str> = opts.exclude_labels.iter().map(String::as_str).collect();
    let primaries: Vec<&Issue> = primary_idx.iter().map(|&i| view[i]).collect();

    let candidate_labels: Vec<String> = primaries
        .iter()
        .flat_map(|i| i.labels.iter())
        .filter(|l| !excluded.contains(l.as_str()))
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let mut scores: Vec<FamilyScore> = detect_label_families(&candidate_labels)
        .iter()
        .filter(|f| !opts.family_excluded(f))
        .map(|f| score_family(f, &primaries))
        .filter(|s| s.score > opts.min_score)
        .collect();
    scores.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.family.key().cmp(&b.family.key())));
    let winner = scores.into_iter().next();

    // View-local parent-child adjacency.
    let pos: HashMap<&str, usize> = view.iter().enumerate().map(|(i, v)| (v.id.as_str(), i)).collect();
    let mut parents: Vec<Vec<usize>> = vec![Vec::new(); view.len()];
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); view.len()];
    for (i, issue) in view.iter().enumerate() {
        for parent in issue.parents() {
            if let Some(&p) = pos.get(parent) {
                if p != i {
                    parents[i].push(p);
                    children[p].push(i);
                }
            }
        }
    }

    let mut labels: Vec<Vec<String>> = view.iter().map(|i| i.labels.clone()).collect();
    if let Some(w) = &winner {
        inherit_labels(&w.family, &mut labels, &children);
    }

    // Partition primaries by their first family label.
    let mut groups: BTreeMap<String, Group> = BTreeMap::new();
    let mut standalone: Vec<usize> = Vec::new();
    for &i in &primary_idx {
        let family_label = winner
            .as_ref()
            .and_then(|w| labels[i].iter().find(|l| w.family.contains(l)).map(|l| (w, l)));
        match family_label {
            Some((w, label)) => {
                let (key, name) = w.family.workstream_for(label);
                let order = if w.family.is_sequential() {
                    sequence_number(label)
                } else {
                    0
                };
                groups
                    .entry(key.clone())
                    .or_insert_with(|| Group {
                        key,
                        name,
                        order,
                        members: Vec::new(),
                    })
                    .members
                    .push(i);
            }
            None => standalone.push(i),
        }
    }
    let mut groups: Vec<Group> = groups.into_values().collect();
    if !standalone.is_empty() {
        groups.push(Group {
            key: STANDALONE_ID.to_string(),
            name: STANDALONE_NAME.to_string(),
            order: u32::MAX,
            members: standalone,
        });
    }

    // Attach context issues through parent-child edges only.
    let mut owner: HashMap<usize, usize> = HashMap::new();
    for (g, group) in groups.iter().enumerate() {
        for &m in &group.members {
            owner.insert(m, g);
        }
    }
    let mut pending = context_idx;
    for _ in 0..CONTEXT_ITERATIONS {
        if pending.is_empty() {
            break;
        }
        let mut still = Vec::new();
        for &c in &pending {
            let mut votes: BTreeMap<usize, usize> = BTreeMap::new();
            for n in parents[c].iter().chain(&children[c]) {
                if let Some(&g) = owner.get(n) {
                    *votes.entry(g).or_default() += 1;
                }
            }
            // most links wins, lowest group index on ties
            let best = votes
                .into_iter()
                .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
                .map(|(g, _)| g);
            match best {
                Some(g) => {
                    groups[g].members.push(c);
                    owner.insert(c, g);
                }
                None => still.push(c),
            }
        }
        if still.len() == pending.len() {
            pending = still;
            break;
        }
        pending = still;
    }
    let unassigned: Vec<String> = pending.iter().map(|&c| view[c].id.clone()).collect();

    let grouped_by = winner
        .as_ref()
        .map(|w| w.family.key())
        .unwrap_or_else(|| "dependencies".to_string());
    let family_prefix = winner.as_ref().map(|w| w.family.prefix.clone());

    let mut workstreams: Vec<Workstream> = groups
        .iter()
        .map(|group| {
            let members: Vec<&Issue> = group.members.iter().map(|&m| view[m]).collect();
            let primary_count = group.members.iter().filter(|m| is_primary.contains(m)).count();
            let mut ws = Workstream {
                id: group.key.clone(),
                name: group.name.clone(),
                issue_ids: members.iter().map(|i| i.id.clone()).collect(),
                primary_count,
                context_count: group.members.len() - primary_count,
                progress: 0.0,
                is_blocked: false,
                ready_count: 0,
                blocked_count: 0,
                in_progress_count: 0,
                closed_count: 0,
                related_labels: Vec::new(),
                cross_blocked_by: Vec::new(),
                cross_blocks: Vec::new(),
                order: group.order,
                depth: opts.current_depth,
                grouped_by: grouped_by.clone(),
                parent: None,
                children: Vec::new(),
                family_prefix: family_prefix.clone(),
            };
            for issue in &members {
                match issue.status {
                    Status::Closed => ws.closed_count += 1,
                    Status::InProgress => ws.in_progress_count += 1,
                    Status::Open | Status::Blocked => {
                        if blocked_in(global, issue) {
                            ws.blocked_count += 1;
                        } else {
                            ws.ready_count += 1;
                        }
                    }
                }
            }
            if primary_count > 0 {
                let closed_primaries = group
                    .members
                    .iter()
                    .filter(|m| is_primary.contains(m) && view[**m].status.is_closed())
                    .count();
                ws.progress = closed_primaries as f64 / primary_count as f64;
            }
            ws.is_blocked =
                ws.ready_count == 0 && ws.in_progress_count == 0 && ws.closed_count < ws.size();
            let member_labels: Vec<&Vec<String>> = group.members.iter().map(|&m| &labels[m]).collect();
            ws.related_labels = top_labels(&member_labels, &excluded, RELATED_LABEL_COUNT);
            ws
        })
        .collect();

    cross_workstream_blockers(&mut workstreams, &groups, view);
    sort_workstreams(&mut workstreams, winner.as_ref().map(|w| &w.family));

    Level {
        workstreams,
        family: winner,
        unassigned,
    }
}

/// Record every open issue's blocking edge into another workstream on both sides.
fn cross_workstream_blockers(workstreams: &mut [Workstream], groups: &[Group], view: &[&Issue]) {
    if workstreams.len() < 2 {
        return;
    }
    let mut owner: HashMap<&str, usize> = HashMap::new();
    for (g, group) in groups.iter().enumerate() {
        for &m in &group.members {
            owner.insert(view[m].id.as_str(), g);
        }
    }
    let status: HashMap<&str, Status> = view.iter().map(|i| (i.id.as_str(), i.status)).collect();

    let mut records: Vec<(usize, usize, CrossWorkstreamBlocker)> = Vec::new();
    for (g, group) in groups.iter().enumerate() {
        for &m in &group.members {
            let issue = view[m];
            if issue.status.is_closed() {
                continue;
            }
            for blocker in issue.blocking_targets() {
                let Some(&bg) = owner.get(blocker) else { continue };
                if bg == g || status.get(blocker).is_some_and(|s| s.is_closed()) {
                    continue;
                }
                records.push((
                    bg,
                    g,
                    CrossWorkstreamBlocker {
                        blocker_id: blocker.to_string(),
                        blocker_workstream: workstreams[bg].name.clone(),
                        blocked_id: issue.id.clone(),
                        blocked_workstream: workstreams[g].name.clone(),
                    },
                ));
            }
        }
    }
    for (blocker_ws, blocked_ws, record) in records {
        workstreams[blocker_ws].cross_blocks.push(record.clone());
        workstreams[blocked_ws].cross_blocked_by.push(record);
    }
}

/// Sequential families by order, otherwise by size then name. Standalone last.
fn sort_workstreams(workstreams: &mut [Workstream], family: Option<&LabelFamily>) {
    let sequential = family.is_some_and(|f| f.is_sequential());
    workstreams.sort_by(|a, b| {
        a.is_standalone()
            .cmp(&b.is_standalone())
            .then_with(|| {
                if sequential {
                    a.order.cmp(&b.order).then(a.name.cmp(&b.name))
                } else {
                    b.size().cmp(&a.size()).then(a.name.cmp(&b.name))
                }
            })
    });
}

/// Labels on more than half of a workstream's members.
fn defining_labels(members: &[&Issue]) -> Vec<String> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for issue in members {
        for label in &issue.labels {
            *counts.entry(label.as_str()).or_default() += 1;
        }
    }
    counts
        .into_iter()
        .filter(|&(_, c)| c * 2 > members.len())
        .map(|(l, _)| l.to_string())
        .collect()
}

/// Detect workstreams in `view` and subdivide them.
///
/// `primary` marks the issues that define the scope; everything else in the
/// view is context. `context_label` is ignored for family detection. The
/// deadline is checked between subdivision attempts.
pub fn detect_workstreams(
    view: &[Issue],
    primary: &BTreeSet<String>,
    context_label: Option<&str>,
    global: &IssueGraph,
    opts: &WorkstreamOptions,
    deadline: Deadline,
) -> WorkstreamResult {
    let scope = context_label
        .map(|l| format!("label:{}", l))
        .unwrap_or_else(|| "view".to_string());
    let mut result = WorkstreamResult::empty(scope);
    if view.is_empty() {
        return result;
    }

    let mut top_opts = opts.clone();
    if let Some(label) = context_label {
        top_opts.exclude_labels.push(label.to_string());
    }
    let refs: Vec<&Issue> = view.iter().collect();
    let by_id: HashMap<&str, &Issue> = view.iter().map(|i| (i.id.as_str(), i)).collect();

    let level = detect_level(&refs, primary, global, &top_opts);
    result.total_issues = view.len();
    result.primary_count = view.iter().filter(|i| primary.contains(&i.id)).count();
    if result.primary_count == 0 {
        result.primary_count = view.len();
    }
    result.family = level.family;
    result.unassigned_context = level.unassigned;
    for ws in level.workstreams {
        result.roots.push(result.workstreams.len());
        result.workstreams.push(ws);
    }

    let mut queue: VecDeque<(usize, WorkstreamOptions)> =
        result.roots.iter().map(|&r| (r, top_opts.clone())).collect();
    while let Some((idx, level_opts)) = queue.pop_front() {
        if deadline.expired() {
            warn!(remaining = queue.len() + 1, "Workstream subdivision deadline exceeded");
            result.partial = true;
            result.warnings.push(Warning::new(
                WarningKind::DeadlineExceeded,
                "workstream subdivision stopped at deadline",
            ));
            break;
        }
        let min_size = level_opts.min_size();
        let parent = &result.workstreams[idx];
        if level_opts.current_depth >= level_opts.max_depth || parent.size() < min_size * 2 {
            continue;
        }

        let members: Vec<Issue> = parent
            .issue_ids
            .iter()
            .filter_map(|id| by_id.get(id.as_str()).map(|i| (*i).clone()))
            .collect();
        let member_refs: Vec<&Issue> = members.iter().collect();
        let sub_opts = level_opts.for_subdivision(
            parent.family_prefix.as_deref(),
            &defining_labels(&member_refs),
        );
        let mut sub_primary: BTreeSet<String> = members
            .iter()
            .filter(|i| primary.contains(&i.id))
            .map(|i| i.id.clone())
            .collect();
        if sub_primary.is_empty() {
            sub_primary = members.iter().map(|i| i.id.clone()).collect();
        }

        let sub = detect_level(&member_refs, &sub_primary, global, &sub_opts);
        let meaningful = sub
            .workstreams
            .iter()
            .filter(|w| !w.is_standalone() && w.size() >= min_size)
            .count();
        if meaningful < 2 {
            continue;
        }

        let parent_id = parent.id.clone();
        let parent_depth = parent.depth;
        let mut child_indices = Vec::with_capacity(sub.workstreams.len());
        for mut child in sub.workstreams {
            child.id = format!("{}/{}", parent_id, child.id);
            child.depth = parent_depth + 1;
            child.parent = Some(idx);
            let child_idx = result.workstreams.len();
            result.workstreams.push(child);
            child_indices.push(child_idx);
            queue.push_back((child_idx, sub_opts.clone()));
        }
        debug!(workstream = %parent_id, children = child_indices.len(), "Subdivided workstream");
        result.workstreams[idx].children = child_indices;
    }

    debug!(
        scope = %result.scope,
        workstreams = result.workstreams.len(),
        family = result.family.as_ref().map(|f| f.family.key()).unwrap_or_default(),
        "Detected workstreams"
    );
    result
}

/// One-hop blocking and parent-child neighbours of `primaries`, minus `skip`.
fn context_neighbours(g: &IssueGraph, primaries: &BTreeSet<usize>, skip: &BTreeSet<usize>) -> BTreeSet<usize> {
    let mut out = BTreeSet::new();
    for &p in primaries {
        for kind in [DependencyKind::Blocks, DependencyKind::ParentChild] {
            for &n in g.successors(p, kind).iter().chain(g.predecessors(p, kind)) {
                if !primaries.contains(&n) && !skip.contains(&n) {
                    out.insert(n);
                }
            }
        }
    }
    out
}

fn scoped_view(g: &IssueGraph, primaries: &BTreeSet<usize>, skip: &BTreeSet<usize>) -> (Vec<Issue>, BTreeSet<String>) {
    let context = context_neighbours(g, primaries, skip);
    let view: Vec<Issue> = primaries
        .iter()
        .chain(&context)
        .map(|&v| g.issue(v).clone())
        .collect();
    let ids = primaries.iter().map(|&v| g.id(v).to_string()).collect();
    (view, ids)
}

/// Workstreams among the issues carrying `label`.
///
/// Issues linked to those by one blocking or parent-child edge join the view
/// as context.
pub fn for_label(g: &IssueGraph, label: &str, opts: &AnalysisOptions) -> WorkstreamResult {
    let primaries: BTreeSet<usize> = (0..g.len()).filter(|&v| g.issue(v).has_label(label)).collect();
    if primaries.is_empty() {
        return WorkstreamResult::empty(format!("label:{}", label));
    }
    let (view, ids) = scoped_view(g, &primaries, &BTreeSet::new());
    detect_workstreams(
        &view,
        &ids,
        Some(label),
        g,
        &WorkstreamOptions::from_analysis(opts),
        opts.deadline(),
    )
}

/// Workstreams among the parent-child descendants of `epic_id`.
pub fn for_epic(g: &IssueGraph, epic_id: &str, opts: &AnalysisOptions) -> Result<WorkstreamResult> {
    let epic = g
        .index_of(epic_id)
        .ok_or_else(|| Error::NotFound(format!("Epic {} not found", epic_id)))?;

    let mut descendants: BTreeSet<usize> = BTreeSet::new();
    let mut queue: VecDeque<usize> = VecDeque::from([epic]);
    while let Some(v) = queue.pop_front() {
        for &child in g.children(v) {
            if child != epic && descendants.insert(child) {
                queue.push_back(child);
            }
        }
    }

    let mut result = if descendants.is_empty() {
        WorkstreamResult::empty(String::new())
    } else {
        let (view, ids) = scoped_view(g, &descendants, &BTreeSet::from([epic]));
        detect_workstreams(
            &view,
            &ids,
            None,
            g,
            &WorkstreamOptions::from_analysis(opts),
            opts.deadline(),
        )
    };
    result.scope = format!("epic:{}", epic_id);
    Ok(result)
}
