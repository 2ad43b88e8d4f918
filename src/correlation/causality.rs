//! Causal chains over an issue's lifecycle events and commits.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize, Serializer};

use crate::models::{Issue, Status};
use crate::Result;

/// Commit messages in event descriptions are cut to this many characters.
pub const MAX_COMMIT_MESSAGE: usize = 50;

const HIGH_BLOCKED_PERCENT: f64 = 30.0;
const LONG_GAP_DAYS: i64 = 7;
const HEALTHY_FLOW: &str = "No significant issues detected in the causal flow";

fn as_secs<S: Serializer>(d: &TimeDelta, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_i64(d.num_seconds())
}

fn as_opt_secs<S: Serializer>(d: &Option<TimeDelta>, s: S) -> std::result::Result<S::Ok, S::Error> {
    match d {
        Some(d) => s.serialize_some(&d.num_seconds()),
        None => s.serialize_none(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Created,
    Claimed,
    Commit,
    Blocked,
    Unblocked,
    Closed,
    Reopened,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Created => "created",
            EventKind::Claimed => "claimed",
            EventKind::Commit => "commit",
            EventKind::Blocked => "blocked",
            EventKind::Unblocked => "unblocked",
            EventKind::Closed => "closed",
            EventKind::Reopened => "reopened",
        }
    }
}

/// One recorded lifecycle transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
}

impl LifecycleEvent {
    pub fn new(kind: EventKind, timestamp: DateTime<Utc>) -> Self {
        Self {
            kind,
            timestamp,
            author: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub sha: String,
    pub short_sha: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub author: String,
}

/// Supplies commits correlated with an issue.
pub trait CommitProvider {
    fn commits_for(&self, issue_id: &str) -> Result<Vec<CommitInfo>>;
}

impl CommitProvider for BTreeMap<String, Vec<CommitInfo>> {
    fn commits_for(&self, issue_id: &str) -> Result<Vec<CommitInfo>> {
        Ok(self.get(issue_id).cloned().unwrap_or_default())
    }
}

/// Everything known about one issue's lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueHistory {
    pub issue_id: String,
    pub title: String,
    pub status: Status,
    pub events: Vec<LifecycleEvent>,
    #[serde(default)]
    pub commits: Vec<CommitInfo>,
}

impl IssueHistory {
    /// History derived from a record's own timestamps.
    pub fn from_issue(issue: &Issue) -> Self {
        let mut events = vec![LifecycleEvent::new(EventKind::Created, issue.created_at)];
        if issue.status == Status::InProgress && issue.updated_at > issue.created_at {
            events.push(LifecycleEvent::new(EventKind::Claimed, issue.updated_at));
        }
        if issue.status == Status::Blocked && issue.updated_at > issue.created_at {
            events.push(LifecycleEvent::new(EventKind::Blocked, issue.updated_at));
        }
        if let Some(closed_at) = issue.closed_at.filter(|_| issue.status.is_closed()) {
            events.push(LifecycleEvent::new(EventKind::Closed, closed_at));
        }
        Self {
            issue_id: issue.id.clone(),
            title: issue.title.clone(),
            status: issue.status,
            events,
            commits: Vec::new(),
        }
    }
}

/// Histories keyed by issue id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryReport {
    pub data_hash: String,
    pub histories: BTreeMap<String, IssueHistory>,
}

impl HistoryReport {
    pub fn new(data_hash: impl Into<String>) -> Self {
        Self {
            data_hash: data_hash.into(),
            histories: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, history: IssueHistory) {
        self.histories.insert(history.issue_id.clone(), history);
    }

    /// Attach commits from `provider` to every history.
    pub fn correlate(&mut self, provider: &dyn CommitProvider) -> Result<()> {
        for history in self.histories.values_mut() {
            history.commits = provider.commits_for(&history.issue_id)?;
        }
        Ok(())
    }

    /// Build the causal chain for `issue_id`, or `None` when it has no history.
    ///
    /// Chains of unfinished issues end at `now`.
    pub fn build_chain(
        &self,
        issue_id: &str,
        opts: &CausalityOptions,
        now: DateTime<Utc>,
    ) -> Option<CausalityResult> {
        let history = self.histories.get(issue_id)?;
        let chain = CausalChain::build(history, opts, now);
        let insights = CausalInsights::compute(&chain);
        Some(CausalityResult { chain, insights })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CausalityOptions {
    pub include_commits: bool,
}

impl Default for CausalityOptions {
    fn default() -> Self {
        Self {
            include_commits: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CausalEvent {
    pub id: usize,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    pub description: String,
    pub caused_by: Option<usize>,
    pub enables: Vec<usize>,
    /// Time until the next event
    #[serde(serialize_with = "as_opt_secs")]
    pub duration_next: Option<TimeDelta>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CausalChain {
    pub issue_id: String,
    pub title: String,
    pub status: Status,
    pub is_complete: bool,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(serialize_with = "as_secs")]
    pub total_time: TimeDelta,
    pub events: Vec<CausalEvent>,
}

/// Truncate by characters, marking the cut with an ellipsis.
pub fn truncate_message(message: &str, max: usize) -> String {
    let first_line = message.lines().next().unwrap_or_default();
    if first_line.chars().count() <= max {
        return first_line.to_string();
    }
    let kept: String = first_line.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", kept)
}

fn describe(kind: EventKind) -> String {
    match kind {
        EventKind::Created => "Issue created".to_string(),
        EventKind::Claimed => "Work started".to_string(),
        EventKind::Commit => "Commit".to_string(),
        EventKind::Blocked => "Blocked".to_string(),
        EventKind::Unblocked => "Unblocked".to_string(),
        EventKind::Closed => "Issue closed".to_string(),
        EventKind::Reopened => "Issue reopened".to_string(),
    }
}

impl CausalChain {
    fn build(history: &IssueHistory, opts: &CausalityOptions, now: DateTime<Utc>) -> Self {
        let mut raw: Vec<(EventKind, DateTime<Utc>, String)> = history
            .events
            .iter()
            .map(|e| (e.kind, e.timestamp, describe(e.kind)))
            .collect();
        if opts.include_commits {
            raw.extend(history.commits.iter().map(|c| {
                (
                    EventKind::Commit,
                    c.timestamp,
                    format!("{}: {}", c.short_sha, truncate_message(&c.message, MAX_COMMIT_MESSAGE)),
                )
            }));
        }
        // stable, so equal timestamps keep lifecycle events ahead of commits
        raw.sort_by_key(|(_, ts, _)| *ts);

        let count = raw.len();
        let mut events: Vec<CausalEvent> = Vec::with_capacity(count);
        for (i, (kind, timestamp, description)) in raw.iter().enumerate() {
            events.push(CausalEvent {
                id: i,
                kind: *kind,
                timestamp: *timestamp,
                description: description.clone(),
                caused_by: i.checked_sub(1),
                enables: if i + 1 < count { vec![i + 1] } else { Vec::new() },
                duration_next: raw.get(i + 1).map(|(_, next, _)| *next - *timestamp),
            });
        }

        let is_complete = history.status.is_closed();
        let start_time = events.first().map(|e| e.timestamp).unwrap_or(now);
        let end_time = if is_complete {
            events.last().map(|e| e.timestamp).unwrap_or(now)
        } else {
            now.max(start_time)
        };

        Self {
            issue_id: history.issue_id.clone(),
            title: history.title.clone(),
            status: history.status,
            is_complete,
            start_time,
            end_time,
            total_time: end_time - start_time,
            events,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CausalInsights {
    #[serde(serialize_with = "as_secs")]
    pub total_duration: TimeDelta,
    #[serde(serialize_with = "as_secs")]
    pub active_duration: TimeDelta,
    #[serde(serialize_with = "as_secs")]
    pub blocked_duration: TimeDelta,
    pub blocked_percentage: f64,
    pub commit_count: usize,
    #[serde(serialize_with = "as_opt_secs")]
    pub longest_gap: Option<TimeDelta>,
    pub longest_gap_desc: String,
    pub summary: String,
    pub recommendations: Vec<String>,
}

impl CausalInsights {
    pub fn compute(chain: &CausalChain) -> Self {
        let total_duration = chain.total_time;

        // A blocked span runs until the next unblock or the chain end.
        let mut blocked_duration = TimeDelta::zero();
        let mut blocked_since: Option<DateTime<Utc>> = None;
        for event in &chain.events {
            match event.kind {
                EventKind::Blocked if blocked_since.is_none() => blocked_since = Some(event.timestamp),
                EventKind::Unblocked | EventKind::Closed => {
                    if let Some(since) = blocked_since.take() {
                        blocked_duration += event.timestamp - since;
                    }
                }
                _ => {}
            }
        }
        if let Some(since) = blocked_since {
            blocked_duration += (chain.end_time - since).max(TimeDelta::zero());
        }
        blocked_duration = blocked_duration.min(total_duration);

        let blocked_percentage = if total_duration > TimeDelta::zero() {
            blocked_duration.num_milliseconds() as f64 / total_duration.num_milliseconds() as f64 * 100.0
        } else {
            0.0
        };

        let mut longest: Option<(usize, TimeDelta)> = None;
        for (i, event) in chain.events.iter().enumerate() {
            if let Some(gap) = event.duration_next {
                if longest.is_none_or(|(_, best)| gap > best) {
                    longest = Some((i, gap));
                }
            }
        }
        let longest_gap_desc = longest
            .map(|(i, gap)| {
                format!(
                    "{} between {} and {}",
                    format_duration_short(gap),
                    chain.events[i].kind.as_str(),
                    chain.events[i + 1].kind.as_str()
                )
            })
            .unwrap_or_default();

        let mut insights = Self {
            total_duration,
            active_duration: total_duration - blocked_duration,
            blocked_duration,
            blocked_percentage,
            commit_count: chain.events.iter().filter(|e| e.kind == EventKind::Commit).count(),
            longest_gap: longest.map(|(_, gap)| gap),
            longest_gap_desc,
            summary: String::new(),
            recommendations: Vec::new(),
        };
        insights.summary = summary(chain, &insights);
        insights.recommendations = recommendations(chain, &insights);
        insights
    }
}

fn summary(chain: &CausalChain, insights: &CausalInsights) -> String {
    let mut text = if chain.is_complete {
        format!("Completed in {}", format_duration_short(insights.total_duration))
    } else {
        format!("In progress for {}", format_duration_short(insights.total_duration))
    };
    match insights.commit_count {
        0 => {}
        1 => text.push_str(" with 1 commit"),
        n => text.push_str(&format!(" with {} commits", n)),
    }
    if insights.blocked_percentage > 0.0 {
        text.push_str(&format!(", blocked {}", format_percent(insights.blocked_percentage)));
    }
    text
}

fn recommendations(chain: &CausalChain, insights: &CausalInsights) -> Vec<String> {
    let mut recs = Vec::new();
    if insights.blocked_percentage >= HIGH_BLOCKED_PERCENT {
        recs.push(format!(
            "Blocked for {} of its lifetime; resolve blockers before claiming similar work",
            format_percent(insights.blocked_percentage)
        ));
    }
    if let Some(gap) = insights.longest_gap.filter(|g| g.num_days() >= LONG_GAP_DAYS) {
        recs.push(format!(
            "Idle for {} ({}); consider splitting the work into smaller pieces",
            format_duration_short(gap),
            insights.longest_gap_desc
        ));
    }
    if !chain.is_complete && insights.commit_count == 0 && insights.total_duration.num_days() >= LONG_GAP_DAYS {
        recs.push("No commits linked after a week open; check whether work has started".to_string());
    }
    if recs.is_empty() {
        recs.push(HEALTHY_FLOW.to_string());
    }
    recs
}

/// Compact duration: `30m`, `5h`, `3d`, `1w`, `1mo`.
pub fn format_duration_short(d: TimeDelta) -> String {
    let minutes = d.num_minutes().max(0);
    let hours = minutes / 60;
    let days = hours / 24;
    if minutes < 60 {
        format!("{}m", minutes)
    } else if hours < 24 {
        format!("{}h", hours)
    } else if days < 7 {
        format!("{}d", days)
    } else if days < 30 {
        format!("{}w", days / 7)
    } else {
        format!("{}mo", days / 30)
    }
}

/// Whole percent, truncated.
pub fn format_percent(pct: f64) -> String {
    format!("{}%", pct.max(0.0) as i64)
}

/// An issue's causal chain plus derived insights.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CausalityResult {
    pub chain: CausalChain,
    pub insights: CausalInsights,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{issue, now, with_status};

    fn at(hours: i64) -> DateTime<Utc> {
        now() + TimeDelta::hours(hours)
    }

    fn history(status: Status, events: &[(EventKind, i64)]) -> IssueHistory {
        IssueHistory {
            issue_id: "bv-test".to_string(),
            title: "Test Bead".to_string(),
            status,
            events: events.iter().map(|&(k, h)| LifecycleEvent::new(k, at(h))).collect(),
            commits: Vec::new(),
        }
    }

    fn commit(short: &str, message: &str, hours: i64) -> CommitInfo {
        CommitInfo {
            sha: format!("{}000000", short),
            short_sha: short.to_string(),
            message: message.to_string(),
            timestamp: at(hours),
            author: "dev".to_string(),
        }
    }

    fn report(h: IssueHistory) -> HistoryReport {
        let mut r = HistoryReport::new("test-hash");
        r.insert(h);
        r
    }

    #[test]
    fn test_basic_chain_orders_commits_by_time() {
        let mut h = history(
            Status::Closed,
            &[(EventKind::Created, 0), (EventKind::Claimed, 2), (EventKind::Closed, 10)],
        );
        h.commits.push(commit("abc1234", "Fix bug", 5));
        let result = report(h)
            .build_chain("bv-test", &CausalityOptions::default(), at(20))
            .unwrap();
        assert!(result.chain.is_complete);
        let kinds: Vec<EventKind> = result.chain.events.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![EventKind::Created, EventKind::Claimed, EventKind::Commit, EventKind::Closed]
        );
        assert_eq!(result.chain.events[2].description, "abc1234: Fix bug");
        assert_eq!(result.chain.total_time, TimeDelta::hours(10));
    }

    #[test]
    fn test_causal_links_and_durations() {
        let h = history(
            Status::Closed,
            &[(EventKind::Created, 0), (EventKind::Claimed, 2), (EventKind::Closed, 10)],
        );
        let result = report(h)
            .build_chain("bv-test", &CausalityOptions { include_commits: false }, at(20))
            .unwrap();
        let e = &result.chain.events;
        assert_eq!(e[0].caused_by, None);
        assert_eq!(e[0].enables, vec![1]);
        assert_eq!(e[1].caused_by, Some(0));
        assert_eq!(e[1].enables, vec![2]);
        assert_eq!(e[2].caused_by, Some(1));
        assert!(e[2].enables.is_empty());
        assert_eq!(e[0].duration_next, Some(TimeDelta::hours(2)));
        assert_eq!(e[1].duration_next, Some(TimeDelta::hours(8)));
        assert_eq!(e[2].duration_next, None);
        assert_eq!(result.insights.longest_gap_desc, "8h between claimed and closed");
    }

    #[test]
    fn test_unknown_issue_is_none() {
        let r = HistoryReport::new("h");
        assert!(r.build_chain("nope", &CausalityOptions::default(), now()).is_none());
    }

    #[test]
    fn test_commit_toggle() {
        let mut h = history(Status::InProgress, &[(EventKind::Created, 0), (EventKind::Claimed, 1)]);
        h.commits = vec![commit("abc1234", "First", 2), commit("def5678", "Second", 3)];
        let r = report(h);
        let with = r.build_chain("bv-test", &CausalityOptions::default(), at(4)).unwrap();
        let without = r
            .build_chain("bv-test", &CausalityOptions { include_commits: false }, at(4))
            .unwrap();
        assert_eq!(with.insights.commit_count, 2);
        assert_eq!(without.insights.commit_count, 0);
    }

    #[test]
    fn test_in_progress_ends_now() {
        let h = history(Status::InProgress, &[(EventKind::Created, 0), (EventKind::Claimed, 1)]);
        let result = report(h)
            .build_chain("bv-test", &CausalityOptions::default(), at(30))
            .unwrap();
        assert!(!result.chain.is_complete);
        assert_eq!(result.chain.end_time, at(30));
        assert!(result.insights.summary.starts_with("In progress for 1d"));
    }

    #[test]
    fn test_blocked_interval() {
        let h = history(
            Status::Closed,
            &[
                (EventKind::Created, 0),
                (EventKind::Blocked, 2),
                (EventKind::Unblocked, 7),
                (EventKind::Closed, 10),
            ],
        );
        let result = report(h)
            .build_chain("bv-test", &CausalityOptions::default(), at(10))
            .unwrap();
        assert_eq!(result.insights.blocked_duration, TimeDelta::hours(5));
        assert_eq!(result.insights.active_duration, TimeDelta::hours(5));
        assert_eq!(result.insights.blocked_percentage, 50.0);
        assert!(result.insights.recommendations[0].starts_with("Blocked for 50%"));
    }

    #[test]
    fn test_same_timestamps_do_not_panic() {
        let h = history(
            Status::Closed,
            &[(EventKind::Created, 0), (EventKind::Claimed, 0), (EventKind::Closed, 0)],
        );
        let result = report(h)
            .build_chain("bv-test", &CausalityOptions { include_commits: false }, at(0))
            .unwrap();
        assert_eq!(result.insights.longest_gap, Some(TimeDelta::zero()));
        assert_eq!(result.insights.longest_gap_desc, "0m between created and claimed");
        assert_eq!(result.insights.blocked_percentage, 0.0);
    }

    #[test]
    fn test_unicode_commit_message_truncated_by_chars() {
        let msg = "修复中文测试问题，这是一个很长的提交消息，需要被正确截断".repeat(2);
        let mut h = history(Status::Closed, &[(EventKind::Created, 0), (EventKind::Closed, 1)]);
        h.commits.push(commit("abc1234", &msg, 0));
        let result = report(h)
            .build_chain("bv-test", &CausalityOptions::default(), at(1))
            .unwrap();
        let event = result
            .chain
            .events
            .iter()
            .find(|e| e.kind == EventKind::Commit)
            .unwrap();
        let text = event.description.trim_start_matches("abc1234: ");
        assert!(text.ends_with("..."));
        assert_eq!(text.chars().count(), MAX_COMMIT_MESSAGE);
    }

    #[test]
    fn test_format_duration_short() {
        let cases = [
            (TimeDelta::minutes(30), "30m"),
            (TimeDelta::minutes(90), "1h"),
            (TimeDelta::hours(5), "5h"),
            (TimeDelta::hours(25), "1d"),
            (TimeDelta::days(3), "3d"),
            (TimeDelta::days(10), "1w"),
            (TimeDelta::days(35), "1mo"),
        ];
        for (d, expected) in cases {
            assert_eq!(format_duration_short(d), expected);
        }
    }

    #[test]
    fn test_format_percent_truncates() {
        assert_eq!(format_percent(0.0), "0%");
        assert_eq!(format_percent(33.7), "33%");
        assert_eq!(format_percent(100.0), "100%");
    }

    #[test]
    fn test_recommendations() {
        let h = history(Status::Closed, &[(EventKind::Created, 0), (EventKind::Closed, 24 * 10)]);
        let result = report(h)
            .build_chain("bv-test", &CausalityOptions::default(), at(24 * 10))
            .unwrap();
        assert!(result.insights.recommendations[0].starts_with("Idle for 1w"));

        let h = history(Status::Closed, &[(EventKind::Created, 0), (EventKind::Closed, 5)]);
        let result = report(h)
            .build_chain("bv-test", &CausalityOptions::default(), at(5))
            .unwrap();
        assert_eq!(result.insights.recommendations, vec![HEALTHY_FLOW]);
    }

    #[test]
    fn test_from_issue() {
        let mut closed = with_status(issue("a"), Status::Closed);
        closed.closed_at = Some(at(3));
        let h = IssueHistory::from_issue(&closed);
        let kinds: Vec<EventKind> = h.events.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EventKind::Created, EventKind::Closed]);
    }

    #[test]
    fn test_correlate_with_provider() {
        let mut r = report(history(Status::Open, &[(EventKind::Created, 0)]));
        let provider: BTreeMap<String, Vec<CommitInfo>> =
            BTreeMap::from([("bv-test".to_string(), vec![commit("abc1234", "Work", 1)])]);
        r.correlate(&provider).unwrap();
        assert_eq!(r.histories["bv-test"].commits.len(), 1);
    }
}
