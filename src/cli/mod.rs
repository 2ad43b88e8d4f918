//! CLI argument definitions for issuegraph.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{ArgGroup, Args, Parser, Subcommand};

use crate::config::ConfigOverrides;

/// Version string with the commit and build time baked in by `build.rs`.
pub const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("IG_GIT_COMMIT"),
    " ",
    env!("IG_BUILD_TIMESTAMP"),
    ")"
);

/// issuegraph - graph analytics for issue trackers.
///
/// Every `--robot-*` flag prints a single JSON document on stdout. Logs go to
/// stderr only.
#[derive(Parser, Debug)]
#[command(name = "ig")]
#[command(author, version = VERSION, about = "Graph analytics for issue trackers", long_about = None)]
#[command(group(
    ArgGroup::new("robot")
        .args([
            "robot_insights",
            "robot_plan",
            "robot_labels",
            "robot_triage",
            "robot_workstreams",
            "robot_diff",
            "robot_causality",
        ])
        .multiple(false)
))]
pub struct Cli {
    /// Run as if ig was started in <path> instead of the current directory.
    /// Can also be set via IG_REPO environment variable.
    #[arg(short = 'C', long = "repo", global = true, env = "IG_REPO")]
    pub repo_path: Option<PathBuf>,

    /// Human-readable output for subcommands and errors (robot flags always print JSON)
    #[arg(short = 'H', long = "human", global = true)]
    pub human_readable: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Reference time for staleness and ages (RFC 3339), defaults to now
    #[arg(long, global = true, env = "IG_NOW")]
    pub now: Option<DateTime<Utc>>,

    #[command(flatten)]
    pub tuning: TuningArgs,

    /// Graph metrics, cycles and the critical path
    #[arg(long)]
    pub robot_insights: bool,

    /// Execution plan: ready work, blocked work and parallel tracks
    #[arg(long)]
    pub robot_plan: bool,

    /// Label health and cross-label flow
    #[arg(long)]
    pub robot_labels: bool,

    /// Recommendations and top triage scores
    #[arg(long)]
    pub robot_triage: bool,

    /// Workstreams within a label (--label) or an epic (--epic)
    #[arg(long)]
    pub robot_workstreams: bool,

    /// Changes since the saved baseline
    #[arg(long)]
    pub robot_diff: bool,

    /// Lifecycle causal chain of one issue
    #[arg(long, value_name = "ID")]
    pub robot_causality: Option<String>,

    /// Label scope for --robot-workstreams
    #[arg(long, conflicts_with = "epic")]
    pub label: Option<String>,

    /// Epic scope for --robot-workstreams
    #[arg(long)]
    pub epic: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Per-run overrides of `ig.kdl` values.
#[derive(Args, Debug, Clone, Default)]
pub struct TuningArgs {
    /// Days without an update before an issue counts as stale
    #[arg(long, global = true)]
    pub stale_days: Option<i64>,

    /// Maximum number of parallel tracks in a plan
    #[arg(long, global = true)]
    pub max_tracks: Option<i64>,

    /// Return partial results after this many milliseconds
    #[arg(long, global = true)]
    pub deadline_ms: Option<i64>,

    /// Block issues whose parent-child ancestor is blocked
    #[arg(long, global = true)]
    pub parent_gates: bool,
}

impl TuningArgs {
    pub fn overrides(&self) -> ConfigOverrides {
        let mut overrides = ConfigOverrides::new();
        if let Some(days) = self.stale_days {
            overrides = overrides.with_stale_threshold_days(days);
        }
        if let Some(tracks) = self.max_tracks {
            overrides = overrides.with_max_tracks(tracks);
        }
        if let Some(ms) = self.deadline_ms {
            overrides = overrides.with_deadline_ms(ms);
        }
        if self.parent_gates {
            overrides = overrides.with_parent_gates_readiness(true);
        }
        overrides
    }
}

/// Which robot document to print.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RobotMode {
    Insights,
    Plan,
    Labels,
    Triage,
    Workstreams,
    Diff,
    Causality(String),
}

impl Cli {
    pub fn robot_mode(&self) -> Option<RobotMode> {
        if self.robot_insights {
            Some(RobotMode::Insights)
        } else if self.robot_plan {
            Some(RobotMode::Plan)
        } else if self.robot_labels {
            Some(RobotMode::Labels)
        } else if self.robot_triage {
            Some(RobotMode::Triage)
        } else if self.robot_workstreams {
            Some(RobotMode::Workstreams)
        } else if self.robot_diff {
            Some(RobotMode::Diff)
        } else {
            self.robot_causality.clone().map(RobotMode::Causality)
        }
    }
}

/// Top-level commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Baseline snapshot management
    Baseline {
        #[command(subcommand)]
        command: BaselineCommands,
    },

    /// Configuration inspection
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum BaselineCommands {
    /// Save the current records as the baseline for --robot-diff
    Save {
        /// Free-form note stored with the baseline
        #[arg(short, long, default_value = "")]
        description: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Show resolved configuration values and where each came from
    Show,
}
