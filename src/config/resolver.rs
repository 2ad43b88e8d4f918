//! Precedence resolution for analysis configuration.
//!
//! ## Precedence (highest to lowest)
//!
//! 1. CLI flags (passed at runtime)
//! 2. Project `ig.kdl` (`<repo>/.beads/ig.kdl`)
//! 3. System `config.kdl` (`~/.config/issuegraph/config.kdl`)
//! 4. Built-in defaults

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::Result;
use crate::analysis::AnalysisOptions;
use crate::analysis::labels::HealthWeights;
use crate::config::IgConfig;
use crate::correlation::cache::{DEFAULT_MAX_AGE, DEFAULT_MAX_ENTRIES};
use crate::storage::STORE_DIR;

pub const PROJECT_CONFIG_FILE: &str = "ig.kdl";
pub const SYSTEM_CONFIG_DIR: &str = "issuegraph";
pub const SYSTEM_CONFIG_FILE: &str = "config.kdl";

/// `~/.config/issuegraph/config.kdl`, when a config directory exists.
pub fn system_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(SYSTEM_CONFIG_DIR).join(SYSTEM_CONFIG_FILE))
}

/// `<root>/.beads/ig.kdl`.
pub fn project_config_path(root: &Path) -> PathBuf {
    root.join(STORE_DIR).join(PROJECT_CONFIG_FILE)
}

/// Tracks where a resolved value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueSource {
    /// Value from CLI flag
    CliFlag,
    /// Value from the project's ig.kdl
    Project,
    /// Value from the system config.kdl
    System,
    /// Built-in default value
    Default,
}

impl std::fmt::Display for ValueSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueSource::CliFlag => write!(f, "cli"),
            ValueSource::Project => write!(f, "project"),
            ValueSource::System => write!(f, "system"),
            ValueSource::Default => write!(f, "default"),
        }
    }
}

/// A resolved value with its source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolved<T> {
    /// The resolved value
    pub value: T,
    /// Where the value came from
    pub source: ValueSource,
}

impl<T> Resolved<T> {
    pub fn new(value: T, source: ValueSource) -> Self {
        Self { value, source }
    }
}

/// First set value in precedence order.
fn pick<T>(cli: Option<T>, project: Option<T>, system: Option<T>, default: T) -> Resolved<T> {
    if let Some(v) = cli {
        Resolved::new(v, ValueSource::CliFlag)
    } else if let Some(v) = project {
        Resolved::new(v, ValueSource::Project)
    } else if let Some(v) = system {
        Resolved::new(v, ValueSource::System)
    } else {
        Resolved::new(default, ValueSource::Default)
    }
}

/// Fully resolved configuration with source tracking.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedConfig {
    pub stale_threshold_days: Resolved<i64>,
    pub health_weights: Resolved<HealthWeights>,
    pub max_tracks: Resolved<usize>,
    pub betweenness_sample: Resolved<usize>,
    pub betweenness_exact_limit: Resolved<usize>,
    pub label_path_limit: Resolved<usize>,
    pub workstream_max_depth: Resolved<usize>,
    pub workstream_min_group: Resolved<usize>,
    pub parent_gates_readiness: Resolved<bool>,
    pub cache_max_age_secs: Resolved<u64>,
    pub cache_max_entries: Resolved<usize>,
    /// No deadline unless configured
    pub deadline_ms: Resolved<Option<u64>>,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        resolve_layers(&IgConfig::new(), &IgConfig::new(), &ConfigOverrides::new())
    }
}

impl ResolvedConfig {
    /// Analysis options evaluated at `now`, with the deadline starting now.
    pub fn analysis_options(&self, now: DateTime<Utc>) -> AnalysisOptions {
        let mut opts = AnalysisOptions::at(now);
        opts.stale_threshold_days = self.stale_threshold_days.value;
        opts.health_weights = self.health_weights.value;
        opts.max_tracks = self.max_tracks.value;
        opts.betweenness_sample = self.betweenness_sample.value;
        opts.betweenness_exact_limit = self.betweenness_exact_limit.value;
        opts.label_path_limit = self.label_path_limit.value;
        opts.workstream_max_depth = self.workstream_max_depth.value;
        opts.workstream_min_group = self.workstream_min_group.value;
        opts.parent_gates_readiness = self.parent_gates_readiness.value;
        match self.deadline_ms.value {
            Some(ms) => opts.with_deadline(Duration::from_millis(ms)),
            None => opts,
        }
    }

    pub fn cache_max_age(&self) -> Duration {
        Duration::from_secs(self.cache_max_age_secs.value)
    }

    pub fn cache_max_entries(&self) -> usize {
        self.cache_max_entries.value
    }

    /// Source of each key, by KDL node name.
    pub fn sources(&self) -> BTreeMap<&'static str, ValueSource> {
        BTreeMap::from([
            ("stale-threshold-days", self.stale_threshold_days.source),
            ("health-weights", self.health_weights.source),
            ("max-tracks", self.max_tracks.source),
            ("betweenness-sample", self.betweenness_sample.source),
            ("betweenness-exact-limit", self.betweenness_exact_limit.source),
            ("label-path-limit", self.label_path_limit.source),
            ("workstream-max-depth", self.workstream_max_depth.source),
            ("workstream-min-group", self.workstream_min_group.source),
            ("parent-gates-readiness", self.parent_gates_readiness.source),
            ("cache-max-age-secs", self.cache_max_age_secs.source),
            ("cache-max-entries", self.cache_max_entries.source),
            ("deadline-ms", self.deadline_ms.source),
        ])
    }
}

/// CLI overrides for configuration resolution.
///
/// Values are taken as-is; validation happens through [`IgConfig`].
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub config: IgConfig,
}

impl ConfigOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_tracks(mut self, tracks: i64) -> Self {
        self.config.max_tracks = Some(tracks);
        self
    }

    pub fn with_stale_threshold_days(mut self, days: i64) -> Self {
        self.config.stale_threshold_days = Some(days);
        self
    }

    pub fn with_deadline_ms(mut self, ms: i64) -> Self {
        self.config.deadline_ms = Some(ms);
        self
    }

    pub fn with_parent_gates_readiness(mut self, gates: bool) -> Self {
        self.config.parent_gates_readiness = Some(gates);
        self
    }
}

fn as_usize(v: Option<i64>) -> Option<usize> {
    v.and_then(|v| usize::try_from(v).ok())
}

fn as_u64(v: Option<i64>) -> Option<u64> {
    v.and_then(|v| u64::try_from(v).ok())
}

/// Resolve already-loaded layers.
pub fn resolve_layers(system: &IgConfig, project: &IgConfig, overrides: &ConfigOverrides) -> ResolvedConfig {
    let cli = &overrides.config;
    let defaults = AnalysisOptions::default();

    macro_rules! usize_key {
        ($field:ident) => {
            pick(
                as_usize(cli.$field),
                as_usize(project.$field),
                as_usize(system.$field),
                defaults.$field,
            )
        };
    }

    ResolvedConfig {
        stale_threshold_days: pick(
            cli.stale_threshold_days,
            project.stale_threshold_days,
            system.stale_threshold_days,
            defaults.stale_threshold_days,
        ),
        health_weights: pick(
            cli.health_weights,
            project.health_weights,
            system.health_weights,
            defaults.health_weights,
        ),
        max_tracks: usize_key!(max_tracks),
        betweenness_sample: usize_key!(betweenness_sample),
        betweenness_exact_limit: usize_key!(betweenness_exact_limit),
        label_path_limit: usize_key!(label_path_limit),
        workstream_max_depth: usize_key!(workstream_max_depth),
        workstream_min_group: usize_key!(workstream_min_group),
        parent_gates_readiness: pick(
            cli.parent_gates_readiness,
            project.parent_gates_readiness,
            system.parent_gates_readiness,
            defaults.parent_gates_readiness,
        ),
        cache_max_age_secs: pick(
            as_u64(cli.cache_max_age_secs),
            as_u64(project.cache_max_age_secs),
            as_u64(system.cache_max_age_secs),
            DEFAULT_MAX_AGE.as_secs(),
        ),
        cache_max_entries: pick(
            as_usize(cli.cache_max_entries),
            as_usize(project.cache_max_entries),
            as_usize(system.cache_max_entries),
            DEFAULT_MAX_ENTRIES,
        ),
        deadline_ms: pick(
            as_u64(cli.deadline_ms).map(Some),
            as_u64(project.deadline_ms).map(Some),
            as_u64(system.deadline_ms).map(Some),
            None,
        ),
    }
}

/// Load both config files and resolve against `overrides`.
///
/// `system` is normally [`system_config_path`]; `None` skips the system layer.
pub fn resolve_config(
    root: &Path,
    system: Option<&Path>,
    overrides: &ConfigOverrides,
) -> Result<ResolvedConfig> {
    let system_config = match system {
        Some(path) => IgConfig::load(path)?,
        None => IgConfig::new(),
    };
    let project_config = IgConfig::load(&project_config_path(root))?;
    overrides
        .config
        .validate()
        .map_err(crate::Error::Config)?;
    Ok(resolve_layers(&system_config, &project_config, overrides))
}
