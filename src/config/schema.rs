//! KDL schema for `ig.kdl`.
//!
//! This module provides:
//! - A Rust struct representing the KDL schema
//! - Serialization/deserialization to/from KDL format
//! - Validation
//!
//! Parsing is lenient: unknown nodes and ill-typed values are ignored, and
//! range checks happen in [`IgConfig::validate`].

use std::path::Path;

use kdl::{KdlDocument, KdlEntry, KdlNode, KdlValue};
use serde::{Deserialize, Serialize};

use crate::analysis::labels::HealthWeights;
use crate::{Error, Result};

/// Analysis tunables stored in `ig.kdl`.
///
/// # KDL Schema
///
/// ```kdl
/// stale-threshold-days 14
/// health-weights velocity=0.25 freshness=0.25 flow=0.25 criticality=0.25
/// max-tracks 8
/// betweenness-sample 200
/// betweenness-exact-limit 500
/// label-path-limit 10
/// workstream-max-depth 3
/// workstream-min-group 2
/// parent-gates-readiness #false
/// cache-max-age-secs 300
/// cache-max-entries 10
/// deadline-ms 5000
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IgConfig {
    pub stale_threshold_days: Option<i64>,
    pub health_weights: Option<HealthWeights>,
    pub max_tracks: Option<i64>,
    pub betweenness_sample: Option<i64>,
    pub betweenness_exact_limit: Option<i64>,
    pub label_path_limit: Option<i64>,
    pub workstream_max_depth: Option<i64>,
    pub workstream_min_group: Option<i64>,
    pub parent_gates_readiness: Option<bool>,
    pub cache_max_age_secs: Option<i64>,
    pub cache_max_entries: Option<i64>,
    pub deadline_ms: Option<i64>,
}

fn int_arg(doc: &KdlDocument, name: &str) -> Option<i64> {
    doc.get(name)
        .and_then(|node| node.entries().first())
        .and_then(|e| e.value().as_integer())
        .and_then(|i| i64::try_from(i).ok())
}

fn bool_arg(doc: &KdlDocument, name: &str) -> Option<bool> {
    doc.get(name)
        .and_then(|node| node.entries().first())
        .and_then(|e| e.value().as_bool())
}

/// A numeric property, accepting integers for whole weights.
fn number_prop(node: &KdlNode, key: &str) -> Option<f64> {
    node.entries()
        .iter()
        .find(|e| e.name().map(|n| n.value()) == Some(key))
        .and_then(|e| {
            let value = e.value();
            value.as_float().or_else(|| value.as_integer().map(|i| i as f64))
        })
}

fn int_node(name: &str, value: i64) -> KdlNode {
    let mut node = KdlNode::new(name);
    node.push(KdlEntry::new(KdlValue::Integer(value as i128)));
    node
}

impl IgConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check value ranges.
    ///
    /// Returns an error message naming the first invalid key.
    pub fn validate(&self) -> std::result::Result<(), String> {
        let positive = [
            ("stale-threshold-days", self.stale_threshold_days),
            ("max-tracks", self.max_tracks),
            ("betweenness-sample", self.betweenness_sample),
            ("label-path-limit", self.label_path_limit),
            ("workstream-min-group", self.workstream_min_group),
            ("cache-max-age-secs", self.cache_max_age_secs),
            ("cache-max-entries", self.cache_max_entries),
            ("deadline-ms", self.deadline_ms),
        ];
        for (key, value) in positive {
            if let Some(v) = value {
                if v < 1 {
                    return Err(format!("{} must be at least 1, got {}", key, v));
                }
            }
        }
        let non_negative = [
            ("betweenness-exact-limit", self.betweenness_exact_limit),
            ("workstream-max-depth", self.workstream_max_depth),
        ];
        for (key, value) in non_negative {
            if let Some(v) = value {
                if v < 0 {
                    return Err(format!("{} must not be negative, got {}", key, v));
                }
            }
        }
        if let Some(weights) = &self.health_weights {
            weights.validate().map_err(|e| format!("health-weights: {}", e))?;
        }
        Ok(())
    }

    /// Parse config from a KDL document.
    pub fn from_kdl(doc: &KdlDocument) -> Self {
        let mut config = Self::new();

        config.stale_threshold_days = int_arg(doc, "stale-threshold-days");
        config.max_tracks = int_arg(doc, "max-tracks");
        config.betweenness_sample = int_arg(doc, "betweenness-sample");
        config.betweenness_exact_limit = int_arg(doc, "betweenness-exact-limit");
        config.label_path_limit = int_arg(doc, "label-path-limit");
        config.workstream_max_depth = int_arg(doc, "workstream-max-depth");
        config.workstream_min_group = int_arg(doc, "workstream-min-group");
        config.parent_gates_readiness = bool_arg(doc, "parent-gates-readiness");
        config.cache_max_age_secs = int_arg(doc, "cache-max-age-secs");
        config.cache_max_entries = int_arg(doc, "cache-max-entries");
        config.deadline_ms = int_arg(doc, "deadline-ms");

        // All four weights are required; a partial node is ignored
        if let Some(node) = doc.get("health-weights") {
            let weights = (
                number_prop(node, "velocity"),
                number_prop(node, "freshness"),
                number_prop(node, "flow"),
                number_prop(node, "criticality"),
            );
            if let (Some(velocity), Some(freshness), Some(flow), Some(criticality)) = weights {
                config.health_weights = Some(HealthWeights {
                    velocity,
                    freshness,
                    flow,
                    criticality,
                });
            }
        }

        config
    }

    /// Convert config to a KDL document.
    pub fn to_kdl(&self) -> KdlDocument {
        let mut doc = KdlDocument::new();
        let ints = [
            ("stale-threshold-days", self.stale_threshold_days),
            ("max-tracks", self.max_tracks),
            ("betweenness-sample", self.betweenness_sample),
            ("betweenness-exact-limit", self.betweenness_exact_limit),
            ("label-path-limit", self.label_path_limit),
            ("workstream-max-depth", self.workstream_max_depth),
            ("workstream-min-group", self.workstream_min_group),
        ];
        for (name, value) in ints {
            if let Some(v) = value {
                doc.nodes_mut().push(int_node(name, v));
            }
        }

        if let Some(weights) = &self.health_weights {
            let mut node = KdlNode::new("health-weights");
            node.push(KdlEntry::new_prop("velocity", KdlValue::Float(weights.velocity)));
            node.push(KdlEntry::new_prop("freshness", KdlValue::Float(weights.freshness)));
            node.push(KdlEntry::new_prop("flow", KdlValue::Float(weights.flow)));
            node.push(KdlEntry::new_prop("criticality", KdlValue::Float(weights.criticality)));
            doc.nodes_mut().push(node);
        }

        if let Some(gates) = self.parent_gates_readiness {
            let mut node = KdlNode::new("parent-gates-readiness");
            node.push(KdlEntry::new(KdlValue::Bool(gates)));
            doc.nodes_mut().push(node);
        }

        let tail = [
            ("cache-max-age-secs", self.cache_max_age_secs),
            ("cache-max-entries", self.cache_max_entries),
            ("deadline-ms", self.deadline_ms),
        ];
        for (name, value) in tail {
            if let Some(v) = value {
                doc.nodes_mut().push(int_node(name, v));
            }
        }

        doc
    }

    /// Merge another config into this one.
    /// Values from `other` override values in `self` if they are Some.
    pub fn merge(&mut self, other: &IgConfig) {
        macro_rules! take {
            ($($field:ident),*) => {
                $(if other.$field.is_some() {
                    self.$field = other.$field.clone();
                })*
            };
        }
        take!(
            stale_threshold_days,
            health_weights,
            max_tracks,
            betweenness_sample,
            betweenness_exact_limit,
            label_path_limit,
            workstream_max_depth,
            workstream_min_group,
            parent_gates_readiness,
            cache_max_age_secs,
            cache_max_entries,
            deadline_ms
        );
    }

    /// Load and validate `path`. A missing file is an empty config.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        let doc: KdlDocument = content
            .parse()
            .map_err(|e| Error::Config(format!("Failed to parse KDL in {}: {}", path.display(), e)))?;
        let config = Self::from_kdl(&doc);
        config
            .validate()
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        Ok(config)
    }
}
