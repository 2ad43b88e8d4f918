//! Configuration for issuegraph.
//!
//! Analysis tunables live in KDL files:
//!
//! - System: `~/.config/issuegraph/config.kdl`
//! - Project: `<repo>/.beads/ig.kdl`
//!
//! Keys are listed on [`IgConfig`].
//!
//! ## Precedence
//!
//! CLI flag > project config > system config > defaults
//!
//! Use the [`resolver`] module for precedence resolution.

pub mod resolver;
pub mod schema;

pub use resolver::{
    ConfigOverrides, Resolved, ResolvedConfig, ValueSource, project_config_path, resolve_config,
    resolve_layers, system_config_path,
};
pub use schema::IgConfig;
