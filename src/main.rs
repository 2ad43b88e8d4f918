//! issuegraph CLI entry point.

use std::env;
use std::path::{Path, PathBuf};
use std::process;

use clap::Parser;
use issuegraph::cli::{BaselineCommands, Cli, Commands, ConfigCommands, RobotMode};
use issuegraph::commands::{self, Output, WorkstreamScope, Workspace};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// Environment variable holding the log filter directive.
const LOG_ENV: &str = "IG_LOG";

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let human = cli.human_readable && cli.robot_mode().is_none();
    let repo_path = resolve_repo_path(cli.repo_path.clone());

    if let Err(e) = run_command(cli, &repo_path) {
        tracing::debug!(error = %e, "Command failed");
        if human {
            eprintln!("Error: {}", e);
        } else {
            eprintln!("{}", serde_json::json!({ "error": e.to_string() }));
        }
        process::exit(1);
    }
}

/// Logs go to stderr only; stdout carries command output.
fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn resolve_repo_path(explicit_path: Option<PathBuf>) -> PathBuf {
    match explicit_path {
        Some(path) => path,
        None => env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}

fn run_command(cli: Cli, repo_path: &Path) -> Result<(), issuegraph::Error> {
    let overrides = cli.tuning.overrides();
    let human = cli.human_readable;

    if let Some(command) = &cli.command {
        return match command {
            Commands::Baseline {
                command: BaselineCommands::Save { description },
            } => {
                let ws = Workspace::open(repo_path, &overrides, cli.now)?;
                output(&commands::baseline_save(&ws, description)?, human);
                Ok(())
            }
            Commands::Config {
                command: ConfigCommands::Show,
            } => {
                output(&commands::config_show(repo_path, &overrides)?, human);
                Ok(())
            }
        };
    }

    let ws = Workspace::open(repo_path, &overrides, cli.now)?;
    match cli.robot_mode() {
        Some(RobotMode::Insights) => output(&commands::insights(&ws)?, false),
        Some(RobotMode::Plan) => output(&commands::plan(&ws)?, false),
        Some(RobotMode::Labels) => output(&commands::labels(&ws)?, false),
        Some(RobotMode::Triage) => output(&commands::triage(&ws)?, false),
        Some(RobotMode::Workstreams) => {
            let scope = WorkstreamScope::from_args(cli.label, cli.epic)?;
            output(&commands::workstreams(&ws, &scope)?, false);
        }
        Some(RobotMode::Diff) => output(&commands::diff(&ws)?, false),
        Some(RobotMode::Causality(id)) => output(&commands::causality(&ws, &id)?, false),
        None => {
            output(&commands::plan(&ws)?, true);
            println!();
            output(&commands::triage(&ws)?, true);
        }
    }
    Ok(())
}

fn output<T: Output>(result: &T, human: bool) {
    if human {
        println!("{}", result.to_human());
    } else {
        println!("{}", result.to_json());
    }
}
