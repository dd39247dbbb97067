//! CLI argument parsing and command dispatch

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::commands;

/// Merge Riverscapes projects - Combine several projects of one type into a single project
#[derive(Parser, Debug)]
#[command(name = "merge-projects")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL", default_value = "info", env = "MERGE_PROJECTS_LOG")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Merge projects into one output project
    Merge(commands::merge::MergeArgs),

    /// Show what a merge would combine without writing anything
    Plan(commands::plan::PlanArgs),
}

impl Cli {
    /// Execute the CLI command
    pub fn execute(self) -> Result<()> {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(self.log_level.as_str()))
            .format_timestamp_secs()
            .init();

        match self.command {
            Commands::Merge(args) => commands::merge::execute(args),
            Commands::Plan(args) => commands::plan::execute(args),
        }
    }
}
