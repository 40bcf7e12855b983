use std::path::PathBuf;

use clap::{Parser, Subcommand};
use taskforge_runtime::DEFAULT_CONFIG_PATH;

#[derive(Debug, Parser)]
#[command(
    name = "taskforge",
    version,
    about = "Orchestration daemon for autonomous coding agents"
)]
pub struct Cli {
    /// Site configuration file (KEY=value)
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the orchestration daemon in the foreground
    Run,

    /// Run crash recovery against the store, then exit
    Recover,

    /// Take a manual backup of one project
    Backup {
        /// Project code, e.g. WEB
        project_code: String,
    },

    /// Restore a project from a backup archive (backs up first)
    Restore {
        /// Project code, e.g. WEB
        project_code: String,
        /// Archive to restore from
        archive: PathBuf,
    },

    /// Show projects and their ticket queues
    Status,
}
