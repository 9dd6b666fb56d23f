//! Command-line surface of the `deploy` binary

pub mod deploy;

use crate::config::Overrides;
use clap::Parser;
use std::path::PathBuf;

pub use deploy::{DeployCommands, handle_deploy_command};

#[derive(Debug, Parser)]
#[command(
    name = "deploy",
    version,
    about = "Promote the research-agent service onto a GKE cluster"
)]
pub struct Cli {
    /// Config file (default: ./deploy.toml when present)
    #[arg(short, long, env = "DEPLOY_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(flatten)]
    pub overrides: Overrides,

    #[command(subcommand)]
    pub command: DeployCommands,
}
