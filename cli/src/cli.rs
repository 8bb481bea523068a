//! CLI argument parsing with clap derive

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::commands;
use crate::output::OutputContext;

/// Nested workspace container supervisor with GPU library passthrough
#[derive(Parser)]
#[command(
    name = "envbox",
    version,
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the inner Docker daemon and the workspace container, then block
    /// until SIGINT or SIGTERM. Configured through CODER_* variables.
    Docker,

    /// Stop and remove the workspace container
    Teardown,

    /// List (or stage) the GPU libraries found in a host directory
    Libs(commands::libs::LibsArgs),

    /// Show version
    Version,
}

impl Cli {
    /// Execute the CLI command.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn run(self) -> Result<()> {
        let Cli {
            json,
            quiet,
            no_color,
            command,
        } = self;
        match command {
            Command::Docker => commands::docker::run().await,
            Command::Teardown => {
                let ctx = OutputContext::new(no_color, quiet);
                commands::teardown::run(&ctx).await
            }
            Command::Libs(args) => {
                let ctx = OutputContext::new(no_color, quiet);
                commands::libs::run(&ctx, &args, json).await
            }
            Command::Version => {
                commands::version::run(json);
                Ok(())
            }
        }
    }
}
