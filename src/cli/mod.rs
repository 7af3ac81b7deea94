//! Command Line Interface module
//!
//! Argument parsing and the command implementations. The CLI is the
//! orchestration core's front end: it consumes the event stream the
//! sessions and the batch coordinator publish.

pub mod args;
pub mod commands;

pub use args::*;

use anyhow::Result;

/// Main CLI application runner
pub async fn run() -> Result<()> {
    let cli = Cli::parse_args();
    crate::utils::logging::init_cli_logging(cli.verbose, cli.quiet)?;

    match &cli.command {
        Some(command) => commands::execute_command(command.clone(), &cli).await,
        None => commands::profiles::execute_profiles_command(&cli).await,
    }
}
