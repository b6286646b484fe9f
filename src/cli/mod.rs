//! CLI Module
//!
//! Command-line interface for HelixAgent using Clap v4.

mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

/// HelixAgent - LLM request-routing gateway with an AI Debate Ensemble
#[derive(Parser, Debug)]
#[command(name = "helixagent")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path (TOML)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the gateway HTTP server (default)
    Serve,

    /// Show the effective configuration
    Config {
        /// Include secret values instead of redacting them
        #[arg(short, long)]
        show_secrets: bool,
    },

    /// Database operations
    Db {
        #[command(subcommand)]
        operation: DbCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum DbCommands {
    /// Create the database file and run schema migrations
    Init,
    /// Show row counts for each table
    Stats,
}

/// Top-level entry point. Maps every failure mode to the exit code
/// contract: `0` clean shutdown, `1` configuration error, `2`
/// unrecoverable startup failure, `3` terminated by signal after the
/// drain timeout was exceeded.
pub async fn run() -> ExitCode {
    let cli = Cli::parse();

    let config = match crate::config::Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e:#}");
            return ExitCode::from(1);
        }
    };
    if let Err(e) = config.validate() {
        eprintln!("configuration error: {e:#}");
        return ExitCode::from(1);
    }

    let _log_guard = crate::logging::init(&config.logging);

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => commands::cmd_serve(config).await,
        Commands::Config { show_secrets } => commands::cmd_config(&config, show_secrets),
        Commands::Db { operation } => commands::cmd_db(&config, operation).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_well_formed() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
