pub mod commands;
pub mod config;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

use crate::cli::config::HarvesterConfig;
use crate::utils::default_log_file;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file (defaults to the user config directory)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Also write logs to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Also write logs to the default log file in the user data directory
    #[arg(long, global = true)]
    pub log_to_file: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Commands {
    /// Fail collecting tasks abandoned by a previous process
    Recover,

    /// Show the status of a task
    Status {
        /// Task URI to check status for
        #[arg(required = true)]
        task: String,
    },
}

impl Cli {
    /// File to copy logs into, if any
    pub fn log_path(&self) -> Option<PathBuf> {
        match &self.log_file {
            Some(path) => Some(path.clone()),
            None if self.log_to_file => Some(default_log_file()),
            None => None,
        }
    }
}

/// Parse command line arguments
pub fn parse_args() -> Cli {
    Cli::parse()
}

/// Process the command
pub async fn process_command(cli: Cli) -> Result<()> {
    let config = HarvesterConfig::load(cli.config.as_deref())?;

    match cli.command.unwrap_or(Commands::Recover) {
        Commands::Recover => {
            info!("Running startup recovery");
            commands::recover(&config).await
        }
        Commands::Status { task } => {
            info!("Checking status for task {}", task);
            commands::status(&config, &task).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert()
    }

    #[test]
    fn test_recover_is_default() {
        let cli = Cli::try_parse_from(["harvest-orchestrator", "--verbose"]).unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.command, None);

        let cli = Cli::try_parse_from(["harvest-orchestrator", "status", "http://data.test/tasks/1", "-c", "/etc/h.yaml"]).unwrap();
        assert_eq!(
            cli.command,
            Some(Commands::Status {
                task: "http://data.test/tasks/1".to_string()
            })
        );
        assert_eq!(cli.config, Some(PathBuf::from("/etc/h.yaml")));
    }

    #[test]
    fn test_log_path() {
        let cli = Cli::try_parse_from(["harvest-orchestrator"]).unwrap();
        assert_eq!(cli.log_path(), None);

        let cli = Cli::try_parse_from(["harvest-orchestrator", "--log-to-file"]).unwrap();
        assert_eq!(cli.log_path(), Some(default_log_file()));

        let cli = Cli::try_parse_from(["harvest-orchestrator", "--log-to-file", "--log-file", "/var/log/h.log"]).unwrap();
        assert_eq!(cli.log_path(), Some(PathBuf::from("/var/log/h.log")));
    }
}
