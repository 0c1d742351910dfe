//! Command-line interface for mooring
//!
//! Uses clap with derive for type-safe CLI parsing

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// Mooring - run a command with a leased network identity
#[derive(Parser)]
#[command(name = "mooring")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file path (defaults to /etc/mooring.toml if present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// Lease an identity, run a command with it, then release it
    Run {
        /// Command and arguments to run
        #[arg(
            trailing_var_arg = true,
            allow_hyphen_values = true,
            required = true,
            value_name = "COMMAND"
        )]
        command: Vec<String>,
    },

    /// List leases currently in the store
    Leases {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate the configuration and show the leasable range
    Check,

    /// Generate shell completion scripts
    Completion {
        /// Shell to generate completion for
        #[arg(value_enum)]
        shell: Shell,
    },
}

impl Cli {
    /// Parse command-line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Generate shell completion scripts
    pub fn generate_completion(shell: Shell) {
        let mut cmd = Self::command();
        clap_complete::generate(shell, &mut cmd, "mooring", &mut std::io::stdout());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_keeps_command_flags() {
        let cli = Cli::try_parse_from(["mooring", "-v", "run", "qemu", "-m", "512"]).unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Run { command } => assert_eq!(command, vec!["qemu", "-m", "512"]),
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_run_after_separator() {
        let cli = Cli::try_parse_from(["mooring", "run", "--", "sh", "-c", "true"]).unwrap();
        match cli.command {
            Commands::Run { command } => assert_eq!(command, vec!["sh", "-c", "true"]),
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_run_requires_command() {
        assert!(Cli::try_parse_from(["mooring", "run"]).is_err());
    }

    #[test]
    fn test_global_config_after_subcommand() {
        let cli = Cli::try_parse_from(["mooring", "leases", "--json", "-c", "/tmp/m.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/m.toml")));
        assert!(matches!(cli.command, Commands::Leases { json: true }));
    }
}
