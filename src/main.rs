//! Mooring - run a command with a leased network identity
//!
//! Leases a MAC/IP pair from a DHCP host file, brings up a tap device on a
//! bridge, runs the command with the identity in its environment and
//! releases everything when the command exits.

mod berth;
mod cli;
mod error;
mod manifest;
mod network;

use berth::{Environment, Invoker, Lifecycle, SignalGuard};
use cli::{Cli, Commands};
use error::Result;
use manifest::MooringConfig;
use std::path::Path;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() {
    let cli = Cli::parse_args();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(e.exit_code());
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose { "debug" } else { "info" };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Setuid runs only trust the root-owned system config
fn load_config(path: Option<&Path>) -> Result<MooringConfig> {
    manifest::load_for(path, Invoker::current().elevated)
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Commands::Completion { shell } => {
            Cli::generate_completion(shell);
            Ok(0)
        }

        Commands::Run { command } => {
            let config = load_config(cli.config.as_deref())?;
            let lifecycle = Lifecycle::new(
                config.allocator()?,
                config.network_helper(),
                &config.bridge.name,
                &config.identity.dir,
            );

            let _signals = SignalGuard::install()?;
            let outcome = lifecycle.run(Environment::from_process(), &command);
            Ok(outcome.exit_code())
        }

        Commands::Leases { json } => {
            let config = load_config(cli.config.as_deref())?;
            let records = config.lease_store().records()?;

            if json {
                let out = serde_json::to_string_pretty(&records)
                    .map_err(|e| error::Error::Io(e.into()))?;
                println!("{}", out);
            } else if records.is_empty() {
                println!("No leases in {}", config.leases.path.display());
            } else {
                println!("{:<20} {}", "MAC", "IP");
                for record in &records {
                    println!("{:<20} {}", record.mac, record.ip);
                }
            }
            Ok(0)
        }

        Commands::Check => {
            let config = load_config(cli.config.as_deref())?;
            let allocator = config.allocator()?;
            let leased = allocator.store().records()?.len();

            println!("Configuration OK");
            println!("  Lease store: {}", config.leases.path.display());
            println!("  Range:       {}", allocator.range());
            println!("  Capacity:    {} ({} leased)", allocator.capacity(), leased);
            println!("  Bridge:      {}", config.bridge.name);
            println!("  Identity:    {}", config.identity.dir.display());
            Ok(0)
        }
    }
}
