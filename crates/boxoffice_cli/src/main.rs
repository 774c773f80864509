//! BoxOffice CLI
//!
//! Operator tools for a device's offline queue.
//!
//! # Commands
//!
//! - `inspect` - Show pending, rejected and review counts per event
//! - `verify` - Report malformed journal lines
//! - `migrate` - Move legacy records into per-event journals
//! - `review` - List purchases waiting for an operator

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// BoxOffice offline queue tools.
#[derive(Parser)]
#[command(name = "boxoffice")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the data directory
    #[arg(global = true, short, long)]
    data_dir: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show pending, rejected and review counts per event
    Inspect {
        /// Restrict to one event
        #[arg(short, long)]
        event: Option<String>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Report malformed journal lines
    Verify {
        /// Restrict to one event
        #[arg(short, long)]
        event: Option<String>,
    },

    /// Move legacy records into per-event journals
    Migrate {
        /// Re-process entries left in the legacy files
        #[arg(short, long)]
        force: bool,
    },

    /// List purchases waiting for an operator
    Review {
        /// Restrict to one event
        #[arg(short, long)]
        event: Option<String>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect { event, format } => {
            let path = cli.data_dir.ok_or("Data directory required for inspect")?;
            commands::inspect::run(&path, event.as_deref(), &format)?;
        }
        Commands::Verify { event } => {
            let path = cli.data_dir.ok_or("Data directory required for verify")?;
            commands::verify::run(&path, event.as_deref())?;
        }
        Commands::Migrate { force } => {
            let path = cli.data_dir.ok_or("Data directory required for migrate")?;
            commands::migrate::run(&path, force)?;
        }
        Commands::Review { event, format } => {
            let path = cli.data_dir.ok_or("Data directory required for review")?;
            commands::review::run(&path, event.as_deref(), &format)?;
        }
        Commands::Version => {
            println!("BoxOffice CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("BoxOffice Core v{}", boxoffice_core::VERSION);
        }
    }

    Ok(())
}
