//! # minihull CLI Module
//!
//! ## Available Commands
//!
//! - `server` - Start the mock platform (default)
//! - `snapshots` - List saved snapshots

mod commands;

use clap::{Parser, Subcommand};
use minihull_core::MinihullError;
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// minihull - mock platform for connector integration tests
///
/// Stores subscribers, entities and groups in memory, notifies connectors
/// of changes, and records every request in both directions.
#[derive(Parser, Debug)]
#[command(name = "minihull")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Path to a TOML config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the mock platform server
    Server(ServerArgs),

    /// List saved snapshots
    Snapshots {
        /// Directory holding snapshots
        #[arg(short = 'd', long)]
        snapshot_dir: Option<PathBuf>,
    },
}

/// Flags of the `server` command. Each one overrides config and environment.
#[derive(clap::Args, Debug, Default)]
pub struct ServerArgs {
    /// Host to bind to and advertise
    #[arg(short = 'H', long)]
    pub host: Option<String>,

    /// Port to bind to (0 picks a free port)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Shared secret echoed to connectors
    #[arg(short, long)]
    pub secret: Option<String>,

    /// Organization address announced instead of host:port
    #[arg(long)]
    pub public_addr: Option<String>,

    /// Directory holding snapshots
    #[arg(short = 'd', long)]
    pub snapshot_dir: Option<PathBuf>,

    /// Snapshot to restore before serving
    #[arg(short, long)]
    pub load: Option<String>,
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub async fn execute(cli: Cli) -> Result<(), MinihullError> {
    let config = cli.config.as_deref();
    let json_mode = cli.json_mode;

    match cli.command {
        Some(Commands::Server(args)) => cmd_server(config, args).await,
        Some(Commands::Snapshots { snapshot_dir }) => {
            cmd_snapshots(config, snapshot_dir, json_mode)
        }
        None => {
            // No subcommand - serve with defaults
            cmd_server(config, ServerArgs::default()).await
        }
    }
}
