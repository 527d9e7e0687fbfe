//! # CLI Command Implementations

use super::ServerArgs;
use crate::config::Config;
use crate::server::Minihull;
use crate::snapshots::SnapshotDir;
use minihull_core::MinihullError;
use std::path::{Path, PathBuf};

/// Layer CLI flags over the loaded configuration.
fn server_config(config: Option<&Path>, args: &ServerArgs) -> Result<Config, MinihullError> {
    let mut config = Config::load(config)?;
    if let Some(host) = &args.host {
        config.host = host.clone();
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(secret) = &args.secret {
        config.secret = secret.clone();
    }
    if let Some(addr) = &args.public_addr {
        config.public_addr = Some(addr.clone());
    }
    if let Some(dir) = &args.snapshot_dir {
        config.snapshot_dir = dir.clone();
    }
    Ok(config)
}

// =============================================================================
// SERVER COMMAND
// =============================================================================

/// Start the mock platform and serve until Ctrl+C.
pub async fn cmd_server(config: Option<&Path>, args: ServerArgs) -> Result<(), MinihullError> {
    let config = server_config(config, &args)?;
    let port = config.port;
    let snapshot_dir = config.snapshot_dir.clone();
    let minihull = Minihull::new(config);

    if let Some(name) = &args.load {
        minihull.load(name).await?;
    }

    let addr = minihull.listen(port).await?;

    println!("minihull mock platform starting...");
    println!();
    println!("Configuration:");
    println!("  Listening:    {}", addr);
    println!("  Organization: {}", minihull.org_addr());
    println!("  Snapshots:    {:?}", snapshot_dir);
    println!();
    println!("Endpoints:");
    println!("  GET  /api/v1/                 - Organization identity");
    println!("  GET  /api/v1/groups           - Group definitions");
    println!("  GET  /api/v1/subscribers/{{id}} - Subscriber settings");
    println!("  POST /api/v1/firehose         - Event sink");
    println!("  GET  /_batch                  - Entity dump (NDJSON)");
    println!("  POST /_ops/{{name}}             - Run an operation");
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| MinihullError::IoError(format!("Cannot listen for Ctrl+C: {}", e)))?;
    tracing::info!("Shutdown requested");
    minihull.close().await
}

// =============================================================================
// SNAPSHOTS COMMAND
// =============================================================================

/// List saved snapshot names.
pub fn cmd_snapshots(
    config: Option<&Path>,
    snapshot_dir: Option<PathBuf>,
    json_mode: bool,
) -> Result<(), MinihullError> {
    let dir = match snapshot_dir {
        Some(dir) => dir,
        None => Config::load(config)?.snapshot_dir,
    };
    let names = SnapshotDir::new(&dir).list()?;

    if json_mode {
        let output = serde_json::json!({
            "directory": dir.to_string_lossy(),
            "snapshots": names,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&output).unwrap_or_default()
        );
        return Ok(());
    }

    println!("Snapshots in {:?}", dir);
    if names.is_empty() {
        println!("  (none)");
    }
    for name in names {
        println!("  {}", name);
    }
    Ok(())
}
