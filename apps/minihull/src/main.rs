//! # minihull - Mock Platform Server
//!
//! ## Usage
//!
//! ```bash
//! # Start on the default port (8001)
//! minihull server
//!
//! # Pick a free port, custom secret, restore a snapshot
//! minihull server --port 0 --secret s3cr3t --load seeded
//!
//! # List snapshots
//! minihull snapshots --json-mode
//! ```

use clap::Parser;
use minihull::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

#[tokio::main]
async fn main() {
    // MINIHULL_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("MINIHULL_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "minihull=info,tower_http=debug".into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    let cli = cli::Cli::parse();

    if !cli.quiet && !cli.json_mode {
        print_banner();
    }

    if let Err(e) = cli::execute(cli).await {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Print the startup banner.
fn print_banner() {
    println!(
        r#"
  ┌┬┐┬┌┐┌┬┬ ┬┬ ┬┬  ┬
  │││││││││├─┤│ ││  │
  ┴ ┴┴┘└┘┴┴ ┴└─┘┴─┘┴─┘

  Mock Platform v{}
"#,
        env!("CARGO_PKG_VERSION")
    );
}
