//! # umlsync Server
//!
//! Realtime relay that keeps PlantUML diagram text in sync between editors.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings (0.0.0.0:5001)
//! umlsync
//!
//! # Run with custom config
//! umlsync --config /path/to/umlsync.toml
//!
//! # Run with environment variables
//! UMLSYNC_PORT=8080 UMLSYNC_HOST=127.0.0.1 umlsync
//! ```

mod config;
mod handlers;
mod metrics;

use anyhow::{bail, Result};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "umlsync=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = match config_path()? {
        Some(path) => config::Config::load_layered(Some(&path))?,
        None => config::Config::load()?,
    };

    tracing::info!("Starting umlsync server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}

/// Read `--config <path>` from the command line.
fn config_path() -> Result<Option<PathBuf>> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => match args.next() {
                Some(path) => return Ok(Some(PathBuf::from(path))),
                None => bail!("--config requires a path"),
            },
            other => bail!("Unknown argument: {}", other),
        }
    }
    Ok(None)
}
