//! Operator binary for the DCB event store.
//!
//! # Startup Sequence
//!
//! 1. Initialize structured logging (tracing)
//! 2. Parse the command line
//! 3. Load configuration from `$DCB_CONFIG` or `dcb-config.yaml`
//! 4. Connect to `PostgreSQL` and apply migrations
//! 5. Run the command, then close the pool

mod command;

use std::path::PathBuf;

use clap::Parser;
use dcb_store::{DcbConfig, EventStore, PostgresPool};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::command::Cli;

/// Default configuration file, relative to the working directory.
const DEFAULT_CONFIG_PATH: &str = "dcb-config.yaml";

/// Application entry point.
///
/// # Errors
///
/// Returns an error if configuration, connection, migration, or the
/// command itself fails.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries command output.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = load_config()?;
    info!(
        max_connections = config.database.max_connections,
        max_batch_size = config.store.max_batch_size,
        max_concurrent_projections = config.store.max_concurrent_projections,
        "Configuration loaded"
    );

    let pool = PostgresPool::connect(&config.database).await?;
    pool.run_migrations().await?;

    let store = EventStore::new(pool.clone(), config.store)?;
    let mut stdout = std::io::stdout().lock();
    let result = cli.command.run(&store, &mut stdout).await;

    pool.close().await;
    result
}

/// Load configuration, falling back to defaults when no file exists.
///
/// `DCB_CONFIG` names the file; otherwise `dcb-config.yaml` is tried.
fn load_config() -> anyhow::Result<DcbConfig> {
    let path = std::env::var_os("DCB_CONFIG")
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);
    if path.exists() {
        Ok(DcbConfig::from_file(&path)?)
    } else {
        info!(path = %path.display(), "Config file not found, using defaults");
        // An empty document still picks up DATABASE_URL.
        Ok(DcbConfig::parse("")?)
    }
}
