//! oedb server binary.
//!
//! This is the main entry point that wires together the storage layer and
//! the HTTP API. It loads configuration, connects to `PostgreSQL`, runs
//! migrations, and serves requests until the process is terminated.
//!
//! # Startup Sequence
//!
//! 1. Initialize structured logging (tracing)
//! 2. Load configuration from `oedb.yaml` (env overrides apply)
//! 3. Connect the `PostgreSQL` pool
//! 4. Run pending migrations
//! 5. Serve the HTTP API

mod config;
mod error;

use std::path::Path;
use std::sync::Arc;

use oedb_api::{start_server, AppState, ServerConfig};
use oedb_db::{PostgresConfig, PostgresPool};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::ServiceConfig;
use crate::error::ServerError;

/// Configuration file looked up relative to the working directory.
const CONFIG_PATH: &str = "oedb.yaml";

/// Application entry point for the oedb server.
///
/// # Errors
///
/// Returns an error if any initialization step or the server itself fails.
#[tokio::main]
async fn main() -> Result<(), ServerError> {
    // 1. Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    info!("oedb-server starting");

    // 2. Load configuration.
    let config = ServiceConfig::from_file(Path::new(CONFIG_PATH))?;
    info!(
        host = config.http.host,
        port = config.http.port,
        max_connections = config.database.max_connections,
        "Configuration loaded"
    );

    // 3. Connect the PostgreSQL pool.
    let pg_config = PostgresConfig::new(&config.database.url)
        .with_max_connections(config.database.max_connections);
    let pool = PostgresPool::connect(&pg_config).await?;

    // 4. Run pending migrations.
    pool.run_migrations().await?;

    // 5. Serve the HTTP API.
    let state = Arc::new(AppState::new(pool));
    let server_config = ServerConfig {
        host: config.http.host.clone(),
        port: config.http.port,
    };
    start_server(&server_config, state).await?;

    Ok(())
}
