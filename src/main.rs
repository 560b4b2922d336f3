//! wardend - fleet moderation daemon.
//!
//! Observer mode: connects to the shared database, joins the notification
//! fan-out, and serves metrics. Useful for watching moderation traffic on
//! a fleet without hosting players.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use wardend::ban::RoleRegistry;
use wardend::config::Config;
use wardend::db::Database;
use wardend::enforce::{self, EngineOptions};
use wardend::notify::PgNotifyBus;
use wardend::{http, metrics};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());

    let config = Config::load(&config_path).map_err(|e| {
        error!(path = %config_path, error = %e, "Failed to load config");
        e
    })?;

    info!(server = %config.server.name, "Starting wardend");

    // Prometheus metrics are optional.
    // Convention: no metrics port configured disables the HTTP endpoint.
    match config.metrics.port {
        Some(port) if port != 0 => {
            metrics::init();
            tokio::spawn(async move {
                http::run_http_server(port).await;
            });
            info!(port = port, "Prometheus HTTP server started");
        }
        _ => info!("Metrics disabled"),
    }

    // Initialize database
    let db = Database::connect(&config.database.url, config.database.max_connections).await?;

    let bus = Arc::new(PgNotifyBus::new(db.pool().clone()));
    let roles = RoleRegistry::from_ids(config.roles.iter().cloned());

    let shutdown = CancellationToken::new();
    let handle = enforce::start(
        EngineOptions::from_config(&config),
        Arc::new(db),
        bus,
        roles,
        shutdown.clone(),
    )
    .await?;

    info!(server_id = handle.local_server_id(), "Moderation engine running");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    shutdown.cancel();

    Ok(())
}
