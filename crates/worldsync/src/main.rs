//! WorldSync server binary.
//!
//! Wires the shared world into the HTTP + `WebSocket` server and runs until
//! `Ctrl-C`.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `worldsync.yaml` (defaults if absent)
//! 2. Initialize structured logging (tracing)
//! 3. Create the shared world
//! 4. Serve until `Ctrl-C`, then close every session and drain

mod error;

use std::path::Path;
use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;
use worldsync_core::WorldStore;
use worldsync_core::config::{LogFormat, LoggingConfig, WorldSyncConfig};
use worldsync_server::{AppState, ServerConfig};

use crate::error::AppError;

/// Configuration file looked up in the working directory.
const CONFIG_PATH: &str = "worldsync.yaml";

/// Application entry point.
///
/// # Errors
///
/// Returns an error if configuration is invalid or the server cannot run.
#[tokio::main]
async fn main() -> Result<(), AppError> {
    // 1. Load configuration. Logging is not up yet, so remember whether
    //    the file was found and report it afterwards.
    let config_path = Path::new(CONFIG_PATH);
    let from_file = config_path.exists();
    let config = if from_file {
        WorldSyncConfig::from_file(config_path)?
    } else {
        WorldSyncConfig::from_env()?
    };

    // 2. Initialize structured logging.
    init_tracing(&config.logging)?;
    info!(
        config_file = from_file.then_some(CONFIG_PATH),
        host = config.server.host,
        port = config.server.port,
        "worldsync starting"
    );

    // 3. Create the shared world.
    let world = Arc::new(WorldStore::new());
    let state = Arc::new(AppState::with_world(Arc::clone(&world)));

    // 4. Serve.
    let server_config = ServerConfig {
        host: config.server.host,
        port: config.server.port,
        static_dir: config.server.static_dir,
    };
    worldsync_server::start_server(&server_config, state, worldsync_server::ctrl_c()).await?;

    info!(
        entities = world.entity_count(),
        "worldsync shutdown complete"
    );
    Ok(())
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise the configured level is used.
fn init_tracing(logging: &LoggingConfig) -> Result<(), AppError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&logging.level).map_err(|e| AppError::LogFilter {
            filter: logging.level.clone(),
            message: e.to_string(),
        })?,
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    match logging.format {
        LogFormat::Pretty => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
    Ok(())
}
