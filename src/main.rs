use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::Level;

use ama_server::ServerConfig;
use ama_store::{Database, SqliteRoomStore};
use ama_telemetry::TelemetryConfig;

/// Real-time ask-me-anything room server.
#[derive(Debug, Parser)]
#[command(name = "ama", version)]
struct Cli {
    /// Address to bind.
    #[arg(long, env = "AMA_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Port to bind. 0 picks a free one.
    #[arg(long, env = "AMA_PORT", default_value_t = 8080)]
    port: u16,

    /// SQLite database file for rooms and messages.
    #[arg(long, env = "AMA_DB_PATH", default_value = "ama.db")]
    db_path: PathBuf,

    /// Allowed CORS origin. Repeat for several; none allows any http(s) origin.
    #[arg(long = "allowed-origin")]
    allowed_origins: Vec<String>,

    #[arg(long, env = "AMA_LOG_LEVEL", default_value_t = Level::INFO)]
    log_level: Level,

    /// Emit JSON log lines.
    #[arg(long, env = "AMA_LOG_JSON")]
    log_json: bool,

    /// Seconds to wait for in-flight work on shutdown.
    #[arg(long, default_value_t = 10)]
    shutdown_timeout_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    ama_telemetry::init_telemetry(&TelemetryConfig {
        log_level: cli.log_level,
        json: cli.log_json,
    })
    .context("failed to install tracing subscriber")?;

    tracing::info!("starting ama server");

    let db = Database::open(&cli.db_path)
        .with_context(|| format!("failed to open database {}", cli.db_path.display()))?;

    let config = ServerConfig {
        host: cli.host,
        port: cli.port,
        allowed_origins: cli.allowed_origins,
    };
    let handle = ama_server::start(config, Arc::new(SqliteRoomStore::new(db)))
        .await
        .context("failed to start server")?;

    tracing::info!(addr = %handle.addr(), "ama server ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;

    tracing::info!("shutting down");
    handle
        .shutdown(Some(Duration::from_secs(cli.shutdown_timeout_secs)))
        .await;
    Ok(())
}
