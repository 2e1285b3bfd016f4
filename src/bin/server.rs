//! stepsync server
//!
//! Serves the step-log sync protocol over HTTP, with a WebSocket per
//! document for version notifications.
//!
//! # Configuration
//!
//! Environment variables:
//! - `STEPSYNC_PORT`: Port to listen on (default: 8080)
//! - `STEPSYNC_DATABASE_PATH`: SQLite database (default: ~/.local/share/stepsync/stepsync.db)
//! - `STEPSYNC_CONFIG`: Path to config file (default: ~/.config/stepsync/config.yaml)
//!
//! # Config File Format
//!
//! ```yaml
//! server:
//!   port: 8080
//!   prune_snapshots: true
//!   api_keys:
//!     - key: "your-secret-key-here"
//!       name: "editor"
//!       access: write
//!     - key: "another-key"
//!       name: "ops"
//!       access: admin
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stepsync::config::Config;
use stepsync::db::init_db;
use stepsync::server::{router, ApiKeyStore, AppState, SyncBackend};

#[derive(Parser)]
#[command(name = "stepsync-server")]
#[command(version)]
#[command(about = "stepsync document sync server")]
struct Cli {
    /// Path to config file
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(long, short)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stepsync=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run().await {
        tracing::error!("{}", e);
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config)?;
    let server = config.server;

    match &config.config_file {
        Some(path) => tracing::info!("Config file: {}", path.display()),
        None => tracing::info!("No config file found, using defaults"),
    }
    tracing::info!(
        "Database: {} ({})",
        server.database_path.value.display(),
        server.database_path.source
    );

    let pool = init_db(&server.database_path.value).await?;
    let backend = SyncBackend::new(pool, server.backend_options());

    // Build app state
    let state = AppState {
        backend,
        api_keys: Arc::new(ApiKeyStore::new(&server.api_keys)),
    };

    let app = router(state);

    // Start server
    let port = cli.port.unwrap_or(server.port.value);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
