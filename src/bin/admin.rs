//! stepsync Admin CLI
//!
//! Maintenance tool that works on the server database directly.
//!
//! # Usage
//!
//! ```bash
//! stepsync-admin inspect
//! stepsync-admin inspect notes
//! stepsync-admin prune snapshots notes --after 1 --before 40
//! stepsync-admin prune steps notes --older-than-hours 24
//! stepsync-admin prune document notes --yes
//! ```
//!
//! # Environment Variables
//!
//! - `STEPSYNC_DATABASE_PATH`: SQLite database used by the server
//! - `STEPSYNC_CONFIG`: Path to config file

use chrono::{DateTime, Duration, Utc};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use stepsync::config::Config;
use stepsync::db::init_db;
use stepsync::server::{PruneRequest, SyncBackend};
use stepsync_core::Version;

// ============================================================================
// CLI Structure
// ============================================================================

#[derive(Parser)]
#[command(name = "stepsync-admin")]
#[command(version)]
#[command(about = "stepsync server administration tool")]
struct Cli {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Database path (overrides config)
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Delete history no longer needed
    Prune(PruneCommand),
    /// Show stored documents, or one document's snapshots and steps
    Inspect {
        /// Document ID
        id: Option<String>,
    },
}

#[derive(Args)]
struct PruneCommand {
    #[command(subcommand)]
    command: PruneSubcommand,
}

#[derive(Subcommand)]
enum PruneSubcommand {
    /// Delete snapshots strictly between two versions
    Snapshots {
        /// Document ID
        id: String,
        /// Keep this version and everything below it
        #[arg(long)]
        after: Option<Version>,
        /// Keep this version and everything above it
        #[arg(long)]
        before: Option<Version>,
    },
    /// Delete old steps already covered by the latest snapshot
    Steps {
        /// Document ID
        id: String,
        /// Only steps older than this many hours
        #[arg(long, conflicts_with = "before_ts")]
        older_than_hours: Option<i64>,
        /// Only steps created before this time (ms since epoch)
        #[arg(long)]
        before_ts: Option<i64>,
        /// Only steps above this version
        #[arg(long)]
        after: Option<Version>,
        /// Also delete steps the latest snapshot does not cover
        #[arg(long)]
        include_unsnapshotted: bool,
    },
    /// Delete every snapshot and step of a document
    Document {
        /// Document ID
        id: String,
        /// Skip the confirmation check
        #[arg(long)]
        yes: bool,
    },
}

// ============================================================================
// Commands
// ============================================================================

async fn run_prune(
    backend: &SyncBackend,
    request: PruneRequest,
) -> Result<(), Box<dyn std::error::Error>> {
    let id = request.id().to_string();
    let mut next = Some(request);
    let mut total = 0;
    let mut batches = 0;

    while let Some(request) = next {
        let outcome = backend.prune_batch(&request).await?;
        total += outcome.deleted;
        batches += 1;
        if outcome.deleted > 0 {
            println!("  batch {}: deleted {} row(s)", batches, outcome.deleted);
        }
        next = outcome.next;
    }

    println!("Pruned {}: {} row(s) in {} batch(es)", id, total, batches);
    Ok(())
}

fn format_ts(ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| ms.to_string())
}

async fn list_documents(backend: &SyncBackend) -> Result<(), Box<dyn std::error::Error>> {
    let ids = backend.store().document_ids().await?;

    if ids.is_empty() {
        println!("No documents stored.");
        return Ok(());
    }

    println!("{:<40} {:<10} {:<10} {:<10}", "DOCUMENT", "VERSION", "SNAPSHOTS", "DELTAS");
    println!("{}", "-".repeat(72));

    for id in &ids {
        let latest = backend.latest_version(id).await?;
        let snapshots = backend.store().snapshot_versions(id).await?;
        let stats = backend.store().delta_stats(id).await?;
        println!(
            "{:<40} {:<10} {:<10} {:<10}",
            id,
            latest.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string()),
            snapshots.len(),
            stats.deltas
        );
    }

    println!();
    println!("Total: {} document(s)", ids.len());

    Ok(())
}

async fn inspect_document(
    backend: &SyncBackend,
    id: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let Some(latest) = backend.latest_version(id).await? else {
        eprintln!("Error: Document '{}' not found", id);
        std::process::exit(1);
    };

    println!("Document: {}", id);
    println!("  Latest version: {}", latest);
    println!();

    let snapshots = backend.store().snapshot_versions(id).await?;
    println!("Snapshots ({}):", snapshots.len());
    for snapshot in &snapshots {
        println!(
            "  v{:<8} {:>10} bytes  {}",
            snapshot.version,
            snapshot.size,
            format_ts(snapshot.created_at)
        );
    }
    println!();

    let stats = backend.store().delta_stats(id).await?;
    println!("Deltas: {} ({} steps)", stats.deltas, stats.steps);
    if let (Some(min), Some(max)) = (stats.min_version, stats.max_version) {
        println!("  Versions: {}..={}", min, max);
    }
    if let (Some(oldest), Some(newest)) = (stats.oldest_created_at, stats.newest_created_at) {
        println!("  Written: {} .. {}", format_ts(oldest), format_ts(newest));
    }

    Ok(())
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = Config::load(cli.config)?;
    let database = cli.database.unwrap_or(config.server.database_path.value.clone());
    if !database.exists() {
        return Err(format!("Database '{}' does not exist", database.display()).into());
    }

    let pool = init_db(&database).await?;
    let backend = SyncBackend::new(pool, config.server.backend_options());

    match cli.command {
        Commands::Inspect { id: None } => list_documents(&backend).await,
        Commands::Inspect { id: Some(id) } => inspect_document(&backend, &id).await,
        Commands::Prune(prune) => {
            let request = match prune.command {
                PruneSubcommand::Snapshots { id, after, before } => PruneRequest::Snapshots {
                    id,
                    after_version: after,
                    before_version: before,
                },
                PruneSubcommand::Steps {
                    id,
                    older_than_hours,
                    before_ts,
                    after,
                    include_unsnapshotted,
                } => {
                    let before_ts = match (before_ts, older_than_hours) {
                        (Some(ts), _) => ts,
                        (None, Some(hours)) => (Utc::now() - Duration::hours(hours)).timestamp_millis(),
                        (None, None) => Utc::now().timestamp_millis(),
                    };
                    PruneRequest::Steps {
                        id,
                        before_ts,
                        after_version: after,
                        delete_newer_than_latest_snapshot: include_unsnapshotted,
                    }
                }
                PruneSubcommand::Document { id, yes } => {
                    if !yes {
                        return Err(format!(
                            "Refusing to delete '{}' without --yes",
                            id
                        )
                        .into());
                    }
                    PruneRequest::Document { id }
                }
            };
            run_prune(&backend, request).await
        }
    }
}
