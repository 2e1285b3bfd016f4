//! Document commands against a stepsync server.

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};

use stepsync::config::{ClientConfig, Config};
use stepsync::lines::LineLog;
use stepsync_core::sync::{DocumentQuery, SubmitStepsResult};
use stepsync_core::{
    load_latest, transform, DocumentModel, HttpSyncApi, SyncApi, SyncError, SyncSession, Version,
};

use super::config_cmd::OutputFormat;

#[derive(Args)]
pub struct DocCommand {
    #[command(subcommand)]
    command: DocSubcommand,
}

#[derive(Subcommand)]
enum DocSubcommand {
    /// Create a document from its initial content
    Create {
        /// Document ID
        id: String,
        /// Initial content
        #[arg(long, conflicts_with = "file")]
        content: Option<String>,
        /// Read initial content from a file
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Show the nearest snapshot and the steps after it
    Get {
        /// Document ID
        id: String,
        /// Version to reconstruct (default: latest)
        #[arg(long)]
        version: Option<Version>,
        /// Only show the snapshot
        #[arg(long)]
        ignore_steps: bool,
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },
    /// Print the latest version
    Version {
        /// Document ID
        id: String,
    },
    /// List steps after a version
    Steps {
        /// Document ID
        id: String,
        /// Steps after this version
        #[arg(long, default_value_t = 0)]
        after: Version,
        /// Stop at this version
        #[arg(long)]
        target: Option<Version>,
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },
    /// Submit raw steps based on a version
    Push {
        /// Document ID
        id: String,
        /// Version the steps apply to
        #[arg(long)]
        base: Version,
        /// Steps, in order
        #[arg(required = true)]
        steps: Vec<String>,
    },
    /// Append lines to a line document, rebasing as needed
    Append {
        /// Document ID
        id: String,
        /// Lines to append
        #[arg(required = true)]
        lines: Vec<String>,
    },
    /// Print a line document
    Cat {
        /// Document ID
        id: String,
    },
    /// Edit a line document live: stdin lines are appended, remote lines printed
    Follow {
        /// Document ID
        id: String,
    },
    /// Print version changes as they happen
    Watch {
        /// Document ID
        id: String,
    },
    /// Delete a document (needs an admin key)
    Delete {
        /// Document ID
        id: String,
    },
    /// Show client configuration and server status
    Status,
}

/// Build a client from config, or explain how to configure one.
fn client(config: &ClientConfig) -> Result<HttpSyncApi, Box<dyn Error>> {
    match (&config.server_url.value, &config.api_key.value) {
        (Some(url), Some(key)) => Ok(HttpSyncApi::new(url.clone(), key.clone())),
        _ => Err("No server configured. Set client.server_url and client.api_key in the \
                  config file, or STEPSYNC_SERVER_URL and STEPSYNC_API_KEY"
            .into()),
    }
}

impl DocCommand {
    pub async fn run(&self, config: &Config) -> Result<(), Box<dyn Error>> {
        let api = || client(&config.client);
        match &self.command {
            DocSubcommand::Create { id, content, file } => {
                let api = api()?;
                let content = match (content, file) {
                    (Some(content), _) => content.clone(),
                    (None, Some(path)) => std::fs::read_to_string(path)?,
                    (None, None) => String::new(),
                };
                stepsync_core::create(&api, id, &content).await?;
                println!("Created {} at version {}", id, stepsync_core::INITIAL_VERSION);
            }
            DocSubcommand::Get {
                id,
                version,
                ignore_steps,
                format,
            } => {
                let api = api()?;
                let query = DocumentQuery {
                    version: *version,
                    ignore_steps: Some(*ignore_steps),
                };
                let doc = api.get_document(id, &query).await?;
                match format {
                    OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&doc)?),
                    OutputFormat::Text => match (&doc.content, doc.version) {
                        (Some(content), Some(version)) => {
                            println!("Version: {}", version);
                            let steps = doc.steps.unwrap_or_default();
                            let authors = doc.client_ids.unwrap_or_default();
                            println!("Steps after snapshot: {}", steps.len());
                            if doc.truncated {
                                println!("(history is longer; continue with `doc steps --after {}`)", version);
                            }
                            for (step, author) in steps.iter().zip(&authors) {
                                println!("  [{}] {}", author, step);
                            }
                            println!();
                            println!("{}", content);
                        }
                        _ => println!("Document '{}' has no snapshot.", id),
                    },
                }
            }
            DocSubcommand::Version { id } => match api()?.latest_version(id).await? {
                Some(version) => println!("{}", version),
                None => println!("Document '{}' not found.", id),
            },
            DocSubcommand::Steps {
                id,
                after,
                target,
                format,
            } => {
                let resp = api()?.get_steps(id, *after, *target).await?;
                match format {
                    OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&resp)?),
                    OutputFormat::Text => {
                        let mut version = *after;
                        for (step, author) in resp.steps.iter().zip(&resp.client_ids) {
                            version += 1;
                            println!("{:>8}  {:<20} {}", version, author.to_string(), step);
                        }
                        println!();
                        println!("Now at version {}", resp.version);
                        if resp.truncated {
                            println!("(more steps remain; continue with --after {})", resp.version);
                        }
                    }
                }
            }
            DocSubcommand::Push { id, base, steps } => {
                let client_id = config.client.client_id();
                match api()?.submit_steps(id, *base, &client_id, steps).await? {
                    SubmitStepsResult::Synced => {
                        println!("Synced: {} is now at version {}", id, base + steps.len() as Version)
                    }
                    SubmitStepsResult::NeedsRebase { steps, client_ids } => {
                        println!("Needs rebase: {} newer step(s)", steps.len());
                        for (step, author) in steps.iter().zip(&client_ids) {
                            println!("  [{}] {}", author, step);
                        }
                    }
                }
            }
            DocSubcommand::Append { id, lines } => {
                let client_id = config.client.client_id();
                let doc: LineLog = transform(&api()?, id, &client_id, |doc: &mut LineLog| {
                    lines.iter().try_for_each(|line| doc.append(line))
                })
                .await?;
                println!(
                    "Appended {} line(s); {} is at version {}",
                    lines.len(),
                    id,
                    doc.version()
                );
            }
            DocSubcommand::Cat { id } => {
                let doc: LineLog = load_latest(&api()?, id, &config.client.client_id()).await?;
                println!("{}", doc.text());
            }
            DocSubcommand::Follow { id } => follow(api()?, id, &config.client).await?,
            DocSubcommand::Watch { id } => {
                let mut versions = api()?.watch_version(id).await?;
                println!("Watching {} (Ctrl-C to stop)", id);
                loop {
                    match *versions.borrow_and_update() {
                        Some(version) => println!("version {}", version),
                        None => println!("(no document)"),
                    }
                    tokio::select! {
                        changed = versions.changed() => {
                            if changed.is_err() {
                                println!("Connection closed.");
                                break;
                            }
                        }
                        _ = tokio::signal::ctrl_c() => break,
                    }
                }
            }
            DocSubcommand::Delete { id } => {
                api()?.delete_document(id).await?;
                println!("Deleting {}", id);
            }
            DocSubcommand::Status => status(&config.client).await?,
        }
        Ok(())
    }
}

/// Live session: local lines go out, confirmed lines are printed as they land.
async fn follow(api: HttpSyncApi, id: &str, config: &ClientConfig) -> Result<(), Box<dyn Error>> {
    let api = Arc::new(api);
    let doc: LineLog = load_latest(&*api, id, &config.client_id()).await?;
    println!("{}", doc.text());
    let mut printed = doc.confirmed().len();

    let mut options = config.sync_options();
    options.on_sync_error = Some(Arc::new(|doc: &str, e: &SyncError| {
        eprintln!("Sync error on {}: {}", doc, e);
    }));
    let session = SyncSession::new(api.clone(), id, doc, options);
    session.start().await?;
    let mut versions = api.watch_version(id).await?;

    let mut input = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = input.next_line() => match line? {
                Some(line) => session.edit(|doc| doc.append(&line)).await??,
                None => break,
            },
            changed = versions.changed() => {
                if changed.is_err() {
                    break;
                }
                session.try_sync().await?;
            }
            _ = tokio::signal::ctrl_c() => break,
        }

        session.with_model(|doc| {
            for line in &doc.confirmed()[printed..] {
                println!("> {}", line);
            }
            printed = doc.confirmed().len();
        });
    }

    // Flush what is still unconfirmed before leaving.
    session.try_sync().await?;
    session.close();
    Ok(())
}

async fn status(config: &ClientConfig) -> Result<(), Box<dyn Error>> {
    println!("Client Configuration");
    println!("====================");
    println!();

    let api = match client(config) {
        Ok(api) => api,
        Err(_) => {
            println!("Status: Not configured");
            println!();
            println!("To connect to a server, add to your config file:");
            println!();
            println!("  client:");
            println!("    server_url: \"http://localhost:8080\"");
            println!("    api_key: \"your-api-key\"");
            println!();
            println!("Or set environment variables:");
            println!("  STEPSYNC_SERVER_URL");
            println!("  STEPSYNC_API_KEY");
            return Ok(());
        }
    };

    let key = api.api_key();
    println!("Server:    {}", api.server_url());
    println!("API Key:   {}...", key.chars().take(8).collect::<String>());
    match &config.client_id.value {
        Some(id) => println!("Client ID: {}", id),
        None => println!("Client ID: (random per run)"),
    }
    println!();

    match api.health().await {
        Ok(version) => println!("Server status: ✓ connected (server {})", version),
        Err(SyncError::Http(_)) => println!("Server status: ✗ unreachable"),
        Err(e) => println!("Server status: ✗ error: {}", e),
    }

    Ok(())
}
