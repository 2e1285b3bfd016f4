use std::fmt::Display;

use clap::{Args, Subcommand, ValueEnum};

use stepsync::config::{Config, ConfigValue};

#[derive(Clone, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Args)]
pub struct ConfigCommand {
    #[command(subcommand)]
    pub command: ConfigSubcommand,
}

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Show current configuration values
    Show {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

fn show<T: Display>(name: &str, value: &ConfigValue<T>) {
    println!("{}: {}", name, value.value);
    println!("  source: {}", value.source);
}

fn show_optional(name: &str, value: &ConfigValue<Option<String>>, secret: bool) {
    match &value.value {
        Some(_) if secret => println!("{}: <set>", name),
        Some(v) => println!("{}: {}", name, v),
        None => println!("{}: (not set)", name),
    }
    println!("  source: {}", value.source);
}

impl ConfigCommand {
    pub fn run(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            ConfigSubcommand::Show { format } => {
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(config)?);
                    }
                    OutputFormat::Text => {
                        println!("Configuration");
                        println!("=============\n");

                        if let Some(path) = &config.config_file {
                            println!("Config file: {}", path.display());
                        } else {
                            println!(
                                "Config file: {} (not found)",
                                Config::default_config_path().display()
                            );
                        }
                        println!();

                        let server = &config.server;
                        println!("[server]");
                        show("port", &server.port);
                        println!(
                            "database_path: {}",
                            server.database_path.value.display()
                        );
                        println!("  source: {}", server.database_path.source);
                        show("prune_snapshots", &server.prune_snapshots);
                        show("scan_limit", &server.scan_limit);
                        show("prune_batch", &server.prune_batch);
                        println!("api_keys: {}", server.api_keys.len());
                        for entry in &server.api_keys {
                            println!("  - {} ({})", entry.name, entry.access);
                        }
                        println!();

                        let client = &config.client;
                        println!("[client]");
                        show_optional("server_url", &client.server_url, false);
                        show_optional("api_key", &client.api_key, true);
                        show_optional("client_id", &client.client_id, false);
                        show("snapshot_debounce_ms", &client.snapshot_debounce_ms);
                    }
                }
                Ok(())
            }
        }
    }
}
