use serde::{Deserialize, Serialize, Serializer};
use std::path::{Path, PathBuf};
use std::time::Duration;

use stepsync_core::{ClientId, SyncOptions};

use crate::server::BackendOptions;

/// Source of a configuration value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    Default,
    File,
    Environment,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Default => write!(f, "default"),
            ConfigSource::File => write!(f, "file"),
            ConfigSource::Environment => write!(f, "environment"),
        }
    }
}

/// A configuration value with its source
#[derive(Debug, Clone, Serialize)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

impl<T> ConfigValue<T> {
    pub fn new(value: T, source: ConfigSource) -> Self {
        Self { value, source }
    }

    fn set(&mut self, value: T, source: ConfigSource) {
        self.value = value;
        self.source = source;
    }
}

/// What an API key may do. Ordered: each level includes the ones below.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Access {
    #[default]
    Read,
    Write,
    Admin,
}

impl std::fmt::Display for Access {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Access::Read => write!(f, "read"),
            Access::Write => write!(f, "write"),
            Access::Admin => write!(f, "admin"),
        }
    }
}

/// API key entry in the server section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyEntry {
    #[serde(serialize_with = "redact")]
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub access: Access,
}

fn redact<S: Serializer>(_: &str, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str("<redacted>")
}

fn redact_option<S: Serializer>(
    value: &ConfigValue<Option<String>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    ConfigValue::new(
        value.value.as_ref().map(|_| "<redacted>"),
        value.source.clone(),
    )
    .serialize(serializer)
}

/// Server settings
#[derive(Debug, Clone, Serialize)]
pub struct ServerConfig {
    pub port: ConfigValue<u16>,
    /// Path to the SQLite database
    pub database_path: ConfigValue<PathBuf>,
    /// Drop intermediate snapshots on every snapshot write
    pub prune_snapshots: ConfigValue<bool>,
    /// Most deltas scanned per submission or query
    pub scan_limit: ConfigValue<usize>,
    /// Most rows removed per pruning batch
    pub prune_batch: ConfigValue<usize>,
    pub api_keys: Vec<ApiKeyEntry>,
}

impl ServerConfig {
    pub fn backend_options(&self) -> BackendOptions {
        BackendOptions {
            prune_snapshots: self.prune_snapshots.value,
            scan_limit: self.scan_limit.value,
            prune_batch: self.prune_batch.value,
        }
    }
}

/// Client settings
#[derive(Debug, Clone, Serialize)]
pub struct ClientConfig {
    /// Server URL (e.g., "http://localhost:8080")
    pub server_url: ConfigValue<Option<String>>,
    /// API key for authentication
    #[serde(serialize_with = "redact_option")]
    pub api_key: ConfigValue<Option<String>>,
    /// Fixed client ID; a random one is used per run if unset
    pub client_id: ConfigValue<Option<String>>,
    pub snapshot_debounce_ms: ConfigValue<u64>,
}

impl ClientConfig {
    /// Returns true if a server is configured (has both server_url and api_key)
    pub fn is_configured(&self) -> bool {
        self.server_url.value.is_some() && self.api_key.value.is_some()
    }

    pub fn client_id(&self) -> ClientId {
        match &self.client_id.value {
            Some(id) => ClientId::from(id.as_str()),
            None => ClientId::random(),
        }
    }

    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            snapshot_debounce: Duration::from_millis(self.snapshot_debounce_ms.value),
            ..Default::default()
        }
    }
}

/// Application configuration with source tracking
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub client: ClientConfig,
    /// Config file path used (if any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_file: Option<PathBuf>,
}

/// Internal structs for deserializing the config file
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ConfigFile {
    server: ServerFile,
    client: ClientFile,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ServerFile {
    port: Option<u16>,
    database_path: Option<PathBuf>,
    prune_snapshots: Option<bool>,
    scan_limit: Option<usize>,
    prune_batch: Option<usize>,
    api_keys: Vec<ApiKeyEntry>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ClientFile {
    server_url: Option<String>,
    api_key: Option<String>,
    client_id: Option<String>,
    snapshot_debounce_ms: Option<u64>,
}

impl Config {
    /// Load configuration with priority: env vars > config file > defaults
    ///
    /// Without an explicit path, `STEPSYNC_CONFIG` and then the default
    /// location are tried.
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let path = config_path
            .or_else(|| std::env::var("STEPSYNC_CONFIG").ok().map(PathBuf::from))
            .unwrap_or_else(Self::default_config_path);
        Self::load_with(&path, |name| std::env::var(name).ok())
    }

    fn load_with(
        path: &Path,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let defaults = BackendOptions::default();

        // Start with defaults
        let mut server = ServerConfig {
            port: ConfigValue::new(8080, ConfigSource::Default),
            database_path: ConfigValue::new(
                Self::default_data_dir().join("stepsync.db"),
                ConfigSource::Default,
            ),
            prune_snapshots: ConfigValue::new(defaults.prune_snapshots, ConfigSource::Default),
            scan_limit: ConfigValue::new(defaults.scan_limit, ConfigSource::Default),
            prune_batch: ConfigValue::new(defaults.prune_batch, ConfigSource::Default),
            api_keys: Vec::new(),
        };
        let mut client = ClientConfig {
            server_url: ConfigValue::new(None, ConfigSource::Default),
            api_key: ConfigValue::new(None, ConfigSource::Default),
            client_id: ConfigValue::new(None, ConfigSource::Default),
            snapshot_debounce_ms: ConfigValue::new(
                SyncOptions::default().snapshot_debounce.as_millis() as u64,
                ConfigSource::Default,
            ),
        };
        let mut config_file = None;

        // Try to load from config file
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::ReadError(path.to_path_buf(), e))?;
            let file: ConfigFile = serde_yaml::from_str(&contents)
                .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e))?;

            config_file = Some(path.to_path_buf());

            let file_server = file.server;
            if let Some(port) = file_server.port {
                server.port.set(port, ConfigSource::File);
            }
            if let Some(db_path) = file_server.database_path {
                // Resolve relative paths against config file's directory
                let resolved_path = if db_path.is_relative() {
                    path.parent().map(|p| p.join(&db_path)).unwrap_or(db_path)
                } else {
                    db_path
                };
                server.database_path.set(resolved_path, ConfigSource::File);
            }
            if let Some(prune) = file_server.prune_snapshots {
                server.prune_snapshots.set(prune, ConfigSource::File);
            }
            if let Some(limit) = file_server.scan_limit {
                server.scan_limit.set(limit.max(1), ConfigSource::File);
            }
            if let Some(batch) = file_server.prune_batch {
                server.prune_batch.set(batch.max(1), ConfigSource::File);
            }
            server.api_keys = file_server.api_keys;

            let file_client = file.client;
            if let Some(url) = file_client.server_url {
                client.server_url.set(Some(url), ConfigSource::File);
            }
            if let Some(key) = file_client.api_key {
                client.api_key.set(Some(key), ConfigSource::File);
            }
            if let Some(id) = file_client.client_id {
                client.client_id.set(Some(id), ConfigSource::File);
            }
            if let Some(ms) = file_client.snapshot_debounce_ms {
                client.snapshot_debounce_ms.set(ms, ConfigSource::File);
            }
        }

        // Apply environment variable overrides
        if let Some(port) = env("STEPSYNC_PORT") {
            let parsed = port
                .parse()
                .map_err(|_| ConfigError::InvalidEnv("STEPSYNC_PORT", port))?;
            server.port.set(parsed, ConfigSource::Environment);
        }
        if let Some(db_path) = env("STEPSYNC_DATABASE_PATH") {
            server
                .database_path
                .set(PathBuf::from(db_path), ConfigSource::Environment);
        }
        if let Some(url) = env("STEPSYNC_SERVER_URL") {
            client.server_url.set(Some(url), ConfigSource::Environment);
        }
        if let Some(key) = env("STEPSYNC_API_KEY") {
            client.api_key.set(Some(key), ConfigSource::Environment);
        }
        if let Some(id) = env("STEPSYNC_CLIENT_ID") {
            client.client_id.set(Some(id), ConfigSource::Environment);
        }

        Ok(Self {
            server,
            client,
            config_file,
        })
    }

    /// Default config directory (platform-specific):
    /// - Linux: ~/.config/stepsync/
    /// - macOS: ~/Library/Application Support/stepsync/
    /// - Windows: %APPDATA%/stepsync/
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("stepsync")
    }

    /// Default data directory (platform-specific):
    /// - Linux: ~/.local/share/stepsync/
    /// - macOS: ~/Library/Application Support/stepsync/
    /// - Windows: %APPDATA%/stepsync/
    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("stepsync")
    }

    /// Default config file path (platform-specific config dir + config.yaml)
    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join("config.yaml")
    }
}

#[derive(Debug)]
pub enum ConfigError {
    ReadError(PathBuf, std::io::Error),
    ParseError(PathBuf, serde_yaml::Error),
    InvalidEnv(&'static str, String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ReadError(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::InvalidEnv(name, value) => {
                write!(f, "Invalid value for {}: '{}'", name, value)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
