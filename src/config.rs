//! Configuration module for the gateway.
//!
//! Supports command-line arguments, a TOML configuration file and the
//! flat option list handed over by an embedding host (`PORT 6380`).
//! CLI arguments take precedence over config file values.

use crate::http::FailurePolicy;
use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Port used when neither the CLI, the config file nor the host names one.
pub const DEFAULT_PORT: u16 = 6380;

/// Number of worker threads serving requests.
pub const DEFAULT_WORKERS: usize = 64;

/// Content type sent with every successful response.
pub const DEFAULT_CONTENT_TYPE: &str = "image/jpeg";

/// Command-line arguments for the gateway
#[derive(Parser, Debug)]
#[command(name = "kv-http-gateway")]
#[command(author = "kv-http-gateway authors")]
#[command(version = "0.1.0")]
#[command(about = "Read-only HTTP access to an embedded key-value store", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 0.0.0.0)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Number of worker threads
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Maximum number of queued connections (unbounded when omitted)
    #[arg(long)]
    pub queue_capacity: Option<usize>,

    /// Socket read deadline in milliseconds
    #[arg(long)]
    pub read_timeout_ms: Option<u64>,

    /// Socket write deadline in milliseconds
    #[arg(long)]
    pub write_timeout_ms: Option<u64>,

    /// Answer failed requests with 400/404 instead of closing silently
    #[arg(long)]
    pub error_status: bool,

    /// Directory whose files are loaded into the store at startup
    #[arg(long)]
    pub preload: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_backlog")]
    pub backlog: i32,
    pub queue_capacity: Option<usize>,
    pub read_timeout_ms: Option<u64>,
    pub write_timeout_ms: Option<u64>,
    #[serde(default)]
    pub error_status: bool,
    #[serde(default = "default_content_type")]
    pub content_type: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            workers: default_workers(),
            backlog: default_backlog(),
            queue_capacity: None,
            read_timeout_ms: None,
            write_timeout_ms: None,
            error_status: false,
            content_type: default_content_type(),
        }
    }
}

/// Store-related configuration
#[derive(Debug, Deserialize)]
pub struct StoreSection {
    /// Directory preloaded into the store
    pub preload_dir: Option<PathBuf>,
    /// Interval for running expiration cleanup in seconds
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval: u64,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            preload_dir: None,
            cleanup_interval: default_cleanup_interval(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_workers() -> usize {
    DEFAULT_WORKERS
}

fn default_backlog() -> i32 {
    128
}

fn default_content_type() -> String {
    DEFAULT_CONTENT_TYPE.to_string()
}

fn default_cleanup_interval() -> u64 {
    60 // 60 seconds
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Socket deadline from milliseconds; zero means no deadline.
fn deadline(ms: Option<u64>) -> Option<Duration> {
    ms.filter(|&ms| ms > 0).map(Duration::from_millis)
}

/// Final resolved configuration, immutable once the gateway starts.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: usize,
    pub backlog: i32,
    pub queue_capacity: Option<usize>,
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
    pub failure_policy: FailurePolicy,
    pub content_type: String,
    pub preload_dir: Option<PathBuf>,
    pub cleanup_interval: Duration,
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default())
    }
}

impl ServerConfig {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_cli(CliArgs::parse())
    }

    fn from_cli(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        let mut config = Self::from_toml(toml_config);
        if let Some(host) = cli.host {
            config.host = host;
        }
        if let Some(port) = cli.port {
            config.port = port;
        }
        if let Some(workers) = cli.workers {
            config.workers = workers.max(1);
        }
        if cli.queue_capacity.is_some() {
            config.queue_capacity = cli.queue_capacity;
        }
        if cli.read_timeout_ms.is_some() {
            config.read_timeout = deadline(cli.read_timeout_ms);
        }
        if cli.write_timeout_ms.is_some() {
            config.write_timeout = deadline(cli.write_timeout_ms);
        }
        if cli.error_status {
            config.failure_policy = FailurePolicy::Status;
        }
        if cli.preload.is_some() {
            config.preload_dir = cli.preload;
        }
        if cli.log_level != "info" {
            config.log_level = cli.log_level;
        }
        Ok(config)
    }

    fn from_toml(toml_config: TomlConfig) -> Self {
        let server = toml_config.server;
        Self {
            host: server.host,
            port: server.port,
            workers: server.workers.max(1),
            backlog: server.backlog,
            queue_capacity: server.queue_capacity,
            read_timeout: deadline(server.read_timeout_ms),
            write_timeout: deadline(server.write_timeout_ms),
            failure_policy: if server.error_status {
                FailurePolicy::Status
            } else {
                FailurePolicy::Close
            },
            content_type: server.content_type,
            preload_dir: toml_config.store.preload_dir,
            cleanup_interval: Duration::from_secs(toml_config.store.cleanup_interval.max(1)),
            log_level: toml_config.logging.level,
        }
    }

    /// Build a configuration from the option list an embedding host passes
    /// at load time.
    ///
    /// Only `PORT <n>` is recognized. The name is matched case-insensitively
    /// and a value that is not a valid port leaves the default in place.
    pub fn from_module_args<S: AsRef<str>>(args: &[S]) -> Self {
        let mut config = Self::default();
        let port_idx = args
            .iter()
            .position(|arg| arg.as_ref().eq_ignore_ascii_case("PORT"));
        if let Some(value) = port_idx.and_then(|idx| args.get(idx + 1)) {
            if let Ok(port) = value.as_ref().trim().parse::<u16>() {
                config.port = port;
            }
        }
        config
    }

    /// Address string handed to the listener.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {1}", path = .0.display())]
    FileRead(PathBuf, #[source] std::io::Error),
    #[error("Failed to parse config file '{path}': {1}", path = .0.display())]
    TomlParse(PathBuf, #[source] toml::de::Error),
}
