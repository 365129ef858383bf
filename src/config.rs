//! Configuration module for the chat server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use crate::protocol::DEFAULT_MAX_HEADER_BYTES;
use crate::render::DEFAULT_TITLE;
use crate::storage::DEFAULT_CAPACITY;
use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Command-line arguments for the chat server
#[derive(Parser, Debug)]
#[command(name = "chat-relay")]
#[command(author = "chat-relay authors")]
#[command(version = "0.1.0")]
#[command(about = "A tiny polling chat server", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 0.0.0.0:80)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Number of chat messages kept in memory
    #[arg(short = 'n', long)]
    pub capacity: Option<usize>,

    /// How long to wait for a request head or body, in milliseconds
    #[arg(long)]
    pub read_timeout_ms: Option<u64>,

    /// Listen backlog for connections waiting to be served
    #[arg(long)]
    pub backlog: Option<u32>,

    /// Title shown on the chat page
    #[arg(long)]
    pub title: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Listen backlog
    #[serde(default = "default_backlog")]
    pub backlog: u32,
    /// Read timeout for request head and body
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// Largest request head accepted
    #[serde(default = "default_max_header_bytes")]
    pub max_header_bytes: usize,
    /// Largest POST body accepted
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            backlog: default_backlog(),
            read_timeout_ms: default_read_timeout_ms(),
            max_header_bytes: default_max_header_bytes(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

/// Chat-related configuration
#[derive(Debug, Deserialize)]
pub struct ChatConfig {
    /// Number of messages kept
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Page title
    #[serde(default = "default_title")]
    pub title: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            title: default_title(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:80".to_string()
}

fn default_backlog() -> u32 {
    16
}

fn default_read_timeout_ms() -> u64 {
    5000
}

fn default_max_header_bytes() -> usize {
    DEFAULT_MAX_HEADER_BYTES
}

fn default_max_body_bytes() -> usize {
    64 * 1024 // 64 KB
}

fn default_capacity() -> usize {
    DEFAULT_CAPACITY
}

fn default_title() -> String {
    DEFAULT_TITLE.to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: String,
    pub backlog: u32,
    pub read_timeout: Duration,
    pub max_header_bytes: usize,
    pub max_body_bytes: usize,
    pub capacity: usize,
    pub title: String,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Self::merge(cli, toml_config)
    }

    /// Merge CLI args over TOML values and validate the result.
    pub fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let config = Config {
            listen: cli.listen.unwrap_or(toml_config.server.listen),
            backlog: cli.backlog.unwrap_or(toml_config.server.backlog),
            read_timeout: Duration::from_millis(
                cli.read_timeout_ms
                    .unwrap_or(toml_config.server.read_timeout_ms),
            ),
            max_header_bytes: toml_config.server.max_header_bytes,
            max_body_bytes: toml_config.server.max_body_bytes,
            capacity: cli.capacity.unwrap_or(toml_config.chat.capacity),
            title: cli.title.unwrap_or(toml_config.chat.title),
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        };

        if config.capacity == 0 {
            return Err(ConfigError::Invalid("capacity must be at least 1".to_string()));
        }
        if config.read_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "read_timeout_ms must be greater than 0".to_string(),
            ));
        }

        Ok(config)
    }
}

impl Default for Config {
    fn default() -> Self {
        let toml_config = TomlConfig::default();
        Config {
            listen: toml_config.server.listen,
            backlog: toml_config.server.backlog,
            read_timeout: Duration::from_millis(toml_config.server.read_timeout_ms),
            max_header_bytes: toml_config.server.max_header_bytes,
            max_body_bytes: toml_config.server.max_body_bytes,
            capacity: toml_config.chat.capacity,
            title: toml_config.chat.title,
            log_level: toml_config.logging.level,
        }
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}
