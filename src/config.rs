//! Configuration module for the nulkv server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// How connections reach the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// A single dispatcher task applies every command in arrival order
    #[default]
    Dispatcher,
    /// Connection tasks apply commands themselves under the store lock
    Direct,
}

/// Command-line arguments for the server
#[derive(Parser, Debug, Default)]
#[command(name = "nulkv")]
#[command(version = "0.1.0")]
#[command(about = "An in-memory key-value cache server", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., localhost:6666)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Maximum number of concurrent connections
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Idle read timeout in seconds (0 = wait forever)
    #[arg(long)]
    pub read_timeout: Option<u64>,

    /// Write timeout in seconds (0 = wait forever)
    #[arg(long)]
    pub write_timeout: Option<u64>,

    /// How commands are routed to the store
    #[arg(long, value_enum)]
    pub dispatch: Option<DispatchMode>,

    /// Capacity of the dispatcher's request queue
    #[arg(long)]
    pub queue_depth: Option<usize>,

    /// Number of worker threads (defaults to number of CPU cores)
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

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
    pub router: RouterConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Number of worker threads
    pub workers: Option<usize>,
    /// Maximum number of concurrent connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Idle read timeout in seconds
    #[serde(default = "default_read_timeout")]
    pub read_timeout: u64,
    /// Write timeout in seconds
    #[serde(default = "default_write_timeout")]
    pub write_timeout: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            workers: None,
            max_connections: default_max_connections(),
            read_timeout: default_read_timeout(),
            write_timeout: default_write_timeout(),
        }
    }
}

/// Router-related configuration
#[derive(Debug, Deserialize)]
pub struct RouterConfig {
    #[serde(default)]
    pub dispatch: DispatchMode,
    /// Capacity of the dispatcher's request queue
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            dispatch: DispatchMode::default(),
            queue_depth: default_queue_depth(),
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
    "localhost:6666".to_string()
}

fn default_max_connections() -> usize {
    10_000
}

fn default_read_timeout() -> u64 {
    300
}

fn default_write_timeout() -> u64 {
    30
}

fn default_queue_depth() -> usize {
    1024
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: String,
    pub workers: Option<usize>,
    pub max_connections: usize,
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
    pub dispatch: DispatchMode,
    pub queue_depth: usize,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::merge(CliArgs::default(), TomlConfig::default())
    }
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
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

        Ok(Self::merge(cli, toml_config))
    }

    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Self {
        Config {
            listen: cli.listen.unwrap_or(toml_config.server.listen),
            workers: cli.workers.or(toml_config.server.workers),
            max_connections: cli
                .max_connections
                .unwrap_or(toml_config.server.max_connections),
            read_timeout: seconds(cli.read_timeout.unwrap_or(toml_config.server.read_timeout)),
            write_timeout: seconds(
                cli.write_timeout
                    .unwrap_or(toml_config.server.write_timeout),
            ),
            dispatch: cli.dispatch.unwrap_or(toml_config.router.dispatch),
            queue_depth: cli.queue_depth.unwrap_or(toml_config.router.queue_depth),
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        }
    }
}

/// Zero disables the timeout
fn seconds(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
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
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.listen, "localhost:6666");
        assert_eq!(config.max_connections, 10_000);
        assert_eq!(config.read_timeout, Some(Duration::from_secs(300)));
        assert_eq!(config.write_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.dispatch, DispatchMode::Dispatcher);
        assert_eq!(config.queue_depth, 1024);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            listen = "0.0.0.0:7000"
            workers = 4
            max_connections = 64
            read_timeout = 0

            [router]
            dispatch = "direct"
            queue_depth = 8

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.listen, "0.0.0.0:7000");
        assert_eq!(config.server.workers, Some(4));
        assert_eq!(config.server.max_connections, 64);
        assert_eq!(config.server.read_timeout, 0);
        assert_eq!(config.server.write_timeout, 30);
        assert_eq!(config.router.dispatch, DispatchMode::Direct);
        assert_eq!(config.router.queue_depth, 8);
        assert_eq!(config.logging.level, "debug");

        let resolved = Config::merge(CliArgs::default(), config);
        assert_eq!(resolved.read_timeout, None);
    }

    #[test]
    fn test_cli_overrides_toml() {
        let cli = CliArgs::parse_from([
            "nulkv",
            "--listen",
            "127.0.0.1:9999",
            "--dispatch",
            "direct",
            "--log-level",
            "trace",
        ]);
        let toml_config: TomlConfig = toml::from_str(
            r#"
            [server]
            listen = "0.0.0.0:7000"

            [router]
            dispatch = "dispatcher"
        "#,
        )
        .unwrap();

        let config = Config::merge(cli, toml_config);
        assert_eq!(config.listen, "127.0.0.1:9999");
        assert_eq!(config.dispatch, DispatchMode::Direct);
        assert_eq!(config.log_level, "trace");
    }
}
