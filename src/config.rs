//! Configuration module for echo-reactor.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

/// Service variant to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// HTTP/1.1 echo over TCP
    #[default]
    Http,
    /// Datagram echo over UDP
    Udp,
    /// Byte echo over a Unix-domain stream socket
    Unix,
}

impl Transport {
    /// Port used when none is configured.
    ///
    /// Unix sockets are addressed by `sock` alone; host and port are
    /// unused there and simply mirror the UDP defaults.
    pub fn default_port(self) -> u16 {
        match self {
            Transport::Http => 9080,
            Transport::Udp | Transport::Unix => 9000,
        }
    }

    /// Bind host used when none is configured.
    pub fn default_host(self) -> &'static str {
        match self {
            Transport::Http => "127.0.0.1",
            Transport::Udp | Transport::Unix => "0.0.0.0",
        }
    }

    /// Whether to run one worker per core when not configured.
    pub fn default_multicore(self) -> bool {
        matches!(self, Transport::Http)
    }
}

/// Command-line arguments for the echo server
#[derive(Parser, Debug)]
#[command(name = "echo-reactor")]
#[command(author = "echo-reactor authors")]
#[command(version = "0.1.0")]
#[command(about = "Pipelined HTTP, UDP and Unix-socket echo server", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Service variant
    #[arg(long, value_enum)]
    pub transport: Option<Transport>,

    /// Address to bind to (http and udp)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on (http and udp)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Unix socket path
    #[arg(long)]
    pub sock: Option<PathBuf>,

    /// Run one worker per CPU core
    #[arg(long, action = clap::ArgAction::Set)]
    pub multicore: Option<bool>,

    /// Set SO_REUSEPORT on UDP sockets, one socket per worker
    #[arg(long, action = clap::ArgAction::Set)]
    pub reuseport: Option<bool>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize, Default)]
pub struct ServerConfig {
    #[serde(default)]
    pub transport: Transport,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub sock: Option<PathBuf>,
    pub multicore: Option<bool>,
    #[serde(default)]
    pub reuseport: bool,
}

/// Per-connection limits
#[derive(Debug, Deserialize)]
pub struct ConnectionConfig {
    /// Bytes read from a socket per read call
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Largest amount of unanswered input kept for one connection
    #[serde(default = "default_max_request_size")]
    pub max_request_size: usize,
    /// Connections per worker
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Readiness events handled per poll
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            max_request_size: default_max_request_size(),
            max_connections: default_max_connections(),
            batch_size: default_batch_size(),
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

fn default_buffer_size() -> usize {
    16 * 1024 // 16 KB
}

fn default_max_request_size() -> usize {
    16 * 1024 * 1024 // 16 MB
}

fn default_max_connections() -> usize {
    10_000
}

fn default_batch_size() -> usize {
    1024
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_sock() -> PathBuf {
    PathBuf::from("echo.sock")
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub transport: Transport,
    pub host: String,
    pub port: u16,
    pub sock: PathBuf,
    pub multicore: bool,
    pub reuseport: bool,
    pub buffer_size: usize,
    pub max_request_size: usize,
    pub max_connections: usize,
    pub batch_size: usize,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::merge(
            CliArgs::parse_from(["echo-reactor"]),
            TomlConfig::default(),
        )
    }
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|source| ConfigError::FileRead {
                    path: config_path.clone(),
                    source,
                })?;
            toml::from_str(&contents)
                .map_err(|source| ConfigError::TomlParse {
                    path: config_path.clone(),
                    source,
                })?
        } else {
            TomlConfig::default()
        };

        Ok(Self::merge(cli, toml_config))
    }

    /// Merge CLI args with TOML config (CLI takes precedence).
    pub fn merge(cli: CliArgs, toml_config: TomlConfig) -> Self {
        let server = toml_config.server;
        let transport = cli.transport.unwrap_or(server.transport);

        Config {
            transport,
            host: cli
                .host
                .or(server.host)
                .unwrap_or_else(|| transport.default_host().to_string()),
            port: cli
                .port
                .or(server.port)
                .unwrap_or_else(|| transport.default_port()),
            sock: cli.sock.or(server.sock).unwrap_or_else(default_sock),
            multicore: cli
                .multicore
                .or(server.multicore)
                .unwrap_or_else(|| transport.default_multicore()),
            reuseport: cli.reuseport.unwrap_or(server.reuseport),
            buffer_size: toml_config.connection.buffer_size,
            max_request_size: toml_config.connection.max_request_size,
            max_connections: toml_config.connection.max_connections,
            batch_size: toml_config.connection.batch_size,
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        }
    }

    /// Number of worker threads to run.
    pub fn workers(&self) -> usize {
        if self.multicore {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            1
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {}", .path.display(), .source)]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{}': {}", .path.display(), .source)]
    TomlParse {
        path: PathBuf,
        source: toml::de::Error,
    },
}
