//! Configuration module for the echo service.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Socket family and type to echo over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// TCP stream socket (IP:port)
    Tcp,
    /// Unix-domain stream socket (filesystem path)
    Unix,
    /// UDP datagram socket (IP:port)
    Udp,
}

/// How stream sessions are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    /// One session at a time; the listener waits for it to finish
    Sequential,
    /// One task per accepted connection
    Concurrent,
}

/// Which end of the echo exchange this process plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "socket-echo")]
#[command(version = "0.1.0")]
#[command(about = "Echo server and client over TCP, Unix and UDP sockets", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Run as an interactive client instead of a server
    #[arg(long)]
    pub client: bool,

    /// Transport to use
    #[arg(short, long, value_enum)]
    pub transport: Option<Transport>,

    /// Session scheduling for stream transports
    #[arg(short, long, value_enum)]
    pub mode: Option<SessionMode>,

    /// Address to bind to or connect to (e.g., 127.0.0.1:8080)
    #[arg(short, long)]
    pub address: Option<String>,

    /// Unix socket file path
    #[arg(short, long)]
    pub socket_path: Option<PathBuf>,

    /// Maximum message size in bytes
    #[arg(short = 'b', long)]
    pub max_message_size: Option<usize>,

    /// Listen backlog (queued but unaccepted connections)
    #[arg(long)]
    pub backlog: Option<i32>,

    /// Maximum concurrent sessions in concurrent mode
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Number of runtime worker threads (defaults to number of CPU cores)
    #[arg(short, long)]
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
    pub session: SessionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Endpoint-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_transport")]
    pub transport: Transport,
    #[serde(default = "default_mode")]
    pub mode: SessionMode,
    /// Address to bind to (tcp, udp)
    #[serde(default = "default_address")]
    pub address: String,
    /// Socket file path (unix)
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,
    #[serde(default = "default_backlog")]
    pub backlog: i32,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Number of worker threads
    pub workers: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            transport: default_transport(),
            mode: default_mode(),
            address: default_address(),
            socket_path: default_socket_path(),
            backlog: default_backlog(),
            max_connections: default_max_connections(),
            workers: None,
        }
    }
}

/// Per-session configuration
#[derive(Debug, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_message_size: default_max_message_size(),
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

fn default_transport() -> Transport {
    Transport::Tcp
}

fn default_mode() -> SessionMode {
    SessionMode::Concurrent
}

fn default_address() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_socket_path() -> PathBuf {
    PathBuf::from("/tmp/echo_server.sock")
}

fn default_backlog() -> i32 {
    3
}

fn default_max_connections() -> usize {
    1024
}

fn default_max_message_size() -> usize {
    1024
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Largest accepted `max_message_size`; covers the biggest UDP payload.
pub const MESSAGE_SIZE_LIMIT: usize = 64 * 1024;

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub role: Role,
    pub transport: Transport,
    pub mode: SessionMode,
    pub address: String,
    pub socket_path: PathBuf,
    pub max_message_size: usize,
    pub backlog: i32,
    pub max_connections: usize,
    pub workers: Option<usize>,
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
            role: if cli.client {
                Role::Client
            } else {
                Role::Server
            },
            transport: cli.transport.unwrap_or(toml_config.server.transport),
            mode: cli.mode.unwrap_or(toml_config.server.mode),
            address: cli.address.unwrap_or(toml_config.server.address),
            socket_path: cli.socket_path.unwrap_or(toml_config.server.socket_path),
            max_message_size: cli
                .max_message_size
                .unwrap_or(toml_config.session.max_message_size),
            backlog: cli.backlog.unwrap_or(toml_config.server.backlog),
            max_connections: cli
                .max_connections
                .unwrap_or(toml_config.server.max_connections),
            workers: cli.workers.or(toml_config.server.workers),
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_message_size == 0 {
            return Err(ConfigError::Invalid(
                "max_message_size must be greater than 0".to_string(),
            ));
        }
        if self.max_message_size > MESSAGE_SIZE_LIMIT {
            return Err(ConfigError::Invalid(format!(
                "max_message_size must be at most {}",
                MESSAGE_SIZE_LIMIT
            )));
        }
        if self.backlog <= 0 {
            return Err(ConfigError::Invalid(
                "backlog must be greater than 0".to_string(),
            ));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "max_connections must be greater than 0".to_string(),
            ));
        }
        if matches!(self.workers, Some(0)) {
            return Err(ConfigError::Invalid(
                "workers must be greater than 0".to_string(),
            ));
        }
        if self.transport != Transport::Unix {
            self.socket_addr()?;
        }
        Ok(())
    }

    /// Parsed IP endpoint for the tcp and udp transports.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.address
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("invalid address '{}'", self.address)))
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

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> CliArgs {
        let mut argv = vec!["socket-echo"];
        argv.extend_from_slice(args);
        CliArgs::parse_from(argv)
    }

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.server.transport, Transport::Tcp);
        assert_eq!(config.server.mode, SessionMode::Concurrent);
        assert_eq!(config.server.address, "127.0.0.1:8080");
        assert_eq!(
            config.server.socket_path,
            PathBuf::from("/tmp/echo_server.sock")
        );
        assert_eq!(config.server.backlog, 3);
        assert_eq!(config.session.max_message_size, 1024);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            transport = "unix"
            mode = "sequential"
            address = "0.0.0.0:9000"
            socket_path = "/run/echo.sock"
            backlog = 16
            max_connections = 8
            workers = 2

            [session]
            max_message_size = 4096

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.transport, Transport::Unix);
        assert_eq!(config.server.mode, SessionMode::Sequential);
        assert_eq!(config.server.address, "0.0.0.0:9000");
        assert_eq!(config.server.socket_path, PathBuf::from("/run/echo.sock"));
        assert_eq!(config.server.backlog, 16);
        assert_eq!(config.server.max_connections, 8);
        assert_eq!(config.server.workers, Some(2));
        assert_eq!(config.session.max_message_size, 4096);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_unknown_transport_rejected() {
        let result: Result<TomlConfig, _> = toml::from_str("[server]\ntransport = \"sctp\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_overrides_toml() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
            [server]
            transport = "tcp"
            address = "127.0.0.1:9000"

            [logging]
            level = "warn"
            "#,
        )
        .unwrap();

        let config = Config::merge(
            cli(&["--client", "-t", "udp", "-a", "127.0.0.1:7000", "-b", "64"]),
            toml_config,
        )
        .unwrap();

        assert_eq!(config.role, Role::Client);
        assert_eq!(config.transport, Transport::Udp);
        assert_eq!(config.address, "127.0.0.1:7000");
        assert_eq!(config.max_message_size, 64);
        assert_eq!(config.log_level, "warn");
        assert_eq!(config.mode, SessionMode::Concurrent);
    }

    #[test]
    fn test_validation() {
        let err = Config::merge(cli(&["-b", "0"]), TomlConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = Config::merge(cli(&["-b", "18446744073709551615"]), TomlConfig::default())
            .unwrap_err();
        assert!(err.to_string().contains("max_message_size must be at most 65536"));

        let err = Config::merge(cli(&["-b", "65537"]), TomlConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let config = Config::merge(cli(&["-b", "65536"]), TomlConfig::default()).unwrap();
        assert_eq!(config.max_message_size, MESSAGE_SIZE_LIMIT);

        let err = Config::merge(cli(&["--backlog", "0"]), TomlConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = Config::merge(cli(&["-a", "localhost"]), TomlConfig::default()).unwrap_err();
        assert!(err.to_string().contains("invalid address 'localhost'"));

        // The address is irrelevant for unix sockets
        let config = Config::merge(
            cli(&["-t", "unix", "-a", "localhost"]),
            TomlConfig::default(),
        )
        .unwrap();
        assert_eq!(config.role, Role::Server);
        assert_eq!(config.transport, Transport::Unix);
    }
}
