//! Configuration module for the fcgi-mux demo server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use fcgi_mux::Endpoint;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error as ThisError;

/// Command-line arguments for the demo server
#[derive(Parser, Debug)]
#[command(name = "fcgi-mux")]
#[command(version)]
#[command(about = "A multiplexing FastCGI responder", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// TCP port to listen on (repeatable)
    #[arg(short, long)]
    pub port: Vec<u16>,

    /// Local socket path to listen on (repeatable)
    #[arg(short, long)]
    pub socket: Vec<PathBuf>,

    /// Upper bound in milliseconds on each readiness wait (default: block)
    #[arg(short, long)]
    pub timeout_ms: Option<u64>,

    /// Leave local socket files behind on shutdown
    #[arg(long)]
    pub abandon_files: bool,

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
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize, Default)]
pub struct ServerConfig {
    /// TCP ports to listen on
    #[serde(default)]
    pub ports: Vec<u16>,
    /// Local socket paths to listen on
    #[serde(default)]
    pub sockets: Vec<PathBuf>,
    /// Readiness wait bound in milliseconds
    pub timeout_ms: Option<u64>,
    /// Keep socket files on shutdown
    #[serde(default)]
    pub abandon_files: bool,
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

fn default_port() -> u16 {
    7000
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub endpoints: Vec<Endpoint>,
    pub timeout: Option<Duration>,
    pub abandon_files: bool,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|source| ConfigError::FileRead {
                    path: config_path.clone(),
                    source,
                })?;
            toml::from_str(&contents).map_err(|source| ConfigError::TomlParse {
                path: config_path.clone(),
                source,
            })?
        } else {
            TomlConfig::default()
        };

        Ok(Self::merge(cli, toml_config))
    }

    /// Merge CLI args over TOML values.
    ///
    /// Endpoint lists given on the command line replace the file's lists
    /// as a whole. With no endpoints anywhere, the default TCP port is used.
    fn merge(cli: CliArgs, file: TomlConfig) -> Self {
        let (ports, sockets) = if cli.port.is_empty() && cli.socket.is_empty() {
            (file.server.ports, file.server.sockets)
        } else {
            (cli.port, cli.socket)
        };

        let mut endpoints: Vec<Endpoint> = ports
            .into_iter()
            .map(Endpoint::Tcp)
            .chain(sockets.into_iter().map(Endpoint::Local))
            .collect();
        if endpoints.is_empty() {
            endpoints.push(Endpoint::Tcp(default_port()));
        }

        Config {
            endpoints,
            timeout: cli
                .timeout_ms
                .or(file.server.timeout_ms)
                .map(Duration::from_millis),
            abandon_files: cli.abandon_files || file.server.abandon_files,
            log_level: cli.log_level.unwrap_or(file.logging.level),
        }
    }
}

/// Configuration loading errors
#[derive(Debug, ThisError)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {source}", .path.display())]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{}': {source}", .path.display())]
    TomlParse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cli = CliArgs::parse_from(["fcgi-mux"]);
        let config = Config::merge(cli, TomlConfig::default());
        assert_eq!(config.endpoints, vec![Endpoint::Tcp(7000)]);
        assert_eq!(config.timeout, None);
        assert!(!config.abandon_files);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            ports = [9000, 9001]
            sockets = ["/run/fcgi.sock"]
            timeout_ms = 250
            abandon_files = true

            [logging]
            level = "debug"
        "#;

        let file: TomlConfig = toml::from_str(toml_str).unwrap();
        let config = Config::merge(CliArgs::parse_from(["fcgi-mux"]), file);
        assert_eq!(
            config.endpoints,
            vec![
                Endpoint::Tcp(9000),
                Endpoint::Tcp(9001),
                Endpoint::Local(PathBuf::from("/run/fcgi.sock")),
            ]
        );
        assert_eq!(config.timeout, Some(Duration::from_millis(250)));
        assert!(config.abandon_files);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_cli_overrides_file() {
        let file: TomlConfig = toml::from_str(
            r#"
            [server]
            ports = [9000]
            timeout_ms = 250
            "#,
        )
        .unwrap();
        let cli = CliArgs::parse_from([
            "fcgi-mux",
            "--socket",
            "/tmp/a.sock",
            "--timeout-ms",
            "0",
            "--log-level",
            "trace",
        ]);

        let config = Config::merge(cli, file);
        assert_eq!(
            config.endpoints,
            vec![Endpoint::Local(PathBuf::from("/tmp/a.sock"))]
        );
        assert_eq!(config.timeout, Some(Duration::ZERO));
        assert_eq!(config.log_level, "trace");
    }
}
