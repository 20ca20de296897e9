//! Server configuration.
//!
//! Loads and validates configuration from YAML files or environment variables.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Server configuration.
///
/// Example YAML:
/// ```yaml
/// http_addr: "0.0.0.0:8080"
/// grpc_addr: "0.0.0.0:10010"
/// log_level: "debug"
/// store:
///   connect_retries: 5
///   connect_backoff_ms: 1000
/// shutdown_grace_ms: 20000
/// request_timeout_ms: 15000
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// REST listen address
    #[serde(default = "default_http_addr")]
    pub http_addr: String,

    /// gRPC listen address
    #[serde(default = "default_grpc_addr")]
    pub grpc_addr: String,

    /// Maximum tracing level: trace, debug, info, warn or error
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Store bootstrap
    #[serde(default)]
    pub store: StoreConfig,

    /// How long in-flight requests may run once shutdown starts
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,

    /// Upper bound on a single REST request
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Reconnect attempts after the first refused connection
    #[serde(default = "default_connect_retries")]
    pub connect_retries: u32,

    /// Pause between connection attempts
    #[serde(default = "default_connect_backoff_ms")]
    pub connect_backoff_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            connect_retries: default_connect_retries(),
            connect_backoff_ms: default_connect_backoff_ms(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            grpc_addr: default_grpc_addr(),
            log_level: default_log_level(),
            store: StoreConfig::default(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

fn default_http_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_grpc_addr() -> String {
    "0.0.0.0:10010".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_connect_retries() -> u32 {
    5
}

fn default_connect_backoff_ms() -> u64 {
    1000
}

fn default_shutdown_grace_ms() -> u64 {
    20_000
}

fn default_request_timeout_ms() -> u64 {
    15_000
}

fn env_or<T: FromStr>(name: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| ConfigError::InvalidField(format!("{}: {}", name, e))),
        Err(_) => Ok(default),
    }
}

impl ServerConfig {
    /// Load configuration from a YAML file.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::IoError(format!("Failed to read config file: {}", e)))?;

        let config: ServerConfig = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(format!("Failed to parse YAML: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables.
    ///
    /// Supported variables (all optional):
    /// - FLEET_HTTP_ADDR
    /// - FLEET_GRPC_ADDR
    /// - FLEET_LOG_LEVEL
    /// - FLEET_STORE_CONNECT_RETRIES
    /// - FLEET_STORE_CONNECT_BACKOFF_MS
    /// - FLEET_SHUTDOWN_GRACE_MS
    /// - FLEET_REQUEST_TIMEOUT_MS
    pub fn load_from_env() -> Result<Self, ConfigError> {
        let config = ServerConfig {
            http_addr: env_or("FLEET_HTTP_ADDR", default_http_addr())?,
            grpc_addr: env_or("FLEET_GRPC_ADDR", default_grpc_addr())?,
            log_level: env_or("FLEET_LOG_LEVEL", default_log_level())?,
            store: StoreConfig {
                connect_retries: env_or("FLEET_STORE_CONNECT_RETRIES", default_connect_retries())?,
                connect_backoff_ms: env_or(
                    "FLEET_STORE_CONNECT_BACKOFF_MS",
                    default_connect_backoff_ms(),
                )?,
            },
            shutdown_grace_ms: env_or("FLEET_SHUTDOWN_GRACE_MS", default_shutdown_grace_ms())?,
            request_timeout_ms: env_or("FLEET_REQUEST_TIMEOUT_MS", default_request_timeout_ms())?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let http = self.http_socket_addr()?;
        let grpc = self.grpc_socket_addr()?;
        if http == grpc && http.port() != 0 {
            return Err(ConfigError::InvalidField(format!(
                "http_addr and grpc_addr must differ (both {})",
                http
            )));
        }

        self.tracing_level()?;

        if self.request_timeout_ms == 0 {
            return Err(ConfigError::InvalidField(
                "request_timeout_ms must be > 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn http_socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.http_addr
            .parse()
            .map_err(|e| ConfigError::InvalidField(format!("Invalid http_addr: {}", e)))
    }

    pub fn grpc_socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.grpc_addr
            .parse()
            .map_err(|e| ConfigError::InvalidField(format!("Invalid grpc_addr: {}", e)))
    }

    pub fn tracing_level(&self) -> Result<tracing::Level, ConfigError> {
        self.log_level
            .parse()
            .map_err(|_| ConfigError::InvalidField(format!("Invalid log_level: {}", self.log_level)))
    }

    pub fn connect_backoff(&self) -> Duration {
        Duration::from_millis(self.store.connect_backoff_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Invalid field: {0}")]
    InvalidField(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();

        assert!(config.validate().is_ok());
        assert_eq!(config.http_addr, "0.0.0.0:8080");
        assert_eq!(config.grpc_addr, "0.0.0.0:10010");
        assert_eq!(config.store.connect_retries, 5);
        assert_eq!(config.connect_backoff(), Duration::from_secs(1));
        assert_eq!(config.shutdown_grace(), Duration::from_secs(20));
        assert_eq!(config.request_timeout(), Duration::from_secs(15));
        assert_eq!(config.tracing_level().unwrap(), tracing::Level::INFO);
    }

    #[test]
    fn test_load_from_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "http_addr: \"127.0.0.1:9000\"\nlog_level: debug\nstore:\n  connect_retries: 2\n"
        )
        .unwrap();

        let config = ServerConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.http_addr, "127.0.0.1:9000");
        assert_eq!(config.grpc_addr, default_grpc_addr());
        assert_eq!(config.store.connect_retries, 2);
        assert_eq!(config.store.connect_backoff_ms, 1000);
        assert_eq!(config.tracing_level().unwrap(), tracing::Level::DEBUG);
    }

    #[test]
    fn test_load_from_file_errors() {
        assert!(matches!(
            ServerConfig::load_from_file("/nonexistent/fleet.yaml"),
            Err(ConfigError::IoError(_))
        ));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "http_addr: [not, a, string").unwrap();
        assert!(matches!(
            ServerConfig::load_from_file(file.path()),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_invalid_addr() {
        let config = ServerConfig {
            http_addr: "invalid_addr".to_string(),
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_same_addr_for_both_servers() {
        let config = ServerConfig {
            http_addr: "127.0.0.1:7000".to_string(),
            grpc_addr: "127.0.0.1:7000".to_string(),
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());

        let ephemeral = ServerConfig {
            http_addr: "127.0.0.1:0".to_string(),
            grpc_addr: "127.0.0.1:0".to_string(),
            ..ServerConfig::default()
        };
        assert!(ephemeral.validate().is_ok());
    }

    #[test]
    fn test_invalid_log_level_and_timeout() {
        let config = ServerConfig {
            log_level: "loud".to_string(),
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());

        let config = ServerConfig {
            request_timeout_ms: 0,
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_env() {
        std::env::set_var("FLEET_GRPC_ADDR", "127.0.0.1:10011");
        std::env::set_var("FLEET_STORE_CONNECT_RETRIES", "9");
        let config = ServerConfig::load_from_env().unwrap();
        std::env::remove_var("FLEET_GRPC_ADDR");
        std::env::remove_var("FLEET_STORE_CONNECT_RETRIES");

        assert_eq!(config.grpc_addr, "127.0.0.1:10011");
        assert_eq!(config.store.connect_retries, 9);
        assert_eq!(config.http_addr, default_http_addr());
    }
}
