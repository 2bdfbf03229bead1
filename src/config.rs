//! # Configuration Management
//!
//! Centralized configuration for brokers and reconnecting clients.
//!
//! This module provides structured configuration for both roles, including
//! listen/connect addresses, handshake and connect timeouts, the reconnect
//! interval, the wire serialization format and logging output.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()` / `from_toml()`
//! - Direct instantiation with defaults
//! - Environment overrides via `from_env()` (`TORPEDO_*` variables)
//!
//! Both peers of a connection must agree on `protocol.format` and
//! `protocol.protocol_id`; neither is negotiated on the wire.

use crate::core::serialization::SerializationFormat;
use crate::error::{ProtocolError, Result};
use crate::utils::timeout;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Protocol name sent as the first half of the handshake identifier
pub const PROTOCOL_NAME: &str = env!("CARGO_PKG_NAME");

/// Protocol version sent as the second half of the handshake identifier
pub const PROTOCOL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Delay between a lost connection and the next attempt
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(1);

/// Identifier exchanged during the handshake (`"<name>-<version>"`)
pub fn default_protocol_id() -> String {
    format!("{PROTOCOL_NAME}-{PROTOCOL_VERSION}")
}

/// Main configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct NetworkConfig {
    /// Broker-specific configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Reconnecting client configuration
    #[serde(default)]
    pub client: ClientConfig,

    /// Wire protocol settings shared by both roles
    #[serde(default)]
    pub protocol: ProtocolConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl NetworkConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables on top of the defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("TORPEDO_SERVER_ADDRESS") {
            config.server.address = addr;
        }

        if let Ok(addr) = std::env::var("TORPEDO_CLIENT_ADDRESS") {
            config.client.address = addr;
        }

        if let Ok(limit) = std::env::var("TORPEDO_MAX_CONNECTIONS") {
            if let Ok(val) = limit.parse::<usize>() {
                config.server.max_connections = val;
            }
        }

        if let Ok(interval) = std::env::var("TORPEDO_RECONNECT_INTERVAL_MS") {
            if let Ok(val) = interval.parse::<u64>() {
                config.client.reconnect_interval = Duration::from_millis(val);
            }
        }

        if let Ok(timeout) = std::env::var("TORPEDO_HANDSHAKE_TIMEOUT_MS") {
            if let Ok(val) = timeout.parse::<u64>() {
                config.protocol.handshake_timeout = Duration::from_millis(val);
            }
        }

        if let Ok(format) = std::env::var("TORPEDO_FORMAT") {
            config.protocol.format = format.parse().map_err(ProtocolError::ConfigError)?;
        }

        if let Ok(level) = std::env::var("TORPEDO_LOG_LEVEL") {
            config.logging.log_level = level
                .parse::<Level>()
                .map_err(|_| ProtocolError::ConfigError(format!("Invalid log level: {level}")))?;
        }

        Ok(config)
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors.extend(self.client.validate());
        errors.extend(self.protocol.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        ensure_valid(self.validate())
    }
}

/// Turn a list of validation errors into a single `ConfigError`.
pub(crate) fn ensure_valid(errors: Vec<String>) -> Result<()> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ProtocolError::ConfigError(format!(
            "Configuration validation failed:\n  - {}",
            errors.join("\n  - ")
        )))
    }
}

/// Broker configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Listen address (e.g., "127.0.0.1:8888")
    pub address: String,

    /// Maximum number of simultaneously open connections
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: String::from("127.0.0.1:8888"),
            max_connections: 1000,
        }
    }
}

impl ServerConfig {
    /// Validate server configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.address.is_empty() {
            errors.push("Server address cannot be empty".to_string());
        } else if self.address.parse::<SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid server address format: '{}' (expected format: '0.0.0.0:8888')",
                self.address
            ));
        }

        if self.max_connections == 0 {
            errors.push("Max connections must be greater than 0".to_string());
        } else if self.max_connections > 100_000 {
            errors.push(format!(
                "Max connections very high: {} (ensure system resources can support this)",
                self.max_connections
            ));
        }

        errors
    }
}

/// Reconnecting client configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    /// Broker address as `host:port`; the host is resolved on every attempt
    pub address: String,

    /// Local endpoint to bind before connecting
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_address: Option<String>,

    /// Timeout for a single connect attempt
    #[serde(with = "duration_serde")]
    pub connect_timeout: Duration,

    /// Delay between a disconnect (or failed attempt) and the next attempt
    #[serde(with = "duration_serde")]
    pub reconnect_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: String::from("127.0.0.1:8888"),
            local_address: None,
            connect_timeout: timeout::CONNECT_TIMEOUT,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
        }
    }
}

impl ClientConfig {
    /// Configuration targeting `address` with every other field defaulted
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }

    /// Validate client configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.address.is_empty() {
            errors.push("Client address cannot be empty".to_string());
        } else if !is_host_port(&self.address) {
            errors.push(format!(
                "Invalid client address format: '{}' (expected format: 'example.com:8888')",
                self.address
            ));
        }

        if let Some(ref local) = self.local_address {
            if local.parse::<SocketAddr>().is_err() {
                errors.push(format!(
                    "Invalid local address format: '{local}' (expected format: '127.0.0.1:0')"
                ));
            }
        }

        if self.connect_timeout.as_millis() < 10 {
            errors.push("Connect timeout too short (minimum: 10ms)".to_string());
        }

        if self.reconnect_interval.as_millis() < 10 {
            errors.push("Reconnect interval too short (minimum: 10ms)".to_string());
        } else if self.reconnect_interval.as_secs() > 3600 {
            errors.push("Reconnect interval too long (maximum: 1 hour)".to_string());
        }

        errors
    }
}

fn is_host_port(address: &str) -> bool {
    match address.rsplit_once(':') {
        Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
        None => false,
    }
}

/// Wire protocol settings; both peers must use identical values
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProtocolConfig {
    /// Body serialization format
    #[serde(default)]
    pub format: SerializationFormat,

    /// Identifier exchanged raw during the handshake
    #[serde(default = "default_protocol_id")]
    pub protocol_id: String,

    /// Upper bound for the identifier exchange
    #[serde(with = "duration_serde")]
    pub handshake_timeout: Duration,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            format: SerializationFormat::default(),
            protocol_id: default_protocol_id(),
            handshake_timeout: timeout::HANDSHAKE_TIMEOUT,
        }
    }
}

impl ProtocolConfig {
    /// Validate protocol configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.protocol_id.is_empty() {
            errors.push("Protocol identifier cannot be empty".to_string());
        } else if !self.protocol_id.is_ascii() {
            errors.push(format!(
                "Protocol identifier must be ASCII: '{}'",
                self.protocol_id
            ));
        } else if self.protocol_id.len() > 255 {
            errors.push(format!(
                "Protocol identifier too long: {} bytes (maximum: 255)",
                self.protocol_id.len()
            ));
        }

        if self.handshake_timeout.as_millis() < 10 {
            errors.push("Handshake timeout too short (minimum: 10ms)".to_string());
        } else if self.handshake_timeout.as_secs() > 300 {
            errors.push("Handshake timeout too long (maximum: 300s)".to_string());
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("torpedo-msg"),
            log_level: Level::INFO,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        errors
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_protocol_id_shape() {
        let id = default_protocol_id();
        assert_eq!(id, format!("torpedo-msg-{}", env!("CARGO_PKG_VERSION")));
        assert!(id.is_ascii());
    }

    #[test]
    fn test_host_port_check() {
        assert!(is_host_port("127.0.0.1:8888"));
        assert!(is_host_port("localhost:1"));
        assert!(!is_host_port("localhost"));
        assert!(!is_host_port(":8888"));
        assert!(!is_host_port("localhost:99999"));
    }
}
