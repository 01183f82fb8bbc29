//! # Configuration Management
//!
//! Centralized configuration for the datagram transport.
//!
//! Configuration is passed to the driver programmatically; this module adds
//! the usual ways of producing it.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment-specific overrides via `from_env()`
//!
//! ## Derived Sizes
//! ```text
//! fragment_size   = mtu - PACKET_HEADER_SIZE - FRAGMENT_HEADER_SIZE
//! max_packet_size = fragment_size * MAX_FRAGMENTS_PER_PACKET
//! min_receive     = max_packet_size + mtu
//! ```
//!
//! The receive buffer must hold a fully reassembled packet next to the
//! datagram that completed it, so configurations below `min_receive` are
//! rejected.

use crate::core::packet::PACKET_HEADER_SIZE;
use crate::error::{Result, TransportError};
use crate::protocol::fragment::{FRAGMENT_HEADER_SIZE, MAX_FRAGMENTS_PER_PACKET};
use crate::transport::local::DEFAULT_MAILBOX_CAPACITY;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Default number of connection slots
pub const DEFAULT_MAX_CONNECTIONS: usize = 16;

/// Default per-connection event queue depth
pub const DEFAULT_MAX_EVENTS_PER_CONNECTION: usize = 100;

/// Default path MTU in bytes
pub const DEFAULT_MTU: usize = 1400;

/// Default receive scratch buffer size in bytes
pub const DEFAULT_RECEIVE_BUFFER_SIZE: usize = 128 * 1024;

/// Default number of concurrently reassembled packets
pub const DEFAULT_MAX_IN_FLIGHT: usize = 8;

/// Main configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct NetworkConfig {
    /// Transport configuration
    #[serde(default)]
    pub transport: TransportConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl NetworkConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| TransportError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| TransportError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| TransportError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(val) = env_parse::<usize>("DATAGRAM_TRANSPORT_MAX_CONNECTIONS") {
            config.transport.max_connections = val;
        }

        if let Some(val) = env_parse::<usize>("DATAGRAM_TRANSPORT_MTU") {
            config.transport.mtu = val;
        }

        if let Some(val) = env_parse::<u64>("DATAGRAM_TRANSPORT_CONNECT_TIMEOUT_MS") {
            config.transport.connect_timeout = Duration::from_millis(val);
        }

        if let Some(val) = env_parse::<u64>("DATAGRAM_TRANSPORT_DISCONNECT_TIMEOUT_MS") {
            config.transport.disconnect_timeout = Duration::from_millis(val);
        }

        if let Some(val) = env_parse::<u32>("DATAGRAM_TRANSPORT_MAX_CONNECT_ATTEMPTS") {
            config.transport.max_connect_attempts = val;
        }

        if let Ok(level) = std::env::var("DATAGRAM_TRANSPORT_LOG_LEVEL") {
            config.logging.log_level = level
                .parse::<Level>()
                .map_err(|_| TransportError::ConfigError(format!("Invalid log level: {level}")))?;
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
            .map_err(|e| TransportError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| TransportError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.transport.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(TransportError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok()?.parse::<T>().ok()
}

/// Transport driver configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Size of the receive scratch buffer filled on every update
    pub receive_buffer_size: usize,

    /// Handshake attempts before a connection is given up
    pub max_connect_attempts: u32,

    /// Time to wait for a handshake reply before retrying
    #[serde(with = "duration_serde")]
    pub connect_timeout: Duration,

    /// Inactivity after which a connected peer is dropped
    #[serde(with = "duration_serde")]
    pub disconnect_timeout: Duration,

    /// Number of connection slots
    pub max_connections: usize,

    /// Events buffered per connection between updates
    pub max_events_per_connection: usize,

    /// Largest datagram sent, header included
    pub mtu: usize,

    /// Packets that may be mid-reassembly at once
    pub max_in_flight_fragments: usize,

    /// Datagrams buffered per in-process mailbox
    pub mailbox_capacity: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            receive_buffer_size: DEFAULT_RECEIVE_BUFFER_SIZE,
            max_connect_attempts: 5,
            connect_timeout: Duration::from_millis(500),
            disconnect_timeout: Duration::from_secs(10),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            max_events_per_connection: DEFAULT_MAX_EVENTS_PER_CONNECTION,
            mtu: DEFAULT_MTU,
            max_in_flight_fragments: DEFAULT_MAX_IN_FLIGHT,
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
        }
    }
}

impl TransportConfig {
    /// Payload bytes carried by one fragment
    pub fn fragment_size(&self) -> usize {
        self.mtu
            .saturating_sub(PACKET_HEADER_SIZE + FRAGMENT_HEADER_SIZE)
            .max(1)
    }

    /// Largest payload `send` accepts
    pub fn max_packet_size(&self) -> usize {
        self.fragment_size() * MAX_FRAGMENTS_PER_PACKET
    }

    /// Smallest receive buffer that can take a packet of `max_packet_size`
    pub fn min_receive_buffer_size(&self) -> usize {
        self.max_packet_size().saturating_add(self.mtu)
    }

    /// Largest payload that fits a single `Data` datagram
    pub fn max_unfragmented_payload(&self) -> usize {
        self.mtu.saturating_sub(PACKET_HEADER_SIZE)
    }

    /// Validate transport configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        let min_mtu = PACKET_HEADER_SIZE + FRAGMENT_HEADER_SIZE + 1;
        let max_mtu = PACKET_HEADER_SIZE + FRAGMENT_HEADER_SIZE + i16::MAX as usize;
        if self.mtu < min_mtu {
            errors.push(format!("MTU too small: {} (minimum: {min_mtu})", self.mtu));
        } else if self.mtu > max_mtu {
            errors.push(format!("MTU too large: {} (maximum: {max_mtu})", self.mtu));
        }

        let min_receive = self.min_receive_buffer_size();
        if self.receive_buffer_size < min_receive {
            errors.push(format!(
                "Receive buffer ({} bytes) must hold the largest packet plus one MTU ({min_receive} bytes)",
                self.receive_buffer_size
            ));
        }

        if self.max_connections == 0 {
            errors.push("Max connections must be greater than 0".to_string());
        } else if self.max_connections > u16::MAX as usize {
            errors.push(format!(
                "Max connections too large: {} (maximum: {})",
                self.max_connections,
                u16::MAX
            ));
        }

        if self.max_events_per_connection == 0 {
            errors.push("Max events per connection must be greater than 0".to_string());
        }

        if self.max_connect_attempts == 0 {
            errors.push("Max connect attempts must be greater than 0".to_string());
        }

        if self.connect_timeout.is_zero() {
            errors.push("Connect timeout must be greater than 0".to_string());
        }

        if self.disconnect_timeout <= self.connect_timeout {
            errors.push("Disconnect timeout should exceed the connect timeout".to_string());
        }

        if self.max_in_flight_fragments == 0 {
            errors.push("Max in-flight fragments must be greater than 0".to_string());
        }

        if self.mailbox_capacity == 0 {
            errors.push("Mailbox capacity must be greater than 0".to_string());
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
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
            app_name: String::from("datagram-transport"),
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
