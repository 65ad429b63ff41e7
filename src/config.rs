//! # Configuration Management
//!
//! Centralized configuration for servers and clients of the wire protocol.
//!
//! This module provides structured configuration for transport bindings,
//! TLS material, stream compression, codec limits and logging.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment overrides via `from_env()` (`WIRELINK_*` variables)
//!
//! ## Security Considerations
//! - The frame size limit bounds every allocation driven by a peer
//! - The negotiation window bounds how much unclassified input is buffered
//! - Negotiation and handshake timeouts prevent slowloris connections

use crate::error::{ProtocolError, Result};
use crate::transport::Transport;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Magic bytes opening every raw streaming connection ("WLNK")
pub const MAGIC_HEADER: [u8; 4] = [0x57, 0x4C, 0x4E, 0x4B];

/// Max allowed frame size (e.g. 16 MB)
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Bytes inspected at most before a connection is classified
pub const DEFAULT_NEGOTIATION_WINDOW: usize = 4096;

/// Largest HTTP request body accepted by the long-poll transport
pub const DEFAULT_MAX_HTTP_CONTENT_LENGTH: usize = 1024 * 1024;

/// Main network configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct NetworkConfig {
    /// Server-specific configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Client-specific configuration
    #[serde(default)]
    pub client: ClientConfig,

    /// Codec limits
    #[serde(default)]
    pub codec: CodecConfig,

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

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("WIRELINK_BIND_ADDRESS") {
            config.server.bind_address = addr;
        }

        if let Ok(addr) = std::env::var("WIRELINK_CLIENT_ADDRESS") {
            config.client.address = addr;
        }

        if let Ok(port) = std::env::var("WIRELINK_TCP_PORT") {
            if let Ok(val) = port.parse::<u16>() {
                config.server.set_port(Transport::Tcp, val);
            }
        }

        if let Ok(port) = std::env::var("WIRELINK_HTTP_PORT") {
            if let Ok(val) = port.parse::<u16>() {
                config.server.set_port(Transport::Http, val);
            }
        }

        if let Ok(flag) = std::env::var("WIRELINK_GZIP") {
            if let Ok(val) = flag.parse::<bool>() {
                config.server.gzip_enabled = val;
            }
        }

        if let Ok(flag) = std::env::var("WIRELINK_SNAPPY") {
            if let Ok(val) = flag.parse::<bool>() {
                config.server.snappy_enabled = val;
            }
        }

        if let Ok(timeout) = std::env::var("WIRELINK_CONNECTION_TIMEOUT_MS") {
            if let Ok(val) = timeout.parse::<u64>() {
                config.client.connection_timeout = Duration::from_millis(val);
            }
        }

        if let Ok(size) = std::env::var("WIRELINK_MAX_FRAME_SIZE") {
            if let Ok(val) = size.parse::<usize>() {
                config.codec.max_frame_size = val;
            }
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
        errors.extend(self.codec.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// A transport enabled on one port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct TransportBinding {
    pub transport: Transport,
    pub port: u16,
}

/// TLS material for the server side
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct TlsConfig {
    pub enabled: bool,

    /// PEM certificate chain
    pub cert_path: Option<String>,

    /// PEM private key (PKCS#8 or RSA)
    pub key_path: Option<String>,
}

/// Server-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Listen host (e.g., "127.0.0.1"); ports come from the transport bindings
    pub bind_address: String,

    pub gzip_enabled: bool,

    pub snappy_enabled: bool,

    /// Bytes buffered at most while classifying a new connection
    pub negotiation_window: usize,

    /// Time allowed for classification and handshake
    #[serde(with = "duration_serde")]
    pub negotiation_timeout: Duration,

    pub max_http_content_length: usize,

    /// How long an HTTP poll is held open waiting for frames
    #[serde(with = "duration_serde")]
    pub poll_timeout: Duration,

    /// Timeout for graceful server shutdown
    #[serde(with = "duration_serde")]
    pub shutdown_timeout: Duration,

    /// Enabled transports and the ports they accept on
    pub transports: Vec<TransportBinding>,

    #[serde(default)]
    pub tls: TlsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: String::from("127.0.0.1"),
            gzip_enabled: false,
            snappy_enabled: false,
            negotiation_window: DEFAULT_NEGOTIATION_WINDOW,
            negotiation_timeout: Duration::from_secs(10),
            max_http_content_length: DEFAULT_MAX_HTTP_CONTENT_LENGTH,
            poll_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(10),
            transports: vec![TransportBinding {
                transport: Transport::Tcp,
                port: Transport::Tcp.default_port(),
            }],
            tls: TlsConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Port a transport is bound to, if it is enabled
    pub fn transport_port(&self, transport: Transport) -> Option<u16> {
        self.transports
            .iter()
            .find(|binding| binding.transport == transport)
            .map(|binding| binding.port)
    }

    /// Bind `transport` to `port`, replacing an earlier binding of the same transport
    pub fn set_port(&mut self, transport: Transport, port: u16) {
        match self.transports.iter_mut().find(|b| b.transport == transport) {
            Some(binding) => binding.port = port,
            None => self.transports.push(TransportBinding { transport, port }),
        }
    }

    /// Distinct ports with at least one transport bound
    pub fn ports(&self) -> Vec<u16> {
        let mut ports: Vec<u16> = self.transports.iter().map(|b| b.port).collect();
        ports.sort_unstable();
        ports.dedup();
        ports
    }

    /// Validate server configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.bind_address.is_empty() {
            errors.push("Bind address cannot be empty".to_string());
        } else if self.bind_address.parse::<std::net::IpAddr>().is_err() {
            errors.push(format!(
                "Invalid bind address: '{}' (expected an IP address such as '0.0.0.0')",
                self.bind_address
            ));
        }

        if self.transports.is_empty() {
            errors.push("At least one transport must be enabled".to_string());
        }

        for (i, binding) in self.transports.iter().enumerate() {
            if self.transports[..i].iter().any(|b| b.transport == binding.transport) {
                errors.push(format!("Transport {} is configured twice", binding.transport.name()));
            }
        }

        if self.tls.enabled {
            if self.tls.cert_path.is_none() {
                errors.push("tls.cert_path must be specified when TLS is enabled".to_string());
            }
            if self.tls.key_path.is_none() {
                errors.push("tls.key_path must be specified when TLS is enabled".to_string());
            }
        }

        if self.negotiation_window < 16 {
            errors.push("Negotiation window too small (minimum: 16 bytes)".to_string());
        } else if self.negotiation_window > 64 * 1024 {
            errors.push("Negotiation window too large (maximum: 64 KB)".to_string());
        }

        if self.negotiation_timeout.as_millis() < 100 {
            errors.push("Negotiation timeout too short (minimum: 100ms)".to_string());
        } else if self.negotiation_timeout.as_secs() > 300 {
            errors.push("Negotiation timeout too long (maximum: 300s)".to_string());
        }

        if self.max_http_content_length == 0 {
            errors.push("Max HTTP content length must be greater than 0".to_string());
        }

        if self.poll_timeout.as_millis() < 10 {
            errors.push("Poll timeout too short (minimum: 10ms)".to_string());
        } else if self.poll_timeout.as_secs() > 120 {
            errors.push("Poll timeout too long (maximum: 120s)".to_string());
        }

        if self.shutdown_timeout.as_secs() < 1 {
            errors.push("Shutdown timeout too short (minimum: 1s)".to_string());
        } else if self.shutdown_timeout.as_secs() > 60 {
            errors.push("Shutdown timeout too long (maximum: 60s)".to_string());
        }

        errors
    }
}

/// Client-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    /// Target server address
    pub address: String,

    /// Timeout for connection attempts
    #[serde(with = "duration_serde")]
    pub connection_timeout: Duration,

    /// Timeout for the handshake response
    #[serde(with = "duration_serde")]
    pub handshake_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: format!("127.0.0.1:{}", Transport::Tcp.default_port()),
            connection_timeout: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(5),
        }
    }
}

impl ClientConfig {
    /// Validate client configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.address.is_empty() {
            errors.push("Client address cannot be empty".to_string());
        } else if self.address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid client address format: '{}' (expected format: '127.0.0.1:8080')",
                self.address
            ));
        }

        if self.connection_timeout.as_millis() < 100 {
            errors.push("Connection timeout too short (minimum: 100ms)".to_string());
        }

        if self.handshake_timeout.as_millis() < 100 {
            errors.push("Handshake timeout too short (minimum: 100ms)".to_string());
        }

        errors
    }
}

/// Codec limits
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CodecConfig {
    /// Maximum allowed frame size in bytes
    pub max_frame_size: usize,

    /// Output buffers kept per connection pool
    pub buffer_pool_size: usize,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
            buffer_pool_size: 16,
        }
    }
}

impl CodecConfig {
    /// Validate codec configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.max_frame_size == 0 {
            errors.push("Max frame size cannot be 0".to_string());
        } else if self.max_frame_size < 1024 {
            errors.push("Max frame size too small (minimum: 1 KB)".to_string());
        } else if self.max_frame_size > 100 * 1024 * 1024 {
            errors.push(format!(
                "Max frame size too large: {} bytes (maximum recommended: 100 MB)",
                self.max_frame_size
            ));
        }

        if self.buffer_pool_size > 10_000 {
            errors.push(format!(
                "Buffer pool size very large: {} (maximum: 10,000)",
                self.buffer_pool_size
            ));
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
            app_name: String::from("wirelink"),
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
