//! Gateway configuration.
//!
//! Configuration is read from a TOML file with kebab-case keys. Every field
//! has a default, so an empty file (or no file at all) yields a runnable
//! in-memory gateway on `0.0.0.0:1883`.
//!
//! ```toml
//! [server]
//! listen = "127.0.0.1:1883"
//! network = "tcp4"
//!
//! [bus]
//! backend = "kafka"
//! servers = ["localhost:9092"]
//!
//! [log]
//! level = "debug"
//! ```

use std::{
    fs,
    io,
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;
use thiserror::Error;

use crate::{
    bus::BridgeSettings,
    codec::{DEFAULT_MAX_FRAME_LENGTH, MAX_FRAME_LENGTH, MIN_FRAME_LENGTH},
    connection::ConnectionSettings,
    server::default_workers,
};

/// Default configuration file consulted when `--conf` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "./wiregate.toml";

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration document.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    pub bus: BusConfig,
    pub log: LogConfig,
    pub metrics: MetricsConfig,
}

/// Address family the listener is restricted to.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    /// Either family.
    #[default]
    Tcp,
    Tcp4,
    Tcp6,
}

impl Network {
    /// Whether `addr` belongs to this family.
    #[must_use]
    pub fn admits(self, addr: &SocketAddr) -> bool {
        match self {
            Self::Tcp => true,
            Self::Tcp4 => addr.is_ipv4(),
            Self::Tcp6 => addr.is_ipv6(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    pub network: Network,
    pub read_buffer_size: usize,
    pub assurance_tick_secs: u64,
    pub connect_timeout_secs: u64,
    pub drain_timeout_secs: u64,
    pub max_frame_length: usize,
    pub workers: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 1883)),
            network: Network::Tcp,
            read_buffer_size: 64 * 1024,
            assurance_tick_secs: 5,
            connect_timeout_secs: 30,
            drain_timeout_secs: 10,
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
            workers: default_workers(),
        }
    }
}

/// Which bus implementation backs the bridge.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BusBackend {
    /// The process-local [`MemoryBus`](crate::bus::memory::MemoryBus).
    #[default]
    Memory,
    /// A Kafka cluster, available with the `kafka` feature.
    Kafka,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct BusConfig {
    pub backend: BusBackend,
    pub servers: Vec<String>,
    pub consumer_pool_size: usize,
    pub batch_interval_ms: u64,
    pub subscription_buffer: usize,
    pub partitions: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        let bridge = BridgeSettings::default();
        Self {
            backend: BusBackend::Memory,
            servers: Vec::new(),
            consumer_pool_size: bridge.consumer_pool_size,
            batch_interval_ms: u64::try_from(bridge.batch_interval.as_millis()).unwrap_or(u64::MAX),
            subscription_buffer: bridge.subscription_buffer,
            partitions: 1,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    /// An `EnvFilter` directive such as `info` or `wiregate=debug`.
    pub level: String,
    /// Append to this file instead of writing to stderr.
    pub path: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            path: None,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct MetricsConfig {
    /// Prometheus exporter address. No exporter is started when unset.
    pub listen: Option<SocketAddr>,
}

impl GatewayConfig {
    /// Parse and validate a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML or unknown keys and
    /// [`ConfigError::Invalid`] when a value fails validation.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, otherwise as
    /// [`from_toml_str`](Self::from_toml_str).
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let source = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    /// Load `path` if it exists, otherwise fall back to defaults.
    ///
    /// # Errors
    ///
    /// As [`load`](Self::load) when the file exists.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(source) => Self::from_toml_str(&source),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Check cross-field constraints that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let server = &self.server;
        if !server.network.admits(&server.listen) {
            return Err(invalid(format!(
                "server.listen {} does not match server.network {:?}",
                server.listen, server.network
            )));
        }
        let positive = [
            ("server.read-buffer-size", server.read_buffer_size),
            ("server.workers", server.workers),
            ("bus.consumer-pool-size", self.bus.consumer_pool_size),
            ("bus.subscription-buffer", self.bus.subscription_buffer),
            ("bus.partitions", self.bus.partitions),
        ];
        if let Some((key, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(invalid(format!("{key} must be greater than zero")));
        }
        if server.assurance_tick_secs == 0 {
            return Err(invalid("server.assurance-tick-secs must be greater than zero".to_owned()));
        }
        if self.bus.batch_interval_ms == 0 {
            return Err(invalid("bus.batch-interval-ms must be greater than zero".to_owned()));
        }
        if self.bus.backend == BusBackend::Kafka && self.bus.servers.is_empty() {
            return Err(invalid("bus.servers is required for the kafka backend".to_owned()));
        }
        Ok(())
    }

    /// Per-connection settings derived from `[server]`.
    #[must_use]
    pub fn connection_settings(&self) -> ConnectionSettings {
        let server = &self.server;
        ConnectionSettings {
            read_buffer_size: server.read_buffer_size,
            assurance_tick: Duration::from_secs(server.assurance_tick_secs),
            connect_timeout: Duration::from_secs(server.connect_timeout_secs),
            drain_timeout: Duration::from_secs(server.drain_timeout_secs),
            max_frame_length: server.max_frame_length.clamp(MIN_FRAME_LENGTH, MAX_FRAME_LENGTH),
        }
    }

    /// Bridge settings derived from `[bus]`.
    #[must_use]
    pub fn bridge_settings(&self) -> BridgeSettings {
        BridgeSettings {
            consumer_pool_size: self.bus.consumer_pool_size,
            batch_interval: Duration::from_millis(self.bus.batch_interval_ms),
            subscription_buffer: self.bus.subscription_buffer,
        }
    }
}

fn invalid(message: String) -> ConfigError { ConfigError::Invalid(message) }

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = GatewayConfig::from_toml_str("").expect("parse");
        assert_eq!(config, GatewayConfig::default());
        assert_eq!(config.server.listen, SocketAddr::from(([0, 0, 0, 0], 1883)));
        assert_eq!(config.bus.backend, BusBackend::Memory);
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn kebab_case_keys_are_read() {
        let config = GatewayConfig::from_toml_str(
            r#"
            [server]
            listen = "127.0.0.1:2883"
            network = "tcp4"
            read-buffer-size = 1024
            connect-timeout-secs = 3

            [bus]
            consumer-pool-size = 2
            batch-interval-ms = 50
            partitions = 4

            [log]
            level = "wiregate=debug"
            path = "/tmp/wiregate.log"

            [metrics]
            listen = "127.0.0.1:9000"
            "#,
        )
        .expect("parse");

        assert_eq!(config.server.network, Network::Tcp4);
        assert_eq!(config.server.read_buffer_size, 1024);
        assert_eq!(config.connection_settings().connect_timeout, Duration::from_secs(3));
        assert_eq!(config.bridge_settings().consumer_pool_size, 2);
        assert_eq!(config.bridge_settings().batch_interval, Duration::from_millis(50));
        assert_eq!(config.bus.partitions, 4);
        assert_eq!(config.log.path.as_deref(), Some(Path::new("/tmp/wiregate.log")));
        assert_eq!(config.metrics.listen, Some(SocketAddr::from(([127, 0, 0, 1], 9000))));
    }

    #[rstest]
    #[case("[server]\nlisten = \"[::1]:1883\"\nnetwork = \"tcp4\"")]
    #[case("[server]\nlisten = \"127.0.0.1:1883\"\nnetwork = \"tcp6\"")]
    #[case("[bus]\nconsumer-pool-size = 0")]
    #[case("[bus]\nsubscription-buffer = 0")]
    #[case("[bus]\nbatch-interval-ms = 0")]
    #[case("[bus]\nbackend = \"kafka\"")]
    #[case("[server]\nworkers = 0")]
    fn invalid_values_are_rejected(#[case] source: &str) {
        assert!(matches!(GatewayConfig::from_toml_str(source), Err(ConfigError::Invalid(_))));
    }

    #[rstest]
    #[case("[server]\nlisten = \"not an address\"")]
    #[case("[server]\nnetwork = \"udp\"")]
    #[case("[bus]\nunknown = 1")]
    #[case("[bogus]")]
    fn malformed_documents_are_parse_errors(#[case] source: &str) {
        assert!(matches!(GatewayConfig::from_toml_str(source), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn frame_length_is_clamped() {
        let config = GatewayConfig::from_toml_str("[server]\nmax-frame-length = 1").expect("parse");
        assert_eq!(config.connection_settings().max_frame_length, MIN_FRAME_LENGTH);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config =
            GatewayConfig::load_or_default(Path::new("/nonexistent/wiregate.toml")).expect("defaults");
        assert_eq!(config, GatewayConfig::default());
        assert!(matches!(
            GatewayConfig::load(Path::new("/nonexistent/wiregate.toml")),
            Err(ConfigError::Io { .. })
        ));
    }
}
