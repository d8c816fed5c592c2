//! Service configuration
//!
//! Loaded from an optional TOML file, then overridden by environment
//! variables such as `OBD_LOGGER_SERIAL__PORT=/dev/ttyUSB1`.

use config::{Config, ConfigError, Environment, File};
use obd_connection::{BackoffPolicy, ManagerConfig};
use obd_protocol::{catalog, CommandDescriptor, Elm327Config, ObdProtocol, DEFAULT_BAUD_RATE};
use obd_scheduler::PollerConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the config file
pub const CONFIG_PATH_ENV: &str = "OBD_LOGGER_CONFIG";
/// Config file used when [`CONFIG_PATH_ENV`] is unset
pub const DEFAULT_CONFIG_PATH: &str = "obd-logger.toml";
const ENV_PREFIX: &str = "OBD_LOGGER";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub serial: SerialConfig,
    pub polling: PollingConfig,
    pub discovery: DiscoveryConfig,
    pub reconnect: ReconnectConfig,
    pub storage: StorageConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

/// Adapter settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Device path; auto-detected when unset
    pub port: Option<String>,
    pub baud_rate: u32,
    pub timeout_ms: u64,
    pub protocol: ObdProtocol,
    /// Use the built-in simulated vehicle instead of a serial adapter
    pub simulate: bool,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: DEFAULT_BAUD_RATE,
            timeout_ms: 2000,
            protocol: ObdProtocol::Auto,
            simulate: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub interval_ms: u64,
    pub max_consecutive_errors: u32,
    pub error_backoff_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: 500,
            max_consecutive_errors: 10,
            error_backoff_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub probe_delay_ms: u64,
    /// Restrict discovery to these command names; empty probes the whole catalog
    pub commands: Vec<String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            probe_delay_ms: 100,
            commands: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub min_delay_secs: u64,
    pub max_delay_secs: u64,
    pub cap_exp: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            min_delay_secs: 5,
            max_delay_secs: 30,
            cap_exp: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub log_dir: PathBuf,
    /// Samples kept in memory for the API
    pub buffer_size: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("./logs/obd_data"),
            buffer_size: ring_buffer::DEFAULT_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8001".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `trace`, `debug`, `info`, `warn` or `error`
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Load from the file named by `OBD_LOGGER_CONFIG` (or the default path) and the environment
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(Path::new(&path))
    }

    /// A missing file is not an error; defaults apply
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from(path).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    pub fn elm327(&self) -> Elm327Config {
        Elm327Config {
            baud_rate: self.serial.baud_rate,
            timeout: Duration::from_millis(self.serial.timeout_ms),
            protocol: self.serial.protocol,
        }
    }

    pub fn manager(&self) -> ManagerConfig {
        ManagerConfig {
            port_hint: self.serial.port.clone(),
            backoff: BackoffPolicy {
                min_delay: Duration::from_secs(self.reconnect.min_delay_secs),
                max_delay: Duration::from_secs(self.reconnect.max_delay_secs),
                cap_exp: self.reconnect.cap_exp,
            },
            poller: PollerConfig {
                interval: Duration::from_millis(self.polling.interval_ms),
                max_consecutive_errors: self.polling.max_consecutive_errors.max(1),
                error_backoff: Duration::from_millis(self.polling.error_backoff_ms),
            },
            probe_delay: Duration::from_millis(self.discovery.probe_delay_ms),
        }
    }

    /// Candidate commands for discovery
    pub fn catalog(&self) -> Vec<CommandDescriptor> {
        catalog::filter_by_name(catalog::mode01(), &self.discovery.commands)
    }
}
